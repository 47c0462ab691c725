#![cfg(feature = "server")]

mod common;

// crates.io
use axum::{
	body::{self, Body},
	http::{Request, StatusCode, header::CONTENT_TYPE},
	response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;
// self
use common::*;
use platform_token_engine::{
	auth::CLIENT_ASSERTION_TYPE,
	http::{self, PROBLEM_CONTENT_TYPE, Problem, TOKEN_PATH, TokenResponse},
};

async fn post(engine: &Engine, content_type: &str, body: String) -> Response {
	http::router(engine.issuer.clone())
		.oneshot(
			Request::post(TOKEN_PATH)
				.header(CONTENT_TYPE, content_type)
				.body(Body::from(body))
				.expect("Request should build."),
		)
		.await
		.expect("Router should respond.")
}

async fn json_body<T>(response: Response) -> T
where
	T: serde::de::DeserializeOwned,
{
	let bytes =
		body::to_bytes(response.into_body(), usize::MAX).await.expect("Body should be readable.");

	serde_json::from_slice(&bytes).expect("Body should be JSON.")
}

fn form(client_assertion: &str) -> String {
	url::form_urlencoded::Serializer::new(String::new())
		.append_pair("client_id", CLIENT)
		.append_pair("client_assertion_type", CLIENT_ASSERTION_TYPE)
		.append_pair("client_assertion", client_assertion)
		.append_pair("grant_type", "client_credentials")
		.finish()
}

#[tokio::test]
async fn form_requests_receive_bearer_tokens() {
	let engine = Engine::new();

	engine.seed_active_consumer().await;

	let response = post(
		&engine,
		"application/x-www-form-urlencoded",
		form(&assertion(CLIENT_PRIVATE, Some(PURPOSE))),
	)
	.await;

	assert_eq!(response.status(), StatusCode::OK);

	let token: TokenResponse = json_body(response).await;

	assert_eq!(token.token_type, "Bearer");
	assert_eq!(token.expires_in, u64::from(VOUCHER_LIFESPAN));
	assert_eq!(token.access_token.split('.').count(), 3);
}

#[tokio::test]
async fn json_requests_are_accepted() {
	let engine = Engine::new();

	engine.apply(&client(1, "ClientAdded", "API", &[], json!({}))).await;

	let body = json!({
		"client_assertion_type": CLIENT_ASSERTION_TYPE,
		"client_assertion": assertion(CLIENT_PRIVATE, None),
		"grant_type": "client_credentials"
	});
	let response = post(&engine, "application/json", body.to_string()).await;

	assert_eq!(response.status(), StatusCode::OK);

	let token: Value = json_body(response).await;

	assert_eq!(token["expires_in"], 3_600);
}

#[tokio::test]
async fn entitlement_failures_are_coarse_problems() {
	let engine = Engine::new();

	engine.seed_active_consumer().await;
	engine.apply(&descriptor(2, "EServiceDescriptorSuspended", "Suspended")).await;

	let response = post(
		&engine,
		"application/x-www-form-urlencoded",
		form(&assertion(CLIENT_PRIVATE, Some(PURPOSE))),
	)
	.await;

	assert_eq!(response.status(), StatusCode::FORBIDDEN);
	assert_eq!(
		response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
		Some(PROBLEM_CONTENT_TYPE)
	);

	let problem: Problem = json_body(response).await;

	assert_eq!(problem.status, 403);
	assert_eq!(problem.code, "PLATFORM_STATE_VALIDATION_FAILED");
	assert!(!problem.detail.to_lowercase().contains("descriptor"));
}

#[tokio::test]
async fn undecodable_bodies_are_bad_requests() {
	let engine = Engine::new();
	let response = post(&engine, "application/json", "{not json".into()).await;

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let problem: Problem = json_body(response).await;

	assert_eq!(problem.code, http::INVALID_REQUEST_BODY);

	let response =
		post(&engine, "application/x-www-form-urlencoded", "grant_type=password".into()).await;
	let problem: Problem = json_body(response).await;

	assert_eq!(problem.status, 400);
	assert_eq!(problem.code, "CLIENT_ASSERTION_VALIDATION_FAILED");
}
