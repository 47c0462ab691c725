//! HTTP surface for the token issuer.
//!
//! [`router`] exposes a single `POST /token.oauth2` route. Requests may be form-encoded or JSON;
//! failures are rendered as `application/problem+json` objects whose status and code come from
//! [`Error::status`] and [`Error::code`].

// crates.io
use axum::{
	Form, Json, Router,
	extract::{FromRequest, Request, State},
	http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
	response::{IntoResponse, Response},
	routing::post,
};
// self
use crate::{
	_prelude::*,
	error::ErrorCategory,
	issuance::{BEARER, IssuedToken, TokenIssuer, TokenRequest},
};

/// Path of the token endpoint.
pub const TOKEN_PATH: &str = "/token.oauth2";
/// Content type of failure bodies.
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";
/// Code reported when the body cannot be decoded into a token request.
pub const INVALID_REQUEST_BODY: &str = "INVALID_REQUEST_BODY";

const ENTITLEMENT_DETAIL: &str = "Unable to generate a token for the given request.";

/// Builds the token endpoint router.
pub fn router(issuer: Arc<TokenIssuer>) -> Router {
	Router::new().route(TOKEN_PATH, post(issue_token)).with_state(issuer)
}

/// Successful token response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
	/// Signed access token.
	pub access_token: String,
	/// Always `Bearer`.
	pub token_type: String,
	/// Lifetime in seconds.
	pub expires_in: u64,
}
impl From<&IssuedToken> for TokenResponse {
	fn from(issued: &IssuedToken) -> Self {
		Self {
			access_token: issued.token.expose().to_owned(),
			token_type: BEARER.into(),
			expires_in: issued.expires_in,
		}
	}
}

/// Failure response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
	/// HTTP status code.
	pub status: u16,
	/// Stable machine-readable code.
	pub code: String,
	/// Short summary of the failure class.
	pub title: String,
	/// Human-readable explanation.
	pub detail: String,
}
impl Problem {
	fn body_rejected(detail: String) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST.as_u16(),
			code: INVALID_REQUEST_BODY.into(),
			title: ErrorCategory::RequestValidation.title().into(),
			detail,
		}
	}
}
impl From<&Error> for Problem {
	fn from(e: &Error) -> Self {
		let category = e.category();
		let detail = match category {
			// Never reveal which linked entity blocked the request.
			ErrorCategory::Entitlement => ENTITLEMENT_DETAIL.into(),
			ErrorCategory::DataDefect | ErrorCategory::Transient | ErrorCategory::Config =>
				category.title().into(),
			ErrorCategory::RequestValidation | ErrorCategory::Signature => e.to_string(),
		};

		Self { status: e.status(), code: e.code().into(), title: category.title().into(), detail }
	}
}
impl IntoResponse for Problem {
	fn into_response(self) -> Response {
		let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		let mut response = (status, Json(self)).into_response();

		response
			.headers_mut()
			.insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE));

		response
	}
}

async fn issue_token(State(issuer): State<Arc<TokenIssuer>>, request: Request) -> Response {
	let token_request = match decode(request).await {
		Ok(token_request) => token_request,
		Err(problem) => return problem.into_response(),
	};

	match issuer.issue(&token_request).await {
		Ok(issued) => Json(TokenResponse::from(&issued)).into_response(),
		Err(e) => Problem::from(&e).into_response(),
	}
}

async fn decode(request: Request) -> Result<TokenRequest, Problem> {
	let is_json = request
		.headers()
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.is_some_and(|value| value.trim_start().starts_with("application/json"));

	if is_json {
		Json::<TokenRequest>::from_request(request, &())
			.await
			.map(|Json(body)| body)
			.map_err(|rejection| Problem::body_rejected(rejection.body_text()))
	} else {
		Form::<TokenRequest>::from_request(request, &())
			.await
			.map(|Form(body)| body)
			.map_err(|rejection| Problem::body_rejected(rejection.body_text()))
	}
}
