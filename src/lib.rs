//! Event-driven platform-state projections and a client-assertion token issuer.
//!
//! The crate keeps two denormalized tables in sync with upstream agreement, catalog, purpose, and
//! client events ([`projection`]), and consumes them to authorize `client_credentials` requests
//! signed with a client assertion ([`issuance`]). Every write is version-guarded so redelivered or
//! reordered events converge to the same state.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
#[cfg(feature = "server")] pub mod http;
pub mod issuance;
pub mod obs;
pub mod projection;
pub mod state;
pub mod store;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use jsonwebtoken;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tower as _};
