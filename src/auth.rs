//! Client-assertion validation stages, access-token minting, and domain identifiers.
//!
//! Validation happens in three stages: [`assertion`] checks request and token structure without
//! touching a store, [`signature`] verifies the assertion against the key stored in the
//! token-generation table, and [`entitlement`] checks the denormalized platform states copied
//! onto consumer keys. [`access_token`] mints the signed token once all stages pass.

pub mod access_token;
pub mod assertion;
pub mod entitlement;
pub mod id;
pub mod signature;

pub use access_token::*;
pub use assertion::*;
pub use entitlement::*;
pub use id::*;
pub use signature::*;
