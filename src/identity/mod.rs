//! Identity and credential subsystem.
//!
//! Establishes who a caller is across two independent authentication
//! paths (password and federated Google identity) plus the shared
//! normalization rules both paths and the resource handlers depend on.

pub mod error;
pub mod federated;
pub mod model;
pub mod normalize;
pub mod request;
pub mod schema;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use model::Account;
pub use schema::SchemaCapabilities;
pub use store::UserRepo;
pub use token::GoogleTokenVerifier;
