//! Tenant identity, scopes, and the credential record TokenManager mutates.

pub mod credential;
pub mod id;
pub mod scope;
pub mod secret;
pub mod tenant;

pub use credential::*;
pub use id::*;
pub use scope::*;
pub use secret::*;
pub use tenant::*;
