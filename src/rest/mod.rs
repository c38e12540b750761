//! JSON REST collaborator
//!
//! - [`client`] - Authenticated HTTP calls and remote error extraction
//! - [`remote`] - [`crate::resource::Remote`] over a REST collection

pub mod client;
pub mod remote;

pub use client::RestClient;
pub use remote::{RestKind, RestRemote};
