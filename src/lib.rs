//! cloudtree
//!
//! Client-side, hierarchical, lazily-populated cache of cloud control-plane
//! resources. All reads, creates, updates and deletes against the remote
//! management API go through it.
//!
//! - [`resource`] - The generic cache/lifecycle core
//! - [`rest`] - A collaborator for JSON REST management endpoints
//! - [`mock`] - An in-memory collaborator
//! - [`config`] - Persisted user configuration

pub mod config;
pub mod error;
pub mod mock;
pub mod resource;
pub mod rest;

pub use error::{Error, Result};
pub use resource::{
    Draft, DraftState, ModuleNode, Node, Page, Remote, Resource, ResourceEvent, ResourceId,
    ResourceKey, ResourceModule, Status,
};
