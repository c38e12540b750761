//! Resource cache core
//!
//! A generic, hierarchical, lazily-populated cache over a remote management
//! API. Every resource kind reuses the same machinery and only supplies a
//! [`Remote`] implementation.
//!
//! # Architecture
//!
//! - [`id`] - Hierarchical resource identifiers
//! - [`status`] - Lifecycle status values
//! - [`remote`] - The per-kind collaborator contract
//! - [`module`] - Cache, paginated loading and delete for one kind under one parent
//! - [`resource`] - Cached entities with status overlays and refresh
//! - [`draft`] - Two-phase create/update
//! - [`tree`] - Type-erased parent/child navigation
//!
//! # Example
//!
//! ```ignore
//! use cloudtree::resource::ResourceModule;
//!
//! async fn show(remote: std::sync::Arc<MyRemote>) -> cloudtree::Result<()> {
//!     let accounts = ResourceModule::root("databaseAccounts", "sub-1", "Microsoft.DocumentDB")
//!         .client(remote)
//!         .build()?;
//!     for account in accounts.list().await {
//!         println!("{} {}", account.name(), account.status());
//!     }
//!     Ok(())
//! }
//! ```

pub mod draft;
pub mod id;
pub mod module;
pub mod remote;
#[allow(clippy::module_inception)]
pub mod resource;
pub mod status;
pub mod tree;

pub use draft::{Draft, DraftState};
pub use id::ResourceId;
pub use module::{ModuleBuilder, ResourceEvent, ResourceModule, DEFAULT_PAGE_SIZE};
pub use remote::{ClientSource, Page, Remote, ResourceKey, SubModuleFactory};
pub use resource::Resource;
pub use status::Status;
pub use tree::{ModuleNode, Node};
