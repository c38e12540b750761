//! Remote collaborator contract
//!
//! Each resource kind plugs into the generic cache by implementing
//! [`Remote`]: page through the remote collection, fetch/delete one item,
//! optionally create/update, and convert a raw snapshot into identity and
//! status. Everything else (caching, paging orchestration, drafts, status
//! overlays) lives in the core.

use super::id::ResourceId;
use super::resource::Resource;
use super::status::Status;
use super::tree::ModuleNode;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One page of a remote listing
#[derive(Debug, Clone)]
pub struct Page<S> {
    pub items: Vec<S>,
    /// `None` marks the final page
    pub next_page_token: Option<String>,
}

impl<S> Page<S> {
    pub fn last(items: Vec<S>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    pub fn more(items: Vec<S>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.into()),
        }
    }
}

/// Cache key of a resource within its module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub name: String,
    pub resource_group: Option<String>,
}

impl ResourceKey {
    pub fn new(name: impl Into<String>, resource_group: Option<&str>) -> Self {
        Self {
            name: name.into(),
            resource_group: resource_group.map(str::to_string),
        }
    }

    /// Lookup match; a key without a resource group matches any group
    pub(crate) fn matches(&self, name: &str, resource_group: Option<&str>) -> bool {
        self.name == name
            && match resource_group {
                Some(rg) => self.resource_group.as_deref() == Some(rg),
                None => true,
            }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_group {
            Some(rg) => write!(f, "{}/{}", rg, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Per-kind remote operations consumed by [`super::ResourceModule`]
#[async_trait]
pub trait Remote: Send + Sync + Sized + 'static {
    /// Raw representation of one resource as returned by the remote side
    type Snapshot: Clone + Send + Sync + 'static;

    /// Desired-state configuration staged in a draft
    type Config: Clone + Send + Sync + 'static;

    /// Fetch one page. Must be repeatable from any token.
    async fn list_page(
        &self,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Self::Snapshot>>;

    /// Fetch one item; `Ok(None)` is the normal not-found outcome
    async fn get_one(
        &self,
        name: &str,
        resource_group: Option<&str>,
    ) -> Result<Option<Self::Snapshot>>;

    /// Delete one item. Deleting something already gone must succeed.
    async fn delete_one(&self, id: &ResourceId) -> Result<()>;

    async fn create_one(
        &self,
        name: &str,
        resource_group: Option<&str>,
        config: &Self::Config,
    ) -> Result<Self::Snapshot> {
        let _ = (resource_group, config);
        Err(anyhow::anyhow!("Creating '{}' is not supported", name))
    }

    async fn update_one(
        &self,
        id: &ResourceId,
        current: Option<&Self::Snapshot>,
        config: &Self::Config,
    ) -> Result<Self::Snapshot> {
        let _ = (current, config);
        Err(anyhow::anyhow!("Updating '{}' is not supported", id))
    }

    /// Identity of a snapshot (pure, no I/O)
    fn identity_of(&self, snapshot: &Self::Snapshot) -> ResourceKey;

    /// Status implied by a snapshot (pure, no I/O)
    fn status_of(&self, snapshot: &Self::Snapshot) -> Status;
}

/// Builds the child modules owned by a freshly materialized resource
pub type SubModuleFactory<R> =
    Arc<dyn Fn(&Arc<Resource<R>>) -> Vec<Arc<dyn ModuleNode>> + Send + Sync>;

/// Supplies the collaborator handle, or `None` while it is unavailable
pub type ClientSource<R> = Arc<dyn Fn() -> Option<Arc<R>> + Send + Sync>;
