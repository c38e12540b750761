//! Type-erased resource tree
//!
//! Parents own their child modules; children only hold a weak back-reference
//! to their parent. These traits let a resource of one kind expose modules
//! of other kinds without knowing their collaborator types.

use super::id::ResourceId;
use super::status::Status;
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

/// A resource of any kind
pub trait Node: Send + Sync {
    fn id(&self) -> &ResourceId;
    fn name(&self) -> &str;
    fn resource_group(&self) -> Option<&str>;
    fn status(&self) -> Status;
    fn parent(&self) -> Option<Arc<dyn Node>>;

    /// Child modules; empty (never absent) for leaf kinds
    fn sub_modules(&self) -> Vec<Arc<dyn ModuleNode>>;
}

/// A module of any kind
#[async_trait]
pub trait ModuleNode: Send + Sync {
    fn name(&self) -> &str;
    fn parent(&self) -> Option<Arc<dyn Node>>;

    /// Invalidate the loaded marker; the next listing re-walks the pages
    fn refresh(&self);

    async fn list_nodes(&self) -> Vec<Arc<dyn Node>>;

    /// Recover the concrete module type, see [`super::Resource::sub_module`]
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
