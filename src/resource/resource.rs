//! Cached resource
//!
//! A [`Resource`] is the stable client-side handle for one remote entity.
//! Its identity never changes; the snapshot behind it is replaced in place
//! on every load, so long-lived references observe updates.

use super::draft::Draft;
use super::id::ResourceId;
use super::module::{Fetched, ResourceEvent, ResourceModule};
use super::remote::{Remote, ResourceKey};
use super::status::Status;
use super::tree::{ModuleNode, Node};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

/// Snapshot plus the local overlays that drive [`Resource::status`]
struct Observed<S> {
    remote: Option<S>,
    observed: Status,
    /// Local operations in flight, counted per kind
    in_flight: InFlight,
    deleted: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Overlapping local operations; each one only ever removes itself
#[derive(Debug, Default, Clone, Copy)]
struct InFlight {
    creating: usize,
    updating: usize,
    deleting: usize,
}

impl InFlight {
    fn counter(&mut self, operation: Status) -> Option<&mut usize> {
        match operation {
            Status::Creating => Some(&mut self.creating),
            Status::Updating => Some(&mut self.updating),
            Status::Deleting => Some(&mut self.deleting),
            _ => None,
        }
    }

    /// Deleting outranks the others
    fn status(&self) -> Option<Status> {
        if self.deleting > 0 {
            Some(Status::Deleting)
        } else if self.creating > 0 {
            Some(Status::Creating)
        } else if self.updating > 0 {
            Some(Status::Updating)
        } else {
            None
        }
    }
}

impl<S> Observed<S> {
    fn status(&self) -> Status {
        if let Some(pending) = self.in_flight.status() {
            return pending;
        }
        if self.deleted {
            return Status::Deleted;
        }
        self.observed
    }
}

/// One remote entity owned by a [`ResourceModule`]
pub struct Resource<R: Remote> {
    key: ResourceKey,
    id: ResourceId,
    module: Weak<ResourceModule<R>>,
    observed: RwLock<Observed<R::Snapshot>>,
    children: OnceLock<Vec<Arc<dyn ModuleNode>>>,
    this: Weak<Self>,
}

impl<R: Remote> Resource<R> {
    pub(crate) fn new(module: Weak<ResourceModule<R>>, key: ResourceKey, id: ResourceId) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            key,
            id,
            module,
            observed: RwLock::new(Observed {
                remote: None,
                observed: Status::Unknown,
                in_flight: InFlight::default(),
                deleted: false,
                refreshed_at: None,
            }),
            children: OnceLock::new(),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.key.resource_group.as_deref()
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Current status: a pending local operation wins, then a confirmed
    /// deletion, then whatever the last snapshot implied.
    pub fn status(&self) -> Status {
        self.read().status()
    }

    /// Clone of the last observed snapshot
    pub fn remote(&self) -> Option<R::Snapshot> {
        self.read().remote.clone()
    }

    /// Project a value out of the snapshot without cloning it
    pub fn with_remote<T>(&self, f: impl FnOnce(&R::Snapshot) -> T) -> Option<T> {
        self.read().remote.as_ref().map(f)
    }

    pub fn has_remote(&self) -> bool {
        self.read().remote.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.read().deleted
    }

    /// When the snapshot was last replaced
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.read().refreshed_at
    }

    pub fn module(&self) -> Option<Arc<ResourceModule<R>>> {
        self.module.upgrade()
    }

    pub fn parent(&self) -> Option<Arc<dyn Node>> {
        self.module.upgrade().and_then(|m| m.parent())
    }

    /// Child modules, built once on first access
    pub fn sub_modules(&self) -> Vec<Arc<dyn ModuleNode>> {
        self.children
            .get_or_init(|| match (self.module.upgrade(), self.this.upgrade()) {
                (Some(module), Some(this)) => module.build_sub_modules(&this),
                _ => Vec::new(),
            })
            .clone()
    }

    /// Typed access to a child module by name
    pub fn sub_module<C: Remote>(&self, name: &str) -> Option<Arc<ResourceModule<C>>> {
        self.sub_modules()
            .into_iter()
            .find(|m| m.name() == name)
            .and_then(|m| m.as_any().downcast::<ResourceModule<C>>().ok())
    }

    /// Re-fetch the snapshot through the owning module.
    ///
    /// Not-found marks the resource deleted and evicts it; a transport
    /// failure keeps the current snapshot.
    pub async fn refresh(self: &Arc<Self>) -> Arc<Self> {
        let Some(module) = self.module.upgrade() else {
            return Arc::clone(self);
        };

        match module.fetch_one(self.name(), self.resource_group()).await {
            Ok(Some(fetched)) => {
                self.observe(fetched.snapshot, fetched.status);
            },
            Ok(None) => {
                tracing::debug!("{} no longer exists remotely", self.id);
                self.confirm_deleted();
                module.evict(self);
            },
            Err(e) => {
                tracing::warn!("Failed to refresh {}: {:#}", self.id, e);
            },
        }

        Arc::clone(self)
    }

    /// Refresh until the status leaves Creating/Updating/Deleting
    pub async fn wait_until_stable(self: &Arc<Self>, interval: Duration, max_polls: usize) -> Status {
        let mut polls = 0;
        loop {
            let status = self.status();
            if status.is_stable() || polls >= max_polls {
                return status;
            }
            tokio::time::sleep(interval).await;
            self.refresh().await;
            polls += 1;
        }
    }

    /// Delete through the owning module
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        let module = self.owning_module()?;
        module.delete(&self.id).await
    }

    /// Stage an update of this resource
    pub fn update(self: &Arc<Self>, config: R::Config) -> Result<Draft<R>> {
        let module = self.owning_module()?;
        Ok(module.update(self, config))
    }

    fn owning_module(&self) -> Result<Arc<ResourceModule<R>>> {
        self.module
            .upgrade()
            .ok_or_else(|| Error::ClientUnavailable(self.id.to_string()))
    }

    // =========================================================================
    // Transitions (driven by the module and drafts only)
    // =========================================================================

    pub(crate) fn observe(&self, snapshot: R::Snapshot, status: Status) {
        self.transition(|o| {
            o.remote = Some(snapshot);
            o.observed = status;
            o.deleted = false;
            o.refreshed_at = Some(Utc::now());
        });
    }

    pub(crate) fn observe_fetched(&self, fetched: &Fetched<R::Snapshot>) {
        self.observe(fetched.snapshot.clone(), fetched.status);
    }

    /// Start a local operation (Creating, Updating or Deleting).
    ///
    /// Every `begin` must be paired with exactly one [`Self::finish`] for the
    /// same operation.
    pub(crate) fn begin(&self, operation: Status) {
        self.transition(|o| {
            if let Some(count) = o.in_flight.counter(operation) {
                *count += 1;
            }
        });
    }

    /// End a local operation started with [`Self::begin`]
    pub(crate) fn finish(&self, operation: Status) {
        self.transition(|o| {
            if let Some(count) = o.in_flight.counter(operation) {
                *count = count.saturating_sub(1);
            }
        });
    }

    pub(crate) fn pending(&self) -> Option<Status> {
        self.read().in_flight.status()
    }

    /// The remote side no longer has this resource. Operations still in
    /// flight keep overriding the status until they finish.
    pub(crate) fn confirm_deleted(&self) {
        self.transition(|o| o.deleted = true);
    }

    fn transition(&self, f: impl FnOnce(&mut Observed<R::Snapshot>)) {
        let (from, to) = {
            let mut observed = self.write();
            let from = observed.status();
            f(&mut observed);
            (from, observed.status())
        };

        if from != to {
            tracing::debug!("{}: {} -> {}", self.id, from, to);
            if let Some(module) = self.module.upgrade() {
                module.emit(ResourceEvent::StatusChanged {
                    id: self.id.clone(),
                    from,
                    to,
                });
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Observed<R::Snapshot>> {
        self.observed.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Observed<R::Snapshot>> {
        self.observed.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<R: Remote> Node for Resource<R> {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.key.name
    }

    fn resource_group(&self) -> Option<&str> {
        self.key.resource_group.as_deref()
    }

    fn status(&self) -> Status {
        Resource::status(self)
    }

    fn parent(&self) -> Option<Arc<dyn Node>> {
        Resource::parent(self)
    }

    fn sub_modules(&self) -> Vec<Arc<dyn ModuleNode>> {
        Resource::sub_modules(self)
    }
}

impl<R: Remote> fmt::Debug for Resource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id.to_string())
            .field("status", &self.status())
            .field("has_remote", &self.has_remote())
            .finish()
    }
}
