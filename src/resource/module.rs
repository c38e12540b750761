//! Resource module
//!
//! The cache and loader for every resource of one kind under one parent.
//!
//! # Loading
//!
//! - [`ResourceModule::list`] walks the remote pages at most once per cache
//!   epoch. Callers arriving while a walk is in flight join it through a
//!   shared future instead of starting a second one.
//! - [`ResourceModule::get`] serves cache hits directly and deduplicates
//!   concurrent misses for the same key the same way.
//! - Loads run on spawned tasks, so they complete even if every caller stops
//!   waiting.
//!
//! The cache lock is only held for in-memory bookkeeping, never across a
//! remote call.
//!
//! # Failure policy
//!
//! Transport failures while listing or fetching are logged and turned into
//! empty results. An empty listing may therefore mean "not available yet"
//! as well as "no resources".

use super::draft::Draft;
use super::id::ResourceId;
use super::remote::{ClientSource, Remote, ResourceKey, SubModuleFactory};
use super::resource::Resource;
use super::status::Status;
use super::tree::{ModuleNode, Node};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;

/// Page size used when the builder is not given one
pub const DEFAULT_PAGE_SIZE: usize = 100;

const EVENT_CAPACITY: usize = 64;

type SharedLoad = Shared<BoxFuture<'static, ()>>;
type SharedFetch<R> = Shared<BoxFuture<'static, Option<Arc<Resource<R>>>>>;

/// Cache change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    Added(ResourceId),
    Removed(ResourceId),
    StatusChanged {
        id: ResourceId,
        from: Status,
        to: Status,
    },
}

/// A snapshot converted through the collaborator
pub(crate) struct Fetched<S> {
    pub key: ResourceKey,
    pub status: Status,
    pub snapshot: S,
}

impl<S> Fetched<S> {
    pub(crate) fn convert<R: Remote<Snapshot = S>>(client: &R, snapshot: S) -> Self {
        Self {
            key: client.identity_of(&snapshot),
            status: client.status_of(&snapshot),
            snapshot,
        }
    }
}

enum Scope {
    /// Top-level kind: ids are `/subscriptions/{s}[/resourceGroups/{rg}]/providers/{ns}/{kind}/{name}`
    Root {
        subscription: ResourceId,
        namespace: String,
    },
    /// Nested kind: ids extend the parent's id
    Child {
        parent_id: ResourceId,
        parent_resource_group: Option<String>,
        parent: Weak<dyn Node>,
    },
}

struct CacheState<R: Remote> {
    entries: HashMap<ResourceKey, Arc<Resource<R>>>,
    /// Bumped by `refresh()`
    epoch: u64,
    loaded_epoch: Option<u64>,
    loading: Option<(u64, SharedLoad)>,
    fetching: HashMap<ResourceKey, SharedFetch<R>>,
    /// Bumped on every eviction
    evictions: u64,
    /// Eviction sequence per evicted key, kept while any load is in flight
    evicted: HashMap<ResourceKey, u64>,
}

impl<R: Remote> CacheState<R> {
    fn bury(&mut self, key: &ResourceKey) {
        self.evictions += 1;
        self.evicted.insert(key.clone(), self.evictions);
    }

    /// Whether `key` was evicted after a load that started at `since`
    fn evicted_since(&self, key: &ResourceKey, since: u64) -> bool {
        self.evicted.get(key).is_some_and(|at| *at > since)
    }

    fn prune_evicted(&mut self) {
        if self.loading.is_none() && self.fetching.is_empty() {
            self.evicted.clear();
        }
    }
}

/// Cache and lifecycle entry point for one resource kind under one parent
pub struct ResourceModule<R: Remote> {
    name: String,
    scope: Scope,
    client: ClientSource<R>,
    page_size: usize,
    sub_modules: Option<SubModuleFactory<R>>,
    state: Mutex<CacheState<R>>,
    events: broadcast::Sender<ResourceEvent>,
    this: Weak<Self>,
}

/// Builder returned by [`ResourceModule::root`] and [`ResourceModule::child`]
pub struct ModuleBuilder<R: Remote> {
    name: String,
    scope: Result<Scope>,
    client: Option<ClientSource<R>>,
    page_size: usize,
    sub_modules: Option<SubModuleFactory<R>>,
}

impl<R: Remote> ModuleBuilder<R> {
    /// Use a collaborator that is always available
    pub fn client(mut self, remote: Arc<R>) -> Self {
        self.client = Some(Arc::new(move || Some(Arc::clone(&remote))));
        self
    }

    /// Resolve the collaborator lazily, e.g. from the parent's snapshot
    pub fn client_source(mut self, source: impl Fn() -> Option<Arc<R>> + Send + Sync + 'static) -> Self {
        self.client = Some(Arc::new(source));
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Child modules each resource of this kind owns
    pub fn sub_modules(
        mut self,
        factory: impl Fn(&Arc<Resource<R>>) -> Vec<Arc<dyn ModuleNode>> + Send + Sync + 'static,
    ) -> Self {
        self.sub_modules = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<Arc<ResourceModule<R>>> {
        let scope = self.scope?;
        let client = self.client.unwrap_or_else(|| Arc::new(|| None));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new_cyclic(|this| ResourceModule {
            name: self.name,
            scope,
            client,
            page_size: self.page_size,
            sub_modules: self.sub_modules,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                epoch: 0,
                loaded_epoch: None,
                loading: None,
                fetching: HashMap::new(),
                evictions: 0,
                evicted: HashMap::new(),
            }),
            events,
            this: this.clone(),
        }))
    }
}

impl<R: Remote> ResourceModule<R> {
    /// Top-level module, e.g. `databaseAccounts` in `Microsoft.DocumentDB`
    pub fn root(name: &str, subscription_id: &str, namespace: &str) -> ModuleBuilder<R> {
        let scope = ResourceId::subscription(subscription_id).and_then(|subscription| {
            // Probe the full shape once so every id built later is well-formed
            subscription
                .clone()
                .provider(namespace)?
                .child(name, "probe")?;
            Ok(Scope::Root {
                subscription,
                namespace: namespace.to_string(),
            })
        });
        Self::builder(name, scope)
    }

    /// Module nested under a resource of another kind
    pub fn child<P: Remote>(name: &str, parent: &Arc<Resource<P>>) -> ModuleBuilder<R> {
        let parent_id = parent.id().clone();
        let scope = parent_id.clone().child(name, "probe").map(|_| {
            let node: Arc<dyn Node> = parent.clone();
            Scope::Child {
                parent_id,
                parent_resource_group: parent.resource_group().map(str::to_string),
                parent: Arc::downgrade(&node),
            }
        });
        Self::builder(name, scope)
    }

    fn builder(name: &str, scope: Result<Scope>) -> ModuleBuilder<R> {
        ModuleBuilder {
            name: name.to_string(),
            scope,
            client: None,
            page_size: DEFAULT_PAGE_SIZE,
            sub_modules: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn parent(&self) -> Option<Arc<dyn Node>> {
        match &self.scope {
            Scope::Root { .. } => None,
            Scope::Child { parent, .. } => parent.upgrade(),
        }
    }

    pub fn parent_id(&self) -> Option<&ResourceId> {
        match &self.scope {
            Scope::Root { .. } => None,
            Scope::Child { parent_id, .. } => Some(parent_id),
        }
    }

    /// The collaborator, or `None` while it is unavailable
    pub fn client(&self) -> Option<Arc<R>> {
        (self.client)()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }

    /// Whether a full walk has completed since the last `refresh()`
    pub fn is_loaded(&self) -> bool {
        let state = self.lock();
        state.loaded_epoch == Some(state.epoch)
    }

    /// Current cache contents, without any remote call
    pub fn cached(&self) -> Vec<Arc<Resource<R>>> {
        let mut entries: Vec<_> = self.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        entries
    }

    /// Cache lookup only
    pub fn cached_get(&self, name: &str, resource_group: Option<&str>) -> Option<Arc<Resource<R>>> {
        let resource_group = self.resource_group_or_parent(resource_group);
        find(&self.lock().entries, name, resource_group.as_deref())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Cached entry, or a single remote fetch on miss.
    ///
    /// Not-found and transport failures both return `None` and are never
    /// cached, so the next call asks the remote side again.
    pub async fn get(&self, name: &str, resource_group: Option<&str>) -> Option<Arc<Resource<R>>> {
        let resource_group = self.resource_group_or_parent(resource_group);
        let key = ResourceKey::new(name, resource_group.as_deref());

        let fetch = {
            let mut state = self.lock();
            if let Some(found) = find(&state.entries, name, resource_group.as_deref()) {
                tracing::debug!("{}: cache hit for {}", self.name, key);
                return Some(found);
            }
            match state.fetching.get(&key) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let fetch = self.spawn_fetch(key.clone());
                    state.fetching.insert(key, fetch.clone());
                    fetch
                },
            }
        };

        fetch.await
    }

    pub async fn exists(&self, name: &str, resource_group: Option<&str>) -> bool {
        self.get(name, resource_group).await.is_some()
    }

    /// All resources, walking the remote pages if this epoch is not loaded
    pub async fn list(&self) -> Vec<Arc<Resource<R>>> {
        let load = {
            let mut state = self.lock();
            let epoch = state.epoch;
            if state.loaded_epoch == Some(epoch) {
                None
            } else {
                match &state.loading {
                    Some((loading_epoch, load)) if *loading_epoch == epoch => Some(load.clone()),
                    _ => {
                        let load = self.spawn_load(epoch);
                        state.loading = Some((epoch, load.clone()));
                        Some(load)
                    },
                }
            }
        };

        if let Some(load) = load {
            load.await;
        }
        self.cached()
    }

    /// Forget that the module is loaded; entries stay until reconciled
    pub fn refresh(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.loaded_epoch = None;
        tracing::debug!("{}: invalidated, epoch {}", self.name, state.epoch);
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Stage creation of a new resource; nothing is cached until commit
    pub fn create(self: &Arc<Self>, name: &str, resource_group: Option<&str>, config: R::Config) -> Draft<R> {
        let resource_group = self.resource_group_or_parent(resource_group);
        let key = ResourceKey::new(name, resource_group.as_deref());
        let placeholder = self.materialize(key);
        Draft::for_create(Arc::clone(self), placeholder, config)
    }

    /// Stage an update of an existing resource
    pub fn update(self: &Arc<Self>, existing: &Arc<Resource<R>>, config: R::Config) -> Draft<R> {
        Draft::for_update(Arc::clone(self), Arc::clone(existing), config)
    }

    /// Update draft if the resource exists, create draft otherwise
    pub async fn update_or_create(
        self: &Arc<Self>,
        name: &str,
        resource_group: Option<&str>,
        config: R::Config,
    ) -> Draft<R> {
        match self.get(name, resource_group).await {
            Some(existing) => self.update(&existing, config),
            None => self.create(name, resource_group, config),
        }
    }

    /// Delete a resource.
    ///
    /// The cached entry shows `Deleting` before the remote call is issued
    /// and is evicted once it succeeds. On failure this delete's overlay is
    /// withdrawn and the remote error is returned; overlapping operations on
    /// the same resource keep theirs.
    pub async fn delete(&self, id: &ResourceId) -> Result<()> {
        let target = find(&self.lock().entries, id.name(), id.resource_group_name());
        if let Some(resource) = &target {
            resource.begin(Status::Deleting);
        }

        let finish = || {
            if let Some(resource) = &target {
                resource.finish(Status::Deleting);
            }
        };

        let Some(client) = self.client() else {
            finish();
            return Err(Error::ClientUnavailable(self.name.clone()));
        };

        tracing::info!("Deleting {}", id);
        match client.delete_one(id).await {
            Ok(()) => {
                match &target {
                    Some(resource) => {
                        resource.confirm_deleted();
                        self.evict(resource);
                    },
                    None => self
                        .lock()
                        .bury(&ResourceKey::new(id.name(), id.resource_group_name())),
                }
                finish();
                Ok(())
            },
            Err(e) => {
                tracing::error!("Failed to delete {}: {:#}", id, e);
                finish();
                Err(Error::Remote(e))
            },
        }
    }

    // =========================================================================
    // Internals shared with Resource and Draft
    // =========================================================================

    /// Remote fetch that bypasses the cache; errors are left to the caller
    pub(crate) async fn fetch_one(
        &self,
        name: &str,
        resource_group: Option<&str>,
    ) -> anyhow::Result<Option<Fetched<R::Snapshot>>> {
        let Some(client) = self.client() else {
            anyhow::bail!("client for module '{}' is not available", self.name);
        };
        let snapshot = client.get_one(name, resource_group).await?;
        Ok(snapshot.map(|s| Fetched::convert(client.as_ref(), s)))
    }

    /// Make `resource` reflect `fetched` and return the cache entry for the
    /// fetched key, inserting `resource` itself when it has that key.
    pub(crate) fn adopt(&self, resource: &Arc<Resource<R>>, fetched: Fetched<R::Snapshot>) -> Arc<Resource<R>> {
        let (entry, added) = {
            let mut state = self.lock();
            let (entry, added) = match state.entries.get(&fetched.key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let entry = if resource.key() == &fetched.key {
                        Arc::clone(resource)
                    } else {
                        self.materialize(fetched.key.clone())
                    };
                    state.entries.insert(fetched.key.clone(), Arc::clone(&entry));
                    (entry, true)
                },
            };
            entry.observe_fetched(&fetched);
            if !Arc::ptr_eq(&entry, resource) && resource.key() == &fetched.key {
                resource.observe_fetched(&fetched);
            }
            (entry, added)
        };

        if added {
            self.emit(ResourceEvent::Added(entry.id().clone()));
        }
        entry
    }

    /// Remove `resource` from the cache if it is still the live entry.
    ///
    /// Loads already in flight will not bring the key back.
    pub(crate) fn evict(&self, resource: &Arc<Resource<R>>) {
        let removed = {
            let mut state = self.lock();
            state.bury(resource.key());
            match state.entries.get(resource.key()) {
                Some(entry) if Arc::ptr_eq(entry, resource) => state.entries.remove(resource.key()),
                _ => None,
            }
        };
        if removed.is_some() {
            self.emit(ResourceEvent::Removed(resource.id().clone()));
        }
    }

    pub(crate) fn emit(&self, event: ResourceEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn build_sub_modules(&self, resource: &Arc<Resource<R>>) -> Vec<Arc<dyn ModuleNode>> {
        self.sub_modules
            .as_ref()
            .map(|factory| factory(resource))
            .unwrap_or_default()
    }

    fn materialize(&self, key: ResourceKey) -> Arc<Resource<R>> {
        let id = self.resource_id(&key);
        Resource::new(self.this.clone(), key, id)
    }

    /// Merge a loaded snapshot into the cache, unless its key was evicted
    /// after the load started at eviction sequence `since`
    fn upsert(&self, fetched: Fetched<R::Snapshot>, since: u64) -> Option<Arc<Resource<R>>> {
        let (entry, added) = {
            let mut state = self.lock();
            if state.evicted_since(&fetched.key, since) {
                tracing::debug!("{}: {} was evicted during the load, skipping", self.name, fetched.key);
                return None;
            }
            let (entry, added) = match state.entries.get(&fetched.key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let entry = self.materialize(fetched.key.clone());
                    state.entries.insert(fetched.key.clone(), Arc::clone(&entry));
                    (entry, true)
                },
            };
            entry.observe(fetched.snapshot, fetched.status);
            (entry, added)
        };

        if added {
            self.emit(ResourceEvent::Added(entry.id().clone()));
        }
        Some(entry)
    }

    fn resource_id(&self, key: &ResourceKey) -> ResourceId {
        match &self.scope {
            Scope::Root {
                subscription,
                namespace,
            } => {
                let scoped = match &key.resource_group {
                    Some(rg) => subscription.nested("resourceGroups", rg),
                    None => subscription.clone(),
                };
                scoped
                    .nested("providers", namespace)
                    .nested(&self.name, &key.name)
            },
            Scope::Child { parent_id, .. } => parent_id.nested(&self.name, &key.name),
        }
    }

    fn resource_group_or_parent(&self, resource_group: Option<&str>) -> Option<String> {
        match (resource_group, &self.scope) {
            (Some(rg), _) => Some(rg.to_string()),
            (
                None,
                Scope::Child {
                    parent_resource_group,
                    ..
                },
            ) => parent_resource_group.clone(),
            (None, Scope::Root { .. }) => None,
        }
    }

    fn spawn_fetch(&self, key: ResourceKey) -> SharedFetch<R> {
        let Some(this) = self.this.upgrade() else {
            return futures::future::ready(None).boxed().shared();
        };

        // The task clears its own marker so an abandoned fetch is never
        // joined by a later get. The caller inserts the marker while holding
        // the cache lock, which the task needs first.
        let task = tokio::spawn(async move {
            let found = this.fetch_into_cache(&key).await;
            let mut state = this.lock();
            state.fetching.remove(&key);
            state.prune_evicted();
            found
        });

        async move { task.await.ok().flatten() }.boxed().shared()
    }

    async fn fetch_into_cache(&self, key: &ResourceKey) -> Option<Arc<Resource<R>>> {
        if self.client().is_none() {
            tracing::debug!("{}: no client, cannot fetch {}", self.name, key);
            return None;
        }

        let since = self.lock().evictions;
        match self.fetch_one(&key.name, key.resource_group.as_deref()).await {
            Ok(Some(fetched)) => self.upsert(fetched, since),
            Ok(None) => {
                tracing::debug!("{}: {} not found", self.name, key);
                None
            },
            Err(e) => {
                tracing::warn!("{}: failed to load {}: {:#}", self.name, key, e);
                None
            },
        }
    }

    fn spawn_load(&self, epoch: u64) -> SharedLoad {
        let Some(this) = self.this.upgrade() else {
            return futures::future::ready(()).boxed().shared();
        };

        let task = tokio::spawn(async move { this.load_all(epoch).await });
        let module = self.this.clone();

        async move {
            if task.await.is_err() {
                if let Some(module) = module.upgrade() {
                    module.finish_load(epoch, None);
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn load_all(self: Arc<Self>, epoch: u64) {
        let Some(client) = self.client() else {
            tracing::debug!("{}: no client, nothing to load", self.name);
            self.finish_load(epoch, None);
            return;
        };

        let (known, since) = {
            let state = self.lock();
            let known: HashSet<ResourceKey> = state.entries.keys().cloned().collect();
            (known, state.evictions)
        };
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        let complete = loop {
            match client.list_page(page_token.as_deref(), self.page_size).await {
                Ok(page) => {
                    pages += 1;
                    tracing::debug!("{}: page {} with {} items", self.name, pages, page.items.len());

                    for snapshot in page.items {
                        let fetched = Fetched::convert(client.as_ref(), snapshot);
                        seen.insert(fetched.key.clone());
                        self.upsert(fetched, since);
                    }

                    match page.next_page_token {
                        None => break true,
                        Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                            tracing::warn!("{}: page token '{}' repeated, stopping", self.name, next);
                            break false;
                        },
                        Some(next) => page_token = Some(next),
                    }
                },
                Err(e) => {
                    tracing::warn!("{}: failed to list page {}: {:#}", self.name, pages + 1, e);
                    break false;
                },
            }
        };

        self.finish_load(epoch, complete.then_some((known, seen)));
    }

    /// Clear the in-flight marker and, after a complete walk, mark the epoch
    /// loaded and drop entries the walk no longer reported.
    fn finish_load(&self, epoch: u64, walk: Option<(HashSet<ResourceKey>, HashSet<ResourceKey>)>) {
        let removed: Vec<Arc<Resource<R>>> = {
            let mut state = self.lock();
            if matches!(&state.loading, Some((loading_epoch, _)) if *loading_epoch == epoch) {
                state.loading = None;
            }
            state.prune_evicted();

            match walk {
                Some((known, seen)) if state.epoch == epoch => {
                    state.loaded_epoch = Some(epoch);
                    let stale: Vec<ResourceKey> = known
                        .difference(&seen)
                        .filter(|key| {
                            state
                                .entries
                                .get(*key)
                                .is_some_and(|r| r.pending().is_none())
                        })
                        .cloned()
                        .collect();
                    stale
                        .iter()
                        .filter_map(|key| state.entries.remove(key))
                        .collect()
                },
                _ => Vec::new(),
            }
        };

        for resource in removed {
            resource.confirm_deleted();
            self.emit(ResourceEvent::Removed(resource.id().clone()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<R>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn find<R: Remote>(
    entries: &HashMap<ResourceKey, Arc<Resource<R>>>,
    name: &str,
    resource_group: Option<&str>,
) -> Option<Arc<Resource<R>>> {
    if let Some(rg) = resource_group {
        return entries.get(&ResourceKey::new(name, Some(rg))).cloned();
    }
    entries
        .iter()
        .filter(|(key, _)| key.matches(name, None))
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, resource)| Arc::clone(resource))
}

#[async_trait]
impl<R: Remote> ModuleNode for ResourceModule<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> Option<Arc<dyn Node>> {
        ResourceModule::parent(self)
    }

    fn refresh(&self) {
        ResourceModule::refresh(self)
    }

    async fn list_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.list()
            .await
            .into_iter()
            .map(|r| r as Arc<dyn Node>)
            .collect()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
