//! Drafts
//!
//! A [`Draft`] stages a create or an update without touching the cache. The
//! staged configuration only reaches shared state through a successful
//! [`Draft::commit`], which can happen at most once.

use super::module::{Fetched, ResourceModule};
use super::remote::Remote;
use super::resource::Resource;
use super::status::Status;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Draft lifecycle: `Staged -> Committing -> {Committed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    Staged,
    Committing,
    Committed,
    Failed,
}

impl DraftState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Create,
    Update,
}

/// Staged, uncommitted create or update intent
pub struct Draft<R: Remote> {
    id: Uuid,
    intent: Intent,
    module: Arc<ResourceModule<R>>,
    /// Placeholder (create) or target (update)
    resource: Arc<Resource<R>>,
    config: Mutex<R::Config>,
    state: Mutex<DraftState>,
}

impl<R: Remote> Draft<R> {
    pub(crate) fn for_create(module: Arc<ResourceModule<R>>, placeholder: Arc<Resource<R>>, config: R::Config) -> Self {
        Self::new(Intent::Create, module, placeholder, config)
    }

    pub(crate) fn for_update(module: Arc<ResourceModule<R>>, target: Arc<Resource<R>>, config: R::Config) -> Self {
        Self::new(Intent::Update, module, target, config)
    }

    fn new(intent: Intent, module: Arc<ResourceModule<R>>, resource: Arc<Resource<R>>, config: R::Config) -> Self {
        let draft = Self {
            id: Uuid::new_v4(),
            intent,
            module,
            resource,
            config: Mutex::new(config),
            state: Mutex::new(DraftState::Staged),
        };
        tracing::debug!(draft = %draft.id, "Staged {:?} of {}", intent, draft.resource.id());
        draft
    }

    /// Correlation id for logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.resource.resource_group()
    }

    pub fn is_create(&self) -> bool {
        self.intent == Intent::Create
    }

    pub fn is_update(&self) -> bool {
        self.intent == Intent::Update
    }

    pub fn state(&self) -> DraftState {
        *lock(&self.state)
    }

    /// The placeholder being created, or the resource being updated.
    ///
    /// A create placeholder only enters the module's cache on commit.
    pub fn resource(&self) -> &Arc<Resource<R>> {
        &self.resource
    }

    /// Copy of the staged configuration
    pub fn config(&self) -> R::Config {
        lock(&self.config).clone()
    }

    /// Edit the staged configuration in place
    pub fn stage(&self, edit: impl FnOnce(&mut R::Config)) -> Result<()> {
        self.ensure_staged()?;
        edit(&mut lock(&self.config));
        Ok(())
    }

    pub fn set_config(&self, config: R::Config) -> Result<()> {
        self.stage(|staged| *staged = config)
    }

    /// Drop the draft without applying it
    pub fn discard(self) {
        tracing::debug!(draft = %self.id, "Discarded draft for {}", self.resource.id());
    }

    /// Apply the staged configuration remotely and update the cache.
    ///
    /// Only the first call reaches the remote side; later calls fail with
    /// [`Error::AlreadyCommitted`]. A rejected commit leaves the cache as it
    /// was and returns the remote error.
    pub async fn commit(&self) -> Result<Arc<Resource<R>>> {
        {
            let mut state = lock(&self.state);
            if *state != DraftState::Staged {
                return Err(Error::AlreadyCommitted(self.resource.id().to_string()));
            }
            *state = DraftState::Committing;
        }

        let config = self.config();
        let result = match self.intent {
            Intent::Create => self.commit_create(&config).await,
            Intent::Update => self.commit_update(&config).await,
        };

        *lock(&self.state) = match &result {
            Ok(_) => DraftState::Committed,
            Err(_) => DraftState::Failed,
        };
        result
    }

    async fn commit_create(&self, config: &R::Config) -> Result<Arc<Resource<R>>> {
        let name = self.resource.name();
        if name.is_empty() || name.contains('/') {
            return Err(Error::MalformedId {
                id: self.resource.id().to_string(),
                reason: format!("invalid resource name '{}'", name),
            });
        }

        let client = self
            .module
            .client()
            .ok_or_else(|| Error::ClientUnavailable(self.module.name().to_string()))?;

        self.resource.begin(Status::Creating);
        tracing::info!(draft = %self.id, "Creating {}", self.resource.id());

        let created = client
            .create_one(name, self.resource.resource_group(), config)
            .await;
        self.resource.finish(Status::Creating);

        match created {
            Ok(snapshot) => {
                let fetched = Fetched::convert(client.as_ref(), snapshot);
                Ok(self.module.adopt(&self.resource, fetched))
            },
            Err(e) => {
                tracing::error!(draft = %self.id, "Failed to create {}: {:#}", self.resource.id(), e);
                Err(Error::Remote(e))
            },
        }
    }

    async fn commit_update(&self, config: &R::Config) -> Result<Arc<Resource<R>>> {
        let client = self
            .module
            .client()
            .ok_or_else(|| Error::ClientUnavailable(self.module.name().to_string()))?;

        let current = self.resource.remote();
        self.resource.begin(Status::Updating);
        tracing::info!(draft = %self.id, "Updating {}", self.resource.id());

        let updated = client
            .update_one(self.resource.id(), current.as_ref(), config)
            .await;
        self.resource.finish(Status::Updating);

        match updated {
            Ok(snapshot) => {
                let fetched = Fetched::convert(client.as_ref(), snapshot);
                self.module.adopt(&self.resource, fetched);
                Ok(Arc::clone(&self.resource))
            },
            Err(e) => {
                tracing::error!(draft = %self.id, "Failed to update {}: {:#}", self.resource.id(), e);
                Err(Error::Remote(e))
            },
        }
    }

    fn ensure_staged(&self) -> Result<()> {
        if self.state() == DraftState::Staged {
            Ok(())
        } else {
            Err(Error::AlreadyCommitted(self.resource.id().to_string()))
        }
    }
}

impl<R: Remote> fmt::Debug for Draft<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft")
            .field("id", &self.id)
            .field("intent", &self.intent)
            .field("resource", &self.resource.id().to_string())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
