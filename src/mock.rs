//! In-memory collaborator
//!
//! [`MemoryRemote`] implements [`Remote`] over a map held in memory. It pages
//! with offset tokens, counts every call, and can inject failures or latency
//! per operation, which makes cache behaviour observable in tests without a
//! server.

use crate::resource::{Page, Remote, ResourceId, ResourceKey, Status};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Remote representation held by [`MemoryRemote`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub resource_group: Option<String>,
    /// Provisioning state, mapped with [`Status::from_provisioning_state`]
    pub state: String,
    pub properties: Value,
}

impl Record {
    pub fn new(name: &str, resource_group: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            resource_group: resource_group.map(str::to_string),
            state: "Succeeded".to_string(),
            properties: Value::Object(Default::default()),
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.name.clone(), self.resource_group.as_deref())
    }
}

/// Remote operations that can be counted, delayed or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Delete,
    Create,
    Update,
}

/// Call counters at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_pages: usize,
    pub gets: usize,
    pub deletes: usize,
    pub creates: usize,
    pub updates: usize,
}

#[derive(Default)]
struct Counters {
    list_pages: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl Counters {
    fn bump(&self, op: Operation) {
        let counter = match op {
            Operation::List => &self.list_pages,
            Operation::Get => &self.gets,
            Operation::Delete => &self.deletes,
            Operation::Create => &self.creates,
            Operation::Update => &self.updates,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory [`Remote`] with call counting and fault injection
#[derive(Default)]
pub struct MemoryRemote {
    records: Mutex<BTreeMap<ResourceKey, Record>>,
    counters: Counters,
    failures: Mutex<HashMap<Operation, String>>,
    latency: Mutex<HashMap<Operation, Duration>>,
    created_state: Mutex<Option<String>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let remote = Self::new();
        for record in records {
            remote.insert(record);
        }
        remote
    }

    /// Add or replace a record out-of-band
    pub fn insert(&self, record: Record) {
        lock(&self.records).insert(record.key(), record);
    }

    /// Remove a record out-of-band
    pub fn remove(&self, name: &str, resource_group: Option<&str>) -> Option<Record> {
        let mut records = lock(&self.records);
        let key = find_key(&records, name, resource_group)?;
        records.remove(&key)
    }

    /// Change the provisioning state of a record out-of-band
    pub fn set_state(&self, name: &str, resource_group: Option<&str>, state: &str) {
        let mut records = lock(&self.records);
        if let Some(key) = find_key(&records, name, resource_group) {
            if let Some(record) = records.get_mut(&key) {
                record.state = state.to_string();
            }
        }
    }

    pub fn record(&self, name: &str, resource_group: Option<&str>) -> Option<Record> {
        let records = lock(&self.records);
        find_key(&records, name, resource_group).and_then(|key| records.get(&key).cloned())
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call of `op` fail with `message` until [`Self::recover`]
    pub fn fail(&self, op: Operation, message: &str) {
        lock(&self.failures).insert(op, message.to_string());
    }

    pub fn recover(&self, op: Operation) {
        lock(&self.failures).remove(&op);
    }

    /// Delay every call of `op`
    pub fn delay(&self, op: Operation, latency: Duration) {
        lock(&self.latency).insert(op, latency);
    }

    /// Provisioning state given to newly created records (default `Succeeded`)
    pub fn set_created_state(&self, state: &str) {
        *lock(&self.created_state) = Some(state.to_string());
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            list_pages: c.list_pages.load(Ordering::SeqCst),
            gets: c.gets.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
            creates: c.creates.load(Ordering::SeqCst),
            updates: c.updates.load(Ordering::SeqCst),
        }
    }

    async fn enter(&self, op: Operation) -> Result<()> {
        self.counters.bump(op);
        let latency = lock(&self.latency).get(&op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match lock(&self.failures).get(&op) {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    type Snapshot = Record;
    type Config = Value;

    async fn list_page(&self, page_token: Option<&str>, page_size: usize) -> Result<Page<Record>> {
        self.enter(Operation::List).await?;

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("Invalid page token '{}'", token))?,
            None => 0,
        };

        let records = lock(&self.records);
        let items: Vec<Record> = records
            .values()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect();
        let end = offset + items.len();

        Ok(if end < records.len() {
            Page::more(items, end.to_string())
        } else {
            Page::last(items)
        })
    }

    async fn get_one(&self, name: &str, resource_group: Option<&str>) -> Result<Option<Record>> {
        self.enter(Operation::Get).await?;
        Ok(self.record(name, resource_group))
    }

    async fn delete_one(&self, id: &ResourceId) -> Result<()> {
        self.enter(Operation::Delete).await?;
        self.remove(id.name(), id.resource_group_name());
        Ok(())
    }

    async fn create_one(&self, name: &str, resource_group: Option<&str>, config: &Value) -> Result<Record> {
        self.enter(Operation::Create).await?;

        let mut records = lock(&self.records);
        let key = ResourceKey::new(name, resource_group);
        if records.contains_key(&key) {
            return Err(anyhow!("Conflict: '{}' already exists", key));
        }

        let state = lock(&self.created_state)
            .clone()
            .unwrap_or_else(|| "Succeeded".to_string());
        let record = Record::new(name, resource_group)
            .with_state(&state)
            .with_properties(config.clone());
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn update_one(&self, id: &ResourceId, _current: Option<&Record>, config: &Value) -> Result<Record> {
        self.enter(Operation::Update).await?;

        let mut records = lock(&self.records);
        let key = find_key(&records, id.name(), id.resource_group_name())
            .ok_or_else(|| anyhow!("Not found: {}", id))?;
        let record = records
            .get_mut(&key)
            .ok_or_else(|| anyhow!("Not found: {}", id))?;

        match (&mut record.properties, config) {
            (Value::Object(current), Value::Object(changes)) => {
                for (field, value) in changes {
                    current.insert(field.clone(), value.clone());
                }
            },
            (properties, replacement) => *properties = replacement.clone(),
        }
        Ok(record.clone())
    }

    fn identity_of(&self, snapshot: &Record) -> ResourceKey {
        snapshot.key()
    }

    fn status_of(&self, snapshot: &Record) -> Status {
        Status::from_provisioning_state(&snapshot.state)
    }
}

fn find_key(
    records: &BTreeMap<ResourceKey, Record>,
    name: &str,
    resource_group: Option<&str>,
) -> Option<ResourceKey> {
    records
        .keys()
        .find(|key| key.matches(name, resource_group))
        .cloned()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
