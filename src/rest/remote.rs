//! REST collaborator
//!
//! Implements [`Remote`] for a JSON collection endpoint. Each resource kind
//! is described by a [`RestKind`] (collection path, where the items and the
//! next-page token live in a list response, which fields carry the name and
//! the provisioning state) instead of code.

use super::client::RestClient;
use crate::resource::{Page, Remote, ResourceId, ResourceKey, Status};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Description of one REST-backed resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestKind {
    /// Collection path relative to the endpoint
    pub collection: String,
    /// Dot path of the item array in a list response
    pub items_path: String,
    /// Field holding the next page token (or an absolute next-page URL)
    pub next_token_field: String,
    pub page_token_param: String,
    pub page_size_param: String,
    pub name_field: String,
    pub id_field: String,
    pub resource_group_field: String,
    /// Dot path of the provisioning state
    pub status_path: String,
    pub api_version: Option<String>,
}

impl Default for RestKind {
    fn default() -> Self {
        Self {
            collection: String::new(),
            items_path: "value".to_string(),
            next_token_field: "nextLink".to_string(),
            page_token_param: "$skipToken".to_string(),
            page_size_param: "$top".to_string(),
            name_field: "name".to_string(),
            id_field: "id".to_string(),
            resource_group_field: "resourceGroup".to_string(),
            status_path: "properties.provisioningState".to_string(),
            api_version: None,
        }
    }
}

impl RestKind {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.trim_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn api_version(mut self, version: &str) -> Self {
        self.api_version = Some(version.to_string());
        self
    }
}

/// [`Remote`] over a JSON REST collection
#[derive(Clone)]
pub struct RestRemote {
    client: RestClient,
    endpoint: Url,
    kind: RestKind,
}

impl RestRemote {
    pub fn new(client: RestClient, endpoint: &str, kind: RestKind) -> Result<Self> {
        // Url::join drops the last path segment unless it ends with '/'
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };
        let endpoint = Url::parse(&normalized)
            .with_context(|| format!("Invalid endpoint URL '{}'", endpoint))?;

        Ok(Self {
            client,
            endpoint,
            kind,
        })
    }

    pub fn kind(&self) -> &RestKind {
        &self.kind
    }

    /// Collaborator for a collection nested under one of this kind's items,
    /// e.g. `servers/{name}/firewallRules`
    pub fn nested(&self, parent_name: &str, child_collection: &str) -> Self {
        let mut kind = self.kind.clone();
        kind.collection = format!(
            "{}/{}/{}",
            self.kind.collection,
            urlencoding::encode(parent_name),
            child_collection.trim_matches('/')
        );
        Self {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            kind,
        }
    }

    fn collection_url(&self) -> Result<Url> {
        let url = self
            .endpoint
            .join(&self.kind.collection)
            .with_context(|| format!("Invalid collection path '{}'", self.kind.collection))?;
        Ok(self.with_api_version(url))
    }

    fn item_url(&self, name: &str) -> Result<Url> {
        let path = format!("{}/{}", self.kind.collection, urlencoding::encode(name));
        let url = self
            .endpoint
            .join(&path)
            .with_context(|| format!("Invalid item path '{}'", path))?;
        Ok(self.with_api_version(url))
    }

    fn with_api_version(&self, mut url: Url) -> Url {
        if let Some(version) = &self.kind.api_version {
            url.query_pairs_mut().append_pair("api-version", version);
        }
        url
    }

    fn page_url(&self, page_token: Option<&str>, page_size: usize) -> Result<Url> {
        // Absolute next links already carry every query parameter
        if let Some(token) = page_token {
            if token.starts_with("http://") || token.starts_with("https://") {
                return Url::parse(token).with_context(|| format!("Invalid next link '{}'", token));
            }
        }

        let mut url = self.collection_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(&self.kind.page_size_param, &page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair(&self.kind.page_token_param, token);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Remote for RestRemote {
    type Snapshot = Value;
    type Config = Value;

    async fn list_page(&self, page_token: Option<&str>, page_size: usize) -> Result<Page<Value>> {
        let url = self.page_url(page_token, page_size)?;
        let Some(response) = self.client.get(&url).await? else {
            // Collection itself is missing, e.g. the parent is gone
            return Ok(Page::last(Vec::new()));
        };

        let items = extract_json_value(&response, &self.kind.items_path)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let next_page_token = response
            .get(&self.kind.next_token_field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Page {
            items,
            next_page_token,
        })
    }

    async fn get_one(&self, name: &str, _resource_group: Option<&str>) -> Result<Option<Value>> {
        self.client.get(&self.item_url(name)?).await
    }

    async fn delete_one(&self, id: &ResourceId) -> Result<()> {
        self.client.delete(&self.item_url(id.name())?).await
    }

    async fn create_one(&self, name: &str, _resource_group: Option<&str>, config: &Value) -> Result<Value> {
        self.client.put(&self.item_url(name)?, config).await
    }

    async fn update_one(&self, id: &ResourceId, _current: Option<&Value>, config: &Value) -> Result<Value> {
        self.client.patch(&self.item_url(id.name())?, config).await
    }

    fn identity_of(&self, snapshot: &Value) -> ResourceKey {
        let id = extract_json_value(snapshot, &self.kind.id_field)
            .and_then(|v| v.as_str())
            .and_then(|s| ResourceId::parse(s).ok());

        let name = extract_json_value(snapshot, &self.kind.name_field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| id.as_ref().map(|id| id.name().to_string()))
            .unwrap_or_default();

        let resource_group = extract_json_value(snapshot, &self.kind.resource_group_field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                id.as_ref()
                    .and_then(|id| id.resource_group_name().map(str::to_string))
            });

        ResourceKey {
            name,
            resource_group,
        }
    }

    fn status_of(&self, snapshot: &Value) -> Status {
        extract_json_value(snapshot, &self.kind.status_path)
            .and_then(|v| v.as_str())
            .map(Status::from_provisioning_state)
            .unwrap_or_default()
    }
}

/// Look up a value by dot-notation path; numeric parts index arrays
pub fn extract_json_value<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(item);
    }

    path.split('.').try_fold(item, |current, part| match part.parse::<usize>() {
        Ok(idx) if current.is_array() => current.get(idx),
        _ => current.get(part),
    })
}
