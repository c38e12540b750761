//! Configuration Management
//!
//! Handles persistent configuration storage for cloudtree.

use crate::resource::DEFAULT_PAGE_SIZE;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENDPOINT_ENV: &str = "CLOUDTREE_ENDPOINT";
pub const TOKEN_ENV: &str = "CLOUDTREE_TOKEN";

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Management API base URL
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Items requested per list page
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Last resource type listed, e.g. `databaseAccounts`
    #[serde(default)]
    pub last_resource_type: Option<String>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudtree").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
                Self::default()
            },
        }
    }

    /// Parse a config document; anything unreadable yields the defaults
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config: {}", e);
            Self::default()
        })
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get effective endpoint (CLI > environment > config)
    pub fn effective_endpoint(&self, flag: Option<&str>) -> Option<String> {
        resolve(flag, std::env::var(ENDPOINT_ENV).ok(), self.endpoint.as_deref())
    }

    /// Get effective bearer token (CLI > environment); tokens are never persisted
    pub fn effective_token(&self, flag: Option<&str>) -> Option<String> {
        resolve(flag, std::env::var(TOKEN_ENV).ok(), None)
    }

    /// Get effective page size (CLI > config > default)
    pub fn effective_page_size(&self, flag: Option<usize>) -> usize {
        flag.or(self.page_size)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Get effective resource type (CLI > last used)
    pub fn effective_resource_type(&self, flag: Option<&str>) -> Option<String> {
        resolve(flag, None, self.last_resource_type.as_deref())
    }

    /// Remember the resource type and save
    pub fn set_last_resource_type(&mut self, resource_type: &str) -> Result<()> {
        if self.last_resource_type.as_deref() == Some(resource_type) {
            return Ok(());
        }
        self.last_resource_type = Some(resource_type.to_string());
        self.save()
    }
}

fn resolve(flag: Option<&str>, env: Option<String>, file: Option<&str>) -> Option<String> {
    flag.map(str::to_string)
        .or(env)
        .or_else(|| file.map(str::to_string))
        .filter(|s| !s.trim().is_empty())
}
