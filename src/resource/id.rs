//! Resource identifiers
//!
//! Hierarchical paths of the form
//! `/subscriptions/{s}[/resourceGroups/{rg}][/providers/{ns}[/{type}/{name}]*]`.
//!
//! Segment kinds are matched case-sensitively and names are passed through
//! verbatim. Every prefix of a well-formed id that ends on a pair boundary is
//! itself well-formed, which is what makes [`ResourceId::parent`] total for
//! non-root ids.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

/// Immutable hierarchical resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    segments: Vec<(String, String)>,
}

impl ResourceId {
    /// Parse a path such as `/subscriptions/s/resourceGroups/rg`
    pub fn parse(path: &str) -> Result<Self> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(Error::malformed(path, "must start with '/'"));
        };

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::malformed(path, "empty segment"));
        }
        if parts.len() % 2 != 0 {
            return Err(Error::malformed(path, "segment kind without a value"));
        }

        let segments: Vec<(String, String)> = parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();

        validate(&segments).map_err(|reason| Error::malformed(path, reason))?;
        Ok(Self { segments })
    }

    /// Root id for a subscription
    pub fn subscription(subscription_id: &str) -> Result<Self> {
        Self::from_segments(vec![(SUBSCRIPTIONS.to_string(), subscription_id.to_string())])
    }

    /// Scope this id to a resource group
    pub fn resource_group(self, name: &str) -> Result<Self> {
        self.with_pair(RESOURCE_GROUPS, name)
    }

    /// Scope this id to a provider namespace, e.g. `Microsoft.DocumentDB`
    pub fn provider(self, namespace: &str) -> Result<Self> {
        self.with_pair(PROVIDERS, namespace)
    }

    /// Append a nested `{type}/{name}` pair. Only valid below a provider.
    pub fn child(self, resource_type: &str, name: &str) -> Result<Self> {
        self.with_pair(resource_type, name)
    }

    /// Append a pair whose kind is already known to be valid here.
    ///
    /// Used by modules, whose parent ids are provider-scoped by construction.
    pub(crate) fn nested(&self, resource_type: &str, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push((resource_type.to_string(), name.to_string()));
        Self { segments }
    }

    fn with_pair(mut self, kind: &str, value: &str) -> Result<Self> {
        self.segments.push((kind.to_string(), value.to_string()));
        Self::from_segments(self.segments)
    }

    fn from_segments(segments: Vec<(String, String)>) -> Result<Self> {
        if let Some((kind, value)) = segments
            .iter()
            .find(|(k, v)| k.is_empty() || v.is_empty() || k.contains('/') || v.contains('/'))
        {
            let shown = render(&segments);
            return Err(Error::malformed(
                &shown,
                format!("invalid segment '{}/{}'", kind, value),
            ));
        }

        validate(&segments).map_err(|reason| Error::malformed(&render(&segments), reason))?;
        Ok(Self { segments })
    }

    /// The id one level up; fails at the subscription root
    pub fn parent(&self) -> Result<Self> {
        if self.is_root() {
            return Err(Error::NoParent(self.to_string()));
        }
        Ok(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Value of the last segment
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    pub fn subscription_id(&self) -> &str {
        self.segments
            .first()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    pub fn resource_group_name(&self) -> Option<&str> {
        self.segment(RESOURCE_GROUPS)
    }

    pub fn provider_namespace(&self) -> Option<&str> {
        self.segment(PROVIDERS)
    }

    /// Value of the last segment of the given kind (case-sensitive)
    pub fn segment(&self, kind: &str) -> Option<&str> {
        self.segments
            .iter()
            .rev()
            .find(|(k, _)| k == kind)
            .map(|(_, v)| v.as_str())
    }

    /// Fully qualified type, e.g. `Microsoft.DocumentDB/databaseAccounts/sqlDatabases`
    pub fn resource_type(&self) -> String {
        let Some(pos) = self.segments.iter().position(|(k, _)| k == PROVIDERS) else {
            return self
                .segments
                .last()
                .map(|(k, _)| k.clone())
                .unwrap_or_default();
        };

        let mut parts = vec![self.segments[pos].1.as_str()];
        parts.extend(self.segments[pos + 1..].iter().map(|(k, _)| k.as_str()));
        parts.join("/")
    }

    /// Number of kind/value pairs
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

/// Check the segment grammar, returning a reason on failure
fn validate(segments: &[(String, String)]) -> std::result::Result<(), String> {
    let Some((first, _)) = segments.first() else {
        return Err("empty id".to_string());
    };
    if first != SUBSCRIPTIONS {
        return Err(format!("expected '{}' but found '{}'", SUBSCRIPTIONS, first));
    }

    let mut in_provider = false;
    for (index, (kind, _)) in segments.iter().enumerate().skip(1) {
        match kind.as_str() {
            RESOURCE_GROUPS if index == 1 => {},
            PROVIDERS if !in_provider => in_provider = true,
            SUBSCRIPTIONS | RESOURCE_GROUPS | PROVIDERS => {
                return Err(format!("unexpected '{}' at position {}", kind, index));
            },
            _ if in_provider => {},
            other => {
                return Err(format!("resource type '{}' outside a provider", other));
            },
        }
    }
    Ok(())
}

fn render(segments: &[(String, String)]) -> String {
    segments
        .iter()
        .map(|(k, v)| format!("/{}/{}", k, v))
        .collect()
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.segments))
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}
