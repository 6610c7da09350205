use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Point-in-time storage capture of a target.
///
/// Snapshots are immutable once captured: injection reads them, never writes.
/// Indexed collections carry enumeration metadata only; their content is not
/// captured and is not restored on injection (`indexed_content_captured` is
/// always `false` for snapshots produced by this crate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub url: String,
    pub domain: String,
    pub timestamp: u64,
    #[serde(default)]
    pub cookies: Vec<SnapshotCookie>,
    /// Short-lived per-tab store (`sessionStorage`).
    #[serde(default)]
    pub session_storage: BTreeMap<String, String>,
    /// Persistent per-origin store (`localStorage`).
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
    #[serde(default)]
    pub indexed_collections: Vec<IndexedCollection>,
    #[serde(default)]
    pub indexed_content_captured: bool,
}

fn default_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

impl StateSnapshot {
    pub fn empty(url: impl Into<String>, domain: impl Into<String>, timestamp: u64) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            url: url.into(),
            domain: domain.into(),
            timestamp,
            cookies: Vec::new(),
            session_storage: BTreeMap::new(),
            local_storage: BTreeMap::new(),
            indexed_collections: Vec::new(),
            indexed_content_captured: false,
        }
    }

    /// Origin (`scheme://host[:port]`) of the captured page, if the URL parses.
    pub fn origin(&self) -> Option<String> {
        origin_of(&self.url)
    }
}

pub fn origin_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    match parsed.origin() {
        url::Origin::Tuple(..) => Some(parsed.origin().ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

/// IndexedDB database enumeration entry. Content is never captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedCollection {
    pub name: String,
    #[serde(default)]
    pub version: u64,
}
