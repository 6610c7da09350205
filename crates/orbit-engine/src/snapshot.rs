//! State Snapshot Service: capture and inject a target's storage state.
//!
//! Indexed collections (IndexedDB) are enumerated by name and version only.
//! Their content is neither captured nor restored; injection lists them in
//! [`InjectionReport::indexed_collections_skipped`] and logs a warning.

use crate::events::EventBus;
use crate::storage::{ObservedStorage, StorageAccess, StorageArea, TargetStorage};
use crate::target::Target;
use orbit_common::error::ProtocolError;
use orbit_common::snapshot::{
    IndexedCollection, SNAPSHOT_FORMAT_VERSION, SnapshotCookie, StateSnapshot, origin_of,
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Unsupported snapshot format version {0}")]
    UnsupportedVersion(u32),
}

const INDEXED_DB_EXPRESSION: &str = "(async () => { try { \
    if (!window.indexedDB || !indexedDB.databases) return []; \
    const dbs = await indexedDB.databases(); \
    return dbs.map(d => ({ name: d.name || '', version: d.version || 0 })); \
    } catch (e) { return []; } })()";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionReport {
    pub navigated: bool,
    pub cookies_set: usize,
    pub cookie_failures: Vec<CookieFailure>,
    pub local_keys_written: usize,
    pub session_keys_written: usize,
    /// Collections present in the snapshot whose content was not restored.
    pub indexed_collections_skipped: Vec<String>,
}

/// Storage writes performed during injection are published on the bus.
#[derive(Debug, Clone)]
pub struct SnapshotService {
    bus: EventBus,
}

impl SnapshotService {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Capture the target's storage state. The returned snapshot is complete.
    pub async fn capture(&self, target: &mut dyn Target) -> Result<StateSnapshot, SnapshotError> {
        let url = target.current_url().await?;
        let domain = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        let cookies = capture_cookies(target).await?;

        let (local_storage, session_storage) = {
            let mut storage = TargetStorage::new(target);
            let local = storage.read_all(StorageArea::Local).await?;
            let session = storage.read_all(StorageArea::Session).await?;
            (local, session)
        };

        let indexed_collections = capture_indexed_collections(target).await?;

        let snapshot = StateSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            url,
            domain,
            timestamp: orbit_common::now_millis(),
            cookies,
            session_storage,
            local_storage,
            indexed_collections,
            indexed_content_captured: false,
        };
        info!(
            "Captured snapshot of {} ({} cookies, {} local keys, {} session keys, {} indexed collections)",
            snapshot.domain,
            snapshot.cookies.len(),
            snapshot.local_storage.len(),
            snapshot.session_storage.len(),
            snapshot.indexed_collections.len()
        );
        Ok(snapshot)
    }

    /// Apply a snapshot to the live target. The snapshot itself is untouched.
    ///
    /// Key-value stores are overwritten by key and never cleared. A cookie the
    /// target rejects is reported and the remaining cookies are still set.
    pub async fn inject(
        &self,
        target: &mut dyn Target,
        snapshot: &StateSnapshot,
    ) -> Result<InjectionReport, SnapshotError> {
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.format_version));
        }

        let mut report = InjectionReport::default();

        if let Some(origin) = snapshot.origin() {
            let current = target.current_url().await.unwrap_or_default();
            if origin_of(&current).as_deref() != Some(origin.as_str()) {
                debug!("Navigating to {} before injecting storage", snapshot.url);
                target.navigate(&snapshot.url).await?;
                report.navigated = true;
            }
        }

        for cookie in &snapshot.cookies {
            match set_cookie(target, cookie).await {
                Ok(()) => report.cookies_set += 1,
                Err(e) => {
                    warn!("Cookie {} rejected: {}", cookie.name, e);
                    report.cookie_failures.push(CookieFailure {
                        name: cookie.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut storage = ObservedStorage::new(TargetStorage::new(target), self.bus.clone());
        write_storage(&mut storage, snapshot, &mut report).await?;

        if !snapshot.indexed_collections.is_empty() {
            report.indexed_collections_skipped = snapshot
                .indexed_collections
                .iter()
                .map(|c| c.name.clone())
                .collect();
            warn!(
                "Indexed collection content is not restored ({} collections skipped: {})",
                report.indexed_collections_skipped.len(),
                report.indexed_collections_skipped.join(", ")
            );
        }

        info!(
            "Injected snapshot of {}: {} cookies ({} rejected), {} local keys, {} session keys",
            snapshot.domain,
            report.cookies_set,
            report.cookie_failures.len(),
            report.local_keys_written,
            report.session_keys_written
        );
        Ok(report)
    }
}

async fn write_storage<S: StorageAccess>(
    storage: &mut S,
    snapshot: &StateSnapshot,
    report: &mut InjectionReport,
) -> Result<(), ProtocolError> {
    for (key, value) in &snapshot.local_storage {
        storage.set_item(StorageArea::Local, key, value).await?;
        report.local_keys_written += 1;
    }
    for (key, value) in &snapshot.session_storage {
        storage.set_item(StorageArea::Session, key, value).await?;
        report.session_keys_written += 1;
    }
    Ok(())
}

async fn capture_cookies(target: &mut dyn Target) -> Result<Vec<SnapshotCookie>, ProtocolError> {
    let response = match target.send("Network.getAllCookies", json!({})).await {
        Ok(r) => r,
        Err(e) => {
            debug!("Network.getAllCookies failed ({}), trying Storage.getCookies", e);
            target.send("Storage.getCookies", json!({})).await?
        }
    };
    Ok(parse_cookies(&response))
}

fn parse_cookies(response: &Value) -> Vec<SnapshotCookie> {
    let Some(items) = response.get("cookies").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|c| {
            let name = c.get("name")?.as_str()?.to_string();
            let value = c.get("value").and_then(Value::as_str).unwrap_or_default();
            let session = c.get("session").and_then(Value::as_bool).unwrap_or(false);
            let expires = c
                .get("expires")
                .and_then(Value::as_f64)
                .filter(|e| !session && *e > 0.0);
            Some(SnapshotCookie {
                name,
                value: value.to_string(),
                domain: c
                    .get("domain")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                path: c
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or("/")
                    .to_string(),
                expires,
                http_only: c.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
                secure: c.get("secure").and_then(Value::as_bool).unwrap_or(false),
                same_site: c.get("sameSite").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

async fn set_cookie(target: &mut dyn Target, cookie: &SnapshotCookie) -> Result<(), ProtocolError> {
    let mut params = json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "secure": cookie.secure,
        "httpOnly": cookie.http_only,
    });
    if let Some(expires) = cookie.expires {
        params["expires"] = json!(expires);
    }
    if let Some(same_site) = &cookie.same_site {
        params["sameSite"] = json!(same_site);
    }

    let response = target.send("Network.setCookie", params).await?;
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(ProtocolError::command("Network.setCookie", "cookie rejected by target"));
    }
    Ok(())
}

async fn capture_indexed_collections(
    target: &mut dyn Target,
) -> Result<Vec<IndexedCollection>, ProtocolError> {
    let value = target.evaluate(INDEXED_DB_EXPRESSION).await?;
    let collections: Vec<IndexedCollection> = serde_json::from_value(value).unwrap_or_default();
    Ok(collections)
}
