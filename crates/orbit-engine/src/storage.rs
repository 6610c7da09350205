//! Key-value storage access on a live target.
//!
//! Writes are observed through [`ObservedStorage`], a decorator that publishes
//! [`EngineEvent::StorageWritten`] after each successful write. The page's own
//! storage primitives are never redefined.

use crate::events::{EngineEvent, EventBus};
use crate::target::Target;
use async_trait::async_trait;
use orbit_common::error::ProtocolError;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    /// `localStorage`: persistent per origin.
    Local,
    /// `sessionStorage`: short-lived per tab.
    Session,
}

impl StorageArea {
    pub fn js_name(&self) -> &'static str {
        match self {
            StorageArea::Local => "localStorage",
            StorageArea::Session => "sessionStorage",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Local => "local",
            StorageArea::Session => "session",
        }
    }
}

#[async_trait]
pub trait StorageAccess: Send {
    async fn read_all(&mut self, area: StorageArea) -> Result<BTreeMap<String, String>, ProtocolError>;

    async fn set_item(&mut self, area: StorageArea, key: &str, value: &str) -> Result<(), ProtocolError>;
}

/// [`StorageAccess`] over `Runtime.evaluate` on a target.
pub struct TargetStorage<'a> {
    target: &'a mut dyn Target,
}

impl<'a> TargetStorage<'a> {
    pub fn new(target: &'a mut dyn Target) -> Self {
        Self { target }
    }
}

fn js_string(s: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    Value::String(s.to_string()).to_string()
}

fn read_expression(area: StorageArea) -> String {
    format!(
        "(() => {{ try {{ const s = window.{0}; const out = {{}}; \
         for (let i = 0; i < s.length; i++) {{ const k = s.key(i); out[k] = s.getItem(k); }} \
         return out; }} catch (e) {{ return {{}}; }} }})()",
        area.js_name()
    )
}

#[async_trait]
impl StorageAccess for TargetStorage<'_> {
    async fn read_all(&mut self, area: StorageArea) -> Result<BTreeMap<String, String>, ProtocolError> {
        let value = self.target.evaluate(&read_expression(area)).await?;
        let mut out = BTreeMap::new();
        if let Value::Object(map) = value {
            for (key, value) in map {
                if let Value::String(s) = value {
                    out.insert(key, s);
                }
            }
        }
        Ok(out)
    }

    async fn set_item(&mut self, area: StorageArea, key: &str, value: &str) -> Result<(), ProtocolError> {
        let expression = format!(
            "window.{}.setItem({}, {})",
            area.js_name(),
            js_string(key),
            js_string(value)
        );
        self.target.evaluate(&expression).await?;
        Ok(())
    }
}

/// Publishes a [`EngineEvent::StorageWritten`] for every successful write.
pub struct ObservedStorage<S> {
    inner: S,
    bus: EventBus,
}

impl<S: StorageAccess> ObservedStorage<S> {
    pub fn new(inner: S, bus: EventBus) -> Self {
        Self { inner, bus }
    }
}

#[async_trait]
impl<S: StorageAccess> StorageAccess for ObservedStorage<S> {
    async fn read_all(&mut self, area: StorageArea) -> Result<BTreeMap<String, String>, ProtocolError> {
        self.inner.read_all(area).await
    }

    async fn set_item(&mut self, area: StorageArea, key: &str, value: &str) -> Result<(), ProtocolError> {
        self.inner.set_item(area, key, value).await?;
        self.bus.publish(EngineEvent::StorageWritten {
            area: area.as_str().to_string(),
            key: key.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_string("line\nbreak"), r#""line\nbreak""#);
    }

    #[test]
    fn read_expression_targets_the_right_area() {
        assert!(read_expression(StorageArea::Session).contains("window.sessionStorage"));
        assert!(read_expression(StorageArea::Local).contains("window.localStorage"));
    }
}
