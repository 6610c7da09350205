use chromiumoxide::types::{Command, Method, MethodId};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// An arbitrary `Domain.method` call. Serializes as its params object.
#[derive(Debug, Clone)]
pub struct RawCommand {
    method: String,
    params: Value,
}

impl RawCommand {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Serialize for RawCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.params.serialize(serializer)
    }
}

impl Method for RawCommand {
    fn identifier(&self) -> MethodId {
        self.method.clone().into()
    }
}

impl Command for RawCommand {
    type Response = Value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_params_only() {
        let cmd = RawCommand::new("Page.navigate", json!({"url": "https://a.test"}));
        assert_eq!(serde_json::to_value(&cmd).unwrap(), json!({"url": "https://a.test"}));
        assert_eq!(cmd.identifier(), "Page.navigate");
    }

    #[test]
    fn null_params_become_empty_object() {
        let cmd = RawCommand::new("Network.enable", Value::Null);
        assert_eq!(serde_json::to_value(&cmd).unwrap(), json!({}));
    }
}
