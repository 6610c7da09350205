use crate::target::Target;
use orbit_common::error::ProtocolError;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

/// Domains that expose no `enable` method.
const NO_ENABLE_DOMAINS: &[&str] = &[
    "Browser",
    "Emulation",
    "IO",
    "Input",
    "Storage",
    "SystemInfo",
    "Target",
    "Tethering",
];

/// Domain of a `Domain.method` pair.
pub fn domain_of(method: &str) -> Option<&str> {
    method
        .split_once('.')
        .map(|(domain, _)| domain)
        .filter(|d| !d.is_empty())
}

pub fn is_enable_command(method: &str) -> bool {
    method.ends_with(".enable")
}

/// Tracks which domains have been enabled on one target.
#[derive(Debug, Default)]
pub struct DomainTracker {
    enabled: HashSet<String>,
}

impl DomainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, domain: &str) -> bool {
        self.enabled.contains(domain)
    }

    /// Sends `Domain.enable` once. "Already enabled" counts as success.
    pub async fn ensure(
        &mut self,
        target: &mut dyn Target,
        domain: &str,
    ) -> Result<(), ProtocolError> {
        if self.enabled.contains(domain) || NO_ENABLE_DOMAINS.contains(&domain) {
            return Ok(());
        }

        match target.send(&format!("{}.enable", domain), json!({})).await {
            Ok(_) => debug!("Enabled domain {} on {}", domain, target.id()),
            Err(e) if e.is_already_enabled() => {
                debug!("Domain {} already enabled on {}", domain, target.id())
            }
            Err(e) => return Err(e),
        }
        self.enabled.insert(domain.to_string());
        Ok(())
    }

    pub async fn ensure_for_method(
        &mut self,
        target: &mut dyn Target,
        method: &str,
    ) -> Result<(), ProtocolError> {
        match domain_of(method) {
            Some(domain) => self.ensure(target, domain).await,
            None => Ok(()),
        }
    }

    /// Records that an `X.enable` command was issued outside the tracker.
    pub fn mark_enabled(&mut self, method: &str) {
        if is_enable_command(method)
            && let Some(domain) = domain_of(method)
        {
            self.enabled.insert(domain.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_domain_from_method() {
        assert_eq!(domain_of("Page.navigate"), Some("Page"));
        assert_eq!(domain_of("Runtime.evaluate"), Some("Runtime"));
        assert_eq!(domain_of("navigate"), None);
        assert_eq!(domain_of(".x"), None);
    }

    #[test]
    fn mark_enabled_only_for_enable_commands() {
        let mut tracker = DomainTracker::new();
        tracker.mark_enabled("Network.enable");
        tracker.mark_enabled("Page.navigate");
        assert!(tracker.is_enabled("Network"));
        assert!(!tracker.is_enabled("Page"));
    }
}
