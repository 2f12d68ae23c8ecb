//! Capability → model endpoint resolution. A capability is a coarse role
//! (`planning`, `reviewing`, `analysis`, ...), never a specific model name —
//! which model serves a capability is a deployment concern, not a caller one.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    endpoints: HashMap<String, String>,
    fallback: Option<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `CAPABILITY=endpoint` pairs plus a fallback
    /// endpoint used for any capability with no explicit mapping.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>, fallback: Option<String>) -> Self {
        Self {
            endpoints: pairs.into_iter().collect(),
            fallback,
        }
    }

    pub fn register(&mut self, capability: impl Into<String>, endpoint: impl Into<String>) {
        self.endpoints.insert(capability.into(), endpoint.into());
    }

    pub fn resolve(&self, capability: &str) -> Option<String> {
        self.endpoints
            .get(capability)
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_capability() {
        let mut registry = CapabilityRegistry::new();
        registry.register("planning", "https://models.internal/planning");
        assert_eq!(
            registry.resolve("planning").as_deref(),
            Some("https://models.internal/planning")
        );
    }

    #[test]
    fn falls_back_for_unregistered_capability() {
        let registry =
            CapabilityRegistry::from_pairs([], Some("https://models.internal/default".to_string()));
        assert_eq!(
            registry.resolve("reviewing").as_deref(),
            Some("https://models.internal/default")
        );
    }

    #[test]
    fn no_fallback_and_no_match_resolves_to_none() {
        let registry = CapabilityRegistry::new();
        assert!(registry.resolve("analysis").is_none());
    }
}
