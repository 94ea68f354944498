//! Lookup of configured provider adapters.

use std::collections::HashMap;
use std::sync::Arc;

use reel_models::ProviderKind;

use crate::adapter::ProviderAdapter;

/// Adapters available to the dispatcher, keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Registered providers in a stable order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .iter()
            .copied()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimax::{MinimaxAdapter, MinimaxConfig};
    use crate::segmind::{SegmindAdapter, SegmindConfig};

    #[test]
    fn test_register_and_lookup() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(SegmindAdapter::new(SegmindConfig::new("s"))))
            .with(Arc::new(MinimaxAdapter::new(MinimaxConfig::new("m"))));

        assert_eq!(registry.kinds(), vec![ProviderKind::Minimax, ProviderKind::Segmind]);
        assert_eq!(registry.get(ProviderKind::Segmind).unwrap().kind(), ProviderKind::Segmind);
    }

    #[test]
    fn test_missing_provider() {
        let registry = ProviderRegistry::new().with(Arc::new(MinimaxAdapter::new(MinimaxConfig::new("m"))));
        assert!(registry.get(ProviderKind::Segmind).is_none());
        assert!(!registry.contains(ProviderKind::Segmind));
        assert!(ProviderRegistry::new().is_empty());
    }
}
