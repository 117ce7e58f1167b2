//! Usage tracking per model.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::Usage;

/// Tracks cumulative token usage, keyed by model id.
#[derive(Clone, Default)]
pub struct UsageTracker {
    inner: Arc<RwLock<HashMap<String, Usage>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from one completion.
    pub fn record(&self, model: &str, usage: &Usage) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entry(model.to_string()).or_default().merge(usage);
    }

    /// Usage summed across all models.
    pub fn total_usage(&self) -> Usage {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().fold(Usage::default(), |mut acc, u| {
            acc.merge(u);
            acc
        })
    }

    /// Usage broken down by model id.
    pub fn per_model(&self) -> HashMap<String, Usage> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reset(&self) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("per_model", &self.per_model())
            .finish()
    }
}
