//! Named collection of batches sharing one worker pool

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use super::coordinator::BatchCoordinator;
use super::resource::ResourceProvider;
use super::runner::TaskRunner;
use super::types::{BatchConfig, BatchStatistics, FailureReport};
use crate::{BatchFlowError, Result};

/// Creates and tracks batches by name.
///
/// Every batch created here dispatches onto the same runner and starts from
/// the same configuration.
pub struct BatchRegistry<P: ResourceProvider> {
    runner: Arc<dyn TaskRunner>,
    config: BatchConfig,
    batches: DashMap<String, BatchCoordinator<P>>,
}

impl<P: ResourceProvider> BatchRegistry<P> {
    /// Create an empty registry
    pub fn new(runner: Arc<dyn TaskRunner>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runner,
            config,
            batches: DashMap::new(),
        })
    }

    /// Create and register a batch named `name` over `provider`
    pub fn create_batch(
        &self,
        name: impl Into<String>,
        provider: P,
    ) -> Result<BatchCoordinator<P>> {
        let name = name.into();
        match self.batches.entry(name.clone()) {
            Entry::Occupied(_) => Err(BatchFlowError::DuplicateBatch(name)),
            Entry::Vacant(slot) => {
                let batch = BatchCoordinator::new(
                    name,
                    Arc::clone(&self.runner),
                    provider,
                    self.config.clone(),
                )?;
                slot.insert(batch.clone());
                Ok(batch)
            }
        }
    }

    /// Look up a batch by name
    pub fn get(&self, name: &str) -> Option<BatchCoordinator<P>> {
        self.batches.get(name).map(|entry| entry.value().clone())
    }

    /// Statistics for every batch, ordered by name
    pub fn statistics(&self) -> Vec<BatchStatistics> {
        let mut rows: Vec<BatchStatistics> = self
            .batches
            .iter()
            .map(|entry| entry.value().statistics())
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Failure reports across all batches, ordered by batch name
    pub fn failures(&self) -> Vec<FailureReport> {
        let mut batches: Vec<BatchCoordinator<P>> = self
            .batches
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        batches.sort_by(|a, b| a.name().cmp(b.name()));
        batches.iter().flat_map(|batch| batch.failures()).collect()
    }

    /// Drop finished batches, returning how many were removed
    pub fn purge_finished(&self) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, batch| !batch.is_finished());
        let purged = before.saturating_sub(self.batches.len());
        if purged > 0 {
            info!(purged, remaining = self.batches.len(), "Purged finished batches");
        }
        purged
    }

    /// Number of registered batches
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// True when no batch is registered
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
