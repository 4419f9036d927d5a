//! Kernel registry: notebook-id → kernel, plus the idle sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use cl_domain::config::KernelConfig;

use crate::kernel::Kernel;

/// Maps each notebook to its (at most one) kernel.
///
/// The map lock is only ever held briefly: eviction removes entries under
/// the lock and tears the kernels down afterwards, so a concurrent
/// `get_or_create` either sees the old live kernel or none at all,
/// never a half-destroyed one.
pub struct KernelRegistry {
    kernels: Mutex<HashMap<String, Arc<Kernel>>>,
    config: KernelConfig,
}

impl KernelRegistry {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            kernels: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Get the notebook's kernel, creating one if absent.
    pub fn get_or_create(&self, notebook_id: &str) -> Arc<Kernel> {
        let mut kernels = self.kernels.lock();
        kernels
            .entry(notebook_id.to_string())
            .or_insert_with(|| {
                tracing::info!(notebook_id = %notebook_id, "creating kernel");
                Arc::new(Kernel::new(notebook_id, &self.config.python_bin))
            })
            .clone()
    }

    pub fn get(&self, notebook_id: &str) -> Option<Arc<Kernel>> {
        self.kernels.lock().get(notebook_id).cloned()
    }

    /// Reset a notebook's kernel if it exists.
    pub async fn reset(&self, notebook_id: &str) -> bool {
        let kernel = self.get(notebook_id);
        match kernel {
            Some(k) => {
                let _ = k.reset().await;
                true
            }
            None => false,
        }
    }

    /// Remove and tear down a notebook's kernel.
    pub async fn destroy(&self, notebook_id: &str) -> bool {
        let kernel = self.kernels.lock().remove(notebook_id);
        match kernel {
            Some(k) => {
                k.destroy().await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.kernels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.lock().is_empty()
    }

    /// Notebook ids with live kernels (sorted, for the admin surface).
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.kernels.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Evict every kernel idle since before `now - idle_timeout`.
    ///
    /// Entries leave the map under the lock; teardown happens after it is
    /// released. Returns the evicted notebook ids.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let idle_cutoff =
            now - chrono::Duration::seconds(self.config.idle_timeout_secs as i64);

        let evicted: Vec<Arc<Kernel>> = {
            let mut kernels = self.kernels.lock();
            let stale: Vec<String> = kernels
                .iter()
                .filter(|(_, k)| k.last_used_at() < idle_cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .iter()
                .filter_map(|id| kernels.remove(id))
                .collect()
        };

        let mut ids = Vec::with_capacity(evicted.len());
        for kernel in evicted {
            tracing::info!(
                notebook_id = %kernel.notebook_id(),
                last_used = %kernel.last_used_at(),
                "evicting idle kernel"
            );
            kernel.destroy().await;
            ids.push(kernel.notebook_id().to_string());
        }
        ids
    }

    /// Tear down every kernel (server shutdown).
    pub async fn shutdown(&self) {
        let all: Vec<Arc<Kernel>> = {
            let mut kernels = self.kernels.lock();
            kernels.drain().map(|(_, k)| k).collect()
        };
        for kernel in all {
            kernel.destroy().await;
        }
    }
}

/// Spawn the background sweeper. Aborting the returned handle stops it;
/// call [`KernelRegistry::shutdown`] afterwards to drain live kernels.
pub fn spawn_sweeper(registry: Arc<KernelRegistry>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(registry.config.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would sweep a just-booted registry.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = registry.sweep(Utc::now()).await;
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "idle kernels evicted");
            }
        }
    })
}
