//! Short-lived cache of the discovered gateway process.

use std::time::Duration;

use harbor_reconcile::TtlCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::runtime::GatewayProcess;

/// Default lifetime of a cached descriptor.
pub const DEFAULT_PROCESS_TTL: Duration = Duration::from_secs(2);

/// Last observed gateway process, shared by concurrent callers.
///
/// Entries whose status is no longer live are never returned.
pub struct ProcessCache {
    inner: Mutex<TtlCache<GatewayProcess>>,
}

impl ProcessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(TtlCache::new(ttl)),
        }
    }

    pub async fn get(&self) -> Option<GatewayProcess> {
        let mut cache = self.inner.lock().await;
        match cache.get_at(Instant::now().into_std()) {
            Some(process) if process.status.is_live() => Some(process),
            Some(_) => {
                cache.invalidate();
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, process: GatewayProcess) {
        self.inner
            .lock()
            .await
            .put_at(process, Instant::now().into_std());
    }

    pub async fn invalidate(&self) {
        self.inner.lock().await.invalidate();
    }
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_TTL)
    }
}
