//! Fan-out of "tenant changed" notifications to caches.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// A cache holding per-tenant state that must be rebuilt after changes.
#[async_trait]
pub trait TenantCacheInvalidator: Send + Sync {
    async fn invalidate_tenant(&self, code: &str);
}

/// Subscribers are held weakly; dropped caches are skipped and pruned.
#[derive(Default)]
pub struct InvalidationHub {
    subscribers: RwLock<Vec<Weak<dyn TenantCacheInvalidator>>>,
}

impl InvalidationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn TenantCacheInvalidator>) {
        self.subscribers.write().push(Arc::downgrade(&subscriber));
    }

    /// Invalidate `code` in every live subscriber, in subscription order.
    pub async fn notify(&self, code: &str) {
        let live: Vec<Arc<dyn TenantCacheInvalidator>> = {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|s| s.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for subscriber in live {
            subscriber.invalidate_tenant(code).await;
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl std::fmt::Debug for InvalidationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TenantCacheInvalidator for Recorder {
        async fn invalidate_tenant(&self, code: &str) {
            self.seen.lock().push(code.to_string());
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_live_subscribers() {
        let hub = InvalidationHub::new();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        hub.subscribe(kept.clone());
        hub.subscribe(dropped.clone());
        drop(dropped);

        hub.notify("shop1").await;

        assert_eq!(*kept.seen.lock(), vec!["shop1".to_string()]);
        assert_eq!(hub.len(), 1);
    }
}
