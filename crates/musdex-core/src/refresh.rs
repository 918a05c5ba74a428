use tokio::sync::broadcast;

/// "Catalog changed, re-read it when convenient." Called from notification
/// tasks, so implementations must return quickly and be callable from any
/// thread. Coalescing repeated signals is up to the display layer.
pub trait RefreshHook: Send + Sync + 'static {
    fn catalog_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogEvent {
    Changed,
}

/// Publishes refresh signals on a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastRefresh {
    signal: broadcast::Sender<CatalogEvent>,
}

impl BroadcastRefresh {
    pub fn new(capacity: usize) -> Self {
        let (signal, _) = broadcast::channel(capacity.max(1));
        Self { signal }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.signal.subscribe()
    }
}

impl Default for BroadcastRefresh {
    fn default() -> Self {
        Self::new(16)
    }
}

impl RefreshHook for BroadcastRefresh {
    fn catalog_changed(&self) {
        // No subscribers is fine; the next reader lists the catalog anyway.
        let _ = self.signal.send(CatalogEvent::Changed);
    }
}

/// Refresh hook that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefresh;

impl RefreshHook for NoopRefresh {
    fn catalog_changed(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_changes() {
        let refresh = BroadcastRefresh::default();
        let mut rx = refresh.subscribe();

        refresh.catalog_changed();
        assert_eq!(rx.recv().await.expect("event"), CatalogEvent::Changed);
    }

    #[test]
    fn signalling_without_subscribers_is_harmless() {
        let refresh = BroadcastRefresh::new(0);
        refresh.catalog_changed();
        NoopRefresh.catalog_changed();
    }
}
