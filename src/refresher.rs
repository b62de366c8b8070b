use crate::geo::GeolocationStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically reloads the geolocation snapshot from the durable store.
///
/// The background task is stopped when this is dropped.
pub struct Refresher {
    handle: JoinHandle<()>,
}

impl Refresher {
    pub fn start(store: Arc<GeolocationStore>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                store.load().await;
                log::debug!("geolocation snapshot refreshed");
            }
        });
        Self { handle }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
