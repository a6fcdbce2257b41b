//! Shutdown handling for graceful daemon termination
//!
//! Components that own background work register a cleanup closure here when
//! they are built. Teardown runs every registered closure before the poll
//! loop is stopped and the link is closed, so nothing deferred outlives the
//! connection.

use crate::polling::PollingCoordinator;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Observer = Box<dyn FnOnce() + Send>;

/// Observer list run once at teardown
#[derive(Default)]
pub(crate) struct ShutdownHooks {
    observers: Mutex<Vec<(String, Observer)>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup closure; it runs at most once
    pub fn register(&self, name: impl Into<String>, observer: impl FnOnce() + Send + 'static) {
        let name = name.into();
        debug!("Registered shutdown observer '{}'", name);
        self.lock().push((name, Box::new(observer)));
    }

    /// Run and drain every registered observer, in registration order
    pub fn run(&self) {
        let observers = std::mem::take(&mut *self.lock());
        for (name, observer) in observers {
            debug!("Running shutdown observer '{}'", name);
            observer();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Observer)>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Tear the daemon down in order: observers, poll loop, link
pub(crate) async fn teardown(
    hooks: &ShutdownHooks,
    stop_polling: &watch::Sender<bool>,
    poll_task: JoinHandle<()>,
    coordinator: &Arc<PollingCoordinator>,
) {
    info!("Running {} shutdown observer(s)...", hooks.len());
    hooks.run();

    let _ = stop_polling.send(true);
    if let Err(e) = poll_task.await {
        warn!("Poll loop ended abnormally: {}", e);
    }

    coordinator.device().disconnect().await;
    info!("Link closed");
}
