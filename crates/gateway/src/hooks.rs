// Disconnect side effects: a bounded queue decoupling socket teardown from
// downstream work triggered by a user's departure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use banter_common::types::UserId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

/// Capacity for the disconnect notification queue.
const HOOK_QUEUE_CAPACITY: usize = 256;

/// Receives a notification after a user's last connection is gone.
/// Using boxed futures for object safety / dynamic dispatch in tests.
pub trait DisconnectObserver: Send + Sync {
    fn user_disconnected(&self, user_id: UserId) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Logs departures; downstream consumers watch the log stream or subscribe
/// out of band.
pub struct LoggingObserver;

impl DisconnectObserver for LoggingObserver {
    fn user_disconnected(&self, user_id: UserId) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            info!(user_id, "user fully disconnected");
            Ok(())
        })
    }
}

/// Forwards each departure to a channel so tests can await the worker.
pub struct RecordingObserver {
    tx: mpsc::UnboundedSender<UserId>,
}

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<UserId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl DisconnectObserver for RecordingObserver {
    fn user_disconnected(&self, user_id: UserId) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            let _ = tx.send(user_id);
            Ok(())
        })
    }
}

/// Hands user departures to a single worker task over a bounded queue.
///
/// Notification is best-effort: a full queue drops the event with a warning
/// instead of blocking the disconnect path, and observer failures never
/// propagate back to the caller.
pub struct DisconnectHooks {
    queue: mpsc::Sender<UserId>,
    worker: JoinHandle<()>,
}

impl DisconnectHooks {
    pub fn start(observers: Vec<Arc<dyn DisconnectObserver>>) -> Self {
        Self::start_with_capacity(observers, HOOK_QUEUE_CAPACITY)
    }

    fn start_with_capacity(observers: Vec<Arc<dyn DisconnectObserver>>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(async move {
            while let Some(user_id) = rx.recv().await {
                for observer in &observers {
                    if let Err(error) = observer.user_disconnected(user_id).await {
                        warn!(user_id, error = %error, "disconnect side effect failed");
                    }
                }
            }
            debug!("disconnect hook queue closed, worker exiting");
        });
        Self { queue: tx, worker }
    }

    /// Queue a departure notification. Never blocks.
    pub fn notify_disconnect(&self, user_id: UserId) {
        match self.queue.try_send(user_id) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::increment_hook_tasks_dropped();
                warn!(user_id, "disconnect hook queue full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::increment_hook_tasks_dropped();
                warn!(user_id, "disconnect hook worker gone, dropping notification");
            }
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(error) = self.worker.await {
            warn!(error = %error, "disconnect hook worker panicked");
        }
    }
}
