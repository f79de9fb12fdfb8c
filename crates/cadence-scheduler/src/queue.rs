//! Push work queue: bounded, fire-and-forget delivery of schedule messages.
//!
//! ```text
//! ScheduleService ──try_send──▶ mpsc (bounded) ──▶ worker ──▶ PushDispatcher
//!                                                    ├── stats + history (ring buffer, max 100)
//!                                                    └── failures ──▶ broadcast subscribers
//! ```
//!
//! Request handlers never wait on delivery and never see its errors.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cadence_core::traits::{PushDispatcher, PushKind, PushMessage};
use cadence_core::types::AppletId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;

const HISTORY_LIMIT: usize = 100;

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Messages rejected because the queue was full or closed.
    pub dropped: u64,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub applet_id: AppletId,
    pub kind: PushKind,
    pub title: String,
    pub ok: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Published on the failure channel when a dispatcher errors.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    pub applet_id: AppletId,
    pub dispatcher: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

struct Shared {
    stats: Mutex<QueueStats>,
    history: Mutex<VecDeque<DeliveryRecord>>,
    failures: broadcast::Sender<DispatchFailure>,
    shutdown: Notify,
}

impl Shared {
    fn new() -> Self {
        let (failures, _) = broadcast::channel(64);
        Self {
            stats: Mutex::new(QueueStats::default()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            failures,
            shutdown: Notify::new(),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut QueueStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn record(&self, record: DeliveryRecord) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(record);
        }
    }
}

/// Handle to the push queue. Cheap to clone.
#[derive(Clone)]
pub struct PushQueue {
    tx: Option<mpsc::Sender<PushMessage>>,
    shared: Arc<Shared>,
}

impl PushQueue {
    /// Queue whose receiving end is returned to the caller instead of a worker.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PushMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx), shared: Arc::new(Shared::new()) }, rx)
    }

    /// Queue that accepts and discards everything (push disabled).
    pub fn disabled() -> Self {
        Self { tx: None, shared: Arc::new(Shared::new()) }
    }

    /// Spawn the delivery worker on the current tokio runtime.
    pub fn start(dispatcher: Arc<dyn PushDispatcher>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::channel(capacity);
        let shared = queue.shared.clone();
        tracing::info!("📬 Push queue started (dispatcher: {}, capacity: {})", dispatcher.name(), capacity.max(1));
        let handle = tokio::spawn(run_worker(rx, dispatcher, shared));
        (queue, handle)
    }

    /// Hand a message to the worker without waiting.
    pub fn enqueue(&self, message: PushMessage) {
        let Some(tx) = &self.tx else {
            tracing::debug!("🔕 Push disabled, dropping message for applet {}", message.applet_id);
            return;
        };
        let applet_id = message.applet_id;
        match tx.try_send(message) {
            Ok(()) => self.shared.bump(|s| s.enqueued += 1),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.bump(|s| s.dropped += 1);
                tracing::warn!("⚠️ Push queue full, dropped message for applet {applet_id}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.bump(|s| s.dropped += 1);
                tracing::warn!("⚠️ Push queue closed, dropped message for applet {applet_id}");
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Most recent delivery attempts, oldest first.
    pub fn history(&self) -> Vec<DeliveryRecord> {
        self.shared
            .history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<DispatchFailure> {
        self.shared.failures.subscribe()
    }

    /// Ask the worker to stop after its current delivery.
    pub fn shutdown(&self) {
        self.shared.shutdown.notify_one();
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<PushMessage>,
    dispatcher: Arc<dyn PushDispatcher>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => {
                tracing::info!("🛑 Push queue stopped");
                break;
            }
            next = rx.recv() => {
                let Some(message) = next else { break };
                deliver(&message, dispatcher.as_ref(), &shared).await;
            }
        }
    }
}

async fn deliver(message: &PushMessage, dispatcher: &dyn PushDispatcher, shared: &Shared) {
    let result = dispatcher.send(message).await;
    let at = Utc::now();
    let error = result.err().map(|e| e.to_string());
    match &error {
        None => shared.bump(|s| s.delivered += 1),
        Some(e) => {
            shared.bump(|s| s.failed += 1);
            tracing::warn!("⚠️ Push via {} failed for applet {}: {e}", dispatcher.name(), message.applet_id);
            // No subscribers is fine.
            let _ = shared.failures.send(DispatchFailure {
                applet_id: message.applet_id,
                dispatcher: dispatcher.name().to_string(),
                error: e.clone(),
                at,
            });
        }
    }
    shared.record(DeliveryRecord {
        applet_id: message.applet_id,
        kind: message.kind,
        title: message.title.clone(),
        ok: error.is_none(),
        error,
        at,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_core::error::{CadenceError, Result};

    struct Flaky;

    #[async_trait]
    impl PushDispatcher for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, message: &PushMessage) -> Result<()> {
            if message.applet_id % 2 == 0 {
                Err(CadenceError::Dispatch("device gateway down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_full_queue_drops() {
        let (queue, _rx) = PushQueue::channel(1);
        queue.enqueue(PushMessage::schedule_changed(1, None));
        queue.enqueue(PushMessage::schedule_changed(1, None));
        let stats = queue.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_disabled_queue_discards() {
        let queue = PushQueue::disabled();
        assert!(!queue.is_enabled());
        queue.enqueue(PushMessage::schedule_changed(1, None));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_worker_records_failures() {
        let (queue, rx) = PushQueue::channel(8);
        let mut failures = queue.subscribe_failures();
        queue.enqueue(PushMessage::schedule_changed(1, None));
        queue.enqueue(PushMessage::schedule_changed(2, Some(vec![7])));
        // Closing the sender lets the worker exit once drained.
        let shared = queue.shared.clone();
        drop(queue);
        run_worker(rx, Arc::new(Flaky), shared.clone()).await;

        let stats = *shared.stats.lock().unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.applet_id, 2);
        assert_eq!(failure.dispatcher, "flaky");

        let history = shared.history.lock().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].ok);
        assert!(!history[1].ok);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let (queue, handle) = PushQueue::start(Arc::new(Flaky), 4);
        queue.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_history_is_bounded() {
        let shared = Shared::new();
        for i in 0..(HISTORY_LIMIT as i64 + 5) {
            shared.record(DeliveryRecord {
                applet_id: i,
                kind: PushKind::ScheduleUpdated,
                title: String::new(),
                ok: true,
                error: None,
                at: Utc::now(),
            });
        }
        let history = shared.history.lock().unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].applet_id, 5);
    }
}
