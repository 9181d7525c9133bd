//! Fire-and-forget analytics event emission.
//!
//! Events are pushed through a bounded queue drained by a worker task. The
//! decision path never blocks on the sink: a full queue or a failing sink
//! drops the event with a log line and nothing else.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::Provider;

/// Events the identity core emits toward the analytics domain.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    LoginStarted {
        provider: Provider,
    },
    Login {
        user_id: String,
        provider: Provider,
    },
    Registration {
        user_id: String,
        provider: Provider,
    },
    TokenIssued {
        user_id: String,
        token_id: String,
    },
    TokenRotated {
        user_id: String,
        old_token_id: String,
        new_token_id: String,
    },
    TokenRevoked {
        token_id: String,
        reason: String,
    },
    RefreshRejected {
        token_id: String,
        reason: String,
    },
    MfaEvent {
        user_id: String,
        method: String,
        action: Option<String>,
        success: bool,
    },
    RoleMutation {
        actor_id: String,
        action: String,
        target_id: String,
    },
}

/// Consumer side of the event stream. Processing is out of scope here.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn deliver(&self, event: AuthEvent) -> Result<(), anyhow::Error>;
}

/// Sink that discards everything.
pub struct NullSink;

#[async_trait]
impl AnalyticsSink for NullSink {
    async fn deliver(&self, _event: AuthEvent) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Sink that collects events in memory, for tests.
#[derive(Default)]
pub struct MemorySink {
    pub events: Mutex<Vec<AuthEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AuthEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AnalyticsSink for MemorySink {
    async fn deliver(&self, event: AuthEvent) -> Result<(), anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("sink mutex poisoned: {e}"))?
            .push(event);
        Ok(())
    }
}

/// Handle used by the services to emit events. Cheap to clone.
#[derive(Clone)]
pub struct AnalyticsEmitter {
    tx: mpsc::Sender<AuthEvent>,
}

impl AnalyticsEmitter {
    /// Spawn the worker task that drains the queue into the sink.
    pub fn spawn(sink: Arc<dyn AnalyticsSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuthEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.deliver(event).await {
                    tracing::error!(error = %e, "Failed to deliver analytics event");
                }
            }
        });
        Self { tx }
    }

    /// Non-blocking emission. Dropped events are logged and forgotten.
    pub fn emit(&self, event: AuthEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(error = %e, "Dropping analytics event, queue full or worker gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_through_the_queue() {
        let sink = Arc::new(MemorySink::new());
        let emitter = AnalyticsEmitter::spawn(sink.clone(), 16);

        emitter.emit(AuthEvent::Login {
            user_id: "user-1".to_string(),
            provider: Provider::Google,
        });

        // Give the worker a beat to drain.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        struct StallSink;
        #[async_trait]
        impl AnalyticsSink for StallSink {
            async fn deliver(&self, _event: AuthEvent) -> Result<(), anyhow::Error> {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let emitter = AnalyticsEmitter::spawn(Arc::new(StallSink), 1);
        for _ in 0..64 {
            emitter.emit(AuthEvent::LoginStarted {
                provider: Provider::Riot,
            });
        }
        // Reaching this point without awaiting proves emission never blocks.
    }
}
