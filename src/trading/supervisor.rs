use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::chat::{ChatId, NotificationSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run `work` in its own task and watch it from a second one. Failures and
/// panics are logged and reported to `admin_chat`; nothing propagates to
/// the caller beyond the returned outcome.
pub fn spawn_supervised<F>(
    name: &str,
    work: F,
    sink: Arc<dyn NotificationSink>,
    admin_chat: ChatId,
) -> JoinHandle<TaskOutcome>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let inner = tokio::spawn(work);

    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => {
                info!(task = %name, "Background task completed");
                TaskOutcome::Completed
            }
            Ok(Err(e)) => {
                let msg = format!("{:#}", e);
                error!(task = %name, error = %msg, "Background task failed");
                sink.notify(admin_chat, &format!("⚠️ Task {} failed: {}", name, msg))
                    .await;
                TaskOutcome::Failed(msg)
            }
            Err(e) if e.is_panic() => {
                let msg = panic_message(e.into_panic().as_ref());
                error!(task = %name, panic_msg = %msg, "Background task panicked");
                sink.notify(admin_chat, &format!("⚠️ Task {} crashed: {}", name, msg))
                    .await;
                TaskOutcome::Panicked(msg)
            }
            Err(e) => {
                info!(task = %name, "Background task cancelled: {}", e);
                TaskOutcome::Failed("cancelled".to_string())
            }
        }
    })
}

/// Exponential reconnect delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
