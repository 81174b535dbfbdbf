//! Periodic registration refresh
//!
//! A [`KeepAliveTask`] owns one background tokio task that re-sends the
//! REGISTER payload over the control connection's shared writer. The first
//! refresh fires one full period after spawning. A send failure ends the task
//! without retry; the failure is logged and published to whoever subscribed to
//! the failure channel. Cancellation happens through [`KeepAliveTask::cancel`]
//! or by dropping the handle.

use std::sync::Arc;
use std::time::Duration;
use tether_core::{Message, MessageMethod, Result, TetherError, Username};
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Write half of a control connection, shared with the keep-alive task
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Published when a keep-alive send fails and the task stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveFailure {
    /// Registration that lapsed
    pub target_id: String,
    /// Why the refresh could not be sent
    pub error: TetherError,
}

/// REGISTER request for `target_id`
pub fn registration_message(target_id: &str) -> Message {
    Message::request(MessageMethod::Register).with_attribute(Username::new(target_id))
}

/// Send `message` over a shared writer
pub async fn send_shared(writer: &SharedWriter, message: &Message) -> Result<()> {
    let mut guard = writer.lock().await;
    message.write_to(&mut *guard).await
}

/// Shortest period a keep-alive task runs with
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// How long a cancelled task may take to finish an in-flight refresh
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Handle to a running keep-alive task
#[derive(Debug)]
pub struct KeepAliveTask {
    target_id: String,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAliveTask {
    /// Start refreshing `target_id` every `period` over `writer`.
    ///
    /// Periods below [`MIN_PERIOD`] are raised to it.
    pub fn spawn(
        target_id: impl Into<String>,
        writer: SharedWriter,
        period: Duration,
        failures: broadcast::Sender<KeepAliveFailure>,
    ) -> Self {
        let target_id = target_id.into();
        if period < MIN_PERIOD {
            tracing::warn!(target_id = %target_id, ?period, "Keep-alive period raised to 1ms");
        }
        let period = period.max(MIN_PERIOD);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(target_id.clone(), writer, period, failures, shutdown_rx));

        Self {
            target_id,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Registration this task refreshes
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Whether the task has stopped (cancelled or failed)
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Stop future refreshes.
    ///
    /// A refresh already being written is allowed to complete so the control
    /// stream never carries a partial frame. The task is aborted only if it
    /// does not finish within a grace period.
    pub fn cancel(&mut self) {
        let _ = self.shutdown_tx.send(true);
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::debug!(target_id = %self.target_id, "Keep-alive cancelled");
        if handle.is_finished() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let target_id = self.target_id.clone();
                runtime.spawn(async move {
                    let abort = handle.abort_handle();
                    if tokio::time::timeout(CANCEL_GRACE, handle).await.is_err() {
                        tracing::warn!(target_id = %target_id, "Keep-alive did not stop, aborting");
                        abort.abort();
                    }
                });
            }
            Err(_) => handle.abort(),
        }
    }
}

impl Drop for KeepAliveTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(
    target_id: String,
    writer: SharedWriter,
    period: Duration,
    failures: broadcast::Sender<KeepAliveFailure>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let message = registration_message(&target_id);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let result = {
            let mut guard = writer.lock().await;
            // A deregistration may have taken the writer while we waited
            if *shutdown_rx.borrow() {
                break;
            }
            message.write_to(&mut *guard).await
        };
        match result {
            Ok(()) => tracing::debug!(target_id = %target_id, "Keep-alive sent"),
            Err(error) => {
                tracing::warn!(
                    target_id = %target_id,
                    error = %error,
                    "Keep-alive failed, registration will lapse"
                );
                let _ = failures.send(KeepAliveFailure {
                    target_id: target_id.clone(),
                    error,
                });
                break;
            }
        }
    }
}
