//! Background sampling task.
//!
//! One lightweight task per monitored worker session. Each iteration
//! re-derives the sampling policy, sleeps for its interval, then requests
//! a position from the platform source off the runtime under a bounded
//! timeout. The task exits when cancelled, when the worker clocks out, or
//! when the derived policy disables background updates; a position request
//! still in flight at cancellation is discarded, not processed.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::attendance::AttendanceStatus;
use crate::monitor::Monitor;
use crate::ports::PositionSource;

/// Tunables for a sampling task.
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    /// Budget for one blocking position acquisition.
    pub acquire_timeout: std::time::Duration,
    /// Replace the policy-derived interval. Diagnostics and tests only;
    /// production callers leave this unset.
    pub interval_override: Option<std::time::Duration>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: std::time::Duration::from_secs(10),
            interval_override: None,
        }
    }
}

/// Handle to a running sampling task.
pub struct SamplerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SamplerHandle {
    /// Request cancellation. The loop observes it at the next await point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Spawn the sampling loop for one worker.
pub fn spawn_sampler(
    monitor: Arc<Monitor>,
    user_id: String,
    source: Arc<dyn PositionSource>,
    options: SamplerOptions,
) -> SamplerHandle {
    let token = CancellationToken::new();
    let loop_token = token.clone();
    let join = tokio::spawn(async move {
        sampling_loop(monitor, user_id, source, options, loop_token).await;
    });
    SamplerHandle { token, join }
}

async fn sampling_loop(
    monitor: Arc<Monitor>,
    user_id: String,
    source: Arc<dyn PositionSource>,
    options: SamplerOptions,
    token: CancellationToken,
) {
    loop {
        let status = match monitor.current_status(&user_id) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(user_id, %err, "sampling loop cannot read status, stopping");
                return;
            }
        };
        if status == AttendanceStatus::ClockedOut {
            tracing::debug!(user_id, "worker clocked out, sampling stops");
            return;
        }

        let policy = match monitor.current_sampling_policy(&user_id) {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(user_id, %err, "sampling loop cannot derive policy, stopping");
                return;
            }
        };
        if !policy.background_enabled {
            tracing::debug!(user_id, "background updates disabled by policy, sampling stops");
            return;
        }

        let interval = options
            .interval_override
            .unwrap_or(std::time::Duration::from_millis(policy.min_interval_ms));
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let src = Arc::clone(&source);
        let acquired = tokio::time::timeout(
            options.acquire_timeout,
            tokio::task::spawn_blocking(move || src.acquire()),
        )
        .await;

        if token.is_cancelled() {
            // Completed after cancellation: discard, never process.
            tracing::debug!(user_id, "discarding in-flight sample after cancellation");
            return;
        }

        match acquired {
            Ok(Ok(Ok(sample))) => {
                if let Err(err) = monitor.submit_position(&user_id, sample) {
                    tracing::warn!(user_id, %err, "position submission failed");
                }
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(user_id, %err, "position acquisition failed");
            }
            Ok(Err(join_err)) => {
                tracing::warn!(user_id, %join_err, "position acquisition worker panicked");
            }
            Err(_) => {
                tracing::warn!(
                    user_id,
                    timeout_ms = options.acquire_timeout.as_millis() as u64,
                    "position acquisition timed out"
                );
            }
        }
    }
}
