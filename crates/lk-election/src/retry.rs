//! Retry policy, cancellation signal and the retry loop shared by the
//! provisioning driver and the reconnection handler

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{ElectionError, Result};

/// Delay between attempts of a provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Upper bound of a random extra delay added to each sleep
    pub jitter: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Fixed delay, no attempt limit, no jitter
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            jitter: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = (!jitter.is_zero()).then_some(jitter);
        self
    }

    /// Whether another attempt may follow failed attempt number `attempt`
    /// (one based)
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Sleep before the next attempt
    pub fn next_delay(&self) -> Duration {
        match self.jitter {
            Some(jitter) => {
                let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
                self.delay + Duration::from_millis(extra)
            }
            None => self.delay,
        }
    }
}

/// Progress of one retried step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    /// Attempt number `attempt` failed and another one is scheduled
    Retrying { attempt: u32 },
    Succeeded,
}

/// Fires [`Shutdown`] signals; dropping the trigger fires them too
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cancellation signal checked at every retry boundary
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested
    pub async fn triggered(&mut self) {
        // Err means the trigger is gone, which also ends everything
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration` unless shutdown comes first
    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.triggered() => Err(ElectionError::Cancelled),
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Run `op` until it succeeds, sleeping `policy.next_delay()` between
/// failures.
///
/// Every failure is logged. `on_state` observes the step's progress. Ends with
/// [`ElectionError::Cancelled`] as soon as `shutdown` fires, including while
/// an attempt is in flight, and with [`ElectionError::RetriesExhausted`] when
/// the policy has an attempt limit that is reached.
pub async fn retry<T, F, Fut, S>(
    step: &str,
    policy: &RetryPolicy,
    shutdown: &mut Shutdown,
    mut on_state: S,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    S: FnMut(StepState),
{
    let mut attempt = 0u32;
    loop {
        if shutdown.is_triggered() {
            return Err(ElectionError::Cancelled);
        }
        attempt += 1;

        let outcome = tokio::select! {
            outcome = op() => outcome,
            _ = shutdown.triggered() => return Err(ElectionError::Cancelled),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    info!(step, attempts = attempt, "Step succeeded after retries");
                }
                on_state(StepState::Succeeded);
                return Ok(value);
            }
            Err(ElectionError::Cancelled) => return Err(ElectionError::Cancelled),
            Err(err) => {
                if !policy.allows_retry(attempt) {
                    error!(step, attempt, error = %err, "Step failed, giving up");
                    return Err(ElectionError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                let delay = policy.next_delay();
                error!(step, attempt, error = %err, retry_in = ?delay, "Step failed, retrying");
                on_state(StepState::Retrying { attempt });
                shutdown.sleep(delay).await?;
            }
        }
    }
}
