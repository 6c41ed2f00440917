// Cancellation and bounded polling for the workflow and detection loops.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{secs, TimingConfig};
use crate::errors::{HayBotError, HayBotResult};

/// Shared stop flag with chunked, cancellable sleeps.
#[derive(Debug, Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    chunk: Duration,
}

impl StopSignal {
    pub fn new(chunk: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            chunk: chunk.max(Duration::from_millis(1)),
        }
    }

    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self::new(secs(timing.stop_check_interval.min(timing.max_sleep_chunk)))
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` if the signal is already set.
    pub fn check(&self) -> HayBotResult<()> {
        if self.is_stopped() {
            Err(HayBotError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `total`, waking at least once per chunk to observe the flag.
    pub async fn sleep(&self, total: Duration) -> HayBotResult<()> {
        let mut remaining = total;
        self.check()?;
        while !remaining.is_zero() {
            let step = remaining.min(self.chunk);
            tokio::time::sleep(step).await;
            remaining -= step;
            self.check()?;
        }
        Ok(())
    }
}

/// Outcome of one polling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    Retry,
}

/// At most `max_attempts` tries with a cancellable pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Runs `attempt(n)` for n in `0..max_attempts`; `Ok(None)` means the
    /// bound was exhausted.
    pub async fn run<T, F, Fut>(&self, stop: &StopSignal, mut attempt: F) -> HayBotResult<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HayBotResult<Attempt<T>>>,
    {
        for n in 0..self.max_attempts {
            stop.check()?;
            if let Attempt::Done(value) = attempt(n).await? {
                return Ok(Some(value));
            }
            if n + 1 < self.max_attempts {
                stop.sleep(self.delay).await?;
            }
        }
        Ok(None)
    }
}
