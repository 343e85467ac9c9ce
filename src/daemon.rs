use std::future::{self, Future};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::bucket::{Bucket, Hit};
use crate::flags::Flags;
use crate::metrics::{self, Outcome};

/// Cadence used when the bucket's rate parameters give a zero interval.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Exclusive upper bound of the random sleep before a retry.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(5);

/// Drives periodic refills of a [`Bucket`] and applies the [`Flags`]
/// policies around its hits.
///
/// A daemon is created stopped. [`start`](Daemon::start) spawns one tokio task
/// that fills the bucket once per interval; [`stop`](Daemon::stop) cancels it
/// and waits for it to exit. [`hit`](Daemon::hit) may be called in either
/// state, but tokens only regenerate while running.
#[derive(Debug)]
pub struct Daemon {
    bucket: Arc<Bucket>,
    flags: Flags,
    interval: Duration,
    retry_window: Duration,
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Daemon {
    /// Bind a daemon to `bucket`, refilling every `rate_duration * rate`.
    pub fn new(bucket: Arc<Bucket>, flags: Flags) -> Self {
        let interval = refill_interval(&bucket);
        Self::with_interval(bucket, flags, interval)
    }

    /// Bind a daemon to `bucket` with an explicit refill cadence.
    ///
    /// A zero interval falls back to [`DEFAULT_REFILL_INTERVAL`].
    pub fn with_interval(bucket: Arc<Bucket>, flags: Flags, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_REFILL_INTERVAL
        } else {
            interval
        };
        info!(
            bucket = %bucket.designation(),
            ?interval,
            ?flags,
            "new daemon initialised"
        );
        Self {
            bucket,
            flags,
            interval,
            retry_window: DEFAULT_RETRY_WINDOW,
            running: Mutex::new(None),
        }
    }

    /// Replace the upper bound of the random retry sleep.
    pub fn with_retry_window(mut self, retry_window: Duration) -> Self {
        self.retry_window = retry_window;
        self
    }

    pub fn bucket(&self) -> &Arc<Bucket> {
        &self.bucket
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Spawn the refill loop on the current tokio runtime.
    ///
    /// Fails if the daemon is already running or no runtime is available.
    pub fn start(&self) -> Result<()> {
        let mut running = self.lock_running();
        if running.is_some() {
            bail!(
                "refill loop for bucket {} is already running",
                self.bucket.designation()
            );
        }
        let runtime = tokio::runtime::Handle::try_current()
            .context("starting refill loop outside of a tokio runtime")?;

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(
            refill_loop(self.bucket.clone(), self.interval, cancel.clone()).in_current_span(),
        );
        *running = Some(Running { cancel, handle });
        info!(
            bucket = %self.bucket.designation(),
            interval = ?self.interval,
            "refill loop started"
        );
        Ok(())
    }

    /// Cancel the refill loop and wait for it to exit.
    ///
    /// Returns `false` if the daemon was not running.
    pub async fn stop(&self) -> bool {
        let running = self.lock_running().take();
        let Some(Running { cancel, handle }) = running else {
            return false;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(bucket = %self.bucket.designation(), "refill loop ended abnormally: {e}");
        }
        true
    }

    /// Check the rate limit once, applying the forgiving and retryable
    /// policies.
    ///
    /// With [`Flags::RETRYABLE`] a denial may suspend the caller for up to the
    /// retry window before the single retry.
    pub async fn hit(&self) -> bool {
        self.hit_or_abandon(future::pending()).await
    }

    /// Like [`hit`](Daemon::hit), but a retry still sleeping when `cancel`
    /// fires is abandoned and reported as a denial.
    pub async fn hit_with_cancel(&self, cancel: &CancellationToken) -> bool {
        self.hit_or_abandon(cancel.cancelled()).await
    }

    /// Like [`hit`](Daemon::hit), but never waits past `deadline`; a retry
    /// that would start later is abandoned and reported as a denial.
    pub async fn hit_until(&self, deadline: Instant) -> bool {
        self.hit_or_abandon(time::sleep_until(deadline)).await
    }

    async fn hit_or_abandon<F>(&self, abandon: F) -> bool
    where
        F: Future<Output = ()>,
    {
        if self.first_attempt() {
            return true;
        }
        if !self.flags.contains(Flags::RETRYABLE) {
            self.denied();
            return false;
        }

        let pause = self.retry_pause();
        debug!(
            bucket = %self.bucket.designation(),
            ?pause,
            "retryable flag: sleeping before retry"
        );
        tokio::select! {
            biased;
            _ = abandon => {
                debug!(bucket = %self.bucket.designation(), "retry abandoned");
                self.denied();
                return false;
            }
            _ = time::sleep(pause) => {}
        }

        if self.bucket.hit() {
            metrics::record_hit(self.bucket.designation(), Outcome::Retried);
            true
        } else {
            self.denied();
            false
        }
    }

    fn first_attempt(&self) -> bool {
        let outcome = if self.flags.contains(Flags::FORGIVING) {
            self.bucket.hit_forgiving()
        } else if self.bucket.hit() {
            Hit::Granted
        } else {
            Hit::Denied
        };

        match outcome {
            Hit::Granted => {
                #[cfg(feature = "debug-logs")]
                debug!(bucket = %self.bucket.designation(), "hit granted");
                metrics::record_hit(self.bucket.designation(), Outcome::Granted);
            }
            Hit::Forgiven => {
                debug!(
                    bucket = %self.bucket.designation(),
                    "forgiving flag: granting hit after drain"
                );
                metrics::record_hit(self.bucket.designation(), Outcome::Forgiven);
            }
            Hit::Denied => {}
        }
        outcome.is_granted()
    }

    fn denied(&self) {
        #[cfg(feature = "debug-logs")]
        debug!(bucket = %self.bucket.designation(), "hit denied");
        metrics::record_hit(self.bucket.designation(), Outcome::Denied);
    }

    fn retry_pause(&self) -> Duration {
        let window = u64::try_from(self.retry_window.as_nanos()).unwrap_or(u64::MAX);
        if window == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..window))
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            handle.abort();
        }
    }
}

fn refill_interval(bucket: &Bucket) -> Duration {
    let nanos = bucket
        .rate_duration()
        .as_nanos()
        .saturating_mul(u128::from(bucket.rate()));
    match u64::try_from(nanos) {
        Ok(0) => DEFAULT_REFILL_INTERVAL,
        Ok(n) => Duration::from_nanos(n),
        Err(_) => Duration::from_nanos(u64::MAX),
    }
}

async fn refill_loop(bucket: Arc<Bucket>, interval: Duration, cancel: CancellationToken) {
    // First fill lands one full interval after start.
    let first = Instant::now().checked_add(interval).unwrap_or_else(Instant::now);
    let mut ticker = time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(bucket = %bucket.designation(), "refill loop stopped");
                return;
            }
            _ = ticker.tick() => bucket.fill(),
        }
    }
}
