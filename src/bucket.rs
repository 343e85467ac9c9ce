use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::metrics;

/// Outcome of a single forgiving-aware hit against a [`Bucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    /// A token was consumed.
    Granted,
    /// No token was left, but the bucket had just been drained and the
    /// denial was turned into a grant.
    Forgiven,
    Denied,
}

impl Hit {
    pub fn is_granted(self) -> bool {
        !matches!(self, Hit::Denied)
    }
}

/// A fixed-capacity token bucket.
///
/// The bucket only knows how to add tokens ([`fill`](Bucket::fill)) and take
/// one ([`hit`](Bucket::hit)); when to refill and what to do on denial is left
/// to the [`Daemon`](crate::Daemon). Every read and write of the mutable state
/// goes through one mutex, so a bucket can be shared behind an `Arc` between
/// the refill task and any number of callers.
#[derive(Debug)]
pub struct Bucket {
    designation: String,
    capacity: u64,
    rate: u64,
    rate_duration: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    // Pre-decrement count seen by the last successful hit since the previous
    // fill. Consumed by the forgiving policy.
    last_available_tokens: u64,
}

impl Bucket {
    /// Create a full bucket.
    ///
    /// `rate` tokens are added per refill; `rate_duration` is the unit the
    /// daemon multiplies by `rate` to derive its refill cadence.
    pub fn new(
        designation: impl Into<String>,
        capacity: u64,
        rate: u64,
        rate_duration: Duration,
    ) -> Self {
        let designation = designation.into();
        trace!(bucket = %designation, capacity, rate, ?rate_duration, "bucket created");
        Self {
            designation,
            capacity,
            rate,
            rate_duration,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_available_tokens: 0,
            }),
        }
    }

    /// Override the initial token count, clamped to capacity. Any drain
    /// snapshot taken before the override is discarded.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        let capacity = self.capacity;
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.tokens = tokens.min(capacity);
        state.last_available_tokens = 0;
        self
    }

    pub fn designation(&self) -> &str {
        &self.designation
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn rate_duration(&self) -> Duration {
        self.rate_duration
    }

    /// Current number of available tokens.
    pub fn tokens(&self) -> u64 {
        self.lock().tokens
    }

    pub fn last_available_tokens(&self) -> u64 {
        self.lock().last_available_tokens
    }

    /// Add `rate` tokens, never exceeding capacity.
    pub fn fill(&self) {
        let tokens = {
            let mut state = self.lock();
            state.tokens = state.tokens.saturating_add(self.rate).min(self.capacity);
            state.last_available_tokens = 0;
            state.tokens
        };
        trace!(bucket = %self.designation, tokens, "bucket filled");
        metrics::record_fill(&self.designation, tokens);
    }

    /// Consume one token if any is available.
    pub fn hit(&self) -> bool {
        let mut state = self.lock();
        Self::take(&mut state)
    }

    /// Hit the bucket and, on denial, consume the drain snapshot.
    ///
    /// The hit and the snapshot check happen under one lock acquisition, so
    /// a concurrent fill cannot slip in between them.
    pub fn hit_forgiving(&self) -> Hit {
        let mut state = self.lock();
        if Self::take(&mut state) {
            return Hit::Granted;
        }
        if state.last_available_tokens > 0 {
            state.last_available_tokens = 0;
            return Hit::Forgiven;
        }
        Hit::Denied
    }

    fn take(state: &mut BucketState) -> bool {
        if state.tokens == 0 {
            return false;
        }
        state.last_available_tokens = state.tokens;
        state.tokens -= 1;
        true
    }

    // Critical sections never leave the state half-written, so a poisoned
    // lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
