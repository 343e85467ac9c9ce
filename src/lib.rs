//! Token-bucket rate limiting with a background refill daemon.
//!
//! A [`Bucket`] holds a bounded number of tokens. A [`Daemon`] refills it on a
//! fixed cadence and answers rate-limit checks through [`Daemon::hit`],
//! optionally forgiving a denial right after a drain or retrying once after a
//! short random sleep (see [`Flags`]).
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use tokenbucket::{Bucket, Daemon, Flags};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let bucket = Arc::new(Bucket::new("api", 10, 1, Duration::from_millis(100)));
//! let daemon = Daemon::new(bucket, Flags::FORGIVING | Flags::RETRYABLE);
//! daemon.start()?;
//! if daemon.hit().await {
//!     // call the API
//! }
//! daemon.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod config;
pub mod daemon;
pub mod flags;
pub mod metrics;

pub use bucket::{Bucket, Hit};
pub use daemon::{Daemon, DEFAULT_REFILL_INTERVAL, DEFAULT_RETRY_WINDOW};
pub use flags::Flags;
