//! Session clock and re-authentication jitter.
//!
//! When a broker grants a session lifetime, the client must re-authenticate
//! before it expires. The deadline is drawn uniformly from the window
//! `[85%, 95%)` of the lifetime: the lower bound leaves room for network
//! latency and clock drift, the spread keeps connections that authenticated
//! together from re-authenticating together.
//!
//! Time and randomness are injected so the state machine stays deterministic
//! under test.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lower bound of the re-authentication window, in percent of the lifetime.
pub const REAUTH_WINDOW_START_PCT: i128 = 85;

/// Upper (exclusive) bound of the re-authentication window, in percent.
pub const REAUTH_WINDOW_END_PCT: i128 = 95;

/// Source of wall-clock milliseconds.
pub trait Time: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn milliseconds(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Time for SystemClock {
    fn milliseconds(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct MockTime {
    now_ms: AtomicI64,
}

impl MockTime {
    /// Create a clock frozen at `now_ms`.
    #[must_use]
    pub fn new(now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(now_ms),
        })
    }

    /// Move the clock forward.
    pub fn sleep(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Time for MockTime {
    fn milliseconds(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Source of uniformly distributed fractions in `[0, 1)`.
pub trait JitterSource: Send + fmt::Debug {
    /// Next fraction in `[0, 1)`.
    fn next_fraction(&mut self) -> f64;
}

/// Entropy-seeded jitter for production use.
#[derive(Debug)]
pub struct RandomJitter {
    rng: StdRng,
}

impl RandomJitter {
    /// Seed from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed deterministically.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RandomJitter {
    fn next_fraction(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Always returns the same fraction.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn next_fraction(&mut self) -> f64 {
        self.0
    }
}

/// Compute the absolute re-authentication deadline.
///
/// `fraction` must lie in `[0, 1)`; it selects a point in the window
/// `[end + 0.85L, end + 0.95L)`. Returns `None` when no positive lifetime was
/// granted: a zero lifetime means "no expiry", exactly like an absent one.
///
/// The window is computed in integer milliseconds, so the bounds hold exactly
/// for any lifetime of at least 10 ms. Shorter lifetimes have no integer in
/// the window and get the lower bound.
#[must_use]
pub fn reauthentication_deadline(
    authentication_end_ms: i64,
    session_lifetime_ms: Option<i64>,
    fraction: f64,
) -> Option<i64> {
    let lifetime = i128::from(session_lifetime_ms.filter(|l| *l > 0)?);

    let lower = ceil_div(lifetime * REAUTH_WINDOW_START_PCT, 100);
    let upper = ceil_div(lifetime * REAUTH_WINDOW_END_PCT, 100);
    let span = upper - lower;

    let offset = if span > 0 {
        let fraction = fraction.clamp(0.0, 1.0);
        ((fraction * span as f64) as i128).min(span - 1)
    } else {
        0
    };

    let deadline = i128::from(authentication_end_ms) + lower + offset;
    Some(deadline.min(i128::from(i64::MAX)) as i64)
}

fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    (numerator + denominator - 1) / denominator
}
