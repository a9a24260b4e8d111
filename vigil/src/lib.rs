//! Cooperative cancellation and progress reporting for long-running
//! pipeline stages.
//!
//! A stage takes an `impl Watch` and calls [`Watch::checkpoint`] at safe
//! abort points. The caller keeps the [`VigilState`] handle, from which it
//! can cancel the computation or poll its fractional progress. Stages that
//! delegate part of their work to a helper hand it a [`Watch::fork`]
//! covering the helper's share of the overall progress.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Returned from a checkpoint when the computation was cancelled from the
/// controlling side. Stages propagate this without producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::error::Error for CancelledError {}

impl Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("computation was cancelled")
    }
}

/// Cancellation checkpointing plus fractional progress reporting.
pub trait Watch: Send + Sync {
    /// true once the controlling side has requested cancellation.
    fn is_cancelled(&self) -> bool;

    /// Record fractional progress of this watch, in `[0.0, 1.0]`.
    fn set_progress(&mut self, fraction: f64);

    /// New watch covering `fraction` of this watch's remaining progress,
    /// sharing the same cancel state.
    fn fork(&mut self, fraction: f64) -> Self;

    /// Record progress and bail out if cancellation was requested.
    fn checkpoint(&mut self, fraction: f64) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            return Err(CancelledError);
        }
        self.set_progress(fraction);
        Ok(())
    }
}

/// Watch that ignores progress and never cancels.
#[derive(Default, Copy, Clone)]
pub struct NoOpWatch;

impl Watch for NoOpWatch {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn set_progress(&mut self, _fraction: f64) {}

    fn fork(&mut self, _fraction: f64) -> Self {
        *self
    }
}

/// Shared state behind a [`SharedWatch`]; held by the controlling side.
#[derive(Debug, Default)]
pub struct VigilState {
    cancelled: AtomicBool,
    progress: AtomicU64,
}

// Progress is tracked in integer ticks so that forked watches can add
// their deltas atomically. Half the u64 range leaves headroom for float
// rounding when converting fractions back to ticks.
const MAX_TICKS: u64 = u64::MAX >> 1;

impl VigilState {
    /// Request cancellation. Running stages observe it at their next
    /// checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// true if `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Overall progress in `[0.0, 1.0]`, aggregated over all forks.
    pub fn progress(&self) -> f64 {
        self.progress.load(Ordering::Relaxed) as f64 / MAX_TICKS as f64
    }
}

/// Watch backed by a shared [`VigilState`].
#[derive(Debug)]
pub struct SharedWatch {
    state: Arc<VigilState>,
    ticks: u64,
    total_ticks: u64,
}

/// Create a linked (controller, watch) pair.
pub fn pair() -> (Arc<VigilState>, SharedWatch) {
    let state: Arc<VigilState> = Default::default();
    let watch = SharedWatch {
        state: state.clone(),
        ticks: 0,
        total_ticks: MAX_TICKS,
    };
    (state, watch)
}

impl Watch for SharedWatch {
    fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    fn set_progress(&mut self, fraction: f64) {
        debug_assert!((0.0..=1.0).contains(&fraction));

        let next = (fraction * self.total_ticks as f64) as u64;
        if next >= self.ticks {
            self.state.progress.fetch_add(next - self.ticks, Ordering::Relaxed);
        } else {
            self.state.progress.fetch_sub(self.ticks - next, Ordering::Relaxed);
        }
        self.ticks = next;
    }

    fn fork(&mut self, fraction: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&fraction));

        let fork_ticks = (fraction * self.total_ticks as f64) as u64;
        // Account the fork's whole share to this watch up front, so the
        // parent reporting 1.0 later does not double-count it.
        self.ticks += fork_ticks;

        SharedWatch {
            state: self.state.clone(),
            ticks: 0,
            total_ticks: fork_ticks,
        }
    }
}
