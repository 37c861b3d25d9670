//! Interrupt-to-task wake signal
//!
//! A single binary rendezvous between the radio's DIO1 interrupt and the
//! control task. The interrupt only ever signals; the control task is the
//! only consumer. Repeated signals while already signalled coalesce — only
//! "an event is pending" matters, never which or how many.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

/// Binary wake signal shared between interrupt and task context.
///
/// Wraps a single-slot [`Signal`], which is safe to release from interrupt
/// context while being awaited from task context.
pub struct WakeSignal {
    inner: Signal<CriticalSectionRawMutex, ()>,
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            inner: Signal::new(),
        }
    }

    /// Warm-up sequence: signal then immediately clear, guaranteeing the
    /// primitive starts in a deterministic clear state.
    pub fn init(&self) {
        self.inner.signal(());
        self.inner.reset();
    }

    /// Release the signal from interrupt context.
    ///
    /// Never blocks and never allocates. A no-op when already signalled.
    pub fn signal_from_isr(&self) {
        self.inner.signal(());
    }

    /// Nudge the control task from task context (e.g. a queued send request).
    pub fn nudge(&self) {
        self.inner.signal(());
    }

    /// Block with no timeout until signalled, then clear.
    ///
    /// The sole long-term suspension point in the system.
    pub async fn wait(&self) {
        self.inner.wait().await;
    }

    /// Clear any pending signal without blocking.
    ///
    /// Returns true when a stray signal was consumed.
    pub fn try_consume(&self) -> bool {
        self.inner.try_take().is_some()
    }

    /// Consume any signal arriving within the bound, then return.
    ///
    /// Used by the event handlers to re-arm for the next sleep cycle: a
    /// stray signal left over from the operation that just completed must
    /// not cause an immediate spurious wake.
    pub async fn consume_within(&self, bound: Duration) {
        if self.try_consume() {
            return;
        }
        match select(self.inner.wait(), Timer::after(bound)).await {
            Either::First(()) => {}
            Either::Second(()) => {}
        }
    }

    /// Whether a signal is currently pending.
    pub fn is_signaled(&self) -> bool {
        self.inner.signaled()
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}
