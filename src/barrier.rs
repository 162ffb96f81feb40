// Bring-up latch for the two independently-opened channels.
use std::sync::atomic::{AtomicUsize, Ordering};

/// Countdown latch that releases exactly once.
///
/// The producer and consumer channels open concurrently and complete in
/// unknown relative order; startup must run once, after the last of them.
/// An atomic countdown keeps that single-fire guarantee even off the
/// cooperative single-thread model the original design assumed.
///
/// ```
/// use messenger::barrier::ChannelBarrier;
///
/// let barrier = ChannelBarrier::new(2);
/// assert!(!barrier.arrive());
/// assert!(barrier.arrive());
/// assert!(!barrier.arrive());
/// ```
#[derive(Debug)]
pub struct ChannelBarrier {
    remaining: AtomicUsize,
}

impl ChannelBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
        }
    }

    /// Records one arrival. Returns `true` only for the arrival that
    /// brings the count to zero; earlier and later arrivals return `false`.
    pub fn arrive(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }
}
