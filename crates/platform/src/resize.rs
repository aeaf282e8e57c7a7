//! Resize notification shared between the window and the frame loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the window when its framebuffer size changes, consumed by the
/// frame loop at the end of a present attempt.
///
/// Clones share the same flag. Any number of notifications before a
/// [`take`](Self::take) collapse into one pending resize.
#[derive(Clone, Debug, Default)]
pub struct ResizeSignal {
    pending: Arc<AtomicBool>,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a resize as pending.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether a resize was pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_clear() {
        let signal = ResizeSignal::new();
        assert!(!signal.is_pending());
        assert!(!signal.take());
    }

    #[test]
    fn test_take_consumes_once() {
        let signal = ResizeSignal::new();
        signal.notify();
        signal.notify();
        assert!(signal.is_pending());
        assert!(signal.take());
        assert!(!signal.take());
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_clones_share_state() {
        let window_side = ResizeSignal::new();
        let frame_side = window_side.clone();

        window_side.notify();
        assert!(frame_side.take());
        assert!(!window_side.is_pending());
    }

    #[test]
    fn test_notify_from_another_thread() {
        let signal = ResizeSignal::new();
        let remote = signal.clone();
        std::thread::spawn(move || remote.notify())
            .join()
            .unwrap();
        assert!(signal.take());
    }

    #[test]
    fn test_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResizeSignal>();
    }
}
