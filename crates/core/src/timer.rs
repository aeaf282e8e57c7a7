//! Wall-clock time for animation.

use std::time::Instant;

/// Seconds since construction. Drives the model rotation.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts counting now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_elapsed_grows() {
        let timer = Timer::new();
        let first = timer.elapsed_secs();
        std::thread::sleep(Duration::from_millis(5));
        let second = timer.elapsed_secs();
        assert!(second > first);
        assert!(second >= 0.005);
    }
}
