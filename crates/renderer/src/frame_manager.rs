//! Frame pacing and swapchain recreation.
//!
//! [`FrameManager`] drives one iteration of the render loop against a
//! [`FrameBackend`]. It owns only the protocol state (the current frame slot
//! and whether a swapchain rebuild is owed); every GPU object lives in the
//! backend.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on the slot's in-flight fence (CPU waits for the slot's previous use)
//! 2. Acquire a swapchain image (signals the slot's image-available semaphore)
//!    - out of date: rebuild on the next call, nothing submitted, slot kept
//! 3. Reset the fence, re-record the slot's command buffer
//! 4. Update per-frame uniforms
//! 5. Submit: wait image-available, signal render-finished and the fence
//! 6. Present (waits on render-finished)
//!    - out of date, suboptimal or resized: rebuild now
//! 7. Advance the slot
//! ```

use tracing::{debug, info, warn};

use night_platform::{ResizeSignal, is_zero_extent};
use night_rhi::{RhiError, RhiResult};

/// Result of acquiring a swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. A suboptimal swapchain is still rendered to.
    Ready { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What a call to [`FrameManager::draw_frame`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was presented and the swapchain is current.
    Presented,
    /// The frame was presented and the swapchain was rebuilt during the call.
    PresentedAndRecreated,
    /// Acquisition found the swapchain out of date. Nothing was submitted.
    SkippedOutOfDate,
    /// The surface has a zero extent. Nothing was touched.
    Minimized,
}

/// GPU side of the frame loop, one method per protocol step.
///
/// `slot` is always below the frames-in-flight count the [`FrameManager`]
/// was created with.
pub trait FrameBackend {
    /// Blocks until the slot's in-flight fence signals.
    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> RhiResult<()>;

    /// Acquires the next swapchain image, signaling the slot's image-available
    /// semaphore.
    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Returns the slot's fence to the unsignaled state.
    fn reset_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Re-records the slot's command buffer against `framebuffer[image_index]`.
    fn record_commands(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Writes the slot's per-frame uniforms.
    fn update_frame_data(&mut self, slot: usize) -> RhiResult<()>;

    /// Submits the slot's command buffer to the graphics queue.
    fn submit(&mut self, slot: usize) -> RhiResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    /// Current framebuffer size of the window.
    fn surface_extent(&self) -> (u32, u32);

    fn wait_idle(&mut self) -> RhiResult<()>;

    /// Destroys and rebuilds the swapchain and everything sized by it.
    /// Returns the new swapchain image count.
    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> RhiResult<u32>;

    fn framebuffer_count(&self) -> usize;
}

/// Cycles frame slots and decides when the swapchain is rebuilt.
#[derive(Debug)]
pub struct FrameManager {
    /// Number of slots, at least 1.
    frames_in_flight: usize,
    /// Slot the next frame uses, below `frames_in_flight`.
    current_slot: usize,
    /// Bound on each in-flight fence wait.
    fence_timeout_ns: u64,
    /// Set by the window on resize, cleared by a rebuild.
    resize: ResizeSignal,
    /// A rebuild is owed and runs at the start of the next frame.
    recreate_pending: bool,
}

impl FrameManager {
    /// Creates a frame manager starting at slot 0.
    ///
    /// `fence_timeout_ns` bounds each fence wait; `u64::MAX` waits forever.
    pub fn new(frames_in_flight: usize, fence_timeout_ns: u64, resize: ResizeSignal) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        info!(
            "Frame manager created with {} frames in flight",
            frames_in_flight
        );

        Self {
            frames_in_flight,
            current_slot: 0,
            fence_timeout_ns,
            resize,
            recreate_pending: false,
        }
    }

    /// Slot the next [`FrameManager::draw_frame`] call will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// True while a swapchain rebuild is owed, e.g. while minimized.
    #[inline]
    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Renders and presents one frame.
    ///
    /// # Errors
    ///
    /// Any backend error is returned as-is and is fatal to the session. A
    /// fence wait that exceeds the configured bound is
    /// [`RhiError::FenceTimeout`].
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> RhiResult<FrameStatus> {
        let mut recreated = false;

        if self.recreate_pending {
            if !self.recreate_swapchain(backend)? {
                return Ok(FrameStatus::Minimized);
            }
            recreated = true;
        }

        let slot = self.current_slot;
        backend.wait_for_slot(slot, self.fence_timeout_ns)?;

        let (image_index, acquire_suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire, skipping frame");
                self.recreate_pending = true;
                return Ok(FrameStatus::SkippedOutOfDate);
            }
        };

        backend.reset_slot(slot)?;
        backend.record_commands(slot, image_index)?;
        backend.update_frame_data(slot)?;
        backend.submit(slot)?;

        let presented = backend.present(slot, image_index)?;
        // Consumed on every present attempt.
        let resized = self.resize.take();

        self.current_slot = (slot + 1) % self.frames_in_flight;

        let stale = match presented {
            PresentOutcome::Presented => acquire_suboptimal,
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => true,
        };

        if stale || resized {
            debug!(
                "Rebuilding swapchain after present ({:?}, resized: {})",
                presented, resized
            );
            if self.recreate_swapchain(backend)? {
                recreated = true;
            }
        }

        Ok(if recreated {
            FrameStatus::PresentedAndRecreated
        } else {
            FrameStatus::Presented
        })
    }

    /// Rebuilds the swapchain at the current surface size.
    ///
    /// With a zero-sized surface nothing is created: the rebuild is marked
    /// pending and `false` is returned. Otherwise the device is drained
    /// first, and `true` is returned once the rebuilt framebuffers match the
    /// new image count.
    pub fn recreate_swapchain<B: FrameBackend>(&mut self, backend: &mut B) -> RhiResult<bool> {
        let (width, height) = backend.surface_extent();
        if is_zero_extent((width, height)) {
            if !self.recreate_pending {
                debug!("Surface has zero extent, deferring swapchain rebuild");
            }
            self.recreate_pending = true;
            return Ok(false);
        }

        backend.wait_idle()?;
        let image_count = backend.rebuild_swapchain(width, height)?;

        let framebuffer_count = backend.framebuffer_count();
        if framebuffer_count != image_count as usize {
            warn!(
                "Rebuilt {} framebuffers for {} swapchain images",
                framebuffer_count, image_count
            );
            return Err(RhiError::SwapchainError(format!(
                "{} framebuffers for {} swapchain images",
                framebuffer_count, image_count
            )));
        }

        // The rebuild used the latest size, so older notifications are moot.
        self.resize.take();
        self.recreate_pending = false;

        info!(
            "Swapchain rebuilt at {}x{} with {} images",
            width, height, image_count
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Update(usize),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        Rebuild(u32, u32),
    }

    /// Scripted backend that logs every call.
    struct MockBackend {
        calls: Vec<Call>,
        extent: (u32, u32),
        image_count: u32,
        framebuffers: usize,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        /// Fired right before the nth submit returns (1-based).
        on_submit: Option<(usize, ResizeSignal)>,
        wait_error: Option<RhiError>,
        skew_framebuffers: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                extent: (800, 600),
                image_count: 3,
                framebuffers: 3,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                on_submit: None,
                wait_error: None,
                skew_framebuffers: false,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn submits(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Submit(slot) => Some(*slot),
                    _ => None,
                })
                .collect()
        }

        fn rebuilds(&self) -> usize {
            self.count(|c| matches!(c, Call::Rebuild(..)))
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> RhiResult<()> {
            self.calls.push(Call::Wait(slot));
            match self.wait_error.take() {
                Some(RhiError::FenceTimeout { .. }) => Err(RhiError::FenceTimeout { timeout_ns }),
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal: false,
            })
        }

        fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn record_commands(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            assert!((image_index as usize) < self.framebuffers);
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn update_frame_data(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Update(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Submit(slot));
            let submitted = self.submits().len();
            if let Some((nth, signal)) = &self.on_submit {
                if submitted == *nth {
                    signal.notify();
                }
            }
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn surface_extent(&self) -> (u32, u32) {
            self.extent
        }

        fn wait_idle(&mut self) -> RhiResult<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }

        fn rebuild_swapchain(&mut self, width: u32, height: u32) -> RhiResult<u32> {
            self.calls.push(Call::Rebuild(width, height));
            self.next_image = 0;
            self.framebuffers = if self.skew_framebuffers {
                self.image_count as usize - 1
            } else {
                self.image_count as usize
            };
            Ok(self.image_count)
        }

        fn framebuffer_count(&self) -> usize {
            self.framebuffers
        }
    }

    fn manager(resize: &ResizeSignal) -> FrameManager {
        FrameManager::new(2, u64::MAX, resize.clone())
    }

    #[test]
    fn test_five_frames_cycle_two_slots() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();

        for _ in 0..5 {
            assert_eq!(
                frames.draw_frame(&mut backend).unwrap(),
                FrameStatus::Presented
            );
        }

        assert_eq!(backend.submits(), vec![0, 1, 0, 1, 0]);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 5);
        assert_eq!(backend.rebuilds(), 0);
        assert_eq!(backend.count(|c| *c == Call::WaitIdle), 0);
        assert_eq!(frames.current_slot(), 1);
    }

    #[test]
    fn test_single_frame_follows_protocol_order() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();

        frames.draw_frame(&mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Update(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn test_slot_is_never_rerecorded_before_its_fence_wait() {
        let resize = ResizeSignal::new();
        let mut frames = FrameManager::new(3, u64::MAX, resize.clone());
        let mut backend = MockBackend::new();
        backend.acquire_script = VecDeque::from([
            AcquireOutcome::Ready {
                image_index: 0,
                suboptimal: false,
            },
            AcquireOutcome::OutOfDate,
        ]);
        backend.present_script = VecDeque::from([
            PresentOutcome::Presented,
            PresentOutcome::Presented,
            PresentOutcome::Suboptimal,
        ]);

        for i in 0..10 {
            if i == 6 {
                resize.notify();
            }
            frames.draw_frame(&mut backend).unwrap();
        }

        // Between two submissions of a slot there must be a wait on it
        // before the reset and the record.
        let mut waited = [true; 3];
        for call in &backend.calls {
            match *call {
                Call::Wait(slot) => waited[slot] = true,
                Call::Reset(slot) | Call::Record(slot, _) => assert!(waited[slot]),
                Call::Submit(slot) => waited[slot] = false,
                _ => {}
            }
        }
    }

    #[test]
    fn test_out_of_date_acquire_skips_and_rebuilds_first() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();

        frames.draw_frame(&mut backend).unwrap();
        backend.acquire_script.push_back(AcquireOutcome::OutOfDate);

        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::SkippedOutOfDate);
        assert!(frames.recreate_pending());
        assert_eq!(frames.current_slot(), 1, "aborted frame must not advance");
        assert_eq!(backend.submits(), vec![0]);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 1);

        let before = backend.calls.len();
        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::PresentedAndRecreated);
        assert!(!frames.recreate_pending());

        let next = &backend.calls[before..];
        assert_eq!(next[0], Call::WaitIdle);
        assert_eq!(next[1], Call::Rebuild(800, 600));
        assert_eq!(next[2], Call::Wait(1));
        assert_eq!(next[3], Call::Acquire(1));
        assert_eq!(backend.submits(), vec![0, 1]);
    }

    #[test]
    fn test_resize_between_submit_and_present_rebuilds_once() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();
        backend.on_submit = Some((2, resize.clone()));
        backend.present_script = VecDeque::from([
            PresentOutcome::Presented,
            PresentOutcome::Suboptimal,
            PresentOutcome::Presented,
        ]);

        assert_eq!(
            frames.draw_frame(&mut backend).unwrap(),
            FrameStatus::Presented
        );
        assert_eq!(
            frames.draw_frame(&mut backend).unwrap(),
            FrameStatus::PresentedAndRecreated
        );
        assert_eq!(backend.rebuilds(), 1);
        assert!(!resize.is_pending());

        // The rebuild comes right after frame 2's present.
        let present_2 = backend
            .calls
            .iter()
            .position(|c| *c == Call::Present(1, 1))
            .unwrap();
        assert_eq!(backend.calls[present_2 + 1], Call::WaitIdle);
        assert_eq!(backend.calls[present_2 + 2], Call::Rebuild(800, 600));

        // Frame 3 proceeds normally against the rebuilt framebuffers.
        assert_eq!(
            frames.draw_frame(&mut backend).unwrap(),
            FrameStatus::Presented
        );
        assert_eq!(backend.rebuilds(), 1);
        assert_eq!(backend.calls.last(), Some(&Call::Present(0, 0)));
        assert_eq!(backend.submits(), vec![0, 1, 0]);
    }

    #[test]
    fn test_out_of_date_present_still_advances_slot() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();
        backend.present_script.push_back(PresentOutcome::OutOfDate);

        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::PresentedAndRecreated);
        assert_eq!(frames.current_slot(), 1);
        assert_eq!(backend.rebuilds(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_rebuilds_after_present() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();
        backend.acquire_script.push_back(AcquireOutcome::Ready {
            image_index: 2,
            suboptimal: true,
        });

        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::PresentedAndRecreated);
        assert_eq!(backend.submits(), vec![0]);
        assert_eq!(backend.calls[6], Call::Present(0, 2));
        assert_eq!(backend.calls[8], Call::Rebuild(800, 600));
    }

    #[test]
    fn test_minimized_window_never_rebuilds() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();

        backend.extent = (0, 0);
        resize.notify();
        assert_eq!(
            frames.draw_frame(&mut backend).unwrap(),
            FrameStatus::Presented
        );
        assert!(frames.recreate_pending());

        let before = backend.calls.len();
        for _ in 0..3 {
            assert_eq!(
                frames.draw_frame(&mut backend).unwrap(),
                FrameStatus::Minimized
            );
        }
        assert_eq!(backend.calls.len(), before, "nothing touched while minimized");
        assert_eq!(backend.rebuilds(), 0);

        backend.extent = (1024, 768);
        assert_eq!(
            frames.draw_frame(&mut backend).unwrap(),
            FrameStatus::PresentedAndRecreated
        );
        assert_eq!(backend.rebuilds(), 1);
        assert!(backend.calls.contains(&Call::Rebuild(1024, 768)));
        assert!(!frames.recreate_pending());
    }

    #[test]
    fn test_framebuffer_count_matches_image_count() {
        let resize = ResizeSignal::new();
        let mut frames = manager(&resize);
        let mut backend = MockBackend::new();
        backend.image_count = 4;

        assert!(frames.recreate_swapchain(&mut backend).unwrap());
        assert_eq!(backend.framebuffer_count(), 4);

        backend.skew_framebuffers = true;
        let err = frames.recreate_swapchain(&mut backend).unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
    }

    #[test]
    fn test_fence_timeout_is_fatal() {
        let resize = ResizeSignal::new();
        let mut frames = FrameManager::new(2, 5_000_000, resize.clone());
        let mut backend = MockBackend::new();
        backend.wait_error = Some(RhiError::FenceTimeout { timeout_ns: 0 });

        let err = frames.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(
            err,
            RhiError::FenceTimeout {
                timeout_ns: 5_000_000
            }
        ));
        assert_eq!(backend.calls, vec![Call::Wait(0)]);
    }

    #[test]
    fn test_zero_frames_in_flight_is_clamped() {
        let frames = FrameManager::new(0, u64::MAX, ResizeSignal::new());
        assert_eq!(frames.frames_in_flight(), 1);
    }
}
