//! Semaphores, fences and the per-slot synchronization triple.
//!
//! - [`Semaphore`] orders one queue operation after another on the GPU.
//! - [`Fence`] lets the host block until submitted work has finished.
//! - [`FrameSync`] bundles the two semaphores and one fence a frame slot
//!   needs.
//!
//! # Overview
//!
//! A frame acquires a swapchain image, renders into it and presents it. The
//! acquire signals `image_available`, which the submit waits on before
//! writing color. The submit signals `render_finished`, which the present
//! waits on. The submit also signals `in_flight`, and the host waits on that
//! fence before it records into the same slot again.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use night_rhi::device::Device;
//! use night_rhi::sync::FrameSync;
//!
//! # fn example(device: Arc<Device>) -> Result<(), night_rhi::RhiError> {
//! let sync = FrameSync::new(device)?;
//!
//! // The fence starts signaled, so the first wait returns at once.
//! sync.in_flight_fence().wait(u64::MAX)?;
//! sync.in_flight_fence().reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Binary semaphore ordering work between queue operations.
///
/// # Thread Safety
///
/// The handle never changes after creation. Whoever submits work that waits
/// on or signals it is responsible for external synchronization of the queue.
pub struct Semaphore {
    /// Device that created the semaphore and outlives it.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails, usually an
    /// out-of-memory code.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        // SAFETY: the create info is a default, valid structure and the
        // device is alive for the call.
        let semaphore = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: the semaphore was created from this device, is destroyed
        // once, and the owner waits for the device to go idle first.
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// Fence the host waits on for submitted work.
///
/// # Thread Safety
///
/// Waiting is safe from any thread. Resetting must not race a submission
/// that signals the same fence; the frame loop guarantees that by waiting
/// first.
pub struct Fence {
    /// Device that created the fence and outlives it.
    device: Arc<Device>,
    /// Vulkan fence handle.
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Start in the signaled state, so the first wait returns
    ///   at once
    ///
    /// # Errors
    ///
    /// Returns the driver's error when creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        // SAFETY: the create info is valid and the device is alive for the
        // call.
        let fence = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };
        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until signaled, for at most `timeout_ns` (`u64::MAX` is
    /// forever).
    ///
    /// # Errors
    ///
    /// [`RhiError::FenceTimeout`] when the bound expires; other failures such
    /// as `ERROR_DEVICE_LOST` pass through as Vulkan errors.
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        // SAFETY: the fence belongs to this device and is alive.
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout_ns)
        };
        wait_outcome(result, timeout_ns)
    }

    /// Back to unsignaled. No pending submission may reference the fence.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        // SAFETY: callers reset only after a successful wait, so no pending
        // submission references the fence.
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        // SAFETY: the fence was created from this device, is destroyed once,
        // and no submission is pending once the device is idle.
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}

fn wait_outcome(result: Result<(), vk::Result>, timeout_ns: u64) -> RhiResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout { timeout_ns }),
        Err(e) => Err(e.into()),
    }
}

/// Synchronization owned by one frame slot.
///
/// | object            | signaled by       | waited on by                       |
/// |-------------------|-------------------|------------------------------------|
/// | `image_available` | acquire           | submit, at COLOR_ATTACHMENT_OUTPUT |
/// | `render_finished` | submit            | present                            |
/// | `in_flight`       | submit completion | host, before the slot is reused    |
///
/// The fence starts signaled. Nothing here depends on the swapchain, so a
/// slot keeps its triple across recreation.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image may be written.
    image_available: Semaphore,
    /// Signaled when this slot's commands have finished on the GPU.
    render_finished: Semaphore,
    /// Signaled when the slot's submission completes.
    in_flight: Fence,
}

impl FrameSync {
    /// Creates both semaphores and a signaled fence.
    ///
    /// # Errors
    ///
    /// Returns the first creation error. Objects created before it are
    /// destroyed on return.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight
    }

    #[inline]
    pub fn image_available_handle(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished_handle(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight_fence_handle(&self) -> vk::Fence {
        self.in_flight.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_wait_is_a_fence_timeout() {
        let err = wait_outcome(Err(vk::Result::TIMEOUT), 5_000).unwrap_err();
        assert!(matches!(err, RhiError::FenceTimeout { timeout_ns: 5_000 }));
    }

    #[test]
    fn test_device_lost_passes_through() {
        let err = wait_outcome(Err(vk::Result::ERROR_DEVICE_LOST), u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert!(wait_outcome(Ok(()), u64::MAX).is_ok());
    }

    #[test]
    fn test_sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameSync>();
    }
}
