//! Logical device, its queues and the GPU memory allocator.
//!
//! Every GPU object keeps an `Arc<Device>`, so the device is destroyed only
//! after the last of them. The instance that created it has to outlive that
//! last reference; the renderer enforces this through its drop order.
//!
//! # Example
//!
//! ```no_run
//! use night_rhi::device::Device;
//! use night_rhi::instance::Instance;
//! use night_rhi::physical_device::PhysicalDeviceInfo;
//!
//! # fn example(instance: &Instance, gpu: &PhysicalDeviceInfo) -> Result<(), night_rhi::RhiError> {
//! let device = Device::new(instance, gpu)?;
//! let (graphics_family, present_family) = device.queue_families().resolved()?;
//! device.wait_idle()?;
//! # Ok(())
//! # }
//! ```

use std::ffi::c_char;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

static QUEUE_PRIORITIES: [f32; 1] = [1.0];

/// Logical device shared by every GPU object through `Arc`.
///
/// Holds one graphics and one present queue (the same queue when the
/// families coincide) and the `gpu-allocator` allocator behind a `Mutex`.
/// The last `Arc` must be dropped before the instance.
///
/// # Thread Safety
///
/// `Send + Sync`. Queue submission is externally synchronized in Vulkan; the
/// renderer submits from one thread only.
pub struct Device {
    /// Loaded device-level function table.
    device: ash::Device,
    /// Instance-level functions, for format queries.
    instance: ash::Instance,
    /// GPU the device was created on.
    physical_device: vk::PhysicalDevice,
    /// Dropped by hand before `destroy_device`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Families the two queues come from.
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the device with the swapchain extension and sampler
    /// anisotropy, both checked during GPU selection.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the GPU was enumerated from
    /// * `gpu` - The selected GPU with resolved queue families
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] when a queue family is unresolved, the
    /// driver's error when device creation fails, or an allocator error. On
    /// allocator failure the new device is destroyed before returning.
    pub fn new(instance: &Instance, gpu: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = gpu.queue_families;
        let (graphics_family, present_family) = queue_families.resolved()?;

        let queue_infos = queue_create_infos(&queue_families);
        let extension_names: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        // SAFETY: the physical device belongs to `instance` and every
        // requested extension and feature was checked during selection.
        let device = unsafe {
            instance
                .handle()
                .create_device(gpu.device, &create_info, None)?
        };
        // SAFETY: both families were requested with one queue each.
        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
            )
        };
        debug!(
            "Device queues: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: gpu.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                // SAFETY: nothing has been created from the device yet.
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("Logical device and allocator ready on '{}'", gpu.device_name());

        Ok(Arc::new(Self {
            device,
            instance: instance.handle().clone(),
            physical_device: gpu.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    /// Returns the ash device, whose methods issue the raw Vulkan calls.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Locks the shared allocator for one allocation or free.
    ///
    /// # Errors
    ///
    /// [`RhiError::AllocatorPoisoned`] if a thread panicked while holding
    /// the lock.
    pub fn lock_allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::AllocatorPoisoned)
    }

    /// Optimal/linear tiling and buffer features of `format` on this GPU.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        // SAFETY: the physical device was enumerated from this instance.
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Blocks until every queue has drained.
    ///
    /// # Errors
    ///
    /// Returns the driver's error, typically `ERROR_DEVICE_LOST`.
    pub fn wait_idle(&self) -> RhiResult<()> {
        // SAFETY: the render thread is the only one submitting.
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits to the graphics queue, signaling `fence` (may be null) on
    /// completion.
    ///
    /// # Safety
    ///
    /// The command buffers must be fully recorded, every waited semaphore
    /// must have a pending signal and `fence` must be unsignaled.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        // SAFETY: upheld by the caller.
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?
        };
        Ok(())
    }

    /// Blocks until the graphics queue has drained.
    pub fn graphics_queue_wait_idle(&self) -> RhiResult<()> {
        // SAFETY: the render thread is the only one using the queue.
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // SAFETY: this is the last reference, so every child object is gone;
        // the allocator is dropped exactly once, before the device it
        // allocated from.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // Frees the allocator's memory blocks while the device still exists.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: the ash function tables and raw handles are plain data; the only
// interior mutability, the allocator, sits behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// One queue per distinct family.
fn queue_create_infos(families: &QueueFamilyIndices) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
    families
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&QUEUE_PRIORITIES)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_family_gets_one_queue() {
        let families = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: Some(1),
        };
        let infos = queue_create_infos(&families);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 1);
        assert_eq!(infos[0].queue_count, 1);
    }

    #[test]
    fn test_split_families_get_a_queue_each() {
        let families = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(3),
        };
        let indices: Vec<u32> = queue_create_infos(&families)
            .iter()
            .map(|info| info.queue_family_index)
            .collect();
        assert_eq!(indices, vec![0, 3]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
