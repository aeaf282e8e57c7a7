//! Buffers backed by `gpu-allocator`.
//!
//! Geometry lives in GPU-only memory and is filled once through a staging
//! buffer ([`Buffer::device_local_with_data`]). Uniform and staging buffers
//! are host-visible and stay mapped for their whole life.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer holds, which fixes its usage flags and memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferUsage {
    /// Usage flags. Geometry is also a transfer destination for staging.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// `CpuToGpu` for host-written buffers, `GpuOnly` otherwise.
    pub fn memory_location(self) -> MemoryLocation {
        if self.is_host_visible() {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        }
    }

    /// Whether the CPU writes the contents directly.
    pub fn is_host_visible(self) -> bool {
        matches!(self, BufferUsage::Uniform | BufferUsage::Staging)
    }

    /// Allocation and log name.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex buffer",
            BufferUsage::Index => "index buffer",
            BufferUsage::Uniform => "uniform buffer",
            BufferUsage::Staging => "staging buffer",
        }
    }
}

/// A `vk::Buffer` with its own `gpu-allocator` allocation.
///
/// # Thread Safety
///
/// Allocation and free go through the device's allocator lock. Writes to a
/// mapped buffer must not race GPU reads of the same range; per-frame
/// uniforms rely on the frame fence for that.
pub struct Buffer {
    /// Device that created the buffer and outlives it.
    device: Arc<Device>,
    /// Vulkan buffer handle.
    buffer: vk::Buffer,
    /// `None` only while construction is unfinished or after drop.
    allocation: Option<Allocation>,
    /// Requested size in bytes.
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates an unfilled buffer of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `usage` - Fixes the usage flags and memory location
    /// * `size` - Size in bytes, greater than zero
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] for a zero `size`, or a failed creation,
    /// allocation or bind.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "{} must not be empty",
                usage.name()
            )));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: `size` is non-zero and the usage flags are valid.
        let buffer = unsafe { device.handle().create_buffer(&create_info, None)? };
        // SAFETY: `buffer` was just created from this device.
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });

        // Drop frees whatever exists from here on.
        let mut result = Self {
            device,
            buffer,
            allocation: None,
            size,
            usage,
        };
        let allocation = result.allocation.insert(allocation?);

        // SAFETY: the allocation satisfies `requirements` and the buffer is
        // bound exactly once.
        unsafe {
            result.device.handle().bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            )?
        };

        debug!("Created {} of {} bytes", usage.name(), size);
        Ok(result)
    }

    /// A mapped transfer source holding `data`.
    ///
    /// # Errors
    ///
    /// Same as [`Buffer::new`]; empty `data` is rejected.
    pub fn staging(device: Arc<Device>, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, BufferUsage::Staging, data.len() as vk::DeviceSize)?;
        buffer.write_bytes(data)?;
        Ok(buffer)
    }

    /// A GPU-only buffer holding `data`, copied through a staging buffer.
    /// Returns after the copy has completed.
    ///
    /// # Errors
    ///
    /// Creation of either buffer, or the upload submission.
    pub fn device_local_with_data(
        device: Arc<Device>,
        pool: &CommandPool,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let staging = Self::staging(device.clone(), data)?;
        let buffer = Self::new(device, usage, staging.size)?;

        pool.one_time_submit(|cmd| {
            let region = vk::BufferCopy::default().size(staging.size);
            cmd.copy_buffer(staging.buffer, buffer.buffer, &[region]);
        })?;

        debug!("Uploaded {} bytes into {}", staging.size, usage.name());
        Ok(buffer)
    }

    /// Copies `data` to the start of a host-visible buffer.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] when `data` is larger than the buffer or
    /// the buffer is not mapped.
    pub fn write_bytes(&self, data: &[u8]) -> RhiResult<()> {
        if data.len() as vk::DeviceSize > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "{} bytes do not fit in a {}-byte {}",
                data.len(),
                self.size,
                self.usage.name()
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("{} is not host-visible", self.usage.name()))
            })?;

        // SAFETY: the mapping covers `size` bytes and the length was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().cast::<u8>(), data.len());
        }
        Ok(())
    }

    /// Writes the bytes of `value`, e.g. a uniform block.
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} memory: {:?}", self.usage.name(), e);
                    }
                }
                Err(e) => error!("Leaking {} memory: {}", self.usage.name(), e),
            }
        }

        // SAFETY: created from this device and destroyed once, after its
        // memory was returned and the device went idle.
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_is_gpu_only_transfer_destination() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            assert!(!usage.is_host_visible());
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(usage.to_vk_usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_uniform_and_staging_are_host_visible() {
        for usage in [BufferUsage::Uniform, BufferUsage::Staging] {
            assert!(usage.is_host_visible());
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        }
        assert_eq!(
            BufferUsage::Uniform.to_vk_usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }
}
