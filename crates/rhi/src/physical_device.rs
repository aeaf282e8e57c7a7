//! GPU selection.
//!
//! A GPU qualifies when it has a graphics queue family and a family that can
//! present to the window surface, supports `VK_KHR_swapchain`, offers at
//! least one surface format and present mode, and supports sampler
//! anisotropy. Qualifying GPUs are ranked by type first (discrete, then
//! integrated, virtual, CPU), then by image size limit and local memory.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SurfaceSupport;

/// Device extensions every candidate GPU must support.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Graphics and present queue families of a GPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with `GRAPHICS`, if any.
    pub graphics_family: Option<u32>,
    /// First family that can present to the surface, if any.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct families, graphics first. One queue is created per entry.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics_family.into_iter().collect();
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// `(graphics, present)`, or an error naming the missing family.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] when either family is unset.
    pub fn resolved(&self) -> RhiResult<(u32, u32)> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => Ok((graphics, present)),
            (None, _) => Err(RhiError::InvalidHandle(
                "graphics queue family not resolved".to_string(),
            )),
            (_, None) => Err(RhiError::InvalidHandle(
                "present queue family not resolved".to_string(),
            )),
        }
    }
}

/// The GPU chosen for rendering.
#[derive(Clone)]
///
/// Only produced by [`select_physical_device`], so the queue families are
/// always complete.
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Name, type, API version and limits.
    pub properties: vk::PhysicalDeviceProperties,
    /// Heaps, used for ranking.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Driver-reported name, or `"Unknown Device"`.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Sum of all device-local heaps, in bytes.
    pub fn device_local_memory(&self) -> u64 {
        let heap_count = self.memory_properties.memory_heap_count as usize;
        self.memory_properties
            .memory_heaps
            .iter()
            .take(heap_count)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    fn score(&self) -> u64 {
        device_score(
            self.properties.device_type,
            self.properties.limits.max_image_dimension2_d,
            self.device_local_memory(),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field(
                "api_version",
                &format_args!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the best GPU able to render to `surface`.
///
/// # Errors
///
/// [`RhiError::NoSuitableGpu`] when nothing qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    // SAFETY: `instance` is a live instance.
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| inspect_device(instance, device, surface, surface_loader))
        .inspect(|info| debug!("GPU '{}' qualifies, score {}", info.device_name(), info.score()))
        .max_by_key(PhysicalDeviceInfo::score);

    match selected {
        Some(info) => {
            info!("Selected GPU: {:?}", info);
            Ok(info)
        }
        None => {
            warn!("No GPU supports graphics, presentation and the swapchain extension");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    // SAFETY: `device` was enumerated from `instance`.
    let (properties, features, memory_properties, family_properties, extensions) = unsafe {
        (
            instance.get_physical_device_properties(device),
            instance.get_physical_device_features(device),
            instance.get_physical_device_memory_properties(device),
            instance.get_physical_device_queue_family_properties(device),
            instance
                .enumerate_device_extension_properties(device)
                .unwrap_or_default(),
        )
    };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // SAFETY: `index` ranges over this device's families and the surface
    // was created from the same instance.
    let queue_families = pick_queue_families(&family_properties, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: no graphics or present family", name);
        return None;
    }

    let extension_names: Vec<&CStr> = extensions
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();
    if !supports_extensions(&extension_names, &REQUIRED_DEVICE_EXTENSIONS) {
        debug!("GPU '{}' skipped: no swapchain extension", name);
        return None;
    }

    let surface_ok = SurfaceSupport::query(device, surface, surface_loader)
        .map(|support| support.is_adequate())
        .unwrap_or(false);
    if !surface_ok {
        debug!("GPU '{}' skipped: surface has no format or present mode", name);
        return None;
    }

    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{}' skipped: no sampler anisotropy", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

/// True when every name in `required` appears in `available`.
fn supports_extensions(available: &[&CStr], required: &[&CStr]) -> bool {
    required.iter().all(|name| available.contains(name))
}

/// First graphics family and first presenting family, or the first family
/// doing both when there is one.
fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in (0u32..).zip(families) {
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = present_support(i);

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics {
            indices.graphics_family.get_or_insert(i);
        }
        if present {
            indices.present_family.get_or_insert(i);
        }
    }

    indices
}

/// Higher is better. The device type dominates; local memory counts in
/// MiB up to 16 GiB.
fn device_score(device_type: vk::PhysicalDeviceType, max_image_dim: u32, local_bytes: u64) -> u64 {
    let type_score: u64 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 50_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 25_000,
        _ => 0,
    };
    let memory_mib = (local_bytes / (1024 * 1024)).min(16 * 1024);

    type_score + u64::from(max_image_dim) + memory_mib
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_unresolved_families() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
        assert!(indices.resolved().is_err());
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);
        assert_eq!(shared.resolved().unwrap(), (0, 0));

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_pick_prefers_family_with_both_capabilities() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        let indices = pick_queue_families(&families, |i| i != 0);
        assert_eq!(indices.resolved().unwrap(), (2, 2));
    }

    #[test]
    fn test_pick_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = pick_queue_families(&families, |i| i == 1);
        assert_eq!(indices.resolved().unwrap(), (0, 1));
    }

    #[test]
    fn test_pick_skips_empty_families() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0)];
        assert!(!pick_queue_families(&families, |_| true).is_complete());
    }

    #[test]
    fn test_supports_extensions() {
        let available = [ash::khr::swapchain::NAME, c"VK_KHR_maintenance1"];
        assert!(supports_extensions(&available, &REQUIRED_DEVICE_EXTENSIONS));
        assert!(!supports_extensions(
            &[c"VK_KHR_maintenance1"],
            &REQUIRED_DEVICE_EXTENSIONS
        ));
    }

    #[test]
    fn test_device_type_dominates_score() {
        let gib = 1024 * 1024 * 1024;
        let discrete = device_score(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, gib);
        let integrated = device_score(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384, 64 * gib);
        let cpu = device_score(vk::PhysicalDeviceType::CPU, 16384, 64 * gib);
        assert!(discrete > integrated);
        assert!(integrated > cpu);
    }

    #[test]
    fn test_memory_counts_up_to_a_cap() {
        let gib = 1024 * 1024 * 1024;
        let kind = vk::PhysicalDeviceType::DISCRETE_GPU;
        assert!(device_score(kind, 0, 8 * gib) > device_score(kind, 0, 4 * gib));
        assert_eq!(device_score(kind, 0, 32 * gib), device_score(kind, 0, 16 * gib));
    }
}
