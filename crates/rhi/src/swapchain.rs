//! Swapchain creation, presentation and in-place recreation.
//!
//! Choosing the swapchain parameters is separated from creating it:
//! [`SurfaceSupport::plan`] turns what the surface reports into a
//! [`SwapchainPlan`] without touching the device, and [`Swapchain`] applies
//! a plan. A resize re-queries the surface and applies a fresh plan while
//! retiring the old handle.
//!
//! ```no_run
//! # use ash::vk;
//! # use night_rhi::swapchain::Swapchain;
//! # fn frame(swapchain: &mut Swapchain, queue: vk::Queue, acquired: vk::Semaphore, done: vk::Semaphore)
//! #     -> Result<(), night_rhi::RhiError> {
//! match swapchain.acquire_next_image(acquired) {
//!     Ok((image_index, _suboptimal)) => {
//!         // record into the framebuffer of image_index, submit ...
//!         swapchain.present(queue, image_index, done)?;
//!     }
//!     Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
//!         // wait for the device to go idle first
//!         swapchain.recreate(1024, 768)?;
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// What a surface supports on a given GPU.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count and extent limits, current extent and transform.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Format and color space pairs, in driver order.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Asks the surface what `physical_device` can present with.
    ///
    /// # Errors
    ///
    /// Returns the driver's error, e.g. `ERROR_SURFACE_LOST_KHR`.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        // SAFETY: the physical device and surface come from the instance the
        // loader was created for.
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Picks the swapchain parameters for a window of `width` x `height`.
    ///
    /// # Errors
    ///
    /// [`RhiError::SwapchainError`] when the surface offers no format or no
    /// present mode.
    pub fn plan(&self, width: u32, height: u32) -> RhiResult<SwapchainPlan> {
        if !self.is_adequate() {
            return Err(RhiError::SwapchainError(format!(
                "Surface exposes {} format(s) and {} present mode(s)",
                self.formats.len(),
                self.present_modes.len()
            )));
        }

        let surface_format = choose_surface_format(&self.formats)
            .ok_or_else(|| RhiError::SwapchainError("Surface reports no formats".to_string()))?;

        Ok(SwapchainPlan {
            surface_format,
            present_mode: choose_present_mode(&self.present_modes),
            extent: choose_extent(&self.capabilities, width, height),
            min_image_count: min_image_count(&self.capabilities),
            pre_transform: self.capabilities.current_transform,
        })
    }
}

/// Parameters a swapchain is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    /// `B8G8R8A8_SRGB` in `SRGB_NONLINEAR` when available.
    pub surface_format: vk::SurfaceFormatKHR,
    /// `FIFO` when reported.
    pub present_mode: vk::PresentModeKHR,
    /// Within the surface's min and max extents.
    pub extent: vk::Extent2D,
    /// One above the surface minimum, capped by its maximum.
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Image sharing between the graphics and present families.
///
/// Concurrent when they differ, so no ownership transfers are needed.
pub fn sharing_mode(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics_family, present_family],
        )
    }
}

/// The presentable images of a window surface.
///
/// Owns the swapchain handle and one color view per image. The surface is
/// borrowed by handle and must outlive the swapchain.
pub struct Swapchain {
    /// Device that created the swapchain and outlives it.
    device: Arc<Device>,
    /// `VK_KHR_swapchain` function table.
    swapchain_loader: ash::khr::swapchain::Device,
    /// Re-queries the surface on every rebuild.
    surface_loader: ash::khr::surface::Instance,
    /// Borrowed; owned by the platform surface.
    surface: vk::SurfaceKHR,
    /// Null only before the first build.
    swapchain: vk::SwapchainKHR,
    /// Owned by the swapchain, never destroyed here.
    images: Vec<vk::Image>,
    /// One per image, owned here.
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a swapchain for `surface`, sized to the window when the
    /// surface leaves the extent open.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the surface was created from
    /// * `device` - The logical device
    /// * `surface` - Window surface, which must outlive the swapchain
    /// * `width`, `height` - Framebuffer size of the window in pixels
    ///
    /// # Errors
    ///
    /// Surface queries, an unusable surface, swapchain creation or view
    /// creation.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let mut swapchain = Self {
            device,
            swapchain_loader,
            surface_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
        };
        swapchain.build(width, height)?;
        Ok(swapchain)
    }

    fn build(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support =
            SurfaceSupport::query(self.device.physical_device(), self.surface, &self.surface_loader)?;
        let plan = support.plan(width, height)?;

        let (graphics_family, present_family) = self.device.queue_families().resolved()?;
        let (sharing, families) = sharing_mode(graphics_family, present_family);

        let retired = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(plan.min_image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&families)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(retired);

        // SAFETY: the surface outlives the swapchain and the retired handle,
        // if any, is no longer used by in-flight work.
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };
        if retired != vk::SwapchainKHR::null() {
            // SAFETY: the retired handle was passed as `old_swapchain` and
            // none of its images are in use after the caller's idle wait.
            unsafe { self.swapchain_loader.destroy_swapchain(retired, None) };
        }
        self.swapchain = swapchain;

        // SAFETY: `swapchain` was just created by this loader.
        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, plan.surface_format.format)?;
        self.format = plan.surface_format.format;
        self.extent = plan.extent;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Rebuilds the swapchain for a new window size and returns the new
    /// image count.
    ///
    /// Views go first, then the swapchain is recreated from the retired
    /// handle. The caller waits for the device to go idle beforehand.
    ///
    /// # Errors
    ///
    /// Same as [`Swapchain::new`]. On failure the views are gone and the old
    /// handle may still be live; the caller treats this as fatal.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<u32> {
        debug!("Recreating swapchain for {}x{}", width, height);

        self.destroy_image_views();
        self.images.clear();
        self.build(width, height)?;

        Ok(self.image_count())
    }

    /// Returns `(image_index, suboptimal)`. A stale swapchain is
    /// `Err(ERROR_OUT_OF_DATE_KHR)`.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        // SAFETY: `semaphore` is unsignaled with no pending signal; the
        // frame loop only acquires after the slot's fence was waited on.
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for display once `wait_semaphore` signals.
    /// Returns true when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: `image_index` was acquired from this swapchain and the
        // queue supports presentation to its surface.
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    /// Color format of the images, used for the render pass.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size of the images after the last build.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// One view per image, in acquire-index order.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            // SAFETY: each view was created here and is removed from the list
            // as it is destroyed; framebuffers using it are already gone.
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();

        if self.swapchain != vk::SwapchainKHR::null() {
            // SAFETY: its views are destroyed above and the surface is still
            // alive, as the renderer drops the swapchain first.
            unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
            debug!("Swapchain destroyed");
        }
    }
}

/// B8G8R8A8_SRGB in SRGB_NONLINEAR if offered, otherwise the first format.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().copied().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    preferred.or_else(|| {
        let fallback = formats.first().copied();
        if let Some(format) = fallback {
            warn!("B8G8R8A8_SRGB unavailable, using {:?}", format.format);
        }
        fallback
    })
}

/// FIFO. Every conformant driver offers it; a report without it falls back
/// to the first listed mode.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::FIFO) {
        return vk::PresentModeKHR::FIFO;
    }

    let mode = present_modes
        .first()
        .copied()
        .unwrap_or(vk::PresentModeKHR::FIFO);
    warn!("FIFO present mode not reported, using {:?}", mode);
    mode
}

/// The surface's current extent, or the window size clamped to the
/// surface limits when the current extent is the `u32::MAX` wildcard.
fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image above the minimum, capped by the maximum (0 = no maximum).
fn min_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = caps.min_image_count + 1;
    match caps.max_image_count {
        0 => preferred,
        max => preferred.min(max),
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        // SAFETY: `image` belongs to a swapchain of this device.
        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    // SAFETY: created above and not handed out yet.
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "Failed to create view for swapchain image {}: {:?}",
                    i, e
                )));
            }
        }
    }

    Ok(views)
}
