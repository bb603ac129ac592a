// SPDX-License-Identifier: CEPL-1.0
//! Swapchain negotiation and the create/recreate/destroy protocol.

use ash::vk;
use tracing::debug;

use crate::driver::{Driver, SwapchainRequest};
use crate::error::{Error, Result};
use crate::report::pm_name;

/// What the surface reports for one physical device.
#[derive(Clone, Debug, Default)]
pub struct SurfaceReport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceReport {
    pub fn query<D: Driver>(driver: &D, physical_device: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> Result<Self> {
        Ok(Self {
            capabilities: driver.surface_capabilities(physical_device, surface)?,
            formats: driver.surface_formats(physical_device, surface)?,
            present_modes: driver.surface_present_modes(physical_device, surface)?,
        })
    }
}

/// Requested swapchain parameters; each is negotiated against the surface.
#[derive(Clone, Debug)]
pub struct DesiredSwapchain {
    pub image_count: u32,
    /// Priority order.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Priority order.
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Used only when the surface lets the swapchain pick its size.
    pub extent: vk::Extent2D,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl Default for DesiredSwapchain {
    fn default() -> Self {
        Self {
            image_count: 3,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
            extent: vk::Extent2D { width: 1280, height: 720 },
            array_layers: 1,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueIndices {
    pub graphics: u32,
    pub present: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedSwapchainParams {
    pub image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Empty for exclusive sharing.
    pub queue_family_indices: Vec<u32>,
}

fn image_count(caps: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let count = desired.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

fn surface_format(
    supported: &[vk::SurfaceFormatKHR],
    desired: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR> {
    desired
        .iter()
        .copied()
        .find(|want| {
            supported
                .iter()
                .any(|have| have.format == want.format && have.color_space == want.color_space)
        })
        .or_else(|| supported.first().copied())
        .ok_or(Error::NoSurfaceFormats)
}

fn present_mode(supported: &[vk::PresentModeKHR], desired: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    desired
        .iter()
        .copied()
        .find(|m| supported.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn extent(caps: &vk::SurfaceCapabilitiesKHR, want: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

fn is_shared(mode: vk::PresentModeKHR) -> bool {
    mode == vk::PresentModeKHR::SHARED_DEMAND_REFRESH || mode == vk::PresentModeKHR::SHARED_CONTINUOUS_REFRESH
}

fn composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
    desired: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        desired,
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&a| !a.is_empty() && supported.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Works out swapchain parameters from what the surface supports.
pub fn negotiate(
    report: &SurfaceReport,
    desired: &DesiredSwapchain,
    queues: QueueIndices,
) -> Result<NegotiatedSwapchainParams> {
    let caps = &report.capabilities;
    let format = surface_format(&report.formats, &desired.formats)?;
    let present_mode = present_mode(&report.present_modes, &desired.present_modes);

    let usage = if is_shared(present_mode) {
        desired.usage
    } else {
        let usage = desired.usage & caps.supported_usage_flags;
        if usage.is_empty() {
            return Err(Error::UnsupportedImageUsage {
                requested: desired.usage,
                supported: caps.supported_usage_flags,
            });
        }
        usage
    };

    let pre_transform = if caps.supported_transforms.contains(desired.pre_transform) {
        desired.pre_transform
    } else {
        caps.current_transform
    };

    let (sharing_mode, queue_family_indices) = if queues.graphics == queues.present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![queues.graphics, queues.present])
    };

    Ok(NegotiatedSwapchainParams {
        image_count: image_count(caps, desired.image_count),
        format: format.format,
        color_space: format.color_space,
        extent: extent(caps, desired.extent),
        present_mode,
        array_layers: desired.array_layers.min(caps.max_image_array_layers).max(1),
        usage,
        pre_transform,
        composite_alpha: composite_alpha(caps.supported_composite_alpha, desired.composite_alpha),
        sharing_mode,
        queue_family_indices,
    })
}

/// Where a swapchain lives.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainTarget {
    pub device: vk::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub queues: QueueIndices,
}

/// A swapchain with its images and one view per image. References the
/// surface but never owns the device; [`Swapchain::destroy`] must run before
/// the device goes away.
#[derive(Debug)]
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    params: NegotiatedSwapchainParams,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl Swapchain {
    pub fn create<D: Driver>(driver: &mut D, target: &SwapchainTarget, desired: &DesiredSwapchain) -> Result<Self> {
        let report = SurfaceReport::query(driver, target.physical_device, target.surface)?;
        let params = negotiate(&report, desired, target.queues)?;
        let handle = build(driver, target, &params, vk::SwapchainKHR::null())?;

        let (images, views) = match images_and_views(driver, target.device, handle, &params) {
            Ok(v) => v,
            Err(e) => {
                driver.destroy_swapchain(target.device, handle);
                return Err(e);
            }
        };
        Ok(Self {
            handle,
            params,
            images,
            views,
        })
    }

    /// Replaces the chain in place, handing the old one to the driver as
    /// `oldSwapchain` so it can reuse resources.
    ///
    /// Errors from the surface query or negotiation leave the chain as it was.
    /// Anything failing after the old views are gone retires the chain: its
    /// handles are destroyed and [`Swapchain::is_retired`] turns true.
    pub fn recreate<D: Driver>(
        &mut self,
        driver: &mut D,
        target: &SwapchainTarget,
        desired: &DesiredSwapchain,
    ) -> Result<()> {
        driver.device_wait_idle(target.device)?;

        let report = SurfaceReport::query(driver, target.physical_device, target.surface)?;
        let params = negotiate(&report, desired, target.queues)?;

        self.destroy_views(driver, target.device);
        self.images.clear();
        let old = std::mem::replace(&mut self.handle, vk::SwapchainKHR::null());

        // A retired handle must not be passed on.
        let built = build(driver, target, &params, old);
        if old != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(target.device, old);
        }
        let handle = built?;

        let (images, views) = match images_and_views(driver, target.device, handle, &params) {
            Ok(v) => v,
            Err(e) => {
                driver.destroy_swapchain(target.device, handle);
                return Err(e);
            }
        };
        self.handle = handle;
        self.params = params;
        self.images = images;
        self.views = views;
        Ok(())
    }

    /// Destroys the views, then the chain.
    pub fn destroy<D: Driver>(mut self, driver: &mut D, device: vk::Device) {
        self.destroy_views(driver, device);
        if self.is_retired() {
            return;
        }
        debug!("destroying swapchain {:?}", self.handle);
        driver.destroy_swapchain(device, self.handle);
    }

    /// True after a failed [`Swapchain::recreate`] released everything.
    pub fn is_retired(&self) -> bool {
        self.handle == vk::SwapchainKHR::null()
    }

    fn destroy_views<D: Driver>(&mut self, driver: &mut D, device: vk::Device) {
        for view in self.views.drain(..).rev() {
            driver.destroy_image_view(device, view);
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn params(&self) -> &NegotiatedSwapchainParams {
        &self.params
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.params.extent
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }
}

fn build<D: Driver>(
    driver: &mut D,
    target: &SwapchainTarget,
    params: &NegotiatedSwapchainParams,
    old_swapchain: vk::SwapchainKHR,
) -> Result<vk::SwapchainKHR> {
    let request = SwapchainRequest {
        surface: target.surface,
        params: params.clone(),
        old_swapchain,
    };
    let handle = driver.create_swapchain(target.device, &request)?;
    debug!(
        "created swapchain {:?} ({}x{}, {}, retired {:?})",
        handle,
        params.extent.width,
        params.extent.height,
        pm_name(params.present_mode),
        old_swapchain
    );
    Ok(handle)
}

/// On failure, the views made so far are destroyed before returning.
fn images_and_views<D: Driver>(
    driver: &mut D,
    device: vk::Device,
    swapchain: vk::SwapchainKHR,
    params: &NegotiatedSwapchainParams,
) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>)> {
    let images = driver.swapchain_images(device, swapchain)?;
    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        match driver.create_image_view(device, image, params.format, params.array_layers) {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views.into_iter().rev() {
                    driver.destroy_image_view(device, view);
                }
                return Err(e);
            }
        }
    }
    Ok((images, views))
}
