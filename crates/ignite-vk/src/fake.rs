// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Driver`] for unit tests.

use ash::vk::{self, Handle};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::driver::{DebugMessengerInfo, DeviceRequest, Driver, InstanceRequest, SwapchainRequest};
use crate::error::{Error, Result};
use crate::feature_chain::{FeatureChain, FeatureTier};
use crate::version::ApiVersion;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Create(&'static str, u64),
    Destroy(&'static str, u64),
    WaitIdle,
}

#[derive(Clone, Debug)]
pub(crate) struct FakeDevice {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: ApiVersion,
    pub heaps: Vec<(vk::DeviceSize, bool)>,
    pub queue_families: Vec<(vk::QueueFlags, u32)>,
    pub present_families: Vec<u32>,
    pub extensions: Vec<String>,
    /// Flags reported as unsupported; everything else is reported set.
    pub missing_features: Vec<(FeatureTier, usize)>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
}

impl FakeDevice {
    pub const DEFAULT_HEAP: vk::DeviceSize = 4 << 30;

    pub fn discrete(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: ApiVersion::new(1, 3, 250),
            heaps: vec![(Self::DEFAULT_HEAP, true), (16 << 30, false)],
            queue_families: vec![(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 16)],
            present_families: vec![0],
            extensions: vec!["VK_KHR_swapchain".to_owned()],
            missing_features: Vec::new(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width: 800, height: 600 },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            },
        }
    }

    pub fn integrated(name: &str) -> Self {
        Self {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..Self::discrete(name)
        }
    }

    pub fn version(mut self, version: ApiVersion) -> Self {
        self.api_version = version;
        self
    }

    pub fn heap(mut self, size: vk::DeviceSize) -> Self {
        self.heaps = vec![(size, true)];
        self
    }

    pub fn extensions(mut self, names: &[&str]) -> Self {
        self.extensions = names.iter().map(|&n| n.to_owned()).collect();
        self
    }

    pub fn queue_families(mut self, families: &[(vk::QueueFlags, u32)]) -> Self {
        self.queue_families = families.to_vec();
        self
    }

    pub fn present_on(mut self, families: &[u32]) -> Self {
        self.present_families = families.to_vec();
        self
    }

    pub fn present_modes(mut self, modes: &[vk::PresentModeKHR]) -> Self {
        self.present_modes = modes.to_vec();
        self
    }

    pub fn missing_feature(mut self, tier: FeatureTier, index: usize) -> Self {
        self.missing_features.push((tier, index));
        self
    }
}

pub(crate) struct FakeDriver {
    pub instance_version: ApiVersion,
    pub instance_extensions: Vec<String>,
    pub layers: Vec<String>,
    pub devices: Vec<FakeDevice>,
    pub fail_surface_support: bool,
    pub fail_device_extensions: Option<vk::Result>,
    pub fail_create_device: Option<vk::Result>,
    pub fail_create_swapchain: Option<vk::Result>,
    /// Image-view creation fails once this many views exist.
    pub fail_image_view_after: Option<usize>,
    /// Shared so tests can read it after the driver moves into a context.
    pub log: Rc<RefCell<Vec<Call>>>,
    pub instance_request: Option<InstanceRequest>,
    pub device_request: Option<DeviceRequest>,
    pub swapchain_requests: Vec<SwapchainRequest>,
    live_views: usize,
    next_handle: Cell<u64>,
}

const PHYSICAL_DEVICE_BASE: u64 = 0x100;

pub(crate) fn created(log: &[Call]) -> Vec<(&'static str, u64)> {
    log.iter()
        .filter_map(|c| match *c {
            Call::Create(what, h) => Some((what, h)),
            _ => None,
        })
        .collect()
}

pub(crate) fn destroyed(log: &[Call]) -> Vec<(&'static str, u64)> {
    log.iter()
        .filter_map(|c| match *c {
            Call::Destroy(what, h) => Some((what, h)),
            _ => None,
        })
        .collect()
}

impl FakeDriver {
    pub fn new(instance_version: ApiVersion, devices: Vec<FakeDevice>) -> Self {
        Self {
            instance_version,
            instance_extensions: vec![
                "VK_KHR_surface".to_owned(),
                "VK_EXT_debug_utils".to_owned(),
            ],
            layers: vec!["VK_LAYER_KHRONOS_validation".to_owned()],
            devices,
            fail_surface_support: false,
            fail_device_extensions: None,
            fail_create_device: None,
            fail_create_swapchain: None,
            fail_image_view_after: None,
            log: Rc::new(RefCell::new(Vec::new())),
            instance_request: None,
            device_request: None,
            swapchain_requests: Vec::new(),
            live_views: 0,
            next_handle: Cell::new(0x1000),
        }
    }

    pub fn physical_device(&self, index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + index as u64)
    }

    pub fn surface_handle(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0x5000)
    }

    /// Stands in for the windowing layer's surface creation.
    pub fn create_surface(&self) -> std::result::Result<vk::SurfaceKHR, vk::Result> {
        let surface = self.surface_handle();
        self.record(Call::Create("surface", surface.as_raw()));
        Ok(surface)
    }

    pub fn creates(&self) -> Vec<(&'static str, u64)> {
        created(&self.log.borrow())
    }

    pub fn destroys(&self) -> Vec<(&'static str, u64)> {
        destroyed(&self.log.borrow())
    }

    fn device(&self, pd: vk::PhysicalDevice) -> Option<&FakeDevice> {
        let index = pd.as_raw().checked_sub(PHYSICAL_DEVICE_BASE)?;
        self.devices.get(index as usize)
    }

    fn handle(&self) -> u64 {
        let h = self.next_handle.get();
        self.next_handle.set(h + 1);
        h
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }

    fn create<H: Handle>(&self, what: &'static str) -> H {
        let h = self.handle();
        self.record(Call::Create(what, h));
        H::from_raw(h)
    }
}

impl Driver for FakeDriver {
    fn instance_version(&self) -> Result<ApiVersion> {
        Ok(self.instance_version)
    }

    fn instance_extensions(&self) -> Result<Vec<String>> {
        Ok(self.instance_extensions.clone())
    }

    fn instance_layers(&self) -> Result<Vec<String>> {
        Ok(self.layers.clone())
    }

    fn create_instance(&mut self, request: &InstanceRequest) -> Result<vk::Instance> {
        self.instance_request = Some(request.clone());
        Ok(self.create("instance"))
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        self.record(Call::Destroy("instance", instance.as_raw()));
    }

    fn create_debug_messenger(
        &mut self,
        _instance: vk::Instance,
        _info: &DebugMessengerInfo,
    ) -> Result<vk::DebugUtilsMessengerEXT> {
        Ok(self.create("debug_messenger"))
    }

    fn destroy_debug_messenger(&mut self, _instance: vk::Instance, messenger: vk::DebugUtilsMessengerEXT) {
        self.record(Call::Destroy("debug_messenger", messenger.as_raw()));
    }

    fn destroy_surface(&mut self, _instance: vk::Instance, surface: vk::SurfaceKHR) {
        self.record(Call::Destroy("surface", surface.as_raw()));
    }

    fn physical_devices(&self, _instance: vk::Instance) -> Result<Vec<vk::PhysicalDevice>> {
        Ok((0..self.devices.len()).map(|i| self.physical_device(i)).collect())
    }

    fn device_properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let Some(dev) = self.device(pd) else {
            return vk::PhysicalDeviceProperties::default();
        };
        let mut props = vk::PhysicalDeviceProperties {
            api_version: dev.api_version.to_raw(),
            device_type: dev.device_type,
            vendor_id: 0x10de,
            device_id: pd.as_raw() as u32,
            ..Default::default()
        };
        for (dst, src) in props.device_name.iter_mut().zip(dev.name.bytes()) {
            *dst = src as std::ffi::c_char;
        }
        props.limits.max_image_dimension2_d = 16384;
        props.limits.max_bound_descriptor_sets = 32;
        props
    }

    fn memory_properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        if let Some(dev) = self.device(pd) {
            for (slot, &(size, local)) in props.memory_heaps.iter_mut().zip(&dev.heaps) {
                slot.size = size;
                if local {
                    slot.flags = vk::MemoryHeapFlags::DEVICE_LOCAL;
                }
            }
            props.memory_heap_count = dev.heaps.len() as u32;
        }
        props
    }

    fn queue_families(&self, pd: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.device(pd)
            .map(|dev| {
                dev.queue_families
                    .iter()
                    .map(|&(flags, count)| vk::QueueFamilyProperties {
                        queue_flags: flags,
                        queue_count: count,
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn device_extensions(&self, pd: vk::PhysicalDevice) -> Result<Vec<String>> {
        if let Some(result) = self.fail_device_extensions {
            return Err(Error::query("vkEnumerateDeviceExtensionProperties")(result));
        }
        Ok(self.device(pd).map(|d| d.extensions.clone()).unwrap_or_default())
    }

    fn device_features(&self, pd: vk::PhysicalDevice, chain: &mut FeatureChain) {
        let missing = self.device(pd).map(|d| d.missing_features.clone()).unwrap_or_default();
        for node in chain.nodes_mut() {
            node.flags_mut().fill(vk::TRUE);
            if let Some(tier) = node.tier() {
                for &(_, index) in missing.iter().filter(|(t, _)| *t == tier) {
                    if let Some(flag) = node.flags_mut().get_mut(index) {
                        *flag = vk::FALSE;
                    }
                }
            }
        }
    }

    fn surface_support(&self, pd: vk::PhysicalDevice, queue_family: u32, _surface: vk::SurfaceKHR) -> Result<bool> {
        if self.fail_surface_support {
            return Err(Error::query("vkGetPhysicalDeviceSurfaceSupportKHR")(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        Ok(self
            .device(pd)
            .is_some_and(|d| d.present_families.contains(&queue_family)))
    }

    fn surface_capabilities(&self, pd: vk::PhysicalDevice, _surface: vk::SurfaceKHR) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(self.device(pd).map(|d| d.capabilities).unwrap_or_default())
    }

    fn surface_formats(&self, pd: vk::PhysicalDevice, _surface: vk::SurfaceKHR) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.device(pd).map(|d| d.formats.clone()).unwrap_or_default())
    }

    fn surface_present_modes(
        &self,
        pd: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(self.device(pd).map(|d| d.present_modes.clone()).unwrap_or_default())
    }

    fn create_device(&mut self, _pd: vk::PhysicalDevice, request: &mut DeviceRequest) -> Result<vk::Device> {
        self.device_request = Some(request.clone());
        if let Some(result) = self.fail_create_device {
            return Err(Error::create("vkCreateDevice")(result));
        }
        Ok(self.create("device"))
    }

    fn destroy_device(&mut self, device: vk::Device) {
        self.record(Call::Destroy("device", device.as_raw()));
    }

    fn device_queue(&self, _device: vk::Device, queue_family: u32, _index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x9000 + u64::from(queue_family))
    }

    fn device_wait_idle(&self, _device: vk::Device) -> Result<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&mut self, _device: vk::Device, request: &SwapchainRequest) -> Result<vk::SwapchainKHR> {
        self.swapchain_requests.push(request.clone());
        if let Some(result) = self.fail_create_swapchain {
            return Err(Error::create("vkCreateSwapchainKHR")(result));
        }
        Ok(self.create("swapchain"))
    }

    fn destroy_swapchain(&mut self, _device: vk::Device, swapchain: vk::SwapchainKHR) {
        self.record(Call::Destroy("swapchain", swapchain.as_raw()));
    }

    fn swapchain_images(&self, _device: vk::Device, _swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let count = self.swapchain_requests.last().map_or(0, |r| r.params.image_count);
        Ok((0..count).map(|_| vk::Image::from_raw(self.handle())).collect())
    }

    fn create_image_view(
        &mut self,
        _device: vk::Device,
        _image: vk::Image,
        _format: vk::Format,
        _layers: u32,
    ) -> Result<vk::ImageView> {
        if self.fail_image_view_after.is_some_and(|n| self.live_views >= n) {
            return Err(Error::create("vkCreateImageView")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        self.live_views += 1;
        Ok(self.create("image_view"))
    }

    fn destroy_image_view(&mut self, _device: vk::Device, view: vk::ImageView) {
        self.live_views = self.live_views.saturating_sub(1);
        self.record(Call::Destroy("image_view", view.as_raw()));
    }
}
