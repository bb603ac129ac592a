// SPDX-License-Identifier: CEPL-1.0
//! The driver seam.
//!
//! Every call the bootstrap makes into Vulkan goes through a [`Driver`]. The
//! driver value is the context object that owns the dispatch tables, so two
//! contexts in one process never share state, and tests substitute a fake.
//! [`crate::AshDriver`] is the real implementation.
//!
//! Handles passed to a driver must have been produced by that same driver.

use ash::vk;
use std::ffi::CString;

use crate::error::Result;
use crate::feature_chain::FeatureChain;
use crate::swapchain::NegotiatedSwapchainParams;
use crate::version::ApiVersion;

/// Everything needed for `vkCreateInstance`.
#[derive(Clone, Debug)]
pub struct InstanceRequest {
    pub app_name: CString,
    pub app_version: u32,
    pub engine_name: CString,
    pub engine_version: u32,
    pub api_version: ApiVersion,
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
    pub flags: vk::InstanceCreateFlags,
    /// Chained into instance creation too, so messages emitted by
    /// `vkCreateInstance`/`vkDestroyInstance` are not lost.
    pub debug: Option<DebugMessengerInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugMessengerInfo {
    pub severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub types: vk::DebugUtilsMessageTypeFlagsEXT,
}

impl Default for DebugMessengerInfo {
    fn default() -> Self {
        Self {
            severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            types: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        }
    }
}

/// Everything needed for `vkCreateDevice`. One queue is requested from each
/// listed family.
#[derive(Clone, Debug)]
pub struct DeviceRequest {
    pub queue_families: Vec<u32>,
    pub extensions: Vec<CString>,
    pub features: FeatureChain,
}

#[derive(Clone, Debug)]
pub struct SwapchainRequest {
    pub surface: vk::SurfaceKHR,
    pub params: NegotiatedSwapchainParams,
    pub old_swapchain: vk::SwapchainKHR,
}

pub trait Driver {
    fn instance_version(&self) -> Result<ApiVersion>;
    fn instance_extensions(&self) -> Result<Vec<String>>;
    fn instance_layers(&self) -> Result<Vec<String>>;
    fn create_instance(&mut self, request: &InstanceRequest) -> Result<vk::Instance>;
    fn destroy_instance(&mut self, instance: vk::Instance);

    fn create_debug_messenger(
        &mut self,
        instance: vk::Instance,
        info: &DebugMessengerInfo,
    ) -> Result<vk::DebugUtilsMessengerEXT>;
    fn destroy_debug_messenger(&mut self, instance: vk::Instance, messenger: vk::DebugUtilsMessengerEXT);
    fn destroy_surface(&mut self, instance: vk::Instance, surface: vk::SurfaceKHR);

    fn physical_devices(&self, instance: vk::Instance) -> Result<Vec<vk::PhysicalDevice>>;
    fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn memory_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;
    fn queue_families(&self, physical_device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<String>>;
    /// Fills every block of a query-mode `chain`.
    fn device_features(&self, physical_device: vk::PhysicalDevice, chain: &mut FeatureChain);

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool>;
    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>>;

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        request: &mut DeviceRequest,
    ) -> Result<vk::Device>;
    fn destroy_device(&mut self, device: vk::Device);
    fn device_queue(&self, device: vk::Device, queue_family: u32, index: u32) -> vk::Queue;
    fn device_wait_idle(&self, device: vk::Device) -> Result<()>;

    fn create_swapchain(&mut self, device: vk::Device, request: &SwapchainRequest) -> Result<vk::SwapchainKHR>;
    fn destroy_swapchain(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, device: vk::Device, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn create_image_view(
        &mut self,
        device: vk::Device,
        image: vk::Image,
        format: vk::Format,
        layers: u32,
    ) -> Result<vk::ImageView>;
    fn destroy_image_view(&mut self, device: vk::Device, view: vk::ImageView);
}

/// Names that cannot be represented as C strings are dropped; they could
/// never have matched an available name anyway.
pub(crate) fn c_names(names: &[String]) -> Vec<CString> {
    names
        .iter()
        .filter_map(|n| CString::new(n.as_str()).ok())
        .collect()
}
