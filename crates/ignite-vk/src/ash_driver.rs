// SPDX-License-Identifier: CEPL-1.0
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};
use tracing::{debug, warn};

use crate::driver::{DebugMessengerInfo, DeviceRequest, Driver, InstanceRequest, SwapchainRequest};
use crate::error::{Error, Result};
use crate::feature_chain::FeatureChain;
use crate::version::ApiVersion;

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback-data struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: p_message is a NUL-terminated string owned by the loader.
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "ignite::validation", "[{:?}] {}", types, msg)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "ignite::validation", "[{:?}] {}", types, msg)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "ignite::validation", "[{:?}] {}", types, msg)
        }
        _ => tracing::trace!(target: "ignite::validation", "[{:?}] {}", types, msg),
    }
    vk::FALSE
}

fn messenger_info(info: &DebugMessengerInfo) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(info.severity)
        .message_type(info.types)
        .pfn_user_callback(Some(debug_callback))
}

fn extension_names(props: &[vk::ExtensionProperties]) -> Vec<String> {
    props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn layer_names(props: &[vk::LayerProperties]) -> Vec<String> {
    props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

struct InstanceFns {
    handle: ash::Instance,
    surface: surface::Instance,
    debug_utils: debug_utils::Instance,
}

struct DeviceFns {
    handle: ash::Device,
    swapchain: swapchain::Device,
}

/// [`Driver`] over `ash`. Owns the entry, the instance-level and device-level
/// dispatch tables of whatever it has created.
pub struct AshDriver {
    entry: ash::Entry,
    instance: Option<InstanceFns>,
    devices: Vec<DeviceFns>,
}

impl AshDriver {
    pub fn from_entry(entry: ash::Entry) -> Self {
        Self {
            entry,
            instance: None,
            devices: Vec::new(),
        }
    }

    /// Uses the statically linked loader.
    pub fn linked() -> Self {
        Self::from_entry(ash::Entry::linked())
    }

    /// Loads the system Vulkan loader at runtime.
    ///
    /// # Safety
    /// Loading a shared library runs arbitrary initialization code.
    pub unsafe fn load() -> Result<Self> {
        // SAFETY: forwarded to the caller.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| Error::Loading(e.to_string()))?;
        Ok(Self::from_entry(entry))
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> Option<&ash::Instance> {
        self.instance.as_ref().map(|i| &i.handle)
    }

    pub fn device(&self, device: vk::Device) -> Option<&ash::Device> {
        self.device_fns(device).map(|d| &d.handle)
    }

    /// Instance extensions the platform needs to present to windows on `display`.
    pub fn presentation_extensions(display: RawDisplayHandle) -> Result<Vec<String>> {
        let exts = ash_window::enumerate_required_extensions(display)
            .map_err(Error::query("enumerate_required_extensions"))?;
        Ok(exts
            .iter()
            // SAFETY: ash_window hands out static NUL-terminated names.
            .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
            .collect())
    }

    /// Creates a window surface on the current instance. Suitable as the
    /// body of a [`crate::Bootstrap::run`] surface callback.
    ///
    /// # Safety
    /// The handles must stay valid for the lifetime of the returned surface.
    pub unsafe fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> std::result::Result<vk::SurfaceKHR, vk::Result> {
        let instance = self.instance().ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        // SAFETY: forwarded to the caller; the instance was created with the
        // presentation extensions for this display.
        unsafe { ash_window::create_surface(&self.entry, instance, display, window, None) }
    }

    fn instance_fns(&self) -> Result<&InstanceFns> {
        self.instance.as_ref().ok_or(Error::Creation {
            what: "instance lookup",
            result: vk::Result::ERROR_INITIALIZATION_FAILED,
        })
    }

    fn device_fns(&self, device: vk::Device) -> Option<&DeviceFns> {
        self.devices.iter().find(|d| d.handle.handle() == device)
    }

    fn device_or_err(&self, device: vk::Device) -> Result<&DeviceFns> {
        self.device_fns(device).ok_or(Error::Creation {
            what: "device lookup",
            result: vk::Result::ERROR_DEVICE_LOST,
        })
    }
}

impl Driver for AshDriver {
    fn instance_version(&self) -> Result<ApiVersion> {
        // SAFETY: vkEnumerateInstanceVersion has no preconditions beyond a live entry.
        let raw = unsafe { self.entry.try_enumerate_instance_version() }
            .map_err(Error::query("vkEnumerateInstanceVersion"))?
            .unwrap_or(vk::API_VERSION_1_0);
        Ok(ApiVersion::from_raw(raw))
    }

    fn instance_extensions(&self) -> Result<Vec<String>> {
        // SAFETY: None queries the implementation's own extensions.
        let props = unsafe { self.entry.enumerate_instance_extension_properties(None) }
            .map_err(Error::query("vkEnumerateInstanceExtensionProperties"))?;
        Ok(extension_names(&props))
    }

    fn instance_layers(&self) -> Result<Vec<String>> {
        // SAFETY: no preconditions beyond a live entry.
        let props = unsafe { self.entry.enumerate_instance_layer_properties() }
            .map_err(Error::query("vkEnumerateInstanceLayerProperties"))?;
        Ok(layer_names(&props))
    }

    fn create_instance(&mut self, request: &InstanceRequest) -> Result<vk::Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(&request.app_name)
            .application_version(request.app_version)
            .engine_name(&request.engine_name)
            .engine_version(request.engine_version)
            .api_version(request.api_version.to_raw());

        let ext_ptrs: Vec<*const c_char> = request.extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = request.layers.iter().map(|l| l.as_ptr()).collect();

        let mut debug_info = request.debug.as_ref().map(messenger_info);
        let mut create_info = vk::InstanceCreateInfo::default()
            .flags(request.flags)
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if let Some(debug_info) = debug_info.as_mut() {
            create_info = create_info.push_next(debug_info);
        }

        // SAFETY: create_info and everything it points at outlive the call.
        let handle = unsafe { self.entry.create_instance(&create_info, None) }
            .map_err(Error::create("vkCreateInstance"))?;
        let raw = handle.handle();
        self.instance = Some(InstanceFns {
            surface: surface::Instance::new(&self.entry, &handle),
            debug_utils: debug_utils::Instance::new(&self.entry, &handle),
            handle,
        });
        Ok(raw)
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        match self.instance.take() {
            Some(fns) if fns.handle.handle() == instance => {
                debug!("destroying instance {:?}", instance);
                // SAFETY: every child object has been destroyed by the ledger or GpuContext.
                unsafe { fns.handle.destroy_instance(None) };
            }
            other => {
                warn!("destroy_instance: {:?} is not owned by this driver", instance);
                self.instance = other;
            }
        }
    }

    fn create_debug_messenger(
        &mut self,
        _instance: vk::Instance,
        info: &DebugMessengerInfo,
    ) -> Result<vk::DebugUtilsMessengerEXT> {
        let fns = self.instance_fns()?;
        // SAFETY: the instance was created with VK_EXT_debug_utils enabled.
        unsafe { fns.debug_utils.create_debug_utils_messenger(&messenger_info(info), None) }
            .map_err(Error::create("vkCreateDebugUtilsMessengerEXT"))
    }

    fn destroy_debug_messenger(&mut self, _instance: vk::Instance, messenger: vk::DebugUtilsMessengerEXT) {
        if let Some(fns) = &self.instance {
            // SAFETY: messenger was created from this instance and is destroyed once.
            unsafe { fns.debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }
    }

    fn destroy_surface(&mut self, _instance: vk::Instance, surface: vk::SurfaceKHR) {
        if let Some(fns) = &self.instance {
            // SAFETY: no swapchain references the surface any more.
            unsafe { fns.surface.destroy_surface(surface, None) };
        }
    }

    fn physical_devices(&self, _instance: vk::Instance) -> Result<Vec<vk::PhysicalDevice>> {
        let fns = self.instance_fns()?;
        // SAFETY: live instance.
        unsafe { fns.handle.enumerate_physical_devices() }.map_err(Error::query("vkEnumeratePhysicalDevices"))
    }

    fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        match &self.instance {
            // SAFETY: physical_device was enumerated from this instance.
            Some(fns) => unsafe { fns.handle.get_physical_device_properties(physical_device) },
            None => vk::PhysicalDeviceProperties::default(),
        }
    }

    fn memory_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        match &self.instance {
            // SAFETY: physical_device was enumerated from this instance.
            Some(fns) => unsafe { fns.handle.get_physical_device_memory_properties(physical_device) },
            None => vk::PhysicalDeviceMemoryProperties::default(),
        }
    }

    fn queue_families(&self, physical_device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        match &self.instance {
            // SAFETY: physical_device was enumerated from this instance.
            Some(fns) => unsafe { fns.handle.get_physical_device_queue_family_properties(physical_device) },
            None => Vec::new(),
        }
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<String>> {
        let fns = self.instance_fns()?;
        // SAFETY: physical_device was enumerated from this instance.
        let props = unsafe { fns.handle.enumerate_device_extension_properties(physical_device) }
            .map_err(Error::query("vkEnumerateDeviceExtensionProperties"))?;
        Ok(extension_names(&props))
    }

    fn device_features(&self, physical_device: vk::PhysicalDevice, chain: &mut FeatureChain) {
        let Some(fns) = &self.instance else { return };
        if chain.uses_features2() {
            chain.with_linked(|features2| {
                // SAFETY: the chain only links blocks the negotiated revision supports.
                unsafe { fns.handle.get_physical_device_features2(physical_device, features2) }
            });
        } else {
            // SAFETY: physical_device was enumerated from this instance.
            let core = unsafe { fns.handle.get_physical_device_features(physical_device) };
            for node in chain.nodes_mut() {
                if let crate::feature_chain::FeatureNode::Core10(block) = node {
                    *block = core;
                }
            }
        }
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool> {
        let fns = self.instance_fns()?;
        // SAFETY: both handles derive from this instance.
        unsafe { fns.surface.get_physical_device_surface_support(physical_device, queue_family, surface) }
            .map_err(Error::query("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        let fns = self.instance_fns()?;
        // SAFETY: both handles derive from this instance.
        unsafe { fns.surface.get_physical_device_surface_capabilities(physical_device, surface) }
            .map_err(Error::query("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let fns = self.instance_fns()?;
        // SAFETY: both handles derive from this instance.
        unsafe { fns.surface.get_physical_device_surface_formats(physical_device, surface) }
            .map_err(Error::query("vkGetPhysicalDeviceSurfaceFormatsKHR"))
    }

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        let fns = self.instance_fns()?;
        // SAFETY: both handles derive from this instance.
        unsafe { fns.surface.get_physical_device_surface_present_modes(physical_device, surface) }
            .map_err(Error::query("vkGetPhysicalDeviceSurfacePresentModesKHR"))
    }

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        request: &mut DeviceRequest,
    ) -> Result<vk::Device> {
        let instance = self.instance_fns()?.handle.clone();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = request
            .queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();
        let ext_ptrs: Vec<*const c_char> = request.extensions.iter().map(|e| e.as_ptr()).collect();

        let created = if request.features.uses_features2() {
            request.features.with_linked(|features2| {
                let info = vk::DeviceCreateInfo::default()
                    .queue_create_infos(&queue_infos)
                    .enabled_extension_names(&ext_ptrs)
                    .push_next(features2);
                // SAFETY: info and the linked feature chain outlive the call.
                unsafe { instance.create_device(physical_device, &info, None) }
            })
        } else {
            let core = request.features.core();
            let info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_infos)
                .enabled_extension_names(&ext_ptrs)
                .enabled_features(&core);
            // SAFETY: info outlives the call.
            unsafe { instance.create_device(physical_device, &info, None) }
        };
        let handle = created.map_err(Error::create("vkCreateDevice"))?;

        let raw = handle.handle();
        self.devices.push(DeviceFns {
            swapchain: swapchain::Device::new(&instance, &handle),
            handle,
        });
        Ok(raw)
    }

    fn destroy_device(&mut self, device: vk::Device) {
        let Some(pos) = self.devices.iter().position(|d| d.handle.handle() == device) else {
            warn!("destroy_device: {:?} is not owned by this driver", device);
            return;
        };
        let fns = self.devices.remove(pos);
        debug!("destroying device {:?}", device);
        // SAFETY: swapchains and views were destroyed first; the device is idle.
        unsafe { fns.handle.destroy_device(None) };
    }

    fn device_queue(&self, device: vk::Device, queue_family: u32, index: u32) -> vk::Queue {
        match self.device_fns(device) {
            // SAFETY: the family was part of the device create info with at least index + 1 queues.
            Some(fns) => unsafe { fns.handle.get_device_queue(queue_family, index) },
            None => vk::Queue::null(),
        }
    }

    fn device_wait_idle(&self, device: vk::Device) -> Result<()> {
        let fns = self.device_or_err(device)?;
        // SAFETY: live device; the caller serializes access.
        unsafe { fns.handle.device_wait_idle() }.map_err(Error::query("vkDeviceWaitIdle"))
    }

    fn create_swapchain(&mut self, device: vk::Device, request: &SwapchainRequest) -> Result<vk::SwapchainKHR> {
        let fns = self.device_or_err(device)?;
        let p = &request.params;
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(request.surface)
            .min_image_count(p.image_count)
            .image_format(p.format)
            .image_color_space(p.color_space)
            .image_extent(p.extent)
            .image_array_layers(p.array_layers)
            .image_usage(p.usage)
            .image_sharing_mode(p.sharing_mode)
            .queue_family_indices(&p.queue_family_indices)
            .pre_transform(p.pre_transform)
            .composite_alpha(p.composite_alpha)
            .present_mode(p.present_mode)
            .clipped(true)
            .old_swapchain(request.old_swapchain);
        // SAFETY: surface and old swapchain belong to this instance/device.
        unsafe { fns.swapchain.create_swapchain(&info, None) }.map_err(Error::create("vkCreateSwapchainKHR"))
    }

    fn destroy_swapchain(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) {
        if let Some(fns) = self.device_fns(device) {
            // SAFETY: views of the swapchain images are already gone.
            unsafe { fns.swapchain.destroy_swapchain(swapchain, None) };
        }
    }

    fn swapchain_images(&self, device: vk::Device, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let fns = self.device_or_err(device)?;
        // SAFETY: swapchain was created on this device.
        unsafe { fns.swapchain.get_swapchain_images(swapchain) }.map_err(Error::query("vkGetSwapchainImagesKHR"))
    }

    fn create_image_view(
        &mut self,
        device: vk::Device,
        image: vk::Image,
        format: vk::Format,
        layers: u32,
    ) -> Result<vk::ImageView> {
        let fns = self.device_or_err(device)?;
        let view_type = if layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: layers,
            });
        // SAFETY: image is a swapchain image of this device.
        unsafe { fns.handle.create_image_view(&info, None) }.map_err(Error::create("vkCreateImageView"))
    }

    fn destroy_image_view(&mut self, device: vk::Device, view: vk::ImageView) {
        if let Some(fns) = self.device_fns(device) {
            // SAFETY: no pending work references the view (caller waited for idle).
            unsafe { fns.handle.destroy_image_view(view, None) };
        }
    }
}
