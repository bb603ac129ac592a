// SPDX-License-Identifier: CEPL-1.0
//! Ordered acquisition of instance, debug messenger, surface, device and
//! queues, with rollback on failure.

use ash::vk;
use std::ffi::CString;
use tracing::{info, warn};

use crate::capability::CapabilitySnapshot;
use crate::driver::{c_names, DebugMessengerInfo, DeviceRequest, Driver, InstanceRequest};
use crate::error::{Error, Result};
use crate::ledger::AcquisitionLedger;
use crate::report;
use crate::selection::{self, SelectedDevice, SelectionCriteria};
use crate::swapchain::{DesiredSwapchain, QueueIndices, Swapchain, SwapchainTarget};
use crate::version::ApiVersion;

pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";
pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
pub const PORTABILITY_ENUMERATION_EXTENSION: &str = "VK_KHR_portability_enumeration";

/// Whether to install validation and the debug messenger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DebugMode {
    #[default]
    Off,
    /// Enabled when the loader offers both the extension and the layer.
    IfAvailable,
    /// Missing pieces are a configuration error.
    Required,
}

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub app_name: String,
    pub app_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    /// The loader must support at least this.
    pub minimum_version: ApiVersion,
    /// Requested when the loader supports it; otherwise the loader's own version is used.
    pub desired_version: Option<ApiVersion>,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    /// Platform extensions a window surface needs (see
    /// [`crate::AshDriver::presentation_extensions`]). Ignored when headless.
    pub presentation_extensions: Vec<String>,
    /// No surface: presentation checks, the swapchain extension and the present queue are skipped.
    pub headless: bool,
    pub debug: DebugMode,
    pub debug_messenger: DebugMessengerInfo,
    /// Phase reports at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "ignite".to_owned(),
            app_version: vk::make_api_version(0, 0, 1, 0),
            engine_name: "ignite".to_owned(),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            minimum_version: ApiVersion::V1_0,
            desired_version: Some(ApiVersion::V1_3),
            extensions: Vec::new(),
            layers: Vec::new(),
            presentation_extensions: Vec::new(),
            headless: false,
            debug: if cfg!(debug_assertions) {
                DebugMode::IfAvailable
            } else {
                DebugMode::Off
            },
            debug_messenger: DebugMessengerInfo::default(),
            verbose: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BootstrapConfig {
    pub instance: InstanceConfig,
    pub selection: SelectionCriteria,
}

/// Queue handles retrieved from the device. Not owned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: Option<vk::Queue>,
    pub transfer: Option<vk::Queue>,
    pub compute: Option<vk::Queue>,
}

struct Acquired {
    api_version: ApiVersion,
    instance: vk::Instance,
    messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface: Option<vk::SurfaceKHR>,
    device: vk::Device,
    selected: SelectedDevice,
    queues: Queues,
}

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_owned());
    }
}

fn missing(wanted: &[String], available: &[String]) -> Vec<String> {
    wanted
        .iter()
        .filter(|name| !available.contains(name))
        .cloned()
        .collect()
}

/// Instance extensions, layers and create flags to request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceLists {
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    pub flags: vk::InstanceCreateFlags,
    pub debug_messenger: bool,
}

impl InstanceLists {
    /// Caller lists, presentation extensions and the debug set, checked against
    /// what the loader offers.
    pub fn resolve(config: &InstanceConfig, available_extensions: &[String], available_layers: &[String]) -> Result<Self> {
        let mut extensions = Vec::new();
        let mut layers = Vec::new();
        for ext in &config.extensions {
            push_unique(&mut extensions, ext);
        }
        if !config.headless {
            for ext in &config.presentation_extensions {
                push_unique(&mut extensions, ext);
            }
        }
        for layer in &config.layers {
            push_unique(&mut layers, layer);
        }

        let debug_available = available_extensions.iter().any(|e| e == DEBUG_UTILS_EXTENSION)
            && available_layers.iter().any(|l| l == VALIDATION_LAYER);
        let debug_messenger = match config.debug {
            DebugMode::Off => false,
            DebugMode::IfAvailable => debug_available,
            DebugMode::Required => true,
        };
        if debug_messenger {
            push_unique(&mut extensions, DEBUG_UTILS_EXTENSION);
            push_unique(&mut layers, VALIDATION_LAYER);
        } else if config.debug == DebugMode::IfAvailable {
            warn!("validation requested but {DEBUG_UTILS_EXTENSION}/{VALIDATION_LAYER} are not available");
        }

        let missing_extensions = missing(&extensions, available_extensions);
        if !missing_extensions.is_empty() {
            return Err(Error::MissingInstanceExtensions(missing_extensions));
        }
        let missing_layers = missing(&layers, available_layers);
        if !missing_layers.is_empty() {
            return Err(Error::MissingLayers(missing_layers));
        }

        let mut flags = vk::InstanceCreateFlags::empty();
        if available_extensions.iter().any(|e| e == PORTABILITY_ENUMERATION_EXTENSION) {
            push_unique(&mut extensions, PORTABILITY_ENUMERATION_EXTENSION);
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        Ok(Self {
            extensions,
            layers,
            flags,
            debug_messenger,
        })
    }
}

/// The API version to request from the loader.
pub fn negotiate_api_version(config: &InstanceConfig, loader: ApiVersion) -> Result<ApiVersion> {
    if loader < config.minimum_version {
        return Err(Error::VersionTooLow {
            found: loader,
            required: config.minimum_version,
        });
    }
    Ok(match config.desired_version {
        Some(desired) if desired <= loader => desired,
        Some(_) => loader.without_patch().max(config.minimum_version),
        None => config.minimum_version,
    })
}

/// Runs the acquisition steps. Construct with [`Bootstrap::new`], then [`Bootstrap::run`].
#[derive(Clone, Debug, Default)]
pub struct Bootstrap {
    config: BootstrapConfig,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Builds a [`GpuContext`] on `driver`. `surface_fn` is called once, after
    /// the instance exists, unless the configuration is headless.
    ///
    /// On failure everything acquired so far is released in reverse order
    /// and only the error is returned.
    pub fn run<D, F>(&self, mut driver: D, surface_fn: F) -> Result<GpuContext<D>>
    where
        D: Driver + 'static,
        F: FnOnce(&D, vk::Instance) -> std::result::Result<vk::SurfaceKHR, vk::Result>,
    {
        let mut ledger = AcquisitionLedger::new();
        match self.acquire(&mut driver, &mut ledger, surface_fn) {
            Ok(acquired) => {
                ledger.commit();
                info!(
                    "ignite ready: {} (Vulkan {})",
                    acquired.selected.name, acquired.selected.runtime_version
                );
                Ok(GpuContext {
                    driver,
                    api_version: acquired.api_version,
                    instance: acquired.instance,
                    messenger: acquired.messenger,
                    surface: acquired.surface,
                    device: acquired.device,
                    selected: acquired.selected,
                    queues: acquired.queues,
                    swapchain: None,
                    preferred_formats: self.config.selection.preferred_formats.clone(),
                    preferred_present_modes: self.config.selection.preferred_present_modes.clone(),
                    verbose: self.config.instance.verbose,
                })
            }
            Err(e) => {
                warn!("bootstrap failed: {e}; releasing {:?}", ledger.labels());
                ledger.unwind(&mut driver);
                Err(e)
            }
        }
    }

    fn acquire<D, F>(&self, driver: &mut D, ledger: &mut AcquisitionLedger<D>, surface_fn: F) -> Result<Acquired>
    where
        D: Driver + 'static,
        F: FnOnce(&D, vk::Instance) -> std::result::Result<vk::SurfaceKHR, vk::Result>,
    {
        let cfg = &self.config.instance;
        let verbose = cfg.verbose;

        let loader = driver.instance_version()?;
        let api_version = negotiate_api_version(cfg, loader)?;
        info!("Vulkan loader {loader}, requesting {api_version}");

        let available_extensions = driver.instance_extensions()?;
        let available_layers = driver.instance_layers()?;
        let lists = InstanceLists::resolve(cfg, &available_extensions, &available_layers)?;
        report::instance(verbose, &lists.extensions, &available_extensions, &lists.layers, &available_layers);

        let request = InstanceRequest {
            app_name: c_string(&cfg.app_name),
            app_version: cfg.app_version,
            engine_name: c_string(&cfg.engine_name),
            engine_version: cfg.engine_version,
            api_version,
            extensions: c_names(&lists.extensions),
            layers: c_names(&lists.layers),
            flags: lists.flags,
            debug: lists.debug_messenger.then_some(cfg.debug_messenger),
        };
        let instance = driver.create_instance(&request)?;
        ledger.push("instance", move |d: &mut D| d.destroy_instance(instance));

        let messenger = if lists.debug_messenger {
            let messenger = driver.create_debug_messenger(instance, &cfg.debug_messenger)?;
            ledger.push("debug messenger", move |d: &mut D| d.destroy_debug_messenger(instance, messenger));
            Some(messenger)
        } else {
            None
        };

        let surface = if cfg.headless {
            None
        } else {
            let surface = surface_fn(driver, instance).map_err(Error::create("surface"))?;
            ledger.push("surface", move |d: &mut D| d.destroy_surface(instance, surface));
            Some(surface)
        };

        let criteria = &self.config.selection;
        let template = criteria.features.extension_template();
        let snapshots = {
            let driver: &D = driver;
            driver
                .physical_devices(instance)?
                .into_iter()
                .map(|pd| CapabilitySnapshot::gather(driver, pd, surface, api_version, template))
                .collect::<Result<Vec<_>>>()?
        };
        let presenting = surface.is_some();
        report::selection(verbose, &snapshots, &selection::rank(&snapshots, criteria, presenting));
        let selected = selection::select(&snapshots, criteria, presenting, api_version)?;
        drop(snapshots);

        let mut request = DeviceRequest {
            queue_families: selected.unique_queue_families(),
            extensions: c_names(&selected.extensions),
            features: selected.features.clone(),
        };
        let device = driver.create_device(selected.physical_device, &mut request)?;
        ledger.push("device", move |d: &mut D| d.destroy_device(device));

        let queue = |family: u32| driver.device_queue(device, family, 0);
        let queues = Queues {
            graphics: queue(selected.graphics_queue),
            present: selected.present_queue.map(queue),
            transfer: selected.transfer_queue.map(queue),
            compute: selected.compute_queue.map(queue),
        };
        report::device(verbose, &selected);

        Ok(Acquired {
            api_version,
            instance,
            messenger,
            surface,
            device,
            selected,
            queues,
        })
    }
}

/// Everything a successful [`Bootstrap::run`] acquired. Dropping it waits for
/// the device to go idle, then destroys the swapchain, device, surface, debug
/// messenger and instance, in that order.
pub struct GpuContext<D: Driver> {
    driver: D,
    api_version: ApiVersion,
    instance: vk::Instance,
    messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface: Option<vk::SurfaceKHR>,
    device: vk::Device,
    selected: SelectedDevice,
    queues: Queues,
    swapchain: Option<Swapchain>,
    preferred_formats: Vec<vk::SurfaceFormatKHR>,
    preferred_present_modes: Vec<vk::PresentModeKHR>,
    verbose: bool,
}

impl<D: Driver> GpuContext<D> {
    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Requested instance API version.
    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn instance(&self) -> vk::Instance {
        self.instance
    }

    pub fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface
    }

    pub fn device(&self) -> vk::Device {
        self.device
    }

    pub fn selected(&self) -> &SelectedDevice {
        &self.selected
    }

    pub fn queues(&self) -> Queues {
        self.queues
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Defaults with the preferred formats and present modes from selection.
    pub fn desired_swapchain(&self, extent: vk::Extent2D) -> DesiredSwapchain {
        let mut desired = DesiredSwapchain {
            extent,
            ..Default::default()
        };
        if !self.preferred_formats.is_empty() {
            desired.formats = self.preferred_formats.clone();
        }
        if !self.preferred_present_modes.is_empty() {
            desired.present_modes = self.preferred_present_modes.clone();
        }
        desired
    }

    fn target(&self) -> Result<SwapchainTarget> {
        match (self.surface, self.selected.present_queue) {
            (Some(surface), Some(present)) => Ok(SwapchainTarget {
                device: self.device,
                physical_device: self.selected.physical_device,
                surface,
                queues: QueueIndices {
                    graphics: self.selected.graphics_queue,
                    present,
                },
            }),
            _ => Err(Error::NoSurface),
        }
    }

    /// Creates a fresh swapchain, destroying any existing one first.
    pub fn create_swapchain(&mut self, desired: &DesiredSwapchain) -> Result<&Swapchain> {
        let target = self.target()?;
        self.destroy_swapchain();
        let swapchain = Swapchain::create(&mut self.driver, &target, desired)?;
        report::swapchain(self.verbose, swapchain.params());
        Ok(self.swapchain.insert(swapchain))
    }

    /// Rebuilds the swapchain after a resize, or creates one if there is none.
    pub fn recreate_swapchain(&mut self, desired: &DesiredSwapchain) -> Result<&Swapchain> {
        let target = self.target()?;
        match self.swapchain.take() {
            Some(mut swapchain) => {
                match swapchain.recreate(&mut self.driver, &target, desired) {
                    Ok(()) => {
                        let swapchain = self.swapchain.insert(swapchain);
                        report::swapchain(self.verbose, swapchain.params());
                        Ok(swapchain)
                    }
                    Err(e) => {
                        if !swapchain.is_retired() {
                            self.swapchain = Some(swapchain);
                        }
                        Err(e)
                    }
                }
            }
            None => self.create_swapchain(desired),
        }
    }

    pub fn destroy_swapchain(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            if let Err(e) = self.driver.device_wait_idle(self.device) {
                warn!("device_wait_idle before swapchain teardown: {e}");
            }
            swapchain.destroy(&mut self.driver, self.device);
        }
    }
}

impl<D: Driver> Drop for GpuContext<D> {
    fn drop(&mut self) {
        if let Err(e) = self.driver.device_wait_idle(self.device) {
            warn!("device_wait_idle on teardown: {e}");
        }
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&mut self.driver, self.device);
        }
        self.driver.destroy_device(self.device);
        if let Some(surface) = self.surface.take() {
            self.driver.destroy_surface(self.instance, surface);
        }
        if let Some(messenger) = self.messenger.take() {
            self.driver.destroy_debug_messenger(self.instance, messenger);
        }
        self.driver.destroy_instance(self.instance);
        info!("ignite context destroyed");
    }
}
