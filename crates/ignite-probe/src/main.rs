// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use clap::{Parser, ValueEnum};
use ignite_core::init_tracing_verbose;
use ignite_vk::{
    report, ApiVersion, AshDriver, Bootstrap, BootstrapConfig, DebugMode, DesiredSwapchain, FeatureRequest,
    GpuContext, InstanceConfig, QueuePreference, SelectionCriteria,
};
use tracing::{error, info, warn};

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Select a device without a window and print what was chosen
    #[arg(long)]
    headless: bool,
    /// Config file
    #[arg(long, default_value = "ignite.toml")]
    config: PathBuf,
    /// Exact device name to require
    #[arg(long)]
    device: Option<String>,
    /// Print the bootstrap reports
    #[arg(long, short)]
    verbose: bool,
    /// Preferred present mode: fifo | mailbox | immediate | fifo_relaxed
    #[arg(long)]
    present_mode: Option<String>,
    #[arg(long, value_enum)]
    transfer: Option<QueuePref>,
    #[arg(long, value_enum)]
    compute: Option<QueuePref>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum QueuePref {
    #[default]
    None,
    Dedicated,
    Separate,
}

impl From<QueuePref> for QueuePreference {
    fn from(p: QueuePref) -> Self {
        match p {
            QueuePref::None => QueuePreference::None,
            QueuePref::Dedicated => QueuePreference::Dedicated,
            QueuePref::Separate => QueuePreference::Separate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DebugCfg {
    Off,
    #[default]
    IfAvailable,
    Required,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DeviceTypeCfg {
    #[default]
    Discrete,
    Integrated,
    Virtual,
    Cpu,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InstanceCfg {
    app_name: Option<String>,
    minimum_version: Option<String>,
    desired_version: Option<String>,
    extensions: Vec<String>,
    layers: Vec<String>,
    debug: DebugCfg,
    verbose: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SelectionCfg {
    device: Option<String>,
    minimum_version: Option<String>,
    preferred_type: DeviceTypeCfg,
    required_memory_mib: u64,
    transfer: QueuePref,
    compute: QueuePref,
    required_extensions: Vec<String>,
    desired_extensions: Vec<String>,
    features: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SwapchainCfg {
    image_count: u32,
    present_modes: Vec<String>,
}

impl Default for SwapchainCfg {
    fn default() -> Self {
        SwapchainCfg {
            image_count: 3,
            present_modes: vec!["mailbox".to_owned(), "fifo".to_owned()],
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    instance: InstanceCfg,
    selection: SelectionCfg,
    swapchain: SwapchainCfg,
}

fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).with_context(|| format!("parsing {}", path.display())),
        Err(_) => Ok(AppCfg::default()),
    }
}

fn parse_version(s: &str) -> Result<ApiVersion> {
    let mut parts = s.trim().split('.').map(str::parse::<u32>);
    let mut next = || parts.next().transpose().with_context(|| format!("bad version {s:?}"));
    let major = next()?.ok_or_else(|| anyhow!("empty version"))?;
    let minor = next()?.unwrap_or(0);
    let patch = next()?.unwrap_or(0);
    Ok(ApiVersion::new(major, minor, patch))
}

fn parse_present_modes(names: &[String]) -> Result<Vec<vk::PresentModeKHR>> {
    names
        .iter()
        .map(|n| report::present_mode_from_name(n).ok_or_else(|| anyhow!("unknown present mode {n:?}")))
        .collect()
}

/// Feature names the probe understands, grouped by the block that owns them.
fn parse_features(names: &[String]) -> Result<FeatureRequest> {
    let mut core = vk::PhysicalDeviceFeatures::default();
    let mut v12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut v13 = vk::PhysicalDeviceVulkan13Features::default();
    for name in names {
        match name.as_str() {
            "sampler_anisotropy" => core.sampler_anisotropy = vk::TRUE,
            "geometry_shader" => core.geometry_shader = vk::TRUE,
            "fill_mode_non_solid" => core.fill_mode_non_solid = vk::TRUE,
            "wide_lines" => core.wide_lines = vk::TRUE,
            "timeline_semaphore" => v12.timeline_semaphore = vk::TRUE,
            "buffer_device_address" => v12.buffer_device_address = vk::TRUE,
            "descriptor_indexing" => v12.descriptor_indexing = vk::TRUE,
            "dynamic_rendering" => v13.dynamic_rendering = vk::TRUE,
            "synchronization2" => v13.synchronization2 = vk::TRUE,
            other => bail!("unknown feature {other:?}"),
        }
    }
    Ok(FeatureRequest::default().core(core).vulkan12(v12).vulkan13(v13))
}

fn build_config(args: &Args, cfg: &AppCfg) -> Result<BootstrapConfig> {
    let mut instance = InstanceConfig {
        extensions: cfg.instance.extensions.clone(),
        layers: cfg.instance.layers.clone(),
        headless: args.headless,
        debug: match cfg.instance.debug {
            DebugCfg::Off => DebugMode::Off,
            DebugCfg::IfAvailable => DebugMode::IfAvailable,
            DebugCfg::Required => DebugMode::Required,
        },
        verbose: args.verbose || cfg.instance.verbose,
        ..Default::default()
    };
    if let Some(name) = &cfg.instance.app_name {
        instance.app_name = name.clone();
    }
    if let Some(v) = &cfg.instance.minimum_version {
        instance.minimum_version = parse_version(v)?;
    }
    if let Some(v) = &cfg.instance.desired_version {
        instance.desired_version = Some(parse_version(v)?);
    }

    let sel = &cfg.selection;
    let mut selection = SelectionCriteria {
        name: args.device.clone().or_else(|| sel.device.clone()),
        preferred_type: match sel.preferred_type {
            DeviceTypeCfg::Discrete => vk::PhysicalDeviceType::DISCRETE_GPU,
            DeviceTypeCfg::Integrated => vk::PhysicalDeviceType::INTEGRATED_GPU,
            DeviceTypeCfg::Virtual => vk::PhysicalDeviceType::VIRTUAL_GPU,
            DeviceTypeCfg::Cpu => vk::PhysicalDeviceType::CPU,
        },
        transfer: args.transfer.unwrap_or(sel.transfer).into(),
        compute: args.compute.unwrap_or(sel.compute).into(),
        required_memory: sel.required_memory_mib << 20,
        features: parse_features(&sel.features)?,
        required_extensions: sel.required_extensions.clone(),
        desired_extensions: sel.desired_extensions.clone(),
        ..Default::default()
    };
    if let Some(v) = &sel.minimum_version {
        selection.minimum_version = parse_version(v)?;
    }

    let mut modes = parse_present_modes(&cfg.swapchain.present_modes)?;
    if let Some(name) = &args.present_mode {
        modes.insert(0, report::present_mode_from_name(name).ok_or_else(|| anyhow!("unknown present mode {name:?}"))?);
    }
    if !modes.is_empty() {
        selection.preferred_present_modes = modes;
    }

    Ok(BootstrapConfig { instance, selection })
}

fn print_summary(ctx: &GpuContext<AshDriver>) {
    let sel = ctx.selected();
    println!("device:     {} ({})", sel.name, report::type_name(sel.device_type));
    println!("vulkan:     {}", sel.runtime_version);
    println!("local heap: {} MiB", sel.max_device_local_heap >> 20);
    println!(
        "queues:     graphics={} present={:?} transfer={:?} compute={:?}",
        sel.graphics_queue, sel.present_queue, sel.transfer_queue, sel.compute_queue
    );
    println!("extensions: {}", sel.extensions.join(", "));
}

fn run_headless(config: BootstrapConfig) -> Result<()> {
    let ctx = Bootstrap::new(config)
        .run(AshDriver::linked(), |_, _| Err(vk::Result::ERROR_INITIALIZATION_FAILED))
        .context("bootstrap failed")?;
    print_summary(&ctx);
    Ok(())
}

fn extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

struct App {
    config: Option<BootstrapConfig>,
    image_count: u32,
    // Declared before `window`: the surface must go before the window it was made from.
    ctx: Option<GpuContext<AshDriver>>,
    window: Option<Window>,
    paused: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut config = self.config.take().ok_or_else(|| anyhow!("already started"))?;
        let window = event_loop.create_window(Window::default_attributes().with_title("ignite-probe"))?;

        let dh = window.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();
        config.instance.presentation_extensions = AshDriver::presentation_extensions(dh)?;

        let mut ctx = Bootstrap::new(config)
            .run(AshDriver::linked(), |driver, _| {
                // SAFETY: the window outlives the context (see field order in `App`).
                unsafe { driver.create_surface(dh, wh) }
            })
            .context("bootstrap failed")?;

        let size = window.inner_size();
        self.paused = size.width == 0 || size.height == 0;
        if !self.paused {
            let desired = self.desired(&ctx, size);
            ctx.create_swapchain(&desired).context("swapchain creation failed")?;
        }
        print_summary(&ctx);

        self.ctx = Some(ctx);
        self.window = Some(window);
        Ok(())
    }

    fn desired(&self, ctx: &GpuContext<AshDriver>, size: PhysicalSize<u32>) -> DesiredSwapchain {
        DesiredSwapchain {
            image_count: self.image_count,
            ..ctx.desired_swapchain(extent(size))
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.ctx = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.start(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        info!("resumed → paused={}", self.paused);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.ctx = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Resized → {}x{} (paused={})", new_size.width, new_size.height, self.paused);
                }
                if self.paused {
                    return;
                }
                let Some(ctx) = self.ctx.as_ref() else { return };
                let desired = self.desired(ctx, new_size);
                let result = match self.ctx.as_mut() {
                    Some(ctx) => ctx.recreate_swapchain(&desired).map(|sc| sc.extent()),
                    None => return,
                };
                match result {
                    Ok(e) => info!("swapchain recreated at {}x{}", e.width, e.height),
                    Err(e) => warn!("swapchain recreation failed: {e}"),
                }
            }

            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = load_cfg(&args.config)?;
    init_tracing_verbose(args.verbose || cfg.instance.verbose);

    let config = build_config(&args, &cfg)?;
    if args.headless {
        return run_headless(config);
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        config: Some(config),
        image_count: cfg.swapchain.image_count,
        ctx: None,
        window: None,
        paused: false,
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
