// SPDX-License-Identifier: CEPL-1.0
//! Per-phase diagnostic reports. Emitted at `info` in verbose mode, `debug`
//! otherwise.

use ash::vk;

use crate::capability::CapabilitySnapshot;
use crate::selection::{SelectedDevice, Verdict};
use crate::swapchain::NegotiatedSwapchainParams;

macro_rules! report {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

const PRESENT_MODES: [(vk::PresentModeKHR, &str); 6] = [
    (vk::PresentModeKHR::FIFO, "fifo"),
    (vk::PresentModeKHR::MAILBOX, "mailbox"),
    (vk::PresentModeKHR::IMMEDIATE, "immediate"),
    (vk::PresentModeKHR::FIFO_RELAXED, "fifo_relaxed"),
    (vk::PresentModeKHR::SHARED_DEMAND_REFRESH, "shared_demand_refresh"),
    (vk::PresentModeKHR::SHARED_CONTINUOUS_REFRESH, "shared_continuous_refresh"),
];

/// Short lowercase name, as accepted by [`present_mode_from_name`].
pub fn pm_name(mode: vk::PresentModeKHR) -> &'static str {
    PRESENT_MODES
        .iter()
        .find(|(m, _)| *m == mode)
        .map_or("unknown", |&(_, name)| name)
}

/// Case-insensitive inverse of [`pm_name`].
pub fn present_mode_from_name(name: &str) -> Option<vk::PresentModeKHR> {
    PRESENT_MODES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|&(mode, _)| mode)
}

pub fn type_name(t: vk::PhysicalDeviceType) -> &'static str {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "other",
    }
}

fn mib(bytes: vk::DeviceSize) -> u64 {
    bytes >> 20
}

pub fn instance(
    verbose: bool,
    enabled_extensions: &[String],
    available_extensions: &[String],
    enabled_layers: &[String],
    available_layers: &[String],
) {
    report!(verbose, "instance extensions enabled: {:?}", enabled_extensions);
    report!(verbose, "instance extensions available: {:?}", available_extensions);
    report!(verbose, "layers enabled: {:?}", enabled_layers);
    report!(verbose, "layers available: {:?}", available_layers);
}

pub fn selection(verbose: bool, snapshots: &[CapabilitySnapshot], ranked: &[(usize, Verdict)]) {
    report!(verbose, "{} physical device(s)", snapshots.len());
    for (rank, (index, verdict)) in ranked.iter().enumerate() {
        let snap = &snapshots[*index];
        let status = if verdict.is_suitable() {
            "suitable".to_owned()
        } else {
            format!("rejected ({})", verdict.rejections)
        };
        report!(
            verbose,
            "#{rank} {} [{}] Vulkan {} driver {:#x}, local heap {} MiB: {status}",
            snap.name,
            type_name(snap.device_type),
            snap.api_version,
            snap.driver_version,
            mib(snap.max_device_local_heap())
        );
        for family in &snap.queue_families {
            report!(
                verbose,
                "    queue family {}: {:?} x{}{}",
                family.index,
                family.flags,
                family.count,
                if family.present { " present" } else { "" }
            );
        }
        for gap in &verdict.feature_gaps {
            report!(verbose, "    missing feature: {gap}");
        }
        if !verdict.missing_extensions.is_empty() {
            report!(verbose, "    missing extensions: {:?}", verdict.missing_extensions);
        }
    }
}

pub fn device(verbose: bool, selected: &SelectedDevice) {
    report!(
        verbose,
        "device: {} [{}] Vulkan {}",
        selected.name,
        type_name(selected.device_type),
        selected.runtime_version
    );
    report!(verbose, "device extensions enabled: {:?}", selected.extensions);
    report!(
        verbose,
        "queues: graphics={} present={:?} transfer={:?} compute={:?}",
        selected.graphics_queue,
        selected.present_queue,
        selected.transfer_queue,
        selected.compute_queue
    );
    report!(verbose, "feature chain: {:?}", selected.features.nodes());
}

pub fn swapchain(verbose: bool, params: &NegotiatedSwapchainParams) {
    report!(
        verbose,
        "swapchain: {:?} / {:?}, {}, {}x{}, {} images",
        params.format,
        params.color_space,
        pm_name(params.present_mode),
        params.extent.width,
        params.extent.height,
        params.image_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_mode_names_parse_back() {
        assert_eq!(present_mode_from_name("mailbox"), Some(vk::PresentModeKHR::MAILBOX));
        assert_eq!(present_mode_from_name("FIFO_RELAXED"), Some(vk::PresentModeKHR::FIFO_RELAXED));
        assert_eq!(present_mode_from_name("vsync"), None);
        assert_eq!(pm_name(vk::PresentModeKHR::SHARED_DEMAND_REFRESH), "shared_demand_refresh");
        assert_eq!(pm_name(vk::PresentModeKHR::from_raw(0x7fff)), "unknown");
    }
}
