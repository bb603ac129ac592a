// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection.
//!
//! Every candidate is checked against the hard constraints of a
//! [`SelectionCriteria`], the candidates are stably ranked, and the winner's
//! queue families and final extension list are resolved.

use ash::vk;
use bitflags::bitflags;
use std::fmt;

use crate::capability::{CapabilitySnapshot, QueueFamily};
use crate::error::{Error, Result};
use crate::feature_chain::{FeatureChain, FeatureGap, FeatureRequest};
use crate::version::ApiVersion;

pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";
pub const PORTABILITY_SUBSET_EXTENSION: &str = "VK_KHR_portability_subset";

/// How a transfer or compute queue should relate to the graphics queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueuePreference {
    /// No separate queue.
    #[default]
    None,
    /// A family with only this capability (no graphics, not the other of compute/transfer).
    Dedicated,
    /// Any non-graphics family with this capability.
    Separate,
}

/// What the caller needs from a physical device.
#[derive(Clone, Debug)]
pub struct SelectionCriteria {
    /// Exact device name.
    pub name: Option<String>,
    pub minimum_version: ApiVersion,
    pub preferred_type: vk::PhysicalDeviceType,
    pub transfer: QueuePreference,
    pub compute: QueuePreference,
    /// Smallest acceptable device-local heap, in bytes.
    pub required_memory: vk::DeviceSize,
    pub features: FeatureRequest,
    pub required_extensions: Vec<String>,
    /// Enabled when the chosen device has them; never a reason to reject one.
    pub desired_extensions: Vec<String>,
    /// Priority order.
    pub preferred_formats: Vec<vk::SurfaceFormatKHR>,
    /// Priority order.
    pub preferred_present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            name: None,
            minimum_version: ApiVersion::V1_0,
            preferred_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            transfer: QueuePreference::None,
            compute: QueuePreference::None,
            required_memory: 0,
            features: FeatureRequest::default(),
            required_extensions: Vec::new(),
            desired_extensions: Vec::new(),
            preferred_formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            preferred_present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        }
    }
}

bitflags! {
    /// Hard constraints a candidate failed.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Rejections: u16 {
        const NAME = 1 << 0;
        const VERSION = 1 << 1;
        const TRANSFER_QUEUE = 1 << 2;
        const COMPUTE_QUEUE = 1 << 3;
        const FEATURES = 1 << 4;
        const EXTENSIONS = 1 << 5;
        const GRAPHICS_QUEUE = 1 << 6;
        const PRESENTATION = 1 << 7;
        const MEMORY = 1 << 8;
    }
}

impl fmt::Display for Rejections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        f.write_str(&names.join(", ").to_lowercase())
    }
}

/// Why a candidate is or is not acceptable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    pub rejections: Rejections,
    pub feature_gaps: Vec<FeatureGap>,
    pub missing_extensions: Vec<String>,
}

impl Verdict {
    pub fn is_suitable(&self) -> bool {
        self.rejections.is_empty()
    }
}

/// The chosen device and everything needed to create it.
#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    /// `min(instance version, device version)`.
    pub runtime_version: ApiVersion,
    pub graphics_queue: u32,
    pub present_queue: Option<u32>,
    pub transfer_queue: Option<u32>,
    pub compute_queue: Option<u32>,
    pub extensions: Vec<String>,
    /// Request-mode chain for `vkCreateDevice`.
    pub features: FeatureChain,
    pub max_device_local_heap: vk::DeviceSize,
}

impl SelectedDevice {
    /// Distinct queue families to request at device creation, ascending.
    pub fn unique_queue_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = [
            Some(self.graphics_queue),
            self.present_queue,
            self.transfer_queue,
            self.compute_queue,
        ]
        .into_iter()
        .flatten()
        .collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

pub fn graphics_family(families: &[QueueFamily]) -> Option<u32> {
    families
        .iter()
        .find(|f| f.supports(vk::QueueFlags::GRAPHICS))
        .map(|f| f.index)
}

pub fn present_family(families: &[QueueFamily]) -> Option<u32> {
    families.iter().find(|f| f.count > 0 && f.present).map(|f| f.index)
}

/// `wanted` is TRANSFER or COMPUTE; `other` is the remaining one of the two.
fn dedicated_family(families: &[QueueFamily], wanted: vk::QueueFlags, other: vk::QueueFlags) -> Option<u32> {
    families
        .iter()
        .find(|f| f.supports(wanted) && !f.flags.intersects(vk::QueueFlags::GRAPHICS | other))
        .map(|f| f.index)
}

fn separate_family(families: &[QueueFamily], wanted: vk::QueueFlags, other: vk::QueueFlags) -> Option<u32> {
    let non_graphics = || {
        families
            .iter()
            .filter(move |f| f.supports(wanted) && !f.flags.contains(vk::QueueFlags::GRAPHICS))
    };
    non_graphics()
        .find(|f| !f.flags.contains(other))
        .or_else(|| non_graphics().next())
        .map(|f| f.index)
}

fn family_for(
    families: &[QueueFamily],
    preference: QueuePreference,
    wanted: vk::QueueFlags,
    other: vk::QueueFlags,
) -> Option<u32> {
    match preference {
        QueuePreference::None => None,
        QueuePreference::Dedicated => dedicated_family(families, wanted, other),
        QueuePreference::Separate => separate_family(families, wanted, other),
    }
}

pub fn transfer_family(families: &[QueueFamily], preference: QueuePreference) -> Option<u32> {
    family_for(families, preference, vk::QueueFlags::TRANSFER, vk::QueueFlags::COMPUTE)
}

pub fn compute_family(families: &[QueueFamily], preference: QueuePreference) -> Option<u32> {
    family_for(families, preference, vk::QueueFlags::COMPUTE, vk::QueueFlags::TRANSFER)
}

fn hard_extensions<'a>(criteria: &'a SelectionCriteria, presenting: bool) -> impl Iterator<Item = &'a str> {
    criteria
        .required_extensions
        .iter()
        .map(String::as_str)
        .chain(presenting.then_some(SWAPCHAIN_EXTENSION))
}

/// Checks one candidate against every hard constraint.
pub fn evaluate(snapshot: &CapabilitySnapshot, criteria: &SelectionCriteria, presenting: bool) -> Verdict {
    let mut verdict = Verdict::default();
    let families = &snapshot.queue_families;

    if criteria.name.as_ref().is_some_and(|name| *name != snapshot.name) {
        verdict.rejections |= Rejections::NAME;
    }
    if snapshot.api_version < criteria.minimum_version {
        verdict.rejections |= Rejections::VERSION;
    }
    if criteria.transfer != QueuePreference::None && transfer_family(families, criteria.transfer).is_none() {
        verdict.rejections |= Rejections::TRANSFER_QUEUE;
    }
    if criteria.compute != QueuePreference::None && compute_family(families, criteria.compute).is_none() {
        verdict.rejections |= Rejections::COMPUTE_QUEUE;
    }

    verdict.feature_gaps = snapshot.features.missing(&criteria.features);
    if !verdict.feature_gaps.is_empty() {
        verdict.rejections |= Rejections::FEATURES;
    }

    let mut missing: Vec<String> = hard_extensions(criteria, presenting)
        .filter(|ext| !snapshot.has_extension(ext))
        .map(str::to_owned)
        .collect();
    missing.dedup();
    if !missing.is_empty() {
        verdict.rejections |= Rejections::EXTENSIONS;
    }
    verdict.missing_extensions = missing;

    if graphics_family(families).is_none() {
        verdict.rejections |= Rejections::GRAPHICS_QUEUE;
    }
    if presenting {
        let compatible = snapshot
            .surface
            .as_ref()
            .is_some_and(|s| !s.formats.is_empty() && !s.present_modes.is_empty());
        if present_family(families).is_none() || !compatible {
            verdict.rejections |= Rejections::PRESENTATION;
        }
    }

    let enough_memory = snapshot
        .memory_heaps
        .iter()
        .any(|h| h.device_local && h.size >= criteria.required_memory);
    if !enough_memory {
        verdict.rejections |= Rejections::MEMORY;
    }

    verdict
}

/// Candidate indices in preference order, with their verdicts. The sort is
/// stable, so enumeration order breaks ties.
pub fn rank(snapshots: &[CapabilitySnapshot], criteria: &SelectionCriteria, presenting: bool) -> Vec<(usize, Verdict)> {
    let mut ranked: Vec<(usize, Verdict)> = snapshots
        .iter()
        .enumerate()
        .map(|(i, snap)| (i, evaluate(snap, criteria, presenting)))
        .collect();
    ranked.sort_by(|(a, va), (b, vb)| {
        let (a, b) = (&snapshots[*a], &snapshots[*b]);
        vb.is_suitable()
            .cmp(&va.is_suitable())
            .then_with(|| (b.device_type == criteria.preferred_type).cmp(&(a.device_type == criteria.preferred_type)))
            .then_with(|| b.max_device_local_heap().cmp(&a.max_device_local_heap()))
            .then_with(|| b.api_version.cmp(&a.api_version))
    });
    ranked
}

/// Requested feature tiers must exist at the instance's version.
pub fn check_feature_tiers(criteria: &SelectionCriteria, instance_version: ApiVersion) -> Result<()> {
    match criteria
        .features
        .requested_tiers()
        .into_iter()
        .find(|tier| !tier.supported_by(instance_version))
    {
        Some(tier) => Err(Error::FeatureTierUnavailable {
            tier,
            runtime: instance_version,
        }),
        None => Ok(()),
    }
}

/// Required, then available desired, then swapchain and portability subset;
/// duplicates dropped, first occurrence kept.
pub fn finalize_extensions(
    snapshot: &CapabilitySnapshot,
    criteria: &SelectionCriteria,
    presenting: bool,
) -> Vec<String> {
    let desired = criteria
        .desired_extensions
        .iter()
        .map(String::as_str)
        .filter(|ext| snapshot.has_extension(ext));
    let portability = snapshot
        .has_extension(PORTABILITY_SUBSET_EXTENSION)
        .then_some(PORTABILITY_SUBSET_EXTENSION);

    let mut out: Vec<String> = Vec::new();
    for ext in hard_extensions(criteria, presenting).chain(desired).chain(portability) {
        if !out.iter().any(|e| e == ext) {
            out.push(ext.to_owned());
        }
    }
    out
}

/// Picks the best suitable candidate and resolves its queues and extensions.
pub fn select(
    snapshots: &[CapabilitySnapshot],
    criteria: &SelectionCriteria,
    presenting: bool,
    instance_version: ApiVersion,
) -> Result<SelectedDevice> {
    check_feature_tiers(criteria, instance_version)?;

    let ranked = rank(snapshots, criteria, presenting);
    let Some((index, verdict)) = ranked.first() else {
        return Err(Error::NoSuitableDevice);
    };
    if !verdict.is_suitable() {
        return Err(Error::NoSuitableDevice);
    }
    let snap = &snapshots[*index];
    let families = &snap.queue_families;

    // Suitability guarantees the graphics family (and present family when presenting).
    let graphics_queue = graphics_family(families).ok_or(Error::NoSuitableDevice)?;
    let present_queue = if presenting { present_family(families) } else { None };

    Ok(SelectedDevice {
        physical_device: snap.physical_device,
        name: snap.name.clone(),
        device_type: snap.device_type,
        runtime_version: snap.runtime_version(),
        graphics_queue,
        present_queue,
        transfer_queue: transfer_family(families, criteria.transfer),
        compute_queue: compute_family(families, criteria.compute),
        extensions: finalize_extensions(snap, criteria, presenting),
        features: FeatureChain::request(snap.runtime_version(), &criteria.features),
        max_device_local_heap: snap.max_device_local_heap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeDevice, FakeDriver};
    use crate::feature_chain::FeatureTier;

    const GIB: vk::DeviceSize = 1 << 30;

    fn snapshots(driver: &FakeDriver, presenting: bool) -> Vec<CapabilitySnapshot> {
        let surface = presenting.then(|| driver.surface_handle());
        (0..driver.devices.len())
            .map(|i| {
                CapabilitySnapshot::gather(driver, driver.physical_device(i), surface, driver.instance_version, None)
                    .unwrap()
            })
            .collect()
    }

    fn family(index: u32, flags: vk::QueueFlags) -> QueueFamily {
        QueueFamily {
            index,
            count: 1,
            flags,
            present: false,
        }
    }

    #[test]
    fn discrete_preferred_over_integrated() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![
                FakeDevice::integrated("iGPU").heap(2 * GIB),
                FakeDevice::discrete("dGPU").heap(8 * GIB),
            ],
        );
        let snaps = snapshots(&driver, true);
        let chosen = select(&snaps, &SelectionCriteria::default(), true, ApiVersion::V1_3).unwrap();
        assert_eq!(chosen.name, "dGPU");
        assert_eq!(chosen.physical_device, driver.physical_device(1));
        assert_eq!(chosen.present_queue, Some(0));
        assert_eq!(chosen.max_device_local_heap, 8 * GIB);
    }

    #[test]
    fn missing_required_extension_rejects_only_candidate() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![FakeDevice::discrete("A").extensions(&["VK_KHR_swapchain"])],
        );
        let snaps = snapshots(&driver, true);
        let criteria = SelectionCriteria {
            required_extensions: vec!["VK_KHR_ray_tracing_pipeline".to_owned()],
            ..Default::default()
        };
        let err = select(&snaps, &criteria, true, ApiVersion::V1_3).unwrap_err();
        assert!(matches!(err, Error::NoSuitableDevice));

        let verdict = evaluate(&snaps[0], &criteria, true);
        assert_eq!(verdict.rejections, Rejections::EXTENSIONS);
        assert_eq!(verdict.missing_extensions, vec!["VK_KHR_ray_tracing_pipeline".to_owned()]);
    }

    #[test]
    fn selection_is_deterministic() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![
                FakeDevice::discrete("A"),
                FakeDevice::discrete("B"),
                FakeDevice::integrated("C").heap(32 * GIB),
            ],
        );
        let snaps = snapshots(&driver, true);
        let criteria = SelectionCriteria::default();
        let first = select(&snaps, &criteria, true, ApiVersion::V1_3).unwrap();
        for _ in 0..8 {
            let again = select(&snaps, &criteria, true, ApiVersion::V1_3).unwrap();
            assert_eq!(again.physical_device, first.physical_device);
            assert_eq!(again.unique_queue_families(), first.unique_queue_families());
        }
        // equal candidates: enumeration order wins
        assert_eq!(first.name, "A");
    }

    #[test]
    fn adding_a_requirement_never_admits_a_device() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![
                FakeDevice::discrete("A").heap(2 * GIB),
                FakeDevice::discrete("B").missing_feature(FeatureTier::Vulkan12, 3),
                FakeDevice::integrated("C").version(ApiVersion::V1_1),
            ],
        );
        let snaps = snapshots(&driver, true);
        let base = SelectionCriteria::default();
        let stricter = [
            SelectionCriteria {
                required_memory: 4 * GIB,
                ..base.clone()
            },
            SelectionCriteria {
                minimum_version: ApiVersion::V1_2,
                ..base.clone()
            },
            SelectionCriteria {
                features: FeatureRequest::default()
                    .vulkan12(vk::PhysicalDeviceVulkan12Features::default().descriptor_indexing(true)),
                ..base.clone()
            },
            SelectionCriteria {
                required_extensions: vec!["VK_EXT_mesh_shader".to_owned()],
                ..base.clone()
            },
        ];
        for snap in &snaps {
            let loose = evaluate(snap, &base, true).is_suitable();
            for criteria in &stricter {
                if evaluate(snap, criteria, true).is_suitable() {
                    assert!(loose, "{} admitted only under a stricter criteria", snap.name);
                }
            }
        }
    }

    #[test]
    fn requested_tier_above_instance_is_a_configuration_error() {
        let driver = FakeDriver::new(ApiVersion::V1_2, vec![FakeDevice::discrete("A")]);
        let snaps = snapshots(&driver, false);
        let criteria = SelectionCriteria {
            features: FeatureRequest::default()
                .vulkan13(vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true)),
            ..Default::default()
        };
        let err = select(&snaps, &criteria, false, ApiVersion::V1_2).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn surface_without_present_modes_is_rejected() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![
                FakeDevice::discrete("no modes").heap(8 * GIB).present_modes(&[]),
                FakeDevice::integrated("iGPU"),
            ],
        );
        let snaps = snapshots(&driver, true);
        assert_eq!(evaluate(&snaps[0], &SelectionCriteria::default(), true).rejections, Rejections::PRESENTATION);
        let chosen = select(&snaps, &SelectionCriteria::default(), true, ApiVersion::V1_3).unwrap();
        assert_eq!(chosen.name, "iGPU");
    }

    #[test]
    fn headless_skips_presentation() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![FakeDevice::discrete("A").extensions(&[]).present_on(&[])],
        );
        let snaps = snapshots(&driver, false);
        let chosen = select(&snaps, &SelectionCriteria::default(), false, ApiVersion::V1_3).unwrap();
        assert_eq!(chosen.present_queue, None);
        assert!(chosen.extensions.is_empty());
    }

    #[test]
    fn extensions_are_finalized_in_order_without_duplicates() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![FakeDevice::discrete("A").extensions(&[
                "VK_KHR_swapchain",
                "VK_KHR_portability_subset",
                "VK_EXT_memory_budget",
            ])],
        );
        let snaps = snapshots(&driver, true);
        let criteria = SelectionCriteria {
            required_extensions: vec!["VK_KHR_swapchain".to_owned()],
            desired_extensions: vec!["VK_EXT_memory_budget".to_owned(), "VK_EXT_mesh_shader".to_owned()],
            ..Default::default()
        };
        let chosen = select(&snaps, &criteria, true, ApiVersion::V1_3).unwrap();
        assert_eq!(
            chosen.extensions,
            vec!["VK_KHR_swapchain", "VK_EXT_memory_budget", "VK_KHR_portability_subset"]
        );
    }

    #[test]
    fn queue_resolution_picks_first_matching_family() {
        let g = vk::QueueFlags::GRAPHICS;
        let c = vk::QueueFlags::COMPUTE;
        let t = vk::QueueFlags::TRANSFER;
        let families = [
            family(0, g | c | t),
            family(1, c | t),
            family(2, t),
            family(3, c),
        ];
        assert_eq!(graphics_family(&families), Some(0));
        assert_eq!(transfer_family(&families, QueuePreference::Dedicated), Some(2));
        assert_eq!(compute_family(&families, QueuePreference::Dedicated), Some(3));
        assert_eq!(transfer_family(&families, QueuePreference::Separate), Some(2));
        assert_eq!(compute_family(&families, QueuePreference::Separate), Some(3));
        assert_eq!(transfer_family(&families, QueuePreference::None), None);

        // only a combined async family: separate falls back to it, dedicated fails
        let families = [family(0, g | c | t), family(1, c | t)];
        assert_eq!(transfer_family(&families, QueuePreference::Separate), Some(1));
        assert_eq!(transfer_family(&families, QueuePreference::Dedicated), None);
    }

    #[test]
    fn queue_families_are_unique_and_ascending() {
        let driver = FakeDriver::new(
            ApiVersion::V1_3,
            vec![FakeDevice::discrete("A")
                .queue_families(&[
                    (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 16),
                    (vk::QueueFlags::TRANSFER, 2),
                ])
                .present_on(&[0])],
        );
        let snaps = snapshots(&driver, true);
        let criteria = SelectionCriteria {
            transfer: QueuePreference::Dedicated,
            ..Default::default()
        };
        let chosen = select(&snaps, &criteria, true, ApiVersion::V1_3).unwrap();
        assert_eq!(chosen.transfer_queue, Some(1));
        assert_eq!(chosen.unique_queue_families(), vec![0, 1]);
    }
}
