// SPDX-License-Identifier: CEPL-1.0
//! Per-device capability snapshots.

use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;

use crate::driver::Driver;
use crate::error::Result;
use crate::feature_chain::{ExtensionFeatures, FeatureChain};
use crate::version::ApiVersion;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryHeap {
    pub size: vk::DeviceSize,
    pub device_local: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub count: u32,
    pub flags: vk::QueueFlags,
    /// Can present to the snapshot's surface. Always false when headless.
    pub present: bool,
}

impl QueueFamily {
    pub fn supports(&self, flags: vk::QueueFlags) -> bool {
        self.count > 0 && self.flags.contains(flags)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitsSummary {
    pub max_image_dimension_2d: u32,
    pub max_bound_descriptor_sets: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceCompatibility {
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Everything selection needs to know about one physical device, captured once.
#[derive(Clone, Debug)]
pub struct CapabilitySnapshot {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: ApiVersion,
    pub driver_version: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub limits: LimitsSummary,
    pub memory_heaps: Vec<MemoryHeap>,
    pub extensions: BTreeSet<String>,
    pub queue_families: Vec<QueueFamily>,
    /// Query-mode chain at [`CapabilitySnapshot::runtime_version`].
    pub features: FeatureChain,
    /// `None` when gathered without a surface.
    pub surface: Option<SurfaceCompatibility>,
}

impl CapabilitySnapshot {
    /// Queries `physical_device`. Feature blocks are limited to
    /// `min(instance_version, device version)`.
    pub fn gather<D: Driver>(
        driver: &D,
        physical_device: vk::PhysicalDevice,
        surface: Option<vk::SurfaceKHR>,
        instance_version: ApiVersion,
        template: Option<&ExtensionFeatures>,
    ) -> Result<Self> {
        let props = driver.device_properties(physical_device);
        let api_version = ApiVersion::from_raw(props.api_version);
        let runtime = instance_version.min(api_version);

        let memory = driver.memory_properties(physical_device);
        let memory_heaps = memory
            .memory_heaps
            .iter()
            .take(memory.memory_heap_count as usize)
            .map(|heap| MemoryHeap {
                size: heap.size,
                device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
            })
            .collect();

        let mut queue_families: Vec<QueueFamily> = driver
            .queue_families(physical_device)
            .iter()
            .zip(0u32..)
            .map(|(family, index)| QueueFamily {
                index,
                count: family.queue_count,
                flags: family.queue_flags,
                present: false,
            })
            .collect();

        let extensions = driver.device_extensions(physical_device)?.into_iter().collect();

        let mut features = FeatureChain::query(runtime, template);
        driver.device_features(physical_device, &mut features);

        let surface = match surface {
            Some(surface) => {
                for family in &mut queue_families {
                    family.present = driver.surface_support(physical_device, family.index, surface)?;
                }
                Some(SurfaceCompatibility {
                    formats: driver.surface_formats(physical_device, surface)?,
                    present_modes: driver.surface_present_modes(physical_device, surface)?,
                })
            }
            None => None,
        };

        Ok(Self {
            physical_device,
            name: device_name(&props),
            device_type: props.device_type,
            api_version,
            driver_version: props.driver_version,
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            limits: LimitsSummary {
                max_image_dimension_2d: props.limits.max_image_dimension2_d,
                max_bound_descriptor_sets: props.limits.max_bound_descriptor_sets,
            },
            memory_heaps,
            extensions,
            queue_families,
            features,
            surface,
        })
    }

    /// The revision both the instance and this device speak.
    pub fn runtime_version(&self) -> ApiVersion {
        self.features.runtime()
    }

    pub fn max_device_local_heap(&self) -> vk::DeviceSize {
        self.memory_heaps
            .iter()
            .filter(|h| h.device_local)
            .map(|h| h.size)
            .max()
            .unwrap_or(0)
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .map(Into::into)
        .unwrap_or_default()
}
