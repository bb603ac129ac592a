// SPDX-License-Identifier: CEPL-1.0
//! Revision-gated feature chains.
//!
//! A [`FeatureChain`] is an ordered list of tagged feature blocks, one per
//! revision tier the runtime supports, optionally terminated by a caller
//! extension block. It is only linked into a `pNext` chain for the duration of
//! a single driver call (see [`FeatureChain::with_linked`]), so no stale
//! pointers outlive the call that needed them.

use ash::vk;
use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;

use crate::version::ApiVersion;

/// `sType` + `pNext`.
const HEADER: usize = size_of::<vk::BaseOutStructure<'static>>();

const CORE10_FLAGS: usize = size_of::<vk::PhysicalDeviceFeatures>() / size_of::<vk::Bool32>();
const VULKAN11_FLAGS: usize = 12;
const VULKAN12_FLAGS: usize = 47;
const VULKAN13_FLAGS: usize = 15;

/// Largest extension block [`ExtensionFeatures`] can carry.
pub const MAX_EXTENSION_FLAGS: usize = 256;

const _: () = {
    assert!(HEADER + VULKAN11_FLAGS * 4 <= size_of::<vk::PhysicalDeviceVulkan11Features<'static>>());
    assert!(HEADER + VULKAN12_FLAGS * 4 <= size_of::<vk::PhysicalDeviceVulkan12Features<'static>>());
    assert!(HEADER + VULKAN13_FLAGS * 4 <= size_of::<vk::PhysicalDeviceVulkan13Features<'static>>());
};

/// A capability revision that owns a block of feature flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureTier {
    Core10,
    Vulkan11,
    Vulkan12,
    Vulkan13,
}

impl FeatureTier {
    pub const ALL: [FeatureTier; 4] = [
        FeatureTier::Core10,
        FeatureTier::Vulkan11,
        FeatureTier::Vulkan12,
        FeatureTier::Vulkan13,
    ];

    /// Lowest runtime revision at which this tier's block may be chained.
    /// `VkPhysicalDeviceVulkan11Features` was introduced with 1.2.
    pub fn min_version(self) -> ApiVersion {
        match self {
            FeatureTier::Core10 => ApiVersion::V1_0,
            FeatureTier::Vulkan11 | FeatureTier::Vulkan12 => ApiVersion::V1_2,
            FeatureTier::Vulkan13 => ApiVersion::V1_3,
        }
    }

    pub fn supported_by(self, runtime: ApiVersion) -> bool {
        runtime.without_patch() >= self.min_version()
    }
}

impl fmt::Display for FeatureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeatureTier::Core10 => "Vulkan 1.0 core",
            FeatureTier::Vulkan11 => "Vulkan 1.1",
            FeatureTier::Vulkan12 => "Vulkan 1.2",
            FeatureTier::Vulkan13 => "Vulkan 1.3",
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RawFeatureBlock {
    s_type: vk::StructureType,
    p_next: *mut c_void,
    flags: [vk::Bool32; MAX_EXTENSION_FLAGS],
}

// SAFETY: RawFeatureBlock starts with the sType/pNext header every
// VkPhysicalDeviceFeatures2 extension begins with, and its sType is always
// copied from a real extension structure.
unsafe impl vk::ExtendsPhysicalDeviceFeatures2 for RawFeatureBlock {}

/// A type-erased copy of one extension feature structure (for example
/// `VkPhysicalDeviceRayTracingPipelineFeaturesKHR`).
#[derive(Clone)]
pub struct ExtensionFeatures {
    raw: Box<RawFeatureBlock>,
    len: usize,
}

impl ExtensionFeatures {
    /// Builds a block from its structure type and flag values, in declaration order.
    ///
    /// # Panics
    /// Panics if more than [`MAX_EXTENSION_FLAGS`] flags are given.
    pub fn from_flags(s_type: vk::StructureType, flags: impl IntoIterator<Item = bool>) -> Self {
        let mut block = Self::empty(s_type, 0);
        for (i, on) in flags.into_iter().enumerate() {
            assert!(i < MAX_EXTENSION_FLAGS, "extension feature block too large");
            block.raw.flags[i] = vk::Bool32::from(on);
            block.len = i + 1;
        }
        block
    }

    /// Copies an ash extension feature structure.
    ///
    /// # Safety
    /// `T` must be a Vulkan feature structure laid out as the `sType`/`pNext`
    /// header followed by exactly `flag_count` `VkBool32` members.
    pub unsafe fn from_struct<T: vk::ExtendsPhysicalDeviceFeatures2>(
        features: &T,
        flag_count: usize,
    ) -> Self {
        assert!(flag_count <= MAX_EXTENSION_FLAGS, "extension feature block too large");
        let base = (features as *const T).cast::<u8>();
        // SAFETY: the caller guarantees the header + flag_count layout.
        let (s_type, flags) = unsafe {
            let s_type = (*base.cast::<vk::BaseOutStructure<'_>>()).s_type;
            let flags = std::slice::from_raw_parts(base.add(HEADER).cast::<vk::Bool32>(), flag_count);
            (s_type, flags)
        };
        let mut block = Self::empty(s_type, flag_count);
        block.raw.flags[..flag_count].copy_from_slice(flags);
        block
    }

    fn empty(s_type: vk::StructureType, len: usize) -> Self {
        Self {
            raw: Box::new(RawFeatureBlock {
                s_type,
                p_next: std::ptr::null_mut(),
                flags: [vk::FALSE; MAX_EXTENSION_FLAGS],
            }),
            len,
        }
    }

    /// Same structure type and size with every flag cleared, ready to be filled by a query.
    pub fn zeroed_like(&self) -> Self {
        Self::empty(self.raw.s_type, self.len)
    }

    pub fn s_type(&self) -> vk::StructureType {
        self.raw.s_type
    }

    pub fn flags(&self) -> &[vk::Bool32] {
        &self.raw.flags[..self.len]
    }

    #[cfg(test)]
    fn flags_mut(&mut self) -> &mut [vk::Bool32] {
        &mut self.raw.flags[..self.len]
    }
}

impl fmt::Debug for ExtensionFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionFeatures")
            .field("s_type", &self.raw.s_type)
            .field("flags", &self.flags())
            .finish()
    }
}

/// One block of a [`FeatureChain`].
#[derive(Clone)]
pub enum FeatureNode {
    Core10(vk::PhysicalDeviceFeatures),
    Vulkan11(vk::PhysicalDeviceVulkan11Features<'static>),
    Vulkan12(vk::PhysicalDeviceVulkan12Features<'static>),
    Vulkan13(vk::PhysicalDeviceVulkan13Features<'static>),
    Extension(ExtensionFeatures),
}

/// Views `count` consecutive `VkBool32` members starting `offset` bytes into `value`.
///
/// # Safety
/// `value` must hold `count` `VkBool32` fields contiguously from `offset`.
unsafe fn bools<T>(value: &T, offset: usize, count: usize) -> &[vk::Bool32] {
    // SAFETY: forwarded to the caller.
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>().add(offset).cast(), count) }
}

/// # Safety
/// Same as [`bools`].
#[cfg(test)]
unsafe fn bools_mut<T>(value: &mut T, offset: usize, count: usize) -> &mut [vk::Bool32] {
    // SAFETY: forwarded to the caller.
    unsafe { std::slice::from_raw_parts_mut((value as *mut T).cast::<u8>().add(offset).cast(), count) }
}

impl FeatureNode {
    fn zeroed(tier: FeatureTier) -> Self {
        match tier {
            FeatureTier::Core10 => FeatureNode::Core10(vk::PhysicalDeviceFeatures::default()),
            FeatureTier::Vulkan11 => FeatureNode::Vulkan11(Default::default()),
            FeatureTier::Vulkan12 => FeatureNode::Vulkan12(Default::default()),
            FeatureTier::Vulkan13 => FeatureNode::Vulkan13(Default::default()),
        }
    }

    /// `None` for the caller extension block.
    pub fn tier(&self) -> Option<FeatureTier> {
        match self {
            FeatureNode::Core10(_) => Some(FeatureTier::Core10),
            FeatureNode::Vulkan11(_) => Some(FeatureTier::Vulkan11),
            FeatureNode::Vulkan12(_) => Some(FeatureTier::Vulkan12),
            FeatureNode::Vulkan13(_) => Some(FeatureTier::Vulkan13),
            FeatureNode::Extension(_) => None,
        }
    }

    pub fn flags(&self) -> &[vk::Bool32] {
        // SAFETY: every core block is a run of VkBool32 members, after the
        // sType/pNext header for the versioned blocks; counts are checked
        // against the struct sizes at compile time.
        unsafe {
            match self {
                FeatureNode::Core10(f) => bools(f, 0, CORE10_FLAGS),
                FeatureNode::Vulkan11(f) => bools(f, HEADER, VULKAN11_FLAGS),
                FeatureNode::Vulkan12(f) => bools(f, HEADER, VULKAN12_FLAGS),
                FeatureNode::Vulkan13(f) => bools(f, HEADER, VULKAN13_FLAGS),
                FeatureNode::Extension(e) => e.flags(),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn flags_mut(&mut self) -> &mut [vk::Bool32] {
        // SAFETY: see `flags`.
        unsafe {
            match self {
                FeatureNode::Core10(f) => bools_mut(f, 0, CORE10_FLAGS),
                FeatureNode::Vulkan11(f) => bools_mut(f, HEADER, VULKAN11_FLAGS),
                FeatureNode::Vulkan12(f) => bools_mut(f, HEADER, VULKAN12_FLAGS),
                FeatureNode::Vulkan13(f) => bools_mut(f, HEADER, VULKAN13_FLAGS),
                FeatureNode::Extension(e) => e.flags_mut(),
            }
        }
    }

    pub fn enabled_count(&self) -> usize {
        self.flags().iter().filter(|&&b| b == vk::TRUE).count()
    }

    fn unlink(&mut self) {
        match self {
            FeatureNode::Core10(_) => {}
            FeatureNode::Vulkan11(f) => f.p_next = std::ptr::null_mut(),
            FeatureNode::Vulkan12(f) => f.p_next = std::ptr::null_mut(),
            FeatureNode::Vulkan13(f) => f.p_next = std::ptr::null_mut(),
            FeatureNode::Extension(e) => e.raw.p_next = std::ptr::null_mut(),
        }
    }
}

impl fmt::Debug for FeatureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tier() {
            Some(tier) => write!(f, "{tier} ({} enabled)", self.enabled_count()),
            None => write!(f, "{:?}", self.flags()),
        }
    }
}

/// Per-tier feature flags a caller needs.
///
/// ```ignore
/// let request = FeatureRequest::default()
///     .core(vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true))
///     .vulkan12(vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true));
/// ```
#[derive(Clone, Debug, Default)]
pub struct FeatureRequest {
    core: Option<vk::PhysicalDeviceFeatures>,
    vulkan11: Option<vk::PhysicalDeviceVulkan11Features<'static>>,
    vulkan12: Option<vk::PhysicalDeviceVulkan12Features<'static>>,
    vulkan13: Option<vk::PhysicalDeviceVulkan13Features<'static>>,
    extension: Option<ExtensionFeatures>,
}

impl FeatureRequest {
    pub fn core(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.core = Some(features);
        self
    }

    pub fn vulkan11(mut self, mut features: vk::PhysicalDeviceVulkan11Features<'static>) -> Self {
        features.p_next = std::ptr::null_mut();
        self.vulkan11 = Some(features);
        self
    }

    pub fn vulkan12(mut self, mut features: vk::PhysicalDeviceVulkan12Features<'static>) -> Self {
        features.p_next = std::ptr::null_mut();
        self.vulkan12 = Some(features);
        self
    }

    pub fn vulkan13(mut self, mut features: vk::PhysicalDeviceVulkan13Features<'static>) -> Self {
        features.p_next = std::ptr::null_mut();
        self.vulkan13 = Some(features);
        self
    }

    pub fn extension(mut self, features: ExtensionFeatures) -> Self {
        self.extension = Some(features);
        self
    }

    fn node(&self, tier: FeatureTier) -> Option<FeatureNode> {
        match tier {
            FeatureTier::Core10 => self.core.map(FeatureNode::Core10),
            FeatureTier::Vulkan11 => self.vulkan11.map(FeatureNode::Vulkan11),
            FeatureTier::Vulkan12 => self.vulkan12.map(FeatureNode::Vulkan12),
            FeatureTier::Vulkan13 => self.vulkan13.map(FeatureNode::Vulkan13),
        }
    }

    /// Tiers with at least one flag set, ascending.
    pub fn requested_tiers(&self) -> Vec<FeatureTier> {
        FeatureTier::ALL
            .into_iter()
            .filter(|&tier| self.node(tier).is_some_and(|n| n.enabled_count() > 0))
            .collect()
    }

    pub fn highest_tier(&self) -> Option<FeatureTier> {
        self.requested_tiers().last().copied()
    }

    pub fn extension_template(&self) -> Option<&ExtensionFeatures> {
        self.extension.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.requested_tiers().is_empty()
            && self
                .extension
                .as_ref()
                .map_or(true, |e| e.flags().iter().all(|&b| b != vk::TRUE))
    }
}

/// A requested feature a device does not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureGap {
    TierUnavailable(FeatureTier),
    Flag { tier: FeatureTier, index: usize },
    ExtensionUnavailable(vk::StructureType),
    ExtensionFlag { s_type: vk::StructureType, index: usize },
}

impl fmt::Display for FeatureGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureGap::TierUnavailable(tier) => write!(f, "{tier} features not reported"),
            FeatureGap::Flag { tier, index } => write!(f, "{tier} feature #{index}"),
            FeatureGap::ExtensionUnavailable(s_type) => write!(f, "extension block {s_type:?} not reported"),
            FeatureGap::ExtensionFlag { s_type, index } => write!(f, "{s_type:?} feature #{index}"),
        }
    }
}

fn unset_requested<'a>(requested: &'a [vk::Bool32], reported: &[vk::Bool32]) -> impl Iterator<Item = usize> + 'a {
    let reported = reported.to_vec();
    requested
        .iter()
        .enumerate()
        .filter(move |&(i, &want)| want == vk::TRUE && reported.get(i).copied() != Some(vk::TRUE))
        .map(|(i, _)| i)
}

/// Ordered, revision-bounded feature blocks for a single query or request.
#[derive(Clone, Debug, Default)]
pub struct FeatureChain {
    runtime: ApiVersion,
    nodes: Vec<FeatureNode>,
}

impl FeatureChain {
    /// Zeroed blocks for every tier `runtime` supports, ready to be filled by
    /// the driver. `template` adds a zeroed block of the same extension type.
    pub fn query(runtime: ApiVersion, template: Option<&ExtensionFeatures>) -> Self {
        let mut nodes: Vec<FeatureNode> = FeatureTier::ALL
            .into_iter()
            .filter(|tier| tier.supported_by(runtime))
            .map(FeatureNode::zeroed)
            .collect();
        if let Some(template) = template.filter(|_| runtime.without_patch() >= ApiVersion::V1_1) {
            nodes.push(FeatureNode::Extension(template.zeroed_like()));
        }
        Self { runtime, nodes }
    }

    /// The device-creation chain: one block per supported tier carrying the
    /// requested flags, the caller's extension block last. Requested tiers
    /// above `runtime` are left out.
    pub fn request(runtime: ApiVersion, request: &FeatureRequest) -> Self {
        let mut nodes: Vec<FeatureNode> = FeatureTier::ALL
            .into_iter()
            .filter(|tier| tier.supported_by(runtime))
            .map(|tier| request.node(tier).unwrap_or_else(|| FeatureNode::zeroed(tier)))
            .collect();
        if let Some(ext) = request.extension.as_ref().filter(|_| runtime.without_patch() >= ApiVersion::V1_1) {
            nodes.push(FeatureNode::Extension(ext.clone()));
        }
        Self { runtime, nodes }
    }

    pub fn runtime(&self) -> ApiVersion {
        self.runtime
    }

    pub fn nodes(&self) -> &[FeatureNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [FeatureNode] {
        &mut self.nodes
    }

    pub fn tiers(&self) -> Vec<FeatureTier> {
        self.nodes.iter().filter_map(FeatureNode::tier).collect()
    }

    pub fn node(&self, tier: FeatureTier) -> Option<&FeatureNode> {
        self.nodes.iter().find(|n| n.tier() == Some(tier))
    }

    pub fn extension(&self) -> Option<&ExtensionFeatures> {
        self.nodes.iter().find_map(|n| match n {
            FeatureNode::Extension(e) => Some(e),
            _ => None,
        })
    }

    pub fn core(&self) -> vk::PhysicalDeviceFeatures {
        match self.node(FeatureTier::Core10) {
            Some(FeatureNode::Core10(f)) => *f,
            _ => vk::PhysicalDeviceFeatures::default(),
        }
    }

    /// Whether the chain must go through `VkPhysicalDeviceFeatures2`
    /// (runtime 1.1 and up); below that only the core block exists.
    pub fn uses_features2(&self) -> bool {
        self.runtime.without_patch() >= ApiVersion::V1_1
    }

    /// Requested flags this (reported) chain does not provide.
    pub fn missing(&self, request: &FeatureRequest) -> Vec<FeatureGap> {
        let mut gaps = Vec::new();
        for tier in request.requested_tiers() {
            let Some(wanted) = request.node(tier) else { continue };
            match self.node(tier) {
                None => gaps.push(FeatureGap::TierUnavailable(tier)),
                Some(have) => gaps.extend(
                    unset_requested(wanted.flags(), have.flags()).map(|index| FeatureGap::Flag { tier, index }),
                ),
            }
        }
        if let Some(wanted) = request.extension_template() {
            if wanted.flags().iter().any(|&b| b == vk::TRUE) {
                match self.extension().filter(|e| e.s_type() == wanted.s_type()) {
                    None => gaps.push(FeatureGap::ExtensionUnavailable(wanted.s_type())),
                    Some(have) => gaps.extend(unset_requested(wanted.flags(), have.flags()).map(|index| {
                        FeatureGap::ExtensionFlag {
                            s_type: wanted.s_type(),
                            index,
                        }
                    })),
                }
            }
        }
        gaps
    }

    /// Links every block behind a `VkPhysicalDeviceFeatures2` head (core block
    /// in `features`, the rest ascending through `pNext`), runs `f`, copies the
    /// core block back and unlinks again.
    pub fn with_linked<R>(&mut self, f: impl FnOnce(&mut vk::PhysicalDeviceFeatures2<'_>) -> R) -> R {
        let core = self.core();
        let (result, core) = {
            let mut head = vk::PhysicalDeviceFeatures2::default().features(core);
            // push_next inserts right behind the head, so push in reverse.
            for node in self.nodes.iter_mut().rev() {
                head = match node {
                    FeatureNode::Core10(_) => head,
                    FeatureNode::Vulkan11(block) => head.push_next(block),
                    FeatureNode::Vulkan12(block) => head.push_next(block),
                    FeatureNode::Vulkan13(block) => head.push_next(block),
                    FeatureNode::Extension(e) => head.push_next(e.raw.as_mut()),
                };
            }
            let result = f(&mut head);
            (result, head.features)
        };
        for node in &mut self.nodes {
            node.unlink();
            if let FeatureNode::Core10(block) = node {
                *block = core;
            }
        }
        result
    }
}
