// SPDX-License-Identifier: CEPL-1.0
//! [`ApiVersion`] is a thin newtype over the packed Vulkan version word.

use ash::vk;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A packed Vulkan API version number.
///
/// Ordering compares major, minor and patch; the variant bits are ignored.
#[derive(Clone, Copy, Debug)]
pub struct ApiVersion(u32);

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion(vk::API_VERSION_1_0);
    pub const V1_1: ApiVersion = ApiVersion(vk::API_VERSION_1_1);
    pub const V1_2: ApiVersion = ApiVersion(vk::API_VERSION_1_2);
    pub const V1_3: ApiVersion = ApiVersion(vk::API_VERSION_1_3);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(0, major, minor, patch))
    }

    pub const fn major(self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub const fn minor(self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub const fn patch(self) -> u32 {
        vk::api_version_patch(self.0)
    }

    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Major and minor only; features are tied to a minor revision, not a patch.
    pub const fn without_patch(self) -> Self {
        Self::new(self.major(), self.minor(), 0)
    }

    fn key(self) -> (u32, u32, u32) {
        (self.major(), self.minor(), self.patch())
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl PartialEq for ApiVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ApiVersion {}

impl Hash for ApiVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ignores_variant_bits() {
        let plain = ApiVersion::from_raw(vk::make_api_version(0, 1, 2, 0));
        let variant = ApiVersion::from_raw(vk::make_api_version(3, 1, 2, 0));
        assert_eq!(plain.cmp(&variant), Ordering::Equal);
        assert_eq!(plain, variant);
        assert!(ApiVersion::new(1, 3, 0) > ApiVersion::new(1, 2, 198));
    }

    #[test]
    fn display_is_dotted() {
        assert_eq!(ApiVersion::new(1, 3, 275).to_string(), "1.3.275");
        assert_eq!(ApiVersion::new(1, 3, 275).without_patch(), ApiVersion::V1_3);
    }
}
