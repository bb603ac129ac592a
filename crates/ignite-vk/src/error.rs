// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::feature_chain::FeatureTier;
use crate::version::ApiVersion;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad category of an [`Error`], for callers that only care about the class
/// of failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Something the caller asked for is unavailable on this system.
    Configuration,
    /// A capability query itself failed.
    Enumeration,
    /// No candidate device survived filtering.
    Selection,
    /// Surface and device cannot agree on a presentable swapchain.
    SurfaceCompatibility,
    /// Host or device allocation failure.
    ResourceExhaustion,
    /// A create call failed for some other driver reason.
    Creation,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not load Vulkan: {0}")]
    Loading(String),
    #[error("Vulkan {found} is older than the required {required}")]
    VersionTooLow {
        found: ApiVersion,
        required: ApiVersion,
    },
    #[error("missing instance extensions: {0:?}")]
    MissingInstanceExtensions(Vec<String>),
    #[error("missing instance layers: {0:?}")]
    MissingLayers(Vec<String>),
    #[error("{tier} features were requested but the instance only supports {runtime}")]
    FeatureTierUnavailable { tier: FeatureTier, runtime: ApiVersion },
    #[error("{call} failed: {result}")]
    Query {
        call: &'static str,
        result: vk::Result,
    },
    #[error("no suitable physical device")]
    NoSuitableDevice,
    #[error("surface reports no supported formats")]
    NoSurfaceFormats,
    #[error("none of the requested image usages {requested:?} are supported (supported: {supported:?})")]
    UnsupportedImageUsage {
        requested: vk::ImageUsageFlags,
        supported: vk::ImageUsageFlags,
    },
    #[error("a swapchain needs a surface, but the context was built headless")]
    NoSurface,
    #[error("{call}: out of memory ({result})")]
    OutOfMemory {
        call: &'static str,
        result: vk::Result,
    },
    #[error("{what} failed: {result}")]
    Creation {
        what: &'static str,
        result: vk::Result,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Loading(_)
            | Error::VersionTooLow { .. }
            | Error::MissingInstanceExtensions(_)
            | Error::MissingLayers(_)
            | Error::FeatureTierUnavailable { .. } => ErrorKind::Configuration,
            Error::Query { .. } => ErrorKind::Enumeration,
            Error::NoSuitableDevice => ErrorKind::Selection,
            Error::NoSurfaceFormats | Error::UnsupportedImageUsage { .. } | Error::NoSurface => {
                ErrorKind::SurfaceCompatibility
            }
            Error::OutOfMemory { .. } => ErrorKind::ResourceExhaustion,
            Error::Creation { .. } => ErrorKind::Creation,
        }
    }

    /// Maps a failed query call. Allocation failures become [`Error::OutOfMemory`].
    pub(crate) fn query(call: &'static str) -> impl FnOnce(vk::Result) -> Error {
        move |result| match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Error::OutOfMemory { call, result }
            }
            _ => Error::Query { call, result },
        }
    }

    /// Maps a failed create call. Allocation failures become [`Error::OutOfMemory`].
    pub(crate) fn create(what: &'static str) -> impl FnOnce(vk::Result) -> Error {
        move |result| match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Error::OutOfMemory { call: what, result }
            }
            _ => Error::Creation { what, result },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_failures_are_resource_exhaustion() {
        let err = Error::query("vkEnumeratePhysicalDevices")(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);

        let err = Error::create("vkCreateDevice")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
    }

    #[test]
    fn other_failures_keep_their_category() {
        let err = Error::query("vkEnumerateDeviceExtensionProperties")(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert_eq!(err.kind(), ErrorKind::Enumeration);

        let err = Error::create("vkCreateDevice")(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.kind(), ErrorKind::Creation);
        assert_eq!(Error::NoSuitableDevice.kind(), ErrorKind::Selection);
    }
}
