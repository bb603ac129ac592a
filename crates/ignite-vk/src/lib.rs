// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan context bootstrap: device selection, revision-gated feature chains,
//! swapchain negotiation and rollback-safe resource acquisition.
//!
//! ```ignore
//! let driver = AshDriver::linked();
//! let ctx = Bootstrap::new(config).run(driver, |d, _| unsafe { d.create_surface(display, window) })?;
//! ```

mod ash_driver;
pub mod capability;
pub mod driver;
mod error;
pub mod feature_chain;
pub mod ledger;
pub mod pipeline;
pub mod report;
pub mod selection;
pub mod swapchain;
mod version;

#[cfg(test)]
mod fake;

pub use ash;
pub use ash_driver::AshDriver;
pub use capability::{CapabilitySnapshot, MemoryHeap, QueueFamily, SurfaceCompatibility};
pub use driver::{DebugMessengerInfo, Driver};
pub use error::{Error, ErrorKind, Result};
pub use feature_chain::{ExtensionFeatures, FeatureChain, FeatureGap, FeatureNode, FeatureRequest, FeatureTier};
pub use ledger::AcquisitionLedger;
pub use pipeline::{Bootstrap, BootstrapConfig, DebugMode, GpuContext, InstanceConfig, Queues};
pub use selection::{QueuePreference, Rejections, SelectedDevice, SelectionCriteria, Verdict};
pub use swapchain::{DesiredSwapchain, NegotiatedSwapchainParams, Swapchain, SurfaceReport};
pub use version::ApiVersion;
