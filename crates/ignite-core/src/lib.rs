// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing_subscriber::{fmt, EnvFilter};

fn install(filter: EnvFilter) {
    let _ = fmt().with_env_filter(filter).with_target(false).compact().try_init();
}

/// Filter from `RUST_LOG`.
pub fn init_tracing() {
    install(EnvFilter::from_default_env());
}

/// Like [`init_tracing`], but when `RUST_LOG` is unset the filter falls back
/// to `info` (verbose) or `warn` so bootstrap reports are visible on request.
pub fn init_tracing_verbose(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    install(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing_verbose(true);
        init_tracing();
        tracing::info!("still logging");
    }
}
