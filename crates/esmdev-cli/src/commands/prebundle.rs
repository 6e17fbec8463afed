//! `esmdev prebundle` command implementation.

use esmdev_core::{DevConfig, DevContext};
use miette::{IntoDiagnostic, Result};
use tracing::warn;

/// Prebundle once and exit.
pub async fn run(config: DevConfig) -> Result<()> {
    let ctx = DevContext::new(config, Vec::new()).into_diagnostic()?;
    let result = ctx.prebundle().await;
    for e in ctx.close().await {
        warn!(error = %e, "close hook failed");
    }
    result.into_diagnostic()?;

    let state = ctx.optimizer().state();
    println!(
        "  Prebundled {} dependenc{} into {}",
        state.bundle_map.len(),
        if state.bundle_map.len() == 1 { "y" } else { "ies" },
        crate::display_relative(ctx.root(), &ctx.config().out_dir()),
    );
    Ok(())
}
