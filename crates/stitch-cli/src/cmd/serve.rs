use anyhow::Result;
use std::path::Path;
use stitch_core::catalog::Catalog;
use stitch_server::state::ServerConfig;

/// Run the control plane. The catalog is loaded once at startup; restart to
/// pick up library edits.
pub fn run(template_root: Option<&Path>, port: u16) -> Result<()> {
    let config = ServerConfig::from_env();

    let catalog = match template_root {
        Some(root) => Catalog::load(root)?,
        None => {
            tracing::warn!("no template root configured, serving an empty catalog");
            Catalog::empty()
        }
    };
    tracing::info!(
        templates = catalog.len(),
        snapshot = catalog.snapshot(),
        "catalog loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(stitch_server::serve(catalog, config, port))
}
