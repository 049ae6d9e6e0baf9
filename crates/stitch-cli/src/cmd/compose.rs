use crate::output::print_json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stitch_core::catalog::Catalog;
use stitch_core::engine::{self, ComposeJob};
use stitch_core::manifest::Manifest;
use stitch_core::{Result, StitchError};

pub struct ComposeArgs {
    pub manifest: PathBuf,
    pub output: PathBuf,
    pub template_root: PathBuf,
    pub dry_run: bool,
    pub overwrite: bool,
    pub max_seconds: u64,
}

/// Run a composition locally. Errors bubble to `main`, which maps them to
/// the documented exit codes.
pub fn run(args: ComposeArgs, json: bool) -> Result<()> {
    let data = std::fs::read(&args.manifest).map_err(|e| StitchError::FilesystemFault {
        path: args.manifest.clone(),
        reason: format!("could not read manifest: {e}"),
    })?;
    let manifest = Manifest::parse(&data)?;

    let catalog = Arc::new(Catalog::load(&args.template_root)?);
    tracing::debug!(
        templates = catalog.len(),
        snapshot = catalog.snapshot(),
        "catalog loaded"
    );

    let mut job = ComposeJob::new(manifest, &args.output);
    if args.dry_run {
        job = job.dry_run();
    }
    if args.overwrite {
        job = job.overwrite();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(engine::compose_with_timeout(
        catalog,
        job,
        args.max_seconds,
    ))?;

    if json {
        print_json(&report).map_err(|e| StitchError::FilesystemFault {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        return Ok(());
    }

    if report.dry_run {
        println!("Dry run: {} ({} templates)", report.system_name, report.templates.len());
        for node in &report.plan {
            println!("  {}:{} -> {}", node.category, node.slug, node.target);
        }
    } else {
        println!(
            "Composed {} ({} files, {} templates, {} ms)",
            report.system_name,
            report.files_written,
            report.templates.len(),
            report.duration_ms
        );
        if let Some(dir) = &report.output_dir {
            println!("  output: {}", dir.display());
        }
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

/// Resolve the template root: explicit flag, `TEMPLATE_ROOT`, then
/// `./templates`.
pub fn resolve_template_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(env_root) = std::env::var("TEMPLATE_ROOT") {
        if !env_root.is_empty() {
            return PathBuf::from(env_root);
        }
    }
    PathBuf::from("templates")
}
