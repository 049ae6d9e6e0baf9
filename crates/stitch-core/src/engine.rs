use crate::catalog::Catalog;
use crate::error::{Result, StitchError};
use crate::io;
use crate::manifest::Manifest;
use crate::paths;
use crate::plan::{self, CompositionPlan, PlanNode};
use crate::render;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const DEFAULT_MAX_COMPOSE_SECONDS: u64 = 120;

// ---------------------------------------------------------------------------
// ComposeJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// One composition request. Terminal after success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeJob {
    pub id: Uuid,
    pub manifest: Manifest,
    pub output_root: PathBuf,
    pub dry_run: bool,
    pub overwrite: bool,
    pub initiated_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComposeJob {
    pub fn new(manifest: Manifest, output_root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            manifest,
            output_root: output_root.into(),
            dry_run: false,
            overwrite: false,
            initiated_at: Utc::now(),
            status: JobStatus::Queued,
            error: None,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

// ---------------------------------------------------------------------------
// CompositionReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PlannedWrite {
    pub category: String,
    pub slug: String,
    pub instance: String,
    pub target: String,
}

impl From<&PlanNode> for PlannedWrite {
    fn from(node: &PlanNode) -> Self {
        Self {
            category: node.category.to_string(),
            slug: node.slug.clone(),
            instance: node.instance.clone(),
            target: node.target.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositionReport {
    pub system_name: String,
    pub dry_run: bool,
    pub files_written: usize,
    /// Planned nodes per category.
    pub counts: BTreeMap<String, usize>,
    pub templates: Vec<String>,
    pub plan: Vec<PlannedWrite>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Staging guard
// ---------------------------------------------------------------------------

/// Removes the staging directory on drop unless the composition promoted it.
/// Keeps every failure path (including panics in tests) all-or-nothing.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

pub struct Composer {
    catalog: Arc<Catalog>,
}

impl Composer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Run a job to its terminal status. Single-threaded per job; jobs
    /// targeting the same `(output, system_name)` serialize on a host-wide
    /// advisory lock.
    pub fn run(&self, job: &mut ComposeJob, cancel: &AtomicBool) -> Result<CompositionReport> {
        job.status = JobStatus::Running;
        match self.compose(job, cancel) {
            Ok(report) => {
                job.status = JobStatus::Succeeded;
                Ok(report)
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn compose(&self, job: &ComposeJob, cancel: &AtomicBool) -> Result<CompositionReport> {
        let started = Instant::now();

        job.manifest.ensure_valid()?;
        let plan = plan::build_plan(&job.manifest, &self.catalog)?;

        if job.dry_run {
            return Ok(self.report(job, &plan, 0, None, started));
        }

        io::ensure_dir(&job.output_root)?;
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(paths::system_lock_path(&job.output_root, &job.manifest.system_name))?;
        lock_file.lock_exclusive()?;

        let result = self.stage_and_promote(job, &plan, cancel, started);
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    fn stage_and_promote(
        &self,
        job: &ComposeJob,
        plan: &CompositionPlan,
        cancel: &AtomicBool,
        started: Instant,
    ) -> Result<CompositionReport> {
        let staging = paths::staging_dir(&job.output_root, &job.id.to_string());
        io::ensure_dir(&staging)?;
        let mut guard = StagingGuard::new(staging.clone());

        let mut files_written = scaffold_root(&staging, &job.manifest)?;
        for node in &plan.nodes {
            files_written += materialize_node(&staging, node, cancel)?;
        }

        files_written += self.emit_metadata(&staging, job, plan)?;
        post_verify(&staging, plan)?;
        promote(&staging, job)?;
        guard.disarm();

        let output_dir =
            paths::final_output_dir(&job.output_root, &job.manifest.system_name);
        Ok(self.report(job, plan, files_written, Some(output_dir), started))
    }

    /// `manifest.json` preserves the accepted manifest verbatim for
    /// provenance; `system-metadata.json` is the only file allowed to differ
    /// between otherwise identical runs (it carries the timestamp).
    fn emit_metadata(
        &self,
        staging: &Path,
        job: &ComposeJob,
        plan: &CompositionPlan,
    ) -> Result<usize> {
        let manifest_json = serde_json::to_vec_pretty(&job.manifest)?;
        io::atomic_write(&staging.join(paths::MANIFEST_FILE), &manifest_json)?;

        let metadata = serde_json::json!({
            "system_name": job.manifest.system_name,
            "org": job.manifest.org,
            "composed_at": job.initiated_at.to_rfc3339(),
            "job_id": job.id,
            "tool": {
                "name": "stitch",
                "version": env!("CARGO_PKG_VERSION"),
                "catalog_snapshot": self.catalog.snapshot(),
            },
            "templates": plan.nodes.iter().map(|n| n.template_ref().to_string()).collect::<Vec<_>>(),
            "plan": plan.nodes.iter().map(PlannedWrite::from).collect::<Vec<_>>(),
        });
        io::atomic_write(
            &staging.join(paths::METADATA_FILE),
            &serde_json::to_vec_pretty(&metadata)?,
        )?;
        Ok(2)
    }

    fn report(
        &self,
        job: &ComposeJob,
        plan: &CompositionPlan,
        files_written: usize,
        output_dir: Option<PathBuf>,
        started: Instant,
    ) -> CompositionReport {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for node in &plan.nodes {
            *counts.entry(node.category.to_string()).or_default() += 1;
        }
        CompositionReport {
            system_name: job.manifest.system_name.clone(),
            dry_run: job.dry_run,
            files_written,
            counts,
            templates: plan
                .nodes
                .iter()
                .map(|n| n.template_ref().to_string())
                .collect(),
            plan: plan.nodes.iter().map(PlannedWrite::from).collect(),
            warnings: plan.warnings.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            output_dir,
        }
    }
}

// ---------------------------------------------------------------------------
// Staging steps
// ---------------------------------------------------------------------------

/// Root skeleton every composed system gets: standard directories, a README,
/// and a docker-compose stub for the service mesh.
fn scaffold_root(staging: &Path, manifest: &Manifest) -> Result<usize> {
    for dir in ["backend", "frontend", "agents", "business", "docs", "scripts"] {
        io::ensure_dir(&staging.join(dir))?;
    }

    let readme = format!(
        "# {name}\n\nComposed system for `{org}`.\n\n\
         The layout below was materialized from the library manifest in\n\
         `manifest.json`; `system-metadata.json` records the exact template\n\
         set and plan order.\n",
        name = manifest.system_name,
        org = manifest.org,
    );
    io::atomic_write(&staging.join("README.md"), readme.as_bytes())?;

    let compose = "services:\n  # services are added by the composed components\n";
    io::atomic_write(&staging.join("docker-compose.yml"), compose.as_bytes())?;
    Ok(2)
}

/// Copy one template tree into its target subpath, interpolating files the
/// descriptor marks as templated. Walk order is sorted so output is
/// deterministic.
fn materialize_node(staging: &Path, node: &PlanNode, cancel: &AtomicBool) -> Result<usize> {
    let dest_root = staging.join(&node.target);
    let mut written = 0usize;

    let walker = walkdir::WalkDir::new(&node.descriptor.root)
        .sort_by_file_name()
        .into_iter();
    for entry in walker {
        if cancel.load(Ordering::Relaxed) {
            return Err(StitchError::Cancelled);
        }
        let entry = entry.map_err(|e| StitchError::FilesystemFault {
            path: node.descriptor.root.clone(),
            reason: e.to_string(),
        })?;
        let rel = entry
            .path()
            .strip_prefix(&node.descriptor.root)
            .expect("walkdir stays under root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str == paths::DESCRIPTOR_FILE {
            continue;
        }

        let dest = dest_root.join(rel);
        if entry.file_type().is_dir() {
            io::ensure_dir(&dest)?;
            continue;
        }

        let data = std::fs::read(entry.path())?;
        if node.descriptor.is_templated(&rel_str) && !render::looks_binary(&data) {
            let text = String::from_utf8_lossy(&data);
            let rendered = render::interpolate(&text, &node.vars);
            io::atomic_write(&dest, rendered.as_bytes())?;
        } else {
            io::ensure_dir(dest.parent().unwrap_or(&dest_root))?;
            std::fs::copy(entry.path(), &dest)?;
        }
        written += 1;
    }
    Ok(written)
}

/// Every descriptor-declared output sentinel must exist under the node's
/// target. All misses are reported together.
fn post_verify(staging: &Path, plan: &CompositionPlan) -> Result<()> {
    let mut missing = Vec::new();
    for node in &plan.nodes {
        for output in &node.descriptor.outputs {
            let expected = format!("{}/{}", node.target, output);
            if !staging.join(&expected).exists() {
                missing.push(expected);
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StitchError::PostVerifyFault(missing))
    }
}

fn promote(staging: &Path, job: &ComposeJob) -> Result<()> {
    let dest = paths::final_output_dir(&job.output_root, &job.manifest.system_name);
    let backup = job
        .output_root
        .join(format!(".backup-{}", job.id));

    if dest.exists() {
        if !job.overwrite {
            return Err(StitchError::FilesystemFault {
                path: dest,
                reason: "destination already exists (pass overwrite to replace it)".into(),
            });
        }
        std::fs::rename(&dest, &backup).map_err(|e| StitchError::FilesystemFault {
            path: dest.clone(),
            reason: format!("could not move existing output aside: {e}"),
        })?;
    }

    match std::fs::rename(staging, &dest) {
        Ok(()) => {
            if backup.exists() {
                let _ = std::fs::remove_dir_all(&backup);
            }
            Ok(())
        }
        Err(e) => {
            // Best effort: put the previous output back before reporting.
            if backup.exists() {
                let _ = std::fs::rename(&backup, &dest);
            }
            Err(StitchError::FilesystemFault {
                path: dest,
                reason: format!(
                    "promote rename failed (staging and output must share a filesystem): {e}"
                ),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Async wrapper
// ---------------------------------------------------------------------------

/// Run a composition on the blocking pool under a wall-clock ceiling.
/// On expiry the job's cancel flag is raised and staging cleanup is awaited
/// before `Timeout` is returned.
pub async fn compose_with_timeout(
    catalog: Arc<Catalog>,
    mut job: ComposeJob,
    max_seconds: u64,
) -> Result<CompositionReport> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let mut handle =
        tokio::task::spawn_blocking(move || Composer::new(catalog).run(&mut job, &flag));

    tokio::select! {
        joined = &mut handle => {
            joined.map_err(|e| StitchError::FilesystemFault {
                path: PathBuf::new(),
                reason: format!("compose task panicked: {e}"),
            })?
        }
        _ = tokio::time::sleep(std::time::Duration::from_secs(max_seconds)) => {
            cancel.store(true, Ordering::Relaxed);
            // Wait for the cancelled job to finish removing its staging dir.
            let _ = handle.await;
            Err(StitchError::Timeout(max_seconds))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
