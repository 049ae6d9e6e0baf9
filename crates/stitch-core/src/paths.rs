use crate::error::{FieldError, Result, StitchError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File name constants
// ---------------------------------------------------------------------------

pub const SYSTEM_STATE_FILE: &str = "system_state.json";
pub const DECISION_LOG_FILE: &str = "decision_log.json";
pub const TELEMETRY_FILE: &str = "telemetry.json";
pub const ARCHITECTURE_MAP_FILE: &str = "architecture_map.json";
pub const DISPATCH_LOG_FILE: &str = "dispatch_log.json";

pub const DESCRIPTOR_FILE: &str = "template.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const METADATA_FILE: &str = "system-metadata.json";

pub const DEFAULT_STATE_DIR: &str = ".memory";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Scratch directory for one composition job, sibling to the final output
/// so the promote rename never crosses a filesystem boundary.
pub fn staging_dir(output_root: &Path, job_id: &str) -> PathBuf {
    output_root.join(format!(".staging-{job_id}"))
}

pub fn final_output_dir(output_root: &Path, system_name: &str) -> PathBuf {
    output_root.join(system_name)
}

/// Host-wide advisory lock guarding one `(output, system_name)` target.
pub fn system_lock_path(output_root: &Path, system_name: &str) -> PathBuf {
    output_root.join(format!(".{system_name}.compose.lock"))
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]+$").unwrap())
}

/// `system_name` rule: kebab-case, starts with a letter, 3-63 chars.
pub fn check_system_name(name: &str) -> Option<FieldError> {
    if name.len() < 3 || name.len() > 63 {
        return Some(FieldError::new(
            "system_name",
            format!("must be 3-63 characters, got {}", name.len()),
        ));
    }
    if !name_re().is_match(name) {
        return Some(FieldError::new(
            "system_name",
            "must be kebab-case: lowercase letters, digits, hyphens, starting with a letter",
        ));
    }
    None
}

/// Agent instance names follow the same lexical rule as system names but
/// without the length floor (a bare template slug like `wf` is fine).
pub fn check_instance_name(field: &str, name: &str) -> Option<FieldError> {
    static INSTANCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = INSTANCE_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]*$").unwrap());
    if name.is_empty() || name.len() > 63 || !re.is_match(name) {
        return Some(FieldError::new(
            field,
            "must be a lowercase identifier (letters, digits, hyphens)",
        ));
    }
    None
}

/// Strict variant used where a bare `Result` reads better than an optional
/// field error.
pub fn validate_system_name(name: &str) -> Result<()> {
    match check_system_name(name) {
        Some(err) => Err(StitchError::ManifestInvalid(vec![err])),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
