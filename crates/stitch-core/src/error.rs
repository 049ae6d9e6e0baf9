use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A single schema violation, addressable by JSON field path
/// (e.g. `components.ai_agents[1].template`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("manifest invalid: {}", join_fields(.0))]
    ManifestInvalid(Vec<FieldError>),

    #[error("unknown template(s): {}", .0.join(", "))]
    UnknownTemplate(Vec<String>),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("target path collision: {}", .0.join(", "))]
    NameCollision(Vec<String>),

    #[error("filesystem fault at {path}: {reason}")]
    FilesystemFault { path: PathBuf, reason: String },

    #[error("post-verify failed, missing: {}", .0.join(", "))]
    PostVerifyFault(Vec<String>),

    #[error("composition exceeded the {0}s ceiling")]
    Timeout(u64),

    #[error("composition cancelled")]
    Cancelled,

    #[error("dispatch rejected: downstream refused the configured credentials")]
    DispatchUnauthorized,

    #[error("dispatch unreachable: {0}")]
    DispatchUnreachable(String),

    #[error("memory file {file} invalid at '{field}': {reason}")]
    MemoryFileInvalid {
        file: String,
        field: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StitchError {
    /// Machine-readable kind, stable across releases. Returned over the API
    /// and in CLI JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            StitchError::ManifestInvalid(_) => "manifest_invalid",
            StitchError::UnknownTemplate(_) => "unknown_template",
            StitchError::DependencyCycle(_) => "dependency_cycle",
            StitchError::NameCollision(_) => "name_collision",
            StitchError::FilesystemFault { .. } => "filesystem_fault",
            StitchError::PostVerifyFault(_) => "post_verify_fault",
            StitchError::Timeout(_) => "timeout",
            StitchError::Cancelled => "cancelled",
            StitchError::DispatchUnauthorized => "dispatcher_unauthorized",
            StitchError::DispatchUnreachable(_) => "dispatcher_unreachable",
            StitchError::MemoryFileInvalid { .. } => "memory_file_invalid",
            StitchError::Io(_) => "io",
            StitchError::Json(_) => "json",
        }
    }

    /// Suggested next action for the failure, surfaced alongside the message.
    pub fn suggestion(&self) -> &'static str {
        match self {
            StitchError::ManifestInvalid(_) => "fix the listed fields and revalidate the manifest",
            StitchError::UnknownTemplate(_) => {
                "check the library catalog for supported categories and slugs"
            }
            StitchError::DependencyCycle(_) => {
                "break the cycle in the listed template dependencies"
            }
            StitchError::NameCollision(_) => "give each agent instance a unique instance_name",
            StitchError::FilesystemFault { .. } => {
                "check permissions and that staging and output share a filesystem"
            }
            StitchError::PostVerifyFault(_) => {
                "the template's declared outputs were not produced; check the library"
            }
            StitchError::Timeout(_) => "retry, or raise MAX_COMPOSE_SECONDS",
            StitchError::Cancelled => "retry the composition",
            StitchError::DispatchUnauthorized => "rotate DISPATCH_TOKEN and retry from the manifest",
            StitchError::DispatchUnreachable(_) => {
                "retry; the manifest was accepted and is safe to re-dispatch"
            }
            StitchError::MemoryFileInvalid { .. } => "repair or remove the named state file",
            StitchError::Io(_) | StitchError::Json(_) => "inspect the underlying cause and retry",
        }
    }

    /// CLI exit code mapping: 0 success, 1 manifest invalid, 2 catalog
    /// lookup failed, 3 filesystem fault, 4 timeout, 5 post-verify fault.
    pub fn exit_code(&self) -> i32 {
        match self {
            StitchError::ManifestInvalid(_) | StitchError::NameCollision(_) => 1,
            StitchError::UnknownTemplate(_) | StitchError::DependencyCycle(_) => 2,
            StitchError::Timeout(_) | StitchError::Cancelled => 4,
            StitchError::PostVerifyFault(_) => 5,
            _ => 3,
        }
    }

    /// Field-level detail for API error maps. Only `ManifestInvalid` carries
    /// per-field entries.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            StitchError::ManifestInvalid(errors) => errors,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, StitchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_invalid_lists_every_field() {
        let err = StitchError::ManifestInvalid(vec![
            FieldError::new("system_name", "must be kebab-case"),
            FieldError::new("org", "must be non-empty"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("system_name"));
        assert!(msg.contains("org"));
        assert_eq!(err.kind(), "manifest_invalid");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn unknown_template_exit_code_is_catalog_failure() {
        let err = StitchError::UnknownTemplate(vec!["backend:nodejs".into()]);
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("backend:nodejs"));
    }

    #[test]
    fn timeout_exit_code() {
        assert_eq!(StitchError::Timeout(120).exit_code(), 4);
    }

    #[test]
    fn post_verify_exit_code() {
        assert_eq!(
            StitchError::PostVerifyFault(vec!["backend/Dockerfile".into()]).exit_code(),
            5
        );
    }

    #[test]
    fn every_kind_has_a_suggestion() {
        let samples: Vec<StitchError> = vec![
            StitchError::ManifestInvalid(vec![]),
            StitchError::UnknownTemplate(vec![]),
            StitchError::DependencyCycle(vec![]),
            StitchError::NameCollision(vec![]),
            StitchError::Timeout(1),
            StitchError::DispatchUnauthorized,
        ];
        for err in samples {
            assert!(
                !err.suggestion().is_empty(),
                "{} lacks suggestion",
                err.kind()
            );
        }
    }
}
