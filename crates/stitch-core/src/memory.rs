use crate::error::{Result, StitchError};
use crate::io;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Phase / statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Building,
    Testing,
    Deployed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Building => "building",
            Phase::Testing => "testing",
            Phase::Deployed => "deployed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Phase::Planning),
            "building" => Ok(Phase::Building),
            "testing" => Ok(Phase::Testing),
            "deployed" => Ok(Phase::Deployed),
            other => Err(format!(
                "invalid phase '{other}', expected planning|building|testing|deployed"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Pending,
    Scaffolded,
    Building,
    Ready,
    Failed,
}

impl std::str::FromStr for ComponentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ComponentStatus::Pending),
            "scaffolded" => Ok(ComponentStatus::Scaffolded),
            "building" => Ok(ComponentStatus::Building),
            "ready" => Ok(ComponentStatus::Ready),
            "failed" => Ok(ComponentStatus::Failed),
            other => Err(format!(
                "invalid component status '{other}', expected pending|scaffolded|building|ready|failed"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MadeBy {
    Human,
    Agent,
}

impl std::str::FromStr for MadeBy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "human" => Ok(MadeBy::Human),
            "agent" => Ok(MadeBy::Agent),
            other => Err(format!("invalid made_by '{other}', expected human|agent")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowRun,
    TestPass,
    TestFail,
    Deploy,
    Error,
    HealthCheck,
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "workflow_run" => Ok(EventType::WorkflowRun),
            "test_pass" => Ok(EventType::TestPass),
            "test_fail" => Ok(EventType::TestFail),
            "deploy" => Ok(EventType::Deploy),
            "error" => Ok(EventType::Error),
            "health_check" => Ok(EventType::HealthCheck),
            other => Err(format!(
                "invalid event_type '{other}', expected workflow_run|test_pass|test_fail|deploy|error|health_check"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub system_name: String,
    pub phase: Phase,
    #[serde(default)]
    pub components_status: BTreeMap<String, ComponentStatus>,
    pub last_action: String,
    pub last_action_at: DateTime<Utc>,
    pub health_score: u8,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SystemState {
    pub fn new(system_name: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
            phase: Phase::Planning,
            components_status: BTreeMap::new(),
            last_action: "initialized".to_string(),
            last_action_at: Utc::now(),
            health_score: 100,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.health_score > 100 {
            return Err(StitchError::MemoryFileInvalid {
                file: paths::SYSTEM_STATE_FILE.into(),
                field: "health_score".into(),
                reason: format!("must be 0-100, got {}", self.health_score),
            });
        }
        if self.system_name.trim().is_empty() {
            return Err(StitchError::MemoryFileInvalid {
                file: paths::SYSTEM_STATE_FILE.into(),
                field: "system_name".into(),
                reason: "must be non-empty".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub decision_type: String,
    pub description: String,
    pub rationale: String,
    pub made_by: MadeBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default)]
    pub related_components: Vec<String>,
}

/// Caller-supplied fields of a decision; id and timestamp are generated on
/// append and never accepted from outside.
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub decision_type: String,
    pub description: String,
    pub rationale: String,
    pub made_by: MadeBy,
    pub outcome: Option<String>,
    pub related_components: Vec<String>,
}

impl DecisionInput {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("decision_type", &self.decision_type),
            ("description", &self.description),
        ] {
            if value.trim().is_empty() {
                return Err(StitchError::MemoryFileInvalid {
                    file: paths::DECISION_LOG_FILE.into(),
                    field: field.into(),
                    reason: "must be non-empty".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct TelemetryInput {
    pub event_type: EventType,
    pub component: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl TelemetryInput {
    fn validate(&self) -> Result<()> {
        if self.component.trim().is_empty() {
            return Err(StitchError::MemoryFileInvalid {
                file: paths::TELEMETRY_FILE.into(),
                field: "component".into(),
                reason: "must be non-empty".into(),
            });
        }
        if self.value.is_some() != self.unit.is_some() {
            return Err(StitchError::MemoryFileInvalid {
                file: paths::TELEMETRY_FILE.into(),
                field: "unit".into(),
                reason: "value and unit must be provided together".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchComponent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchitectureMap {
    #[serde(default)]
    pub components: Vec<ArchComponent>,
    #[serde(default)]
    pub dependency_graph: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// Partial update applied to `system_state.json`. Unset fields are left as
/// they were; `last_action_at` always advances.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub system_name: Option<String>,
    pub phase: Option<Phase>,
    pub component_status: Option<(String, ComponentStatus)>,
    pub last_action: Option<String>,
    pub health_score: Option<u8>,
}

// ---------------------------------------------------------------------------
// MemoryContext
// ---------------------------------------------------------------------------

/// Consolidated view of the four memory files. Missing or invalid files show
/// up in `warnings`; rehydration itself never fails.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryContext {
    pub system_state: Option<SystemState>,
    pub decision_log: Vec<DecisionEntry>,
    pub telemetry: Vec<TelemetryEvent>,
    pub architecture_map: Option<ArchitectureMap>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Disk-backed state shared by pipeline runs and the composer. Writes are
/// serialized with a per-file advisory lock so the API and CLI can coexist;
/// locks are host-local.
pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    // -- rehydrate ----------------------------------------------------------

    pub fn rehydrate(&self) -> MemoryContext {
        let mut warnings = Vec::new();

        let system_state: Option<SystemState> =
            load_optional(&self.file(paths::SYSTEM_STATE_FILE), &mut warnings);
        if let Some(state) = &system_state {
            if let Err(err) = state.validate() {
                warnings.push(err.to_string());
            }
        }

        let decision_log: Vec<DecisionEntry> =
            load_optional(&self.file(paths::DECISION_LOG_FILE), &mut warnings)
                .unwrap_or_default();
        let telemetry: Vec<TelemetryEvent> =
            load_optional(&self.file(paths::TELEMETRY_FILE), &mut warnings).unwrap_or_default();
        let architecture_map: Option<ArchitectureMap> =
            load_optional(&self.file(paths::ARCHITECTURE_MAP_FILE), &mut warnings);

        MemoryContext {
            system_state,
            decision_log,
            telemetry,
            architecture_map,
            warnings,
        }
    }

    // -- writes -------------------------------------------------------------

    pub fn write_state(&self, patch: StatePatch) -> Result<SystemState> {
        let path = self.file(paths::SYSTEM_STATE_FILE);
        io::with_file_lock(&path, || {
            let mut state = match read_json::<SystemState>(&path)? {
                Some(state) => state,
                None => SystemState::new(
                    patch.system_name.clone().unwrap_or_else(|| "unnamed-system".into()),
                ),
            };

            if let Some(name) = patch.system_name {
                state.system_name = name;
            }
            if let Some(phase) = patch.phase {
                state.phase = phase;
            }
            if let Some((component, status)) = patch.component_status {
                state.components_status.insert(component, status);
            }
            if let Some(action) = patch.last_action {
                state.last_action = action;
            }
            if let Some(score) = patch.health_score {
                state.health_score = score;
            }
            state.last_action_at = Utc::now();

            state.validate()?;
            io::atomic_write(&path, &serde_json::to_vec_pretty(&state)?)?;
            Ok(state)
        })
    }

    pub fn append_decision(&self, input: DecisionInput) -> Result<DecisionEntry> {
        input.validate()?;
        let path = self.file(paths::DECISION_LOG_FILE);
        io::with_file_lock(&path, || {
            let mut log: Vec<DecisionEntry> = read_json(&path)?.unwrap_or_default();
            let entry = DecisionEntry {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                decision_type: input.decision_type.clone(),
                description: input.description.clone(),
                rationale: input.rationale.clone(),
                made_by: input.made_by,
                outcome: input.outcome.clone(),
                related_components: input.related_components.clone(),
            };
            log.push(entry.clone());
            io::atomic_write(&path, &serde_json::to_vec_pretty(&log)?)?;
            Ok(entry)
        })
    }

    pub fn append_telemetry(&self, input: TelemetryInput) -> Result<TelemetryEvent> {
        input.validate()?;
        let path = self.file(paths::TELEMETRY_FILE);
        io::with_file_lock(&path, || {
            let mut events: Vec<TelemetryEvent> = read_json(&path)?.unwrap_or_default();
            let event = TelemetryEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type: input.event_type,
                component: input.component.clone(),
                value: input.value,
                unit: input.unit.clone(),
                metadata: input.metadata.clone(),
            };
            events.push(event.clone());
            io::atomic_write(&path, &serde_json::to_vec_pretty(&events)?)?;
            Ok(event)
        })
    }

    pub fn write_architecture_map(&self, map: &ArchitectureMap) -> Result<()> {
        let path = self.file(paths::ARCHITECTURE_MAP_FILE);
        io::with_file_lock(&path, || {
            io::atomic_write(&path, &serde_json::to_vec_pretty(map)?)?;
            Ok(())
        })
    }
}

/// Read-and-parse for writers: a missing file is `None`, a corrupt file is
/// an error. Appending to a file we cannot parse would silently destroy
/// whatever it held.
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    match serde_json::from_slice(&data) {
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(StitchError::MemoryFileInvalid {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            field: "$".into(),
            reason: e.to_string(),
        }),
    }
}

/// Read for rehydration: missing and invalid both degrade to `None` plus a
/// warning. Unknown fields are tolerated (serde ignores them on read).
fn load_optional<T: serde::de::DeserializeOwned>(
    path: &Path,
    warnings: &mut Vec<String>,
) -> Option<T> {
    if !path.exists() {
        warnings.push(format!("missing state file: {}", path.display()));
        return None;
    }
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warnings.push(format!("unreadable state file {}: {e}", path.display()));
            return None;
        }
    };
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warnings.push(format!("invalid state file {}: {e}", path.display()));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rehydrate_empty_dir_warns_for_all_four_files() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        let ctx = store.rehydrate();
        assert!(ctx.system_state.is_none());
        assert!(ctx.decision_log.is_empty());
        assert!(ctx.telemetry.is_empty());
        assert!(ctx.architecture_map.is_none());
        assert_eq!(ctx.warnings.len(), 4);
    }

    #[test]
    fn rehydrate_partial_dir_warns_only_for_missing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write_state(StatePatch::default()).unwrap();

        let ctx = store.rehydrate();
        assert!(ctx.system_state.is_some());
        assert_eq!(ctx.warnings.len(), 3);
    }

    #[test]
    fn rehydrate_tolerates_invalid_json_with_warning() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::TELEMETRY_FILE), b"not json").unwrap();
        let store = MemoryStore::new(dir.path());
        let ctx = store.rehydrate();
        assert!(ctx.telemetry.is_empty());
        assert!(ctx
            .warnings
            .iter()
            .any(|w| w.contains(paths::TELEMETRY_FILE) && w.contains("invalid")));
    }

    #[test]
    fn rehydrate_keeps_unknown_fields_tolerant() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write_state(StatePatch::default()).unwrap();
        // Inject a forward-compat field; read must still succeed.
        let path = dir.path().join(paths::SYSTEM_STATE_FILE);
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        value["future_field"] = serde_json::json!({"x": 1});
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let ctx = store.rehydrate();
        assert!(ctx.system_state.is_some());
        // Unknown fields are dropped on the next write.
        store
            .write_state(StatePatch {
                last_action: Some("noop".into()),
                ..Default::default()
            })
            .unwrap();
        let rewritten: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(rewritten.get("future_field").is_none());
    }

    #[test]
    fn write_state_applies_patch_fields() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        let state = store
            .write_state(StatePatch {
                system_name: Some("demo-x".into()),
                phase: Some(Phase::Building),
                component_status: Some(("backend".into(), ComponentStatus::Scaffolded)),
                last_action: Some("scaffold_backend".into()),
                health_score: Some(85),
            })
            .unwrap();
        assert_eq!(state.system_name, "demo-x");
        assert_eq!(state.phase, Phase::Building);
        assert_eq!(state.health_score, 85);
        assert_eq!(
            state.components_status["backend"],
            ComponentStatus::Scaffolded
        );

        // Second patch preserves untouched fields.
        let state = store
            .write_state(StatePatch {
                phase: Some(Phase::Testing),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.system_name, "demo-x");
        assert_eq!(state.health_score, 85);
        assert_eq!(state.phase, Phase::Testing);
    }

    #[test]
    fn write_state_rejects_out_of_range_health() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        let err = store
            .write_state(StatePatch {
                health_score: Some(101),
                ..Default::default()
            })
            .unwrap_err();
        match err {
            StitchError::MemoryFileInvalid { field, .. } => assert_eq!(field, "health_score"),
            other => panic!("expected MemoryFileInvalid, got {other:?}"),
        }
        // Failed write leaves no file behind.
        assert!(!dir.path().join(paths::SYSTEM_STATE_FILE).exists());
    }

    #[test]
    fn decisions_append_in_order_with_ids_and_monotonic_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        for i in 0..5 {
            store
                .append_decision(DecisionInput {
                    decision_type: "architecture".into(),
                    description: format!("decision {i}"),
                    rationale: "because".into(),
                    made_by: MadeBy::Agent,
                    outcome: None,
                    related_components: vec!["backend".into()],
                })
                .unwrap();
        }

        let ctx = store.rehydrate();
        assert_eq!(ctx.decision_log.len(), 5);
        for (i, entry) in ctx.decision_log.iter().enumerate() {
            assert_eq!(entry.description, format!("decision {i}"));
        }
        let mut ids: Vec<Uuid> = ctx.decision_log.iter().map(|d| d.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert!(ctx
            .decision_log
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn append_decision_rejects_empty_description() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        let err = store
            .append_decision(DecisionInput {
                decision_type: "architecture".into(),
                description: "  ".into(),
                rationale: "r".into(),
                made_by: MadeBy::Human,
                outcome: None,
                related_components: vec![],
            })
            .unwrap_err();
        assert_eq!(err.kind(), "memory_file_invalid");
    }

    #[test]
    fn append_refuses_to_clobber_corrupt_log() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::DECISION_LOG_FILE), b"[{broken").unwrap();
        let store = MemoryStore::new(dir.path());
        let err = store
            .append_decision(DecisionInput {
                decision_type: "architecture".into(),
                description: "d".into(),
                rationale: "r".into(),
                made_by: MadeBy::Human,
                outcome: None,
                related_components: vec![],
            })
            .unwrap_err();
        assert_eq!(err.kind(), "memory_file_invalid");
        // Original bytes untouched.
        assert_eq!(
            std::fs::read(dir.path().join(paths::DECISION_LOG_FILE)).unwrap(),
            b"[{broken"
        );
    }

    #[test]
    fn telemetry_value_requires_unit() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        let err = store
            .append_telemetry(TelemetryInput {
                event_type: EventType::HealthCheck,
                component: "backend".into(),
                value: Some(99.5),
                unit: None,
                metadata: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "memory_file_invalid");

        store
            .append_telemetry(TelemetryInput {
                event_type: EventType::HealthCheck,
                component: "backend".into(),
                value: Some(99.5),
                unit: Some("percent".into()),
                metadata: Some(serde_json::json!({"probe": "liveness"})),
            })
            .unwrap();
        assert_eq!(store.rehydrate().telemetry.len(), 1);
    }

    #[test]
    fn architecture_map_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        let map = ArchitectureMap {
            components: vec![ArchComponent {
                name: "backend".into(),
                kind: Some("fastapi".into()),
            }],
            dependency_graph: BTreeMap::from([(
                "backend".to_string(),
                vec!["agents/research".to_string()],
            )]),
        };
        store.write_architecture_map(&map).unwrap();
        let ctx = store.rehydrate();
        let loaded = ctx.architecture_map.unwrap();
        assert_eq!(loaded.components.len(), 1);
        assert_eq!(loaded.dependency_graph["backend"], vec!["agents/research"]);
    }
}
