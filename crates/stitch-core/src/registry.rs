use crate::manifest::{
    AgentTemplate, BackendTemplate, BusinessTemplate, FrontendTemplate, MemoryBackend,
};
use serde::Serialize;

/// Version of the discovery payload shapes, bumped when consumers must
/// re-read the registry.
pub const REGISTRY_VERSION: &str = "2026.2";

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStage {
    pub stage: &'static str,
    pub order: u32,
    pub description: &'static str,
    pub trigger: &'static str,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub tools: &'static [&'static str],
    pub governance: &'static [&'static str],
    pub next_stage: &'static str,
}

/// The eight pipeline stages. Artifact emission happens in `compose`; the
/// later stages are run by external workers that share the memory store.
/// `scale` loops back to `discovery`.
pub const PIPELINE_STAGES: &[PipelineStage] = &[
    PipelineStage {
        stage: "discovery",
        order: 1,
        description: "Capture intent and produce a validated system manifest",
        trigger: "client request",
        inputs: &["intent", "library catalog"],
        outputs: &["manifest.json"],
        tools: &["control-plane-api"],
        governance: &[],
        next_stage: "compose",
    },
    PipelineStage {
        stage: "compose",
        order: 2,
        description: "Materialize the output repository from the manifest",
        trigger: "dispatch event",
        inputs: &["manifest.json", "library catalog"],
        outputs: &["output tree", "system-metadata.json"],
        tools: &["stitch compose"],
        governance: &["tap-enforcement"],
        next_stage: "build",
    },
    PipelineStage {
        stage: "build",
        order: 3,
        description: "Build every composed component",
        trigger: "compose complete",
        inputs: &["output tree"],
        outputs: &["build artifacts"],
        tools: &["ci-runner"],
        governance: &["test-coverage-gate"],
        next_stage: "test",
    },
    PipelineStage {
        stage: "test",
        order: 4,
        description: "Run component and integration test suites",
        trigger: "build complete",
        inputs: &["build artifacts"],
        outputs: &["test report", "telemetry events"],
        tools: &["ci-runner"],
        governance: &["test-coverage-gate"],
        next_stage: "deploy",
    },
    PipelineStage {
        stage: "deploy",
        order: 5,
        description: "Roll the system out to its target environment",
        trigger: "tests green",
        inputs: &["build artifacts"],
        outputs: &["deployment record"],
        tools: &["deploy-runner"],
        governance: &["security-gate"],
        next_stage: "monitor",
    },
    PipelineStage {
        stage: "monitor",
        order: 6,
        description: "Watch health and feed telemetry into the memory store",
        trigger: "deployment live",
        inputs: &["deployment record"],
        outputs: &["telemetry events", "health score"],
        tools: &["monitor-runner"],
        governance: &[],
        next_stage: "optimize",
    },
    PipelineStage {
        stage: "optimize",
        order: 7,
        description: "Tune components against observed telemetry",
        trigger: "telemetry thresholds",
        inputs: &["telemetry events"],
        outputs: &["decision entries"],
        tools: &["optimizer"],
        governance: &[],
        next_stage: "scale",
    },
    PipelineStage {
        stage: "scale",
        order: 8,
        description: "Adjust capacity, then loop back to discovery",
        trigger: "optimize complete",
        inputs: &["decision entries"],
        outputs: &["updated system state"],
        tools: &["scale-runner"],
        governance: &[],
        next_stage: "discovery",
    },
];

pub fn pipeline_stage(name: &str) -> Option<&'static PipelineStage> {
    PIPELINE_STAGES.iter().find(|s| s.stage == name)
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// The machine-readable capability catalog served by discovery.
pub fn capabilities() -> serde_json::Value {
    serde_json::json!({
        "registry_version": REGISTRY_VERSION,
        "service": "stitch",
        "manifest_version": crate::manifest::MANIFEST_VERSION,
        "templates": {
            "backend": BackendTemplate::slugs(),
            "frontend": FrontendTemplate::slugs(),
            "ai_agents": AgentTemplate::slugs(),
            "business": BusinessTemplate::slugs(),
        },
        "memory_backends": MemoryBackend::slugs(),
        "pipeline_stages": PIPELINE_STAGES.iter().map(|s| s.stage).collect::<Vec<_>>(),
        "endpoints": ["/health", "/discover", "/compose", "/chat"],
    })
}

// ---------------------------------------------------------------------------
// Blueprints
// ---------------------------------------------------------------------------

/// Named sample manifests clients can start from.
pub const BLUEPRINT_NAMES: &[&str] = &["saas-starter", "research-stack", "commerce-suite"];

pub fn blueprint(name: &str) -> Option<serde_json::Value> {
    let manifest = match name {
        "saas-starter" => serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "saas-starter",
            "org": "example",
            "description": "Subscription SaaS with a PWA frontend and a billing module",
            "components": {
                "backend": { "template": "fastapi" },
                "frontend": { "template": "nextjs-pwa", "pwa": true },
                "business": { "template": "saas-subscription" },
                "governance": { "tap_enforcement": true, "test_coverage_gate": true }
            },
            "memory": { "backend": "redis", "ttl_seconds": 86400 }
        }),
        "research-stack" => serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "research-stack",
            "org": "example",
            "description": "Research and orchestration agents over an inference backend",
            "components": {
                "backend": { "template": "ai-inference" },
                "ai_agents": [
                    { "template": "research" },
                    { "template": "validator" },
                    { "template": "orchestrator", "instance_name": "coordinator" }
                ]
            }
        }),
        "commerce-suite" => serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "commerce-suite",
            "org": "example",
            "description": "Marketplace with CRM automation and a dashboard frontend",
            "components": {
                "backend": { "template": "express" },
                "frontend": { "template": "dashboard" },
                "business": { "template": "marketplace" },
                "ai_agents": [{ "template": "content-gen" }],
                "infrastructure": { "docker": true, "github_actions": true }
            }
        }),
        _ => return None,
    };
    Some(manifest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
