use crate::error::{FieldError, Result, StitchError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MANIFEST_VERSION: &str = "1.0";
pub const MAX_DESCRIPTION_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Template slug enums
//
// Closed sets. Manifests carry the raw strings so that schema validation can
// collect every violation into the 422 error map instead of failing on the
// first bad enum during deserialization; the strings are checked against
// these sets exactly once, in `Manifest::validate`.
// ---------------------------------------------------------------------------

macro_rules! slug_enum {
    ($name:ident { $($variant:ident => $slug:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $slug),+
                }
            }

            pub fn slugs() -> Vec<&'static str> {
                Self::all().iter().map(|v| v.as_str()).collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($slug => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown value '{}', expected one of: {}",
                        other,
                        Self::slugs().join(", ")
                    )),
                }
            }
        }
    };
}

slug_enum!(BackendTemplate {
    Fastapi => "fastapi",
    Express => "express",
    Graphql => "graphql",
    Websocket => "websocket",
    AiInference => "ai-inference",
    EventWorker => "event-worker",
});

slug_enum!(FrontendTemplate {
    NextjsPwa => "nextjs-pwa",
    ViteReact => "vite-react",
    Dashboard => "dashboard",
    AdminPanel => "admin-panel",
    SaasLanding => "saas-landing",
    AiConsole => "ai-console",
    ChatUi => "chat-ui",
});

slug_enum!(AgentTemplate {
    Research => "research",
    Builder => "builder",
    Validator => "validator",
    Financial => "financial",
    RealEstate => "real-estate",
    Orchestrator => "orchestrator",
    ContentGen => "content-gen",
    SocialAutomation => "social-automation",
});

slug_enum!(BusinessTemplate {
    Crm => "crm",
    LeadGen => "lead-gen",
    Billing => "billing",
    SaasSubscription => "saas-subscription",
    Marketplace => "marketplace",
    PortfolioMgmt => "portfolio-mgmt",
});

slug_enum!(MemoryBackend {
    InMemory => "in-memory",
    Redis => "redis",
    Postgres => "postgres",
});

slug_enum!(InfraModule {
    Docker => "docker",
    GithubActions => "github-actions",
    GithubPages => "github-pages",
    GithubProjects => "github-projects",
    Gitops => "gitops",
    Observability => "observability",
});

slug_enum!(GovernanceModule {
    TapEnforcement => "tap-enforcement",
    TestCoverageGate => "test-coverage-gate",
    SecurityScan => "security-scan",
});

impl InfraModule {
    /// Library slug for the template this toggle selects.
    pub fn template_slug(self) -> &'static str {
        match self {
            InfraModule::Docker => "docker-compose",
            InfraModule::GithubActions => "github-actions-ci",
            InfraModule::GithubPages => "github-pages",
            InfraModule::GithubProjects => "github-projects",
            InfraModule::Gitops => "gitops",
            InfraModule::Observability => "observability",
        }
    }

    /// Manifest toggles accept snake_case keys as written by clients.
    pub fn from_manifest_key(key: &str) -> Option<Self> {
        match key {
            "docker" => Some(InfraModule::Docker),
            "github_actions" => Some(InfraModule::GithubActions),
            "github_pages" => Some(InfraModule::GithubPages),
            "github_projects" => Some(InfraModule::GithubProjects),
            "gitops" => Some(InfraModule::Gitops),
            "observability" => Some(InfraModule::Observability),
            _ => None,
        }
    }
}

impl GovernanceModule {
    pub fn template_slug(self) -> &'static str {
        match self {
            GovernanceModule::TapEnforcement => "tap-enforcement",
            GovernanceModule::TestCoverageGate => "test-coverage-gate",
            GovernanceModule::SecurityScan => "security-gate",
        }
    }

    pub fn from_manifest_key(key: &str) -> Option<Self> {
        match key {
            "tap_enforcement" => Some(GovernanceModule::TapEnforcement),
            "test_coverage_gate" => Some(GovernanceModule::TestCoverageGate),
            "security_scan" => Some(GovernanceModule::SecurityScan),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: String,
    pub system_name: String,
    pub org: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub components: Components,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrations: Option<Integrations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Components {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendComponent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_agents: Vec<AgentComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business: Option<BusinessComponent>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub infrastructure: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub governance: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendComponent {
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendComponent {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwa: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentComponent {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

impl AgentComponent {
    /// Instance name defaults to the template slug when absent.
    pub fn instance(&self) -> &str {
        self.instance_name.as_deref().unwrap_or(&self.template)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessComponent {
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub backend: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_api: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_compatible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_dispatch: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check_slug<T: std::str::FromStr<Err = String>>(
    field: &str,
    raw: &str,
    errors: &mut Vec<FieldError>,
) {
    if let Err(message) = raw.parse::<T>() {
        errors.push(FieldError::new(field, message));
    }
}

impl Manifest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Parse from a JSON value, reporting structural problems as field
    /// errors: missing required top-level fields each get their own path,
    /// any other shape mismatch is reported at `$` with serde's message.
    pub fn from_value(value: &serde_json::Value) -> std::result::Result<Self, Vec<FieldError>> {
        if !value.is_object() {
            return Err(vec![FieldError::new("$", "manifest must be a JSON object")]);
        }
        let mut errors = Vec::new();
        for key in ["manifest_version", "system_name", "org"] {
            match value.get(key) {
                None => errors.push(FieldError::new(key, "missing required field")),
                Some(v) if !v.is_string() => errors.push(FieldError::new(key, "must be a string")),
                _ => {}
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        serde_json::from_value(value.clone()).map_err(|e| vec![FieldError::new("$", e.to_string())])
    }

    /// Collect every schema violation. Never short-circuits: the API's 422
    /// error map must name all offending fields in one round trip.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.manifest_version != MANIFEST_VERSION {
            errors.push(FieldError::new(
                "manifest_version",
                format!(
                    "unsupported version '{}', expected '{MANIFEST_VERSION}'",
                    self.manifest_version
                ),
            ));
        }

        if let Some(err) = paths::check_system_name(&self.system_name) {
            errors.push(err);
        }

        if self.org.trim().is_empty() {
            errors.push(FieldError::new("org", "must be non-empty"));
        }

        if let Some(desc) = &self.description {
            if desc.len() > MAX_DESCRIPTION_LEN {
                errors.push(FieldError::new(
                    "description",
                    format!("must be at most {MAX_DESCRIPTION_LEN} characters, got {}", desc.len()),
                ));
            }
        }

        if let Some(backend) = &self.components.backend {
            check_slug::<BackendTemplate>(
                "components.backend.template",
                &backend.template,
                &mut errors,
            );
        }

        if let Some(frontend) = &self.components.frontend {
            check_slug::<FrontendTemplate>(
                "components.frontend.template",
                &frontend.template,
                &mut errors,
            );
        }

        let mut seen_instances: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, agent) in self.components.ai_agents.iter().enumerate() {
            check_slug::<AgentTemplate>(
                &format!("components.ai_agents[{i}].template"),
                &agent.template,
                &mut errors,
            );
            if let Some(name) = &agent.instance_name {
                if let Some(err) = paths::check_instance_name(
                    &format!("components.ai_agents[{i}].instance_name"),
                    name,
                ) {
                    errors.push(err);
                }
            }
            // Uniqueness covers defaulted names too: two bare `research`
            // agents collide exactly like two explicit ones.
            let instance = agent.instance();
            match seen_instances.get(instance) {
                Some(first) => errors.push(FieldError::new(
                    format!("components.ai_agents[{i}].instance_name"),
                    format!("duplicate instance name '{instance}', already used by ai_agents[{first}]"),
                )),
                None => {
                    seen_instances.insert(instance, i);
                }
            }
        }

        if let Some(business) = &self.components.business {
            check_slug::<BusinessTemplate>(
                "components.business.template",
                &business.template,
                &mut errors,
            );
        }

        if let Some(memory) = &self.memory {
            check_slug::<MemoryBackend>("memory.backend", &memory.backend, &mut errors);
            if memory.ttl_seconds < 0 {
                errors.push(FieldError::new("memory.ttl_seconds", "must be non-negative"));
            }
        }

        errors
    }

    /// Schema validation as a hard gate; used by the engine and the CLI.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StitchError::ManifestInvalid(errors))
        }
    }

    /// Infrastructure modules toggled on, plus warnings for unknown keys.
    /// A toggle selects its template only when explicitly `true`.
    pub fn infra_modules(&self) -> (Vec<InfraModule>, Vec<String>) {
        let mut modules = Vec::new();
        let mut warnings = Vec::new();
        for (key, enabled) in &self.components.infrastructure {
            match InfraModule::from_manifest_key(key) {
                Some(module) if *enabled => modules.push(module),
                Some(_) => {}
                None => warnings.push(format!(
                    "unknown infrastructure key '{key}' ignored"
                )),
            }
        }
        (modules, warnings)
    }

    /// Governance modules toggled on, plus warnings for unknown keys.
    pub fn governance_modules(&self) -> (Vec<GovernanceModule>, Vec<String>) {
        let mut modules = Vec::new();
        let mut warnings = Vec::new();
        for (key, enabled) in &self.components.governance {
            match GovernanceModule::from_manifest_key(key) {
                Some(module) if *enabled => modules.push(module),
                Some(_) => {}
                None => warnings.push(format!("unknown governance key '{key}' ignored")),
            }
        }
        (modules, warnings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
