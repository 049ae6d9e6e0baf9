use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Compose,
    ListTemplates,
    Health,
    General,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Compose => "compose",
            Intent::ListTemplates => "list_templates",
            Intent::Health => "health",
            Intent::General => "general",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A static substring rule; no heap allocation.
struct Rule {
    keywords: &'static [&'static str],
    intent: Intent,
}

/// First match wins; evaluation order is the table order.
const RULES: &[Rule] = &[
    Rule {
        keywords: &["compose", "scaffold", "create system"],
        intent: Intent::Compose,
    },
    Rule {
        keywords: &["list templates", "show templates"],
        intent: Intent::ListTemplates,
    },
    Rule {
        keywords: &["status", "health"],
        intent: Intent::Health,
    },
];

/// Classify a user message by case-insensitive substring match.
pub fn classify(message: &str) -> Intent {
    let lowered = message.to_lowercase();
    for rule in RULES {
        if rule.keywords.iter().any(|k| lowered.contains(k)) {
            return rule.intent;
        }
    }
    Intent::General
}

/// Deterministic response body for each intent. The chat endpoint is not a
/// language model; it routes to fixed capability text.
pub fn respond(intent: Intent) -> String {
    match intent {
        Intent::Compose => concat!(
            "To compose a system, POST a manifest to /compose. Minimal example:\n\n",
            "```json\n",
            "{\n",
            "  \"manifest_version\": \"1.0\",\n",
            "  \"system_name\": \"demo-x\",\n",
            "  \"org\": \"acme\",\n",
            "  \"components\": {\n",
            "    \"backend\": { \"template\": \"fastapi\" },\n",
            "    \"ai_agents\": [{ \"template\": \"research\" }]\n",
            "  }\n",
            "}\n",
            "```\n\n",
            "The manifest is validated, then dispatched to the composition worker.",
        )
        .to_string(),
        Intent::ListTemplates => concat!(
            "The library is organized by category: backend, frontend, ai-agent, ",
            "business, infrastructure, governance, connector, industry. ",
            "POST {\"operation\": \"list_categories\"} to /discover for counts, or ",
            "{\"operation\": \"list_templates\", \"params\": {\"category\": \"backend\"}} ",
            "for the descriptors in one category.",
        )
        .to_string(),
        Intent::Health => {
            "Service is reachable. GET /health returns status, service name, version, and timestamp.".to_string()
        }
        Intent::General => concat!(
            "This is the composition control plane. It validates system manifests, ",
            "dispatches composition jobs, and exposes the template library. ",
            "Useful entry points: GET /health, GET /discover for the operation list, ",
            "POST /compose with a manifest to build a system.",
        )
        .to_string(),
    }
}

/// Advisory token accounting: whitespace word count, not a tokenizer.
pub fn approx_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
