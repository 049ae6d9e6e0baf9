use crate::output::print_json;
use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::path::PathBuf;
use stitch_core::memory::{
    ComponentStatus, DecisionInput, EventType, MadeBy, MemoryStore, Phase, StatePatch,
    TelemetryInput,
};

#[derive(Subcommand, Debug)]
pub enum MemorySubcommand {
    /// Load and validate all four state files; always exits 0
    Rehydrate,

    /// Update system_state.json
    WriteState {
        #[arg(long)]
        system_name: Option<String>,
        /// planning|building|testing|deployed
        #[arg(long)]
        phase: Option<String>,
        /// Component name, used with --status
        #[arg(long)]
        component: Option<String>,
        /// pending|scaffolded|building|ready|failed
        #[arg(long)]
        status: Option<String>,
        /// Description of the last action
        #[arg(long)]
        action: Option<String>,
        /// Overall health score (0-100)
        #[arg(long)]
        health_score: Option<u8>,
    },

    /// Append an entry to decision_log.json
    LogDecision {
        #[arg(long = "type")]
        decision_type: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        rationale: String,
        /// human|agent
        #[arg(long, default_value = "human")]
        made_by: String,
        #[arg(long)]
        outcome: Option<String>,
        /// Repeatable
        #[arg(long = "component")]
        components: Vec<String>,
    },

    /// Append an event to telemetry.json
    LogTelemetry {
        /// workflow_run|test_pass|test_fail|deploy|error|health_check
        #[arg(long = "type")]
        event_type: String,
        #[arg(long)]
        component: String,
        #[arg(long)]
        value: Option<f64>,
        #[arg(long)]
        unit: Option<String>,
        /// Arbitrary JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
}

pub fn run(state_dir: PathBuf, subcommand: MemorySubcommand, json: bool) -> Result<()> {
    let store = MemoryStore::new(state_dir);

    match subcommand {
        MemorySubcommand::Rehydrate => {
            let context = store.rehydrate();
            for warning in &context.warnings {
                eprintln!("warning: {warning}");
            }
            // Workflows depend on rehydrate always succeeding, including on
            // the first run against an empty directory.
            print_json(&context)
        }

        MemorySubcommand::WriteState {
            system_name,
            phase,
            component,
            status,
            action,
            health_score,
        } => {
            let phase = phase
                .map(|p| p.parse::<Phase>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let component_status = match (component, status) {
                (Some(component), Some(status)) => Some((
                    component,
                    status.parse::<ComponentStatus>().map_err(|e| anyhow!(e))?,
                )),
                (None, None) => None,
                _ => return Err(anyhow!("--component and --status must be used together")),
            };

            let state = store.write_state(StatePatch {
                system_name,
                phase,
                component_status,
                last_action: action,
                health_score,
            })?;

            if json {
                print_json(&state)?;
            } else {
                println!(
                    "state updated: {} phase={} health={}",
                    state.system_name, state.phase, state.health_score
                );
            }
            Ok(())
        }

        MemorySubcommand::LogDecision {
            decision_type,
            description,
            rationale,
            made_by,
            outcome,
            components,
        } => {
            let entry = store.append_decision(DecisionInput {
                decision_type,
                description,
                rationale,
                made_by: made_by.parse::<MadeBy>().map_err(|e| anyhow!(e))?,
                outcome,
                related_components: components,
            })?;
            if json {
                print_json(&entry)?;
            } else {
                println!("decision logged: {}", entry.id);
            }
            Ok(())
        }

        MemorySubcommand::LogTelemetry {
            event_type,
            component,
            value,
            unit,
            metadata,
        } => {
            let metadata = metadata
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| anyhow!("--metadata must be valid JSON: {e}"))?;
            let event = store.append_telemetry(TelemetryInput {
                event_type: event_type.parse::<EventType>().map_err(|e| anyhow!(e))?,
                component,
                value,
                unit,
                metadata,
            })?;
            if json {
                print_json(&event)?;
            } else {
                println!("telemetry logged: {}", event.id);
            }
            Ok(())
        }
    }
}
