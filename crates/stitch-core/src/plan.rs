use crate::catalog::{Catalog, TemplateCategory, TemplateDescriptor, TemplateRef};
use crate::error::{Result, StitchError};
use crate::manifest::Manifest;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// PlanNode
// ---------------------------------------------------------------------------

/// One planned write: a resolved template, the instance it materializes as,
/// the subpath it lands in, and its variable bindings.
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub category: TemplateCategory,
    pub slug: String,
    pub instance: String,
    pub target: String,
    pub vars: BTreeMap<String, String>,
    #[serde(skip)]
    pub descriptor: TemplateDescriptor,
}

impl PlanNode {
    pub fn template_ref(&self) -> TemplateRef {
        TemplateRef::new(self.category, self.slug.clone())
    }

    /// Lexicographic identity used for deterministic ordering.
    fn sort_key(&self) -> (TemplateCategory, String, String) {
        (self.category, self.slug.clone(), self.instance.clone())
    }
}

/// Ordered list of planned writes. Prerequisites always precede dependents;
/// ties break lexicographically by (category, slug, instance).
#[derive(Debug, Clone, Serialize)]
pub struct CompositionPlan {
    pub nodes: Vec<PlanNode>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Plan construction
// ---------------------------------------------------------------------------

struct Selection {
    category: TemplateCategory,
    slug: String,
    instance: String,
    extra_vars: BTreeMap<String, String>,
}

fn selections(manifest: &Manifest) -> (Vec<Selection>, Vec<String>) {
    let mut out = Vec::new();
    let mut warnings = Vec::new();

    if let Some(backend) = &manifest.components.backend {
        out.push(Selection {
            category: TemplateCategory::Backend,
            slug: backend.template.clone(),
            instance: backend.template.clone(),
            extra_vars: BTreeMap::new(),
        });
    }

    if let Some(frontend) = &manifest.components.frontend {
        out.push(Selection {
            category: TemplateCategory::Frontend,
            slug: frontend.template.clone(),
            instance: frontend.template.clone(),
            extra_vars: BTreeMap::from([(
                "pwa".to_string(),
                frontend.pwa.unwrap_or(false).to_string(),
            )]),
        });
    }

    for agent in &manifest.components.ai_agents {
        out.push(Selection {
            category: TemplateCategory::AiAgent,
            slug: agent.template.clone(),
            instance: agent.instance().to_string(),
            extra_vars: BTreeMap::new(),
        });
    }

    if let Some(business) = &manifest.components.business {
        out.push(Selection {
            category: TemplateCategory::Business,
            slug: business.template.clone(),
            instance: business.template.clone(),
            extra_vars: BTreeMap::new(),
        });
    }

    let (infra, mut infra_warnings) = manifest.infra_modules();
    warnings.append(&mut infra_warnings);
    for module in infra {
        out.push(Selection {
            category: TemplateCategory::Infrastructure,
            slug: module.template_slug().to_string(),
            instance: module.template_slug().to_string(),
            extra_vars: BTreeMap::new(),
        });
    }

    let (governance, mut governance_warnings) = manifest.governance_modules();
    warnings.append(&mut governance_warnings);
    for module in governance {
        out.push(Selection {
            category: TemplateCategory::Governance,
            slug: module.template_slug().to_string(),
            instance: module.template_slug().to_string(),
            extra_vars: BTreeMap::new(),
        });
    }

    (out, warnings)
}

fn target_subpath(category: TemplateCategory, slug: &str, instance: &str) -> String {
    match category {
        TemplateCategory::Backend => "backend".to_string(),
        TemplateCategory::Frontend => "frontend".to_string(),
        TemplateCategory::AiAgent => format!("agents/{instance}"),
        TemplateCategory::Business => "business".to_string(),
        TemplateCategory::Governance => format!("governance/{slug}"),
        TemplateCategory::Infrastructure => format!("infrastructure/{slug}"),
        TemplateCategory::Industry => format!("industry/{slug}"),
        TemplateCategory::Connector => format!("connectors/{slug}"),
    }
}

fn base_vars(manifest: &Manifest, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("system_name".to_string(), manifest.system_name.clone()),
        ("org".to_string(), manifest.org.clone()),
        ("instance_name".to_string(), instance.to_string()),
    ])
}

/// Resolve every manifest reference against the catalog, pull in the
/// transitive dependency closure, order prerequisites first, assign target
/// subpaths, and reject collisions. Fails with `UnknownTemplate` listing
/// every unresolved reference (no short-circuit).
pub fn build_plan(manifest: &Manifest, catalog: &Catalog) -> Result<CompositionPlan> {
    let (selected, warnings) = selections(manifest);

    // Resolve direct selections, collecting all misses.
    let mut missing = BTreeSet::new();
    let mut nodes: Vec<PlanNode> = Vec::new();
    for sel in &selected {
        match catalog.resolve(sel.category, &sel.slug) {
            Some(descriptor) => {
                let mut vars = base_vars(manifest, &sel.instance);
                for (name, default) in &descriptor.variables {
                    if let Some(value) = default {
                        vars.entry(name.clone()).or_insert_with(|| value.clone());
                    }
                }
                vars.extend(sel.extra_vars.clone());
                nodes.push(PlanNode {
                    category: sel.category,
                    slug: sel.slug.clone(),
                    instance: sel.instance.clone(),
                    target: target_subpath(sel.category, &sel.slug, &sel.instance),
                    vars,
                    descriptor: descriptor.clone(),
                });
            }
            None => {
                missing.insert(TemplateRef::new(sel.category, sel.slug.clone()).to_string());
            }
        }
    }

    // Dependency closure: a declared prerequisite joins the plan under its
    // own slug unless some instance of it is already present.
    let mut frontier: Vec<TemplateRef> = nodes
        .iter()
        .flat_map(|n| n.descriptor.parsed_dependencies().unwrap_or_default())
        .collect();
    while let Some(dep) = frontier.pop() {
        let present = nodes
            .iter()
            .any(|n| n.category == dep.category && n.slug == dep.slug);
        if present {
            continue;
        }
        match catalog.resolve(dep.category, &dep.slug) {
            Some(descriptor) => {
                let mut vars = base_vars(manifest, &dep.slug);
                for (name, default) in &descriptor.variables {
                    if let Some(value) = default {
                        vars.entry(name.clone()).or_insert_with(|| value.clone());
                    }
                }
                frontier.extend(descriptor.parsed_dependencies().unwrap_or_default());
                nodes.push(PlanNode {
                    category: dep.category,
                    slug: dep.slug.clone(),
                    instance: dep.slug.clone(),
                    target: target_subpath(dep.category, &dep.slug, &dep.slug),
                    vars,
                    descriptor: descriptor.clone(),
                });
            }
            None => {
                missing.insert(dep.to_string());
            }
        }
    }

    if !missing.is_empty() {
        return Err(StitchError::UnknownTemplate(missing.into_iter().collect()));
    }

    // Collision check runs before ordering so the failure names targets, not
    // graph internals. Two agent instances defaulting to the same name land
    // on the same `agents/<instance>` subpath.
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for node in &nodes {
        *seen.entry(node.target.as_str()).or_default() += 1;
    }
    let collisions: Vec<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(target, _)| target.to_string())
        .collect();
    if !collisions.is_empty() {
        return Err(StitchError::NameCollision(collisions));
    }

    let ordered = order_nodes(nodes)?;
    Ok(CompositionPlan {
        nodes: ordered,
        warnings,
    })
}

/// Kahn's algorithm over lexicographic node ranks: the ready set is always
/// drained smallest-first, so equal-rank orderings are deterministic. Cycle
/// extraction goes through petgraph's SCC decomposition.
fn order_nodes(mut nodes: Vec<PlanNode>) -> Result<Vec<PlanNode>> {
    nodes.sort_by_key(|n| n.sort_key());

    // Map (category, slug) -> node indices; dependencies address templates,
    // and every instance of a dependent template waits on them.
    let mut by_template: BTreeMap<(TemplateCategory, String), Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        by_template
            .entry((node.category, node.slug.clone()))
            .or_default()
            .push(i);
    }

    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for i in 0..nodes.len() {
        graph.add_node(i);
    }
    for (i, node) in nodes.iter().enumerate() {
        for dep in node.descriptor.parsed_dependencies().unwrap_or_default() {
            if let Some(prereqs) = by_template.get(&(dep.category, dep.slug.clone())) {
                for &p in prereqs {
                    if p != i {
                        graph.add_edge(p, i, ());
                    }
                }
            }
        }
    }

    let mut indegree = vec![0usize; nodes.len()];
    for (_, to, _) in graph.all_edges() {
        indegree[to] += 1;
    }
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        let dependents: Vec<usize> = graph
            .neighbors_directed(next, petgraph::Direction::Outgoing)
            .collect();
        for d in dependents {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != nodes.len() {
        let cycle = tarjan_scc(&graph)
            .into_iter()
            .find(|scc| scc.len() > 1)
            .unwrap_or_default()
            .into_iter()
            .map(|i| nodes[i].template_ref().to_string())
            .collect();
        return Err(StitchError::DependencyCycle(cycle));
    }

    // Re-materialize in topological order.
    let mut slots: Vec<Option<PlanNode>> = nodes.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| slots[i].take().expect("each index appears once"))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::write_template;
    use tempfile::TempDir;

    fn library() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        write_template(
            dir.path(),
            "backend",
            "fastapi",
            serde_json::json!({ "slug": "fastapi", "category": "backend" }),
            &[("app/main.py", "app\n")],
        );
        write_template(
            dir.path(),
            "ai-agent",
            "research",
            serde_json::json!({
                "slug": "research",
                "category": "ai-agent",
                "dependencies": ["connector:agent-base"],
            }),
            &[("src/agent.py", "agent\n")],
        );
        write_template(
            dir.path(),
            "ai-agent",
            "orchestrator",
            serde_json::json!({
                "slug": "orchestrator",
                "category": "ai-agent",
                "dependencies": ["connector:agent-base"],
            }),
            &[("src/orchestrator.py", "orch\n")],
        );
        write_template(
            dir.path(),
            "connector",
            "agent-base",
            serde_json::json!({ "slug": "agent-base", "category": "connector" }),
            &[("src/base.py", "base\n")],
        );
        let catalog = Catalog::load(dir.path()).unwrap();
        (dir, catalog)
    }

    fn manifest(json: serde_json::Value) -> Manifest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn prerequisites_precede_dependents() {
        let (_dir, catalog) = library();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": { "ai_agents": [{ "template": "research" }] }
        }));
        let plan = build_plan(&m, &catalog).unwrap();
        let refs: Vec<String> = plan.nodes.iter().map(|n| n.template_ref().to_string()).collect();
        let base = refs.iter().position(|r| r == "connector:agent-base").unwrap();
        let agent = refs.iter().position(|r| r == "ai-agent:research").unwrap();
        assert!(base < agent, "expected base before agent, got {refs:?}");
    }

    #[test]
    fn ties_break_lexicographically() {
        let (_dir, catalog) = library();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": {
                "backend": { "template": "fastapi" },
                "ai_agents": [
                    { "template": "orchestrator", "instance_name": "wf" },
                    { "template": "research" }
                ]
            }
        }));
        let plan = build_plan(&m, &catalog).unwrap();
        let agents: Vec<&str> = plan
            .nodes
            .iter()
            .filter(|n| n.category == TemplateCategory::AiAgent)
            .map(|n| n.slug.as_str())
            .collect();
        // orchestrator < research by slug.
        assert_eq!(agents, vec!["orchestrator", "research"]);
    }

    #[test]
    fn missing_templates_reported_together() {
        let (_dir, catalog) = library();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": {
                "backend": { "template": "express" },
                "business": { "template": "crm" }
            }
        }));
        let err = build_plan(&m, &catalog).unwrap_err();
        match err {
            StitchError::UnknownTemplate(refs) => {
                assert_eq!(refs, vec!["backend:express", "business:crm"]);
            }
            other => panic!("expected UnknownTemplate, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_instance_names_collide() {
        let (_dir, catalog) = library();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": {
                "ai_agents": [
                    { "template": "research" },
                    { "template": "research" }
                ]
            }
        }));
        let err = build_plan(&m, &catalog).unwrap_err();
        match err {
            StitchError::NameCollision(targets) => {
                assert_eq!(targets, vec!["agents/research"]);
            }
            other => panic!("expected NameCollision, got {other:?}"),
        }
    }

    #[test]
    fn distinct_instances_of_same_template_coexist() {
        let (_dir, catalog) = library();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": {
                "ai_agents": [
                    { "template": "research" },
                    { "template": "research", "instance_name": "deep-dive" }
                ]
            }
        }));
        let plan = build_plan(&m, &catalog).unwrap();
        let targets: Vec<&str> = plan
            .nodes
            .iter()
            .filter(|n| n.category == TemplateCategory::AiAgent)
            .map(|n| n.target.as_str())
            .collect();
        assert_eq!(targets, vec!["agents/deep-dive", "agents/research"]);
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let dir = TempDir::new().unwrap();
        write_template(
            dir.path(),
            "backend",
            "fastapi",
            serde_json::json!({
                "slug": "fastapi",
                "category": "backend",
                "dependencies": ["business:crm"],
            }),
            &[],
        );
        write_template(
            dir.path(),
            "business",
            "crm",
            serde_json::json!({
                "slug": "crm",
                "category": "business",
                "dependencies": ["backend:fastapi"],
            }),
            &[],
        );
        let catalog = Catalog::load(dir.path()).unwrap();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": { "backend": { "template": "fastapi" } }
        }));
        let err = build_plan(&m, &catalog).unwrap_err();
        match err {
            StitchError::DependencyCycle(cycle) => {
                assert_eq!(cycle.len(), 2);
                assert!(cycle.contains(&"backend:fastapi".to_string()));
                assert!(cycle.contains(&"business:crm".to_string()));
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn vars_include_identity_and_defaults() {
        let dir = TempDir::new().unwrap();
        write_template(
            dir.path(),
            "frontend",
            "nextjs-pwa",
            serde_json::json!({
                "slug": "nextjs-pwa",
                "category": "frontend",
                "variables": { "port": "3000", "theme": null },
            }),
            &[],
        );
        let catalog = Catalog::load(dir.path()).unwrap();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": { "frontend": { "template": "nextjs-pwa", "pwa": true } }
        }));
        let plan = build_plan(&m, &catalog).unwrap();
        let vars = &plan.nodes[0].vars;
        assert_eq!(vars["system_name"], "demo-x");
        assert_eq!(vars["org"], "acme");
        assert_eq!(vars["port"], "3000");
        assert_eq!(vars["pwa"], "true");
        assert!(!vars.contains_key("theme"));
    }

    #[test]
    fn unknown_toggle_keys_become_warnings() {
        let (_dir, catalog) = library();
        let m = manifest(serde_json::json!({
            "manifest_version": "1.0",
            "system_name": "demo-x",
            "org": "acme",
            "components": {
                "backend": { "template": "fastapi" },
                "infrastructure": { "kubernetes": true }
            }
        }));
        let plan = build_plan(&m, &catalog).unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("kubernetes"));
    }
}
