use crate::error::{Result, StitchError};
use crate::paths::DESCRIPTOR_FILE;
use crate::render;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// TemplateCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateCategory {
    Backend,
    Frontend,
    AiAgent,
    Business,
    Infrastructure,
    Governance,
    Connector,
    Industry,
}

impl TemplateCategory {
    pub fn all() -> &'static [TemplateCategory] {
        &[
            TemplateCategory::Backend,
            TemplateCategory::Frontend,
            TemplateCategory::AiAgent,
            TemplateCategory::Business,
            TemplateCategory::Infrastructure,
            TemplateCategory::Governance,
            TemplateCategory::Connector,
            TemplateCategory::Industry,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateCategory::Backend => "backend",
            TemplateCategory::Frontend => "frontend",
            TemplateCategory::AiAgent => "ai-agent",
            TemplateCategory::Business => "business",
            TemplateCategory::Infrastructure => "infrastructure",
            TemplateCategory::Governance => "governance",
            TemplateCategory::Connector => "connector",
            TemplateCategory::Industry => "industry",
        }
    }
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemplateCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TemplateCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown template category '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// TemplateRef
// ---------------------------------------------------------------------------

/// `(category, slug)` address of one template, rendered `category:slug`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateRef {
    pub category: TemplateCategory,
    pub slug: String,
}

impl TemplateRef {
    pub fn new(category: TemplateCategory, slug: impl Into<String>) -> Self {
        Self {
            category,
            slug: slug.into(),
        }
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.slug)
    }
}

impl std::str::FromStr for TemplateRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (category, slug) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed template ref '{s}', expected category:slug"))?;
        Ok(TemplateRef {
            category: category.parse()?,
            slug: slug.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// TemplateDescriptor
// ---------------------------------------------------------------------------

/// Static metadata about one template, read from its `template.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub slug: String,
    pub category: TemplateCategory,
    /// Globs (relative to the template root) selecting files that get
    /// variable interpolation; everything else is copied verbatim.
    #[serde(default)]
    pub templated: Vec<String>,
    /// Declared input variables with optional defaults.
    #[serde(default)]
    pub variables: BTreeMap<String, Option<String>>,
    /// Sentinel paths that must exist in the output after composition.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Prerequisite templates, `category:slug`.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Template source directory; populated at load, never serialized.
    #[serde(skip)]
    pub root: PathBuf,
}

impl TemplateDescriptor {
    pub fn template_ref(&self) -> TemplateRef {
        TemplateRef::new(self.category, self.slug.clone())
    }

    /// Whether `rel_path` matches any of the declared templated globs.
    pub fn is_templated(&self, rel_path: &str) -> bool {
        self.templated.iter().any(|g| render::glob_match(g, rel_path))
    }

    pub fn parsed_dependencies(&self) -> std::result::Result<Vec<TemplateRef>, String> {
        self.dependencies.iter().map(|d| d.parse()).collect()
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Read-only index over the template library. Loaded once, shared via `Arc`;
/// restarts pick up library edits.
#[derive(Debug)]
pub struct Catalog {
    templates: BTreeMap<(TemplateCategory, String), TemplateDescriptor>,
    snapshot: String,
}

impl Catalog {
    /// Scan `<root>/<category>/<slug>/template.json`. Missing or invalid
    /// descriptors are warned about and skipped; scanning never fails the
    /// process, only an unreadable root does.
    pub fn load(root: &Path) -> Result<Catalog> {
        if !root.is_dir() {
            return Err(StitchError::FilesystemFault {
                path: root.to_path_buf(),
                reason: "template root is not a directory".into(),
            });
        }

        let mut templates = BTreeMap::new();
        for category in TemplateCategory::all() {
            let category_dir = root.join(category.as_str());
            if !category_dir.is_dir() {
                continue;
            }
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&category_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            entries.sort();

            for template_dir in entries {
                match load_descriptor(&template_dir, *category) {
                    Ok(descriptor) => {
                        templates.insert(
                            (*category, descriptor.slug.clone()),
                            descriptor,
                        );
                    }
                    Err(reason) => {
                        tracing::warn!(
                            template = %template_dir.display(),
                            %reason,
                            "skipping template with missing or invalid descriptor"
                        );
                    }
                }
            }
        }

        let snapshot = snapshot_hash(&templates);
        Ok(Catalog {
            templates,
            snapshot,
        })
    }

    /// Empty catalog, used by tests and by the server when no template root
    /// is configured.
    pub fn empty() -> Catalog {
        Catalog {
            templates: BTreeMap::new(),
            snapshot: snapshot_hash(&BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Categories with at least one template, with counts.
    pub fn categories(&self) -> Vec<(TemplateCategory, usize)> {
        let mut counts: BTreeMap<TemplateCategory, usize> = BTreeMap::new();
        for (category, _) in self.templates.keys() {
            *counts.entry(*category).or_default() += 1;
        }
        counts.into_iter().collect()
    }

    pub fn templates_in(&self, category: TemplateCategory) -> Vec<&TemplateDescriptor> {
        self.templates
            .iter()
            .filter(|((c, _), _)| *c == category)
            .map(|(_, d)| d)
            .collect()
    }

    pub fn resolve(&self, category: TemplateCategory, slug: &str) -> Option<&TemplateDescriptor> {
        self.templates.get(&(category, slug.to_string()))
    }

    /// Content hash over the aggregate descriptor set. Fingerprints
    /// `system-metadata.json` so downstream consumers can detect library
    /// drift between runs.
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }
}

fn load_descriptor(
    template_dir: &Path,
    category: TemplateCategory,
) -> std::result::Result<TemplateDescriptor, String> {
    let descriptor_path = template_dir.join(DESCRIPTOR_FILE);
    let data = std::fs::read(&descriptor_path)
        .map_err(|e| format!("unreadable {DESCRIPTOR_FILE}: {e}"))?;
    let mut descriptor: TemplateDescriptor =
        serde_json::from_slice(&data).map_err(|e| format!("malformed {DESCRIPTOR_FILE}: {e}"))?;

    let dir_name = template_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if descriptor.slug != dir_name {
        return Err(format!(
            "slug '{}' does not match directory '{dir_name}'",
            descriptor.slug
        ));
    }
    if descriptor.category != category {
        return Err(format!(
            "category '{}' does not match directory '{category}'",
            descriptor.category
        ));
    }
    descriptor.parsed_dependencies()?;

    descriptor.root = template_dir.to_path_buf();
    Ok(descriptor)
}

fn snapshot_hash(
    templates: &BTreeMap<(TemplateCategory, String), TemplateDescriptor>,
) -> String {
    let mut hasher = Sha256::new();
    // BTreeMap iteration is sorted, so the hash is order-independent of scan.
    for descriptor in templates.values() {
        hasher.update(serde_json::to_vec(descriptor).expect("descriptor serializes"));
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
