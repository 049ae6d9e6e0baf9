use crate::output::{print_json, print_table};
use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::path::Path;
use stitch_core::catalog::{Catalog, TemplateCategory};

#[derive(Subcommand, Debug)]
pub enum CatalogSubcommand {
    /// List templates, optionally restricted to one category
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// Show one template descriptor
    Show { category: String, slug: String },
}

pub fn run(template_root: &Path, subcommand: CatalogSubcommand, json: bool) -> Result<()> {
    let catalog = Catalog::load(template_root).map_err(|e| anyhow!("{e}"))?;

    match subcommand {
        CatalogSubcommand::List { category } => {
            let categories: Vec<TemplateCategory> = match category {
                Some(raw) => vec![raw.parse().map_err(|e: String| anyhow!(e))?],
                None => catalog.categories().into_iter().map(|(c, _)| c).collect(),
            };

            if json {
                let listing: Vec<serde_json::Value> = categories
                    .iter()
                    .flat_map(|c| catalog.templates_in(*c))
                    .map(|d| {
                        serde_json::json!({
                            "category": d.category,
                            "slug": d.slug,
                            "outputs": d.outputs,
                            "dependencies": d.dependencies,
                        })
                    })
                    .collect();
                return print_json(&serde_json::json!({
                    "catalog_version": catalog.snapshot(),
                    "templates": listing,
                }));
            }

            println!("Catalog: {} templates ({})", catalog.len(), catalog.snapshot());
            let rows: Vec<Vec<String>> = categories
                .iter()
                .flat_map(|c| catalog.templates_in(*c))
                .map(|d| {
                    vec![
                        d.category.to_string(),
                        d.slug.clone(),
                        d.dependencies.join(", "),
                    ]
                })
                .collect();
            print_table(&["CATEGORY", "SLUG", "DEPENDENCIES"], rows);
            Ok(())
        }

        CatalogSubcommand::Show { category, slug } => {
            let category: TemplateCategory = category.parse().map_err(|e: String| anyhow!(e))?;
            let descriptor = catalog
                .resolve(category, &slug)
                .ok_or_else(|| anyhow!("template '{category}:{slug}' not in catalog"))?;
            print_json(&serde_json::json!({
                "slug": descriptor.slug,
                "category": descriptor.category,
                "root": descriptor.root,
                "templated": descriptor.templated,
                "variables": descriptor.variables,
                "outputs": descriptor.outputs,
                "dependencies": descriptor.dependencies,
            }))
        }
    }
}
