//! Implementation of the `binforge version` command.

use std::path::Path;

use anyhow::{Context, Result};

use binforge_lib::pipeline::next_version;
use binforge_lib::recipe::Recipe;
use binforge_lib::registry::DirRegistry;

use crate::output::{OutputFormat, print_json};

/// Print the build version a deploy would be assigned. Racy against concurrent deploys.
pub fn cmd_version(recipe: &Path, registry_dir: &Path, output: OutputFormat) -> Result<()> {
  let recipe = Recipe::load(recipe).with_context(|| format!("Failed to load recipe {}", recipe.display()))?;
  let registry = DirRegistry::new(registry_dir);
  let version = next_version(&registry, &recipe.name, &recipe.version).context("Version negotiation failed")?;

  if output.is_json() {
    print_json(&serde_json::json!({ "package": recipe.name, "version": version.to_string() }))
  } else {
    println!("{}", version);
    Ok(())
  }
}
