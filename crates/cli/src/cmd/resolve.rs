//! Implementation of the `binforge resolve` command.

use std::path::Path;

use anyhow::{Context, Result};

use binforge_lib::recipe::Recipe;
use binforge_lib::source::{SourceCache, SourceResolver};

use crate::output::{OutputFormat, print_json, print_stat, print_success};

/// Resolve every source of the recipe into the cache and print where each landed.
pub fn cmd_resolve(recipe: &Path, output: OutputFormat) -> Result<()> {
  let recipe = Recipe::load(recipe).with_context(|| format!("Failed to load recipe {}", recipe.display()))?;
  let resolver = SourceResolver::new(SourceCache::default_location()).context("Failed to set up the source cache")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let resolved = rt
    .block_on(resolver.resolve_all(&recipe.sources))
    .context("Source resolution failed")?;

  if output.is_json() {
    let items: Vec<_> = resolved
      .iter()
      .map(|r| serde_json::json!({ "path": r.path, "digest": r.digest.to_string() }))
      .collect();
    return print_json(&items);
  }

  print_success(&format!("Resolved {} source(s) for {}", resolved.len(), recipe.name));
  for source in &resolved {
    print_stat(&source.digest.to_string(), &source.path.display().to_string());
  }
  Ok(())
}
