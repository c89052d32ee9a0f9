use anyhow::Result;

use binforge_lib::platform::supported_platforms;

use crate::output::{OutputFormat, print_json};

pub fn cmd_platforms(output: OutputFormat) -> Result<()> {
  let platforms = supported_platforms();
  if output.is_json() {
    return print_json(&platforms);
  }
  for platform in platforms {
    println!("{}", platform);
  }
  Ok(())
}
