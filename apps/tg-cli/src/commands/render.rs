// render.rs - Print the generated project without running anything.

use tg_workspace::format_listing;

use crate::config::SmokeConfig;
use crate::project;

pub fn execute(config: &SmokeConfig) -> anyhow::Result<()> {
    let files = project::render_project(config)?;
    print!("{}", format_listing(&files));
    Ok(())
}
