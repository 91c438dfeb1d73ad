//! `kubenetbench init` command

use super::start_logging;
use crate::GlobalArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use knb_core::Session;

/// Create the session directory.
pub fn init(global: &GlobalArgs) -> Result<()> {
    let id = global.session_id.clone().unwrap_or_default();
    let session = Session::init(&id, &global.session_base_dir)
        .with_context(|| "Failed to create session")?;
    start_logging(&session, global.quiet)?;

    println!("Session {} created in {}", session.id().green(), session.dir().display());
    let next = format!("kubenetbench -s {} monitor", session.id());
    println!("Next, generate the monitor manifest: {}", next.cyan());
    Ok(())
}
