//! `kubenetbench monitor` command

use super::open_session;
use crate::GlobalArgs;
use anyhow::Result;
use colored::Colorize;

/// Write the monitor DaemonSet manifest into the session directory.
pub fn monitor(global: &GlobalArgs) -> Result<()> {
    let session = open_session(global)?;
    let path = session.gen_monitor_yaml()?;

    println!("Monitor manifest written to {}", path.display());
    println!("Deploy it with: {}", format!("kubectl apply -f {}", path.display()).cyan());
    Ok(())
}
