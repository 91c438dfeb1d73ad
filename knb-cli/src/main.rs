use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use knb_core::Connectivity;
use std::path::PathBuf;

mod commands;
mod signal;

#[derive(Parser)]
#[command(name = "kubenetbench")]
#[command(about = "Kubernetes network benchmarking", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Session id (`init` generates one when omitted)
    #[arg(short = 's', long, global = true)]
    pub session_id: Option<String>,

    /// Directory holding the session directories
    #[arg(short = 'd', long, global = true, default_value = ".")]
    pub session_base_dir: PathBuf,

    /// Only log to the session log file
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Reach the monitors through Kubernetes port forwarding
    #[arg(long, global = true)]
    pub port_forward: bool,
}

impl GlobalArgs {
    pub fn connectivity(&self) -> Connectivity {
        if self.port_forward {
            Connectivity::PortForward
        } else {
            Connectivity::Direct
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new session
    Init,

    /// Generate the monitor DaemonSet manifest for the session
    Monitor,

    /// List the cluster nodes and their addresses
    Nodes,

    /// Retrieve system information from every node
    Sysinfo,

    /// Collect performance data on the nodes running session pods
    Collect {
        /// Run identifier (also the name of the run directory)
        #[arg(long)]
        run_id: String,

        /// Collection duration requested from the monitors, in seconds
        #[arg(long)]
        duration: Option<u32>,

        /// Seconds to wait before retrieving the results (default: the duration)
        #[arg(long)]
        wait: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init(&cli.global)?,
        Commands::Monitor => commands::monitor(&cli.global)?,
        Commands::Nodes => commands::nodes(&cli.global).await?,
        Commands::Sysinfo => commands::sysinfo(&cli.global).await?,
        Commands::Collect { run_id, duration, wait } => {
            commands::collect(&cli.global, &run_id, duration, wait).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kubenetbench",
            "collect",
            "--run-id",
            "r1",
            "-s",
            "bench",
            "--port-forward",
            "-q",
        ])
        .unwrap();

        assert_eq!(cli.global.session_id.as_deref(), Some("bench"));
        assert_eq!(cli.global.session_base_dir, PathBuf::from("."));
        assert!(cli.global.quiet);
        assert_eq!(cli.global.connectivity(), Connectivity::PortForward);
        match cli.command {
            Commands::Collect { run_id, duration, wait } => {
                assert_eq!(run_id, "r1");
                assert_eq!(duration, None);
                assert_eq!(wait, None);
            }
            _ => panic!("expected collect"),
        }
    }

    #[test]
    fn test_direct_connectivity_by_default() {
        let cli = Cli::try_parse_from(["kubenetbench", "-s", "bench", "-d", "/tmp/knb", "sysinfo"])
            .unwrap();
        assert_eq!(cli.global.connectivity(), Connectivity::Direct);
        assert_eq!(cli.global.session_base_dir, PathBuf::from("/tmp/knb"));
        assert!(matches!(cli.command, Commands::Sysinfo));
    }

    #[test]
    fn test_collect_requires_run_id() {
        assert!(Cli::try_parse_from(["kubenetbench", "-s", "bench", "collect"]).is_err());
    }
}
