//! `kubenetbench nodes` command

use super::{connect_cluster, open_session};
use crate::GlobalArgs;
use anyhow::{Context, Result};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "NODE")]
    name: String,
    #[tabled(rename = "IP")]
    ip: String,
}

/// List the cluster nodes with the address their monitor is reached at.
pub async fn nodes(global: &GlobalArgs) -> Result<()> {
    let session = open_session(global)?;
    let cluster = connect_cluster(&session).await?;

    let nodes = cluster.nodes_and_ips().await.with_context(|| "Failed to list nodes")?;
    if nodes.is_empty() {
        println!("No nodes found");
        return Ok(());
    }

    let rows: Vec<NodeRow> = nodes
        .into_iter()
        .map(|n| NodeRow { name: n.name, ip: n.ip.unwrap_or_else(|| "-".to_string()) })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    Ok(())
}
