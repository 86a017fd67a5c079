use anyhow::Context;
use ovn_topology_schemas::topology_yaml::TopologyConfig;
use crate::components::LogicalTopology;

pub mod addressing;
pub mod components;
pub mod dataplane;
pub mod error;
pub mod naming;
pub mod orchestration;
pub mod ovn;
pub mod reservation;
#[cfg(test)]
pub mod testing;

/// Load the topology file and build the logical topology from it. Everything in the file is
/// validated here, before anything is run against the host, and only the project `only` is kept
/// when given.
pub async fn parse_config(
    path: &str,
    only: Option<&str>,
) -> anyhow::Result<LogicalTopology> {
    tracing::trace!("loading topology file {path}");
    let config = TopologyConfig::load_from_file(path)
        .await
        .with_context(|| format!("loading topology file {path}"))?;
    let mut topology = LogicalTopology::from_config(&config, only)
        .with_context(|| format!("validating topology file {path}"))?;
    let source = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("resolving topology file {path}"))?;
    topology.source = Some(source.to_string_lossy().to_string());
    tracing::debug!("topology has {} selected projects", topology.projects.len());
    Ok(topology)
}
