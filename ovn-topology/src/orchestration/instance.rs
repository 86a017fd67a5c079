use serde::{Deserialize, Serialize};
use crate::orchestration::CommandRunner;
use crate::vec_of_strings;

/// A container instance attached to the network through the peer end of its instance veth, which
/// it takes over as its `eth0`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub image: String,
    pub nic_parent: String,
}

impl Workload {
    pub fn new(
        name: String,
        image: String,
        nic_parent: String,
    ) -> Self {
        Self {
            name,
            image,
            nic_parent,
        }
    }

    /// Start the instance from a clean slate, any instance of the same name is removed first.
    pub async fn recreate(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        self.destroy(runner).await?;
        tracing::info!("creating instance {} from image {}", &self.name, &self.image);
        runner.run(vec_of_strings!["lxc", "init", &self.image, &self.name]).await?;
        runner.run(vec_of_strings![
            "lxc", "config", "device", "add", &self.name, "eth0", "nic",
            "nictype=physical", "name=eth0", format!("parent={}", &self.nic_parent)
        ]).await?;
        runner.run(vec_of_strings!["lxc", "start", &self.name]).await?;
        Ok(())
    }

    pub async fn destroy(&self, runner: &dyn CommandRunner) -> anyhow::Result<()> {
        destroy_workload(runner, &self.name).await
    }
}

/// Remove the instance `name` if there is one.
pub async fn destroy_workload(
    runner: &dyn CommandRunner,
    name: &str,
) -> anyhow::Result<()> {
    tracing::info!("removing instance {name}");
    runner.run_allow_fail(vec_of_strings!["lxc", "delete", "-f", name]).await?;
    Ok(())
}
