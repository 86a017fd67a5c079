use async_trait::async_trait;
use crate::orchestration::{CommandRunner, OrchestrationCommon};

pub mod components;
pub mod configuration;

/// This trait allows each OVN component to have its own commands prepared and sent into the
/// runner, which will execute them. This also means that in unit testing, we can instead send in
/// a runner that just passes through the command string so that we can test equality rather than
/// execute the command. The returned string is the stdout of the last command run.
///
/// Destroy commands use `--if-exists`, so destroying something that is not there is not an error.
#[async_trait]
pub trait OvnCommand: Sync {
    async fn create_command(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
    ) -> anyhow::Result<String>;

    async fn destroy_command(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
    ) -> anyhow::Result<String>;

    /// Delete any previous definition then create this one. A failed delete is logged and the
    /// create carries on, the create will surface any real problem.
    async fn replace_command(
        &self,
        runner: &dyn CommandRunner,
        common: &OrchestrationCommon,
    ) -> anyhow::Result<String> {
        if let Err(err) = self.destroy_command(runner, common).await {
            tracing::warn!("could not remove previous definition, continuing with create: {err:#}");
        }
        self.create_command(runner, common).await
    }
}
