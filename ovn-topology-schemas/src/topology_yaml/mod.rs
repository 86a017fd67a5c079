pub mod project;
pub mod network;

use crate::topology_yaml::project::*;
use crate::settings::{ChassisConfig, Settings};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// The whole topology file. Projects are provisioned in the order they are listed.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
pub struct TopologyConfig {
    #[serde(default)]
    #[validate]
    pub settings: Settings,
    #[serde(default)]
    #[validate]
    pub chassis: ChassisConfig,
    #[validate]
    pub projects: Vec<ProjectConfig>,
}

impl TopologyConfig {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        tracing::trace!("reading topology file {:?}", path.as_ref());
        let text = tokio::fs::read_to_string(path).await.with_context(|| "Reading topology file")?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let value: Self = serde_yaml::from_str(text).with_context(|| "Parsing topology YAML")?;
        // only field shapes here, the addressing is checked when the logical project is built
        value.validate().with_context(|| "Validating topology YAML")?;
        tracing::debug!("topology YAML has {} projects", value.projects.len());
        Ok(value)
    }

    /// Get the projects to act on, either all of them or only the one named.
    pub fn selected_projects(&self, only: Option<&str>) -> anyhow::Result<Vec<&ProjectConfig>> {
        match only {
            None => Ok(self.projects.iter().collect()),
            Some(name) => {
                let project = self.projects.iter()
                    .find(|p| p.name.eq(name))
                    .with_context(|| format!("project {name} is not in the topology file"))?;
                Ok(vec![project])
            }
        }
    }
}
