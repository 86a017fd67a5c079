use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(version = "0.1", author = "Bristol Cyber Security Group (BCSG)")]
pub struct Opts {
    #[arg(long, default_value = "topology.yaml", help = "Topology file")]
    pub input: String,
    #[arg(long, help = "Only act on this project, defaults to every project in the topology file")]
    pub project: Option<String>,
    #[arg(short, long)]
    pub verbosity: Option<String>,
    #[arg(long, help = "Abort the whole run if it takes longer than this many seconds")]
    pub deadline_secs: Option<u64>,
    #[command(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Subcommand, Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum SubCommand {
    #[command(about = "Provision the project networks and then the instances")]
    Up,
    #[command(about = "Provision only the logical routers, switches and DHCP of each project")]
    Net,
    #[command(about = "Provision only the instance ports (and workloads) of each project")]
    Instances,
    #[command(about = "Remove everything provisioned for each project")]
    Down,
    #[command(about = "Parse and validate the topology file without touching the host")]
    Validate,
}

impl SubCommand {
    pub fn name(&self) -> String {
        match &self {
            SubCommand::Up => "up".into(),
            SubCommand::Net => "net".into(),
            SubCommand::Instances => "instances".into(),
            SubCommand::Down => "down".into(),
            SubCommand::Validate => "validate".into(),
        }
    }

    pub fn provisions_network(&self) -> bool {
        matches!(self, SubCommand::Up | SubCommand::Net)
    }

    pub fn provisions_instances(&self) -> bool {
        matches!(self, SubCommand::Up | SubCommand::Instances)
    }
}
