pub mod cli_models;
pub mod topology_yaml;
pub mod settings;

pub const OVN_TOPOLOGY_STATE_FOLDER: &str = "/var/lib/ovn-topology/";
