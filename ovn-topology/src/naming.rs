//! Names of everything provisioned for a project. All names are derived from the project, network
//! and instance names alone, so a rerun finds (and replaces) what an earlier run created. The
//! input names are restricted to lowercase letters and digits, and `-` only ever appears as the
//! separator, which keeps every derived name unique among objects of the same kind.

use anyhow::bail;
use crate::error::ProvisionError;

/// Longest name accepted for a project, network or instance.
pub const MAX_INPUT_NAME_LEN: usize = 24;

/// Longest derived name. The northbound database has no limit of its own, this is kept below
/// what the workload runtime accepts for its instance names.
pub const MAX_DERIVED_NAME_LEN: usize = 63;

pub fn validate_input_name(kind: &str, name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name.len() > MAX_INPUT_NAME_LEN {
        bail!(ProvisionError::InvalidName {
            name: name.to_string(),
            reason: format!("{kind} name must be 1 to {MAX_INPUT_NAME_LEN} characters"),
        });
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        bail!(ProvisionError::InvalidName {
            name: name.to_string(),
            reason: format!("{kind} name can only contain lowercase letters and digits"),
        });
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        bail!(ProvisionError::InvalidName {
            name: name.to_string(),
            reason: format!("{kind} name must start with a letter"),
        });
    }
    Ok(())
}

pub fn validate_derived_name(name: &str) -> anyhow::Result<()> {
    if name.len() > MAX_DERIVED_NAME_LEN {
        bail!(ProvisionError::InvalidName {
            name: name.to_string(),
            reason: format!("derived name is longer than {MAX_DERIVED_NAME_LEN} characters"),
        });
    }
    Ok(())
}

pub fn router(project: &str) -> String {
    format!("{project}-lr")
}

pub fn external_router_port(project: &str) -> String {
    format!("{project}-lrp-ext")
}

pub fn external_switch(project: &str) -> String {
    format!("{project}-ls-ext")
}

pub fn external_switch_router_port(project: &str) -> String {
    format!("{project}-lsp-router-ext")
}

pub fn external_switch_parent_port(project: &str) -> String {
    format!("{project}-lsp-parent-ext")
}

pub fn namespace(project: &str) -> String {
    format!("{project}-ns")
}

pub fn internal_router_port(project: &str, network: &str) -> String {
    format!("{project}-{network}-lrp-int")
}

pub fn internal_switch(project: &str, network: &str) -> String {
    format!("{project}-{network}-ls-int")
}

pub fn internal_switch_router_port(project: &str, network: &str) -> String {
    format!("{project}-{network}-lsrp-int")
}

pub fn instance_port(project: &str, network: &str, instance: &str) -> String {
    format!("{project}-{network}-ls-inst-{instance}")
}

pub fn workload(project: &str, network: &str, instance: &str) -> String {
    format!("{project}-{network}-{instance}")
}

/// Every northbound object name derived for the given project, networks and instances (as
/// `(network, instance)` pairs).
pub fn ovn_object_names(
    project: &str,
    networks: &[&str],
    instances: &[(&str, &str)],
) -> Vec<String> {
    let mut names = vec![
        router(project),
        external_router_port(project),
        external_switch(project),
        external_switch_router_port(project),
        external_switch_parent_port(project),
    ];
    for network in networks {
        names.push(internal_router_port(project, network));
        names.push(internal_switch(project, network));
        names.push(internal_switch_router_port(project, network));
    }
    for (network, instance) in instances {
        names.push(instance_port(project, network, instance));
    }
    names
}
