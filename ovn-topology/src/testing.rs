//! Stand-ins for the host used by the unit tests in place of `SubprocessRunner`.
//!
//! `RecordingRunner` only echoes commands back, which is enough to check how a command is built.
//! `FakeHost` keeps a small model of everything the commands touch (the northbound tables, OVS
//! interfaces, links, namespaces and workloads) and applies the commands to it, so tests can run a
//! whole provisioning pipeline and then look at the resulting state. Commands it does not
//! understand fail, the same as a typo would against the real tools.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use crate::error::ProvisionError;
use crate::orchestration::CommandRunner;

/// Hands every command back as its output, joined with spaces, unless a fixed output was given.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    output: Option<String>,
    commands: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn with_output(output: &str) -> Self {
        Self {
            output: Some(output.to_string()),
            commands: Mutex::default(),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        let joined = cmd.join(" ");
        self.commands.lock().unwrap().push(joined.clone());
        Ok(self.output.clone().unwrap_or(joined))
    }

    async fn run_allow_fail(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        self.run(cmd).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeRouter {
    /// every `set` column, map columns flattened to `column:key`
    pub columns: BTreeMap<String, String>,
    /// prefix to next hop
    pub routes: BTreeMap<String, String>,
    /// logical subnet to external address
    pub snat: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeRouterPort {
    pub router: String,
    pub mac: String,
    pub networks: Vec<String>,
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeSwitch {
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeSwitchPort {
    pub switch: String,
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeDhcpOptions {
    /// stored without the quotes the IPv6 value is written with
    pub cidr: String,
    pub external_ids: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
}

impl FakeDhcpOptions {
    fn matches(&self, column: &str, value: &str) -> bool {
        if column == "cidr" {
            return self.cidr == value;
        }
        match column.strip_prefix("external_ids:") {
            Some(key) => self.external_ids.get(key).map(String::as_str) == Some(value),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeHaGroup {
    pub uuid: String,
    pub chassis: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeOvsPort {
    pub bridge: String,
    pub external_ids: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeLink {
    pub peer: Option<String>,
    pub mac: Option<String>,
    pub up: bool,
    pub addresses: Vec<String>,
}

/// Links, routes and settings of the host or of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeNetStack {
    pub links: BTreeMap<String, FakeLink>,
    pub routes: Vec<String>,
    pub routes6: Vec<String>,
    pub sysctls: BTreeMap<String, String>,
    pub nat_rules: Vec<String>,
}

impl FakeNetStack {
    /// Remove a link along with the routes through it.
    fn remove_link(&mut self, name: &str) -> Option<FakeLink> {
        let link = self.links.remove(name)?;
        let through = |route: &String| {
            let tokens: Vec<&str> = route.split_whitespace().collect();
            tokens.windows(2).any(|w| w[0] == "dev" && w[1] == name)
        };
        self.routes.retain(|r| !through(r));
        self.routes6.retain(|r| !through(r));
        Some(link)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeWorkload {
    pub image: String,
    pub nic_parent: Option<String>,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub routers: BTreeMap<String, FakeRouter>,
    pub router_ports: BTreeMap<String, FakeRouterPort>,
    pub switches: BTreeMap<String, FakeSwitch>,
    pub switch_ports: BTreeMap<String, FakeSwitchPort>,
    pub dhcp_options: BTreeMap<String, FakeDhcpOptions>,
    pub ha_groups: BTreeMap<String, FakeHaGroup>,
    pub ovs_ports: BTreeMap<String, FakeOvsPort>,
    pub ovs_external_ids: BTreeMap<String, String>,
    pub host: FakeNetStack,
    pub namespaces: BTreeMap<String, FakeNetStack>,
    pub workloads: BTreeMap<String, FakeWorkload>,
    pub system_id: String,
    pub encap_ip: Ipv4Addr,
    next_uuid: u32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            routers: BTreeMap::new(),
            router_ports: BTreeMap::new(),
            switches: BTreeMap::new(),
            switch_ports: BTreeMap::new(),
            dhcp_options: BTreeMap::new(),
            ha_groups: BTreeMap::new(),
            ovs_ports: BTreeMap::new(),
            ovs_external_ids: BTreeMap::new(),
            host: FakeNetStack::default(),
            namespaces: BTreeMap::new(),
            workloads: BTreeMap::new(),
            system_id: "5c2f0a4e-fake-chassis".to_string(),
            encap_ip: Ipv4Addr::new(10, 109, 89, 20),
            next_uuid: 0,
        }
    }
}

type Outcome = Result<String, String>;

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

fn assignment(arg: &str) -> Result<(&str, String), String> {
    arg.split_once('=')
        .map(|(k, v)| (k, unquote(v)))
        .ok_or_else(|| format!("{arg}: argument does not end in \"=\" followed by a value"))
}

/// Split chained `a -- b` commands and take the leading `--options` off each part.
fn segments<'a>(args: &[&'a str]) -> Vec<(Vec<&'a str>, Vec<&'a str>)> {
    args.split(|a| *a == "--")
        .map(|part| {
            let n = part.iter().take_while(|a| a.starts_with("--")).count();
            (part[..n].to_vec(), part[n..].to_vec())
        })
        .collect()
}

fn lines(values: impl IntoIterator<Item = String>) -> String {
    values.into_iter().map(|v| format!("{v}\n")).collect()
}

impl HostState {
    fn new_uuid(&mut self) -> String {
        self.next_uuid += 1;
        format!("{:08x}-0000-4000-8000-{:012x}", self.next_uuid, self.next_uuid)
    }

    fn dispatch(&mut self, ns: Option<&str>, cmd: &[&str]) -> Outcome {
        let (program, args) = cmd.split_first().ok_or_else(|| "empty command".to_string())?;
        match *program {
            "ovn-nbctl" => self.nbctl(args),
            "ovs-vsctl" => self.vsctl(args),
            "ip" => self.ip(ns, args),
            "sysctl" => self.sysctl(ns, args),
            "iptables" | "ip6tables" => self.iptables(ns, program, args),
            "lxc" => self.lxc(args),
            other => Err(format!("{other}: command not found")),
        }
    }

    fn nbctl(&mut self, args: &[&str]) -> Outcome {
        let args = match args {
            ["--db", _, rest @ ..] => rest,
            _ => args,
        };
        let mut out = String::new();
        for (opts, cmd) in segments(args) {
            let if_exists = opts.contains(&"--if-exists");
            let may_exist = opts.contains(&"--may-exist");
            out = match cmd.as_slice() {
                ["lr-add", name] => {
                    if self.routers.contains_key(*name) {
                        return Err(format!("{name}: a router with this name already exists"));
                    }
                    self.routers.insert(name.to_string(), FakeRouter::default());
                    String::new()
                }
                ["lr-del", name] => {
                    if self.routers.remove(*name).is_none() && !if_exists {
                        return Err(format!("{name}: router name not found"));
                    }
                    self.router_ports.retain(|_, p| p.router != *name);
                    String::new()
                }
                ["lrp-add", router, name, mac, networks @ ..] => {
                    if !self.routers.contains_key(*router) {
                        return Err(format!("{router}: router name not found"));
                    }
                    if self.router_ports.contains_key(*name) && !may_exist {
                        return Err(format!("{name}: a port with this name already exists"));
                    }
                    self.router_ports.insert(name.to_string(), FakeRouterPort {
                        router: router.to_string(),
                        mac: mac.to_string(),
                        networks: networks.iter().map(|n| n.to_string()).collect(),
                        columns: BTreeMap::new(),
                    });
                    String::new()
                }
                ["lrp-del", name] => {
                    if self.router_ports.remove(*name).is_none() && !if_exists {
                        return Err(format!("{name}: port name not found"));
                    }
                    String::new()
                }
                ["ls-add", name] => {
                    if self.switches.contains_key(*name) {
                        return Err(format!("{name}: a switch with this name already exists"));
                    }
                    self.switches.insert(name.to_string(), FakeSwitch::default());
                    String::new()
                }
                ["ls-del", name] => {
                    if self.switches.remove(*name).is_none() && !if_exists {
                        return Err(format!("{name}: switch name not found"));
                    }
                    self.switch_ports.retain(|_, p| p.switch != *name);
                    String::new()
                }
                ["lsp-add", switch, name] => {
                    if !self.switches.contains_key(*switch) {
                        return Err(format!("{switch}: switch name not found"));
                    }
                    if self.switch_ports.contains_key(*name) {
                        return Err(format!("{name}: a port with this name already exists"));
                    }
                    self.switch_ports.insert(name.to_string(), FakeSwitchPort {
                        switch: switch.to_string(),
                        columns: BTreeMap::new(),
                    });
                    String::new()
                }
                ["lsp-del", name] => {
                    if self.switch_ports.remove(*name).is_none() && !if_exists {
                        return Err(format!("{name}: port name not found"));
                    }
                    String::new()
                }
                ["lr-route-add", router, prefix, next_hop] => {
                    let lr = self.routers.get_mut(*router)
                        .ok_or_else(|| format!("{router}: router name not found"))?;
                    if lr.routes.contains_key(*prefix) && !may_exist {
                        return Err(format!("duplicate prefix: {prefix}"));
                    }
                    lr.routes.insert(prefix.to_string(), next_hop.to_string());
                    String::new()
                }
                ["lr-route-del", router, prefix] => {
                    match self.routers.get_mut(*router) {
                        Some(lr) => {
                            if lr.routes.remove(*prefix).is_none() && !if_exists {
                                return Err(format!("no matching route: prefix \"{prefix}\""));
                            }
                        }
                        None if if_exists => {}
                        None => return Err(format!("{router}: router name not found")),
                    }
                    String::new()
                }
                ["lr-nat-add", router, "snat", external, logical] => {
                    let lr = self.routers.get_mut(*router)
                        .ok_or_else(|| format!("{router}: router name not found"))?;
                    if lr.snat.contains_key(*logical) && !may_exist {
                        return Err(format!("{router}: a NAT with this type (snat) and logical_ip ({logical}) already exists"));
                    }
                    lr.snat.insert(logical.to_string(), external.to_string());
                    String::new()
                }
                ["lr-nat-del", router, "snat", logical] => {
                    match self.routers.get_mut(*router) {
                        Some(lr) => {
                            if lr.snat.remove(*logical).is_none() && !if_exists {
                                return Err(format!("no matching NAT with the type (snat) and logical_ip ({logical})"));
                            }
                        }
                        None if if_exists => {}
                        None => return Err(format!("{router}: router name not found")),
                    }
                    String::new()
                }
                ["set", table, record, columns @ ..] => {
                    self.nb_set(table, record, columns)?;
                    String::new()
                }
                ["clear", table, record, column] => {
                    match self.nb_columns(table, record)? {
                        Some(columns) => {
                            let prefix = format!("{column}:");
                            columns.retain(|k, _| k != column && !k.starts_with(&prefix));
                        }
                        None if if_exists => {}
                        None => return Err(format!("no row \"{record}\" in table {table}")),
                    }
                    String::new()
                }
                ["ha-chassis-group-add", group] => {
                    if self.ha_groups.contains_key(*group) {
                        return Err(format!("{group}: an ha chassis group with this name already exists"));
                    }
                    let uuid = self.new_uuid();
                    self.ha_groups.insert(group.to_string(), FakeHaGroup { uuid, chassis: BTreeMap::new() });
                    String::new()
                }
                ["ha-chassis-group-add-chassis", group, chassis, priority] => {
                    let priority: u8 = priority.parse()
                        .map_err(|_| format!("{priority}: invalid priority"))?;
                    let ha = self.ha_groups.get_mut(*group)
                        .ok_or_else(|| format!("{group}: ha chassis group name not found"))?;
                    ha.chassis.insert(chassis.to_string(), priority);
                    String::new()
                }
                ["find", table, conditions @ ..] => self.nb_find(table, conditions)?,
                ["create", "dhcp_options", columns @ ..] => {
                    let mut record = FakeDhcpOptions::default();
                    for column in columns.iter() {
                        let (key, value) = assignment(column)?;
                        if key == "cidr" {
                            record.cidr = value;
                        } else if let Some(id) = key.strip_prefix("external_ids:") {
                            record.external_ids.insert(id.to_string(), value);
                        } else {
                            return Err(format!("{key}: unknown column in dhcp_options"));
                        }
                    }
                    let uuid = self.new_uuid();
                    self.dhcp_options.insert(uuid.clone(), record);
                    format!("{uuid}\n")
                }
                ["dhcp-options-set-options", uuid, options @ ..] => {
                    let record = self.dhcp_options.get_mut(*uuid)
                        .ok_or_else(|| format!("{uuid}: dhcp options UUID not found"))?;
                    record.options.clear();
                    for option in options.iter() {
                        let (key, value) = assignment(option)?;
                        record.options.insert(key.to_string(), value);
                    }
                    String::new()
                }
                ["destroy", "dhcp_options", uuid] => {
                    if self.dhcp_options.remove(*uuid).is_none() {
                        return Err(format!("no row \"{uuid}\" in table DHCP_Options"));
                    }
                    String::new()
                }
                _ => return Err(format!("unknown command '{}'", cmd.join(" "))),
            };
        }
        Ok(out)
    }

    fn nb_columns(&mut self, table: &str, record: &str) -> Result<Option<&mut BTreeMap<String, String>>, String> {
        let columns = match table {
            "logical_router" => self.routers.get_mut(record).map(|r| &mut r.columns),
            "logical_router_port" => self.router_ports.get_mut(record).map(|r| &mut r.columns),
            "logical_switch" => self.switches.get_mut(record).map(|r| &mut r.columns),
            "logical_switch_port" => self.switch_ports.get_mut(record).map(|r| &mut r.columns),
            _ => return Err(format!("unknown table \"{table}\"")),
        };
        Ok(columns)
    }

    fn nb_set(&mut self, table: &str, record: &str, assignments: &[&str]) -> Result<(), String> {
        if table == "logical_router_port" {
            for arg in assignments {
                let (key, value) = assignment(arg)?;
                if key == "ha_chassis_group" && !self.ha_groups.values().any(|g| g.uuid == value) {
                    return Err(format!("{value}: no ha_chassis_group with this UUID"));
                }
            }
        }
        let columns = self.nb_columns(table, record)?
            .ok_or_else(|| format!("no row \"{record}\" in table {table}"))?;
        for arg in assignments {
            let (key, value) = assignment(arg)?;
            columns.insert(key.to_string(), value);
        }
        if table == "logical_switch_port" {
            self.assign_dynamic_address(record);
        }
        Ok(())
    }

    /// What northd does for a `"<mac> dynamic"` port: the first free address of the switch subnet.
    fn assign_dynamic_address(&mut self, port: &str) {
        let Some(lsp) = self.switch_ports.get(port).cloned() else { return };
        let Some(mac) = lsp.columns.get("addresses").and_then(|a| a.strip_suffix(" dynamic")) else { return };
        let Some(switch) = self.switches.get(&lsp.switch) else { return };
        let Some(subnet) = switch.columns.get("other_config:subnet").and_then(|s| s.parse::<Ipv4Network>().ok()) else { return };
        let excluded: Vec<Ipv4Addr> = switch.columns.get("other_config:exclude_ips")
            .map(|e| e.split_whitespace().filter_map(|ip| ip.parse().ok()).collect())
            .unwrap_or_default();
        let taken: Vec<String> = self.switch_ports.iter()
            .filter(|(name, p)| p.switch == lsp.switch && name.as_str() != port)
            .filter_map(|(_, p)| p.columns.get("dynamic_addresses").cloned())
            .collect();
        let free = subnet.iter()
            .skip(1)
            .filter(|ip| *ip != subnet.broadcast())
            .find(|ip| !excluded.contains(ip) && !taken.iter().any(|t| t.ends_with(&format!(" {ip}"))));
        if let (Some(ip), Some(lsp)) = (free, self.switch_ports.get_mut(port)) {
            let dynamic = format!("{mac} {ip}");
            lsp.columns.insert("dynamic_addresses".to_string(), dynamic);
        }
    }

    fn nb_find(&self, table: &str, conditions: &[&str]) -> Outcome {
        let conditions = conditions.iter()
            .map(|c| assignment(c))
            .collect::<Result<Vec<_>, _>>()?;
        let uuids: Vec<String> = match table {
            "ha_chassis_group" => self.ha_groups.iter()
                .filter(|(name, _)| conditions.iter().all(|(k, v)| *k == "name" && v == *name))
                .map(|(_, g)| g.uuid.clone())
                .collect(),
            "dhcp_options" => self.dhcp_options.iter()
                .filter(|(_, r)| conditions.iter().all(|(k, v)| r.matches(k, v)))
                .map(|(uuid, _)| uuid.clone())
                .collect(),
            _ => return Err(format!("unknown table \"{table}\"")),
        };
        Ok(lines(uuids))
    }

    fn vsctl(&mut self, args: &[&str]) -> Outcome {
        let mut out = String::new();
        for (opts, cmd) in segments(args) {
            let if_exists = opts.contains(&"--if-exists");
            let may_exist = opts.contains(&"--may-exist");
            out = match cmd.as_slice() {
                ["add-port", bridge, port] => {
                    if self.ovs_ports.contains_key(*port) {
                        if !may_exist {
                            return Err(format!("cannot create a port named {port} because a port named {port} already exists"));
                        }
                    } else {
                        self.ovs_ports.insert(port.to_string(), FakeOvsPort {
                            bridge: bridge.to_string(),
                            external_ids: BTreeMap::new(),
                        });
                    }
                    String::new()
                }
                ["del-port", bridge, port] => {
                    match self.ovs_ports.get(*port) {
                        Some(p) if p.bridge != *bridge => {
                            return Err(format!("bridge {bridge} does not have a port {port}"));
                        }
                        Some(_) => {
                            self.ovs_ports.remove(*port);
                        }
                        None if if_exists => {}
                        None => return Err(format!("no port named {port}")),
                    }
                    String::new()
                }
                ["del-port", port] => {
                    if self.ovs_ports.remove(*port).is_none() && !if_exists {
                        return Err(format!("no port named {port}"));
                    }
                    String::new()
                }
                ["set", "interface", port, columns @ ..] => {
                    let ovs_port = self.ovs_ports.get_mut(*port)
                        .ok_or_else(|| format!("no row \"{port}\" in table Interface"))?;
                    for column in columns.iter() {
                        let (key, value) = assignment(column)?;
                        let id = key.strip_prefix("external_ids:")
                            .ok_or_else(|| format!("{key}: unsupported interface column"))?;
                        ovs_port.external_ids.insert(id.to_string(), value);
                    }
                    String::new()
                }
                ["set", "open_vswitch", ".", columns @ ..] => {
                    for column in columns.iter() {
                        let (key, value) = assignment(column)?;
                        let id = key.strip_prefix("external_ids:")
                            .ok_or_else(|| format!("{key}: unsupported open_vswitch column"))?;
                        self.ovs_external_ids.insert(id.to_string(), value);
                    }
                    String::new()
                }
                ["get", "open_vswitch", ".", "external_ids:system-id"] => format!("\"{}\"\n", self.system_id),
                ["find", "interface", condition] => {
                    let (key, value) = assignment(condition)?;
                    let id = key.strip_prefix("external_ids:")
                        .ok_or_else(|| format!("{key}: unsupported interface column"))?;
                    lines(self.ovs_ports.iter()
                        .filter(|(_, p)| p.external_ids.get(id) == Some(&value))
                        .map(|(name, _)| name.clone()))
                }
                _ => return Err(format!("unknown command '{}'", cmd.join(" "))),
            };
        }
        Ok(out)
    }

    fn stack(&self, ns: Option<&str>) -> Result<&FakeNetStack, String> {
        match ns {
            None => Ok(&self.host),
            Some(name) => self.namespaces.get(name)
                .ok_or_else(|| format!("Cannot open network namespace \"{name}\"")),
        }
    }

    fn stack_mut(&mut self, ns: Option<&str>) -> Result<&mut FakeNetStack, String> {
        match ns {
            None => Ok(&mut self.host),
            Some(name) => self.namespaces.get_mut(name)
                .ok_or_else(|| format!("Cannot open network namespace \"{name}\"")),
        }
    }

    fn stacks_mut(&mut self) -> impl Iterator<Item = &mut FakeNetStack> {
        std::iter::once(&mut self.host).chain(self.namespaces.values_mut())
    }

    /// The other end of a veth, wherever it lives now.
    fn delete_peer(&mut self, name: &str, link: &FakeLink) {
        if let Some(peer) = &link.peer {
            for stack in self.stacks_mut() {
                if stack.links.get(peer).map_or(false, |l| l.peer.as_deref() == Some(name)) {
                    stack.remove_link(peer);
                    break;
                }
            }
        }
    }

    fn link_mut<'a>(stack: &'a mut FakeNetStack, name: &str) -> Result<&'a mut FakeLink, String> {
        stack.links.get_mut(name).ok_or_else(|| format!("Cannot find device \"{name}\""))
    }

    fn ip(&mut self, ns: Option<&str>, args: &[&str]) -> Outcome {
        match args {
            ["route", "get", _] => {
                Ok(format!("8.8.8.8 via 10.109.89.1 dev eth0 src {} uid 0 \n    cache \n", self.encap_ip))
            }
            ["-4", "route", "show", "table", "all"] => Ok(lines(self.stack(ns)?.routes.clone())),
            ["link", "add", "dev", host, "type", "veth", "peer", "name", peer] => {
                let stack = self.stack_mut(ns)?;
                for name in [host, peer] {
                    if name.len() > 15 {
                        return Err(format!("\"{name}\" not a valid ifname"));
                    }
                    if stack.links.contains_key(*name) {
                        return Err("RTNETLINK answers: File exists".to_string());
                    }
                }
                stack.links.insert(host.to_string(), FakeLink { peer: Some(peer.to_string()), ..Default::default() });
                stack.links.insert(peer.to_string(), FakeLink { peer: Some(host.to_string()), ..Default::default() });
                Ok(String::new())
            }
            ["link", "del", "dev", name] | ["link", "del", name] => {
                let link = self.stack_mut(ns)?.remove_link(name)
                    .ok_or_else(|| format!("Cannot find device \"{name}\""))?;
                self.delete_peer(name, &link);
                Ok(String::new())
            }
            ["link", "set", "dev", name, "up"] => {
                Self::link_mut(self.stack_mut(ns)?, name)?.up = true;
                Ok(String::new())
            }
            ["link", "set", "dev", name, "address", mac] => {
                Self::link_mut(self.stack_mut(ns)?, name)?.mac = Some(mac.to_string());
                Ok(String::new())
            }
            ["link", "set", "dev", name, "netns", target] => {
                if !self.namespaces.contains_key(*target) {
                    return Err(format!("Cannot open network namespace \"{target}\""));
                }
                if self.namespaces.get(*target).map_or(false, |s| s.links.contains_key(*name)) {
                    return Err("RTNETLINK answers: File exists".to_string());
                }
                let mut link = self.stack_mut(ns)?.remove_link(name)
                    .ok_or_else(|| format!("Cannot find device \"{name}\""))?;
                link.up = false;
                link.addresses.clear();
                if let Some(stack) = self.namespaces.get_mut(*target) {
                    stack.links.insert(name.to_string(), link);
                }
                Ok(String::new())
            }
            ["link", "set", "dev", name, "name", new_name] => {
                let stack = self.stack_mut(ns)?;
                if stack.links.contains_key(*new_name) {
                    return Err("RTNETLINK answers: File exists".to_string());
                }
                let link = Self::link_mut(stack, name)?;
                if link.up {
                    return Err("RTNETLINK answers: Device or resource busy".to_string());
                }
                let link = stack.remove_link(name).unwrap_or_default();
                let peer = link.peer.clone();
                stack.links.insert(new_name.to_string(), link);
                if let Some(peer) = peer {
                    for stack in self.stacks_mut() {
                        if let Some(other) = stack.links.get_mut(&peer) {
                            if other.peer.as_deref() == Some(*name) {
                                other.peer = Some(new_name.to_string());
                                break;
                            }
                        }
                    }
                }
                Ok(String::new())
            }
            ["addr", "add", address, "dev", name] | ["-6", "addr", "add", address, "dev", name] => {
                let link = Self::link_mut(self.stack_mut(ns)?, name)?;
                if link.addresses.iter().any(|a| a == address) {
                    return Err("RTNETLINK answers: File exists".to_string());
                }
                link.addresses.push(address.to_string());
                Ok(String::new())
            }
            ["route", "add", route @ ..] => Self::add_route(self.stack_mut(ns)?, route, false),
            ["-6", "route", "add", route @ ..] => Self::add_route(self.stack_mut(ns)?, route, true),
            ["netns", "add", name] => {
                if ns.is_some() || self.namespaces.contains_key(*name) {
                    return Err(format!("Cannot create namespace file \"/run/netns/{name}\": File exists"));
                }
                let mut stack = FakeNetStack::default();
                stack.links.insert("lo".to_string(), FakeLink::default());
                self.namespaces.insert(name.to_string(), stack);
                Ok(String::new())
            }
            ["netns", "del", name] => {
                let stack = self.namespaces.remove(*name)
                    .ok_or_else(|| format!("Cannot remove namespace file \"/run/netns/{name}\": No such file or directory"))?;
                for (link_name, link) in &stack.links {
                    self.delete_peer(link_name, link);
                }
                Ok(String::new())
            }
            ["netns", "exec", name, inner @ ..] => {
                if ns.is_some() {
                    return Err("nested netns exec".to_string());
                }
                self.stack(Some(*name))?;
                self.dispatch(Some(*name), inner)
            }
            _ => Err(format!("Object \"{}\" is unknown, try \"ip help\".", args.join(" "))),
        }
    }

    fn add_route(stack: &mut FakeNetStack, route: &[&str], v6: bool) -> Outcome {
        let line = route.join(" ");
        if let Some(pos) = route.iter().position(|t| *t == "dev") {
            let dev = route.get(pos + 1).ok_or_else(|| "Command line is not complete".to_string())?;
            if !stack.links.contains_key(*dev) {
                return Err(format!("Cannot find device \"{dev}\""));
            }
        }
        let routes = if v6 { &mut stack.routes6 } else { &mut stack.routes };
        if routes.contains(&line) {
            return Err("RTNETLINK answers: File exists".to_string());
        }
        routes.push(line);
        Ok(String::new())
    }

    fn sysctl(&mut self, ns: Option<&str>, args: &[&str]) -> Outcome {
        let stack = self.stack_mut(ns)?;
        let assignments = match args {
            ["-w", rest @ ..] => rest,
            _ => args,
        };
        for arg in assignments {
            let (key, value) = assignment(arg)?;
            let parts: Vec<&str> = key.split('.').collect();
            if let ["net", _, "conf", iface, ..] = parts.as_slice() {
                if *iface != "all" && *iface != "default" && !stack.links.contains_key(*iface) {
                    return Err(format!("sysctl: cannot stat /proc/sys/{}: No such file or directory", key.replace('.', "/")));
                }
            }
            stack.sysctls.insert(key.to_string(), value);
        }
        Ok(String::new())
    }

    fn iptables(&mut self, ns: Option<&str>, program: &str, args: &[&str]) -> Outcome {
        let stack = self.stack_mut(ns)?;
        match args {
            ["-t", "nat", "-A", "POSTROUTING", "-o", iface, "-j", "MASQUERADE"] => {
                if !stack.links.contains_key(*iface) {
                    return Err(format!("{program}: interface {iface} not found"));
                }
                stack.nat_rules.push(format!("{program} {}", args.join(" ")));
                Ok(String::new())
            }
            _ => Err(format!("{program}: unsupported rule {}", args.join(" "))),
        }
    }

    fn lxc(&mut self, args: &[&str]) -> Outcome {
        match args {
            ["delete", "-f", name] => {
                self.workloads.remove(*name)
                    .ok_or_else(|| "Error: Instance not found".to_string())?;
                Ok(String::new())
            }
            ["init", image, name] => {
                if self.workloads.contains_key(*name) {
                    return Err("Error: Failed creating instance record: Instance is already defined".to_string());
                }
                self.workloads.insert(name.to_string(), FakeWorkload { image: image.to_string(), ..Default::default() });
                Ok(String::new())
            }
            ["config", "device", "add", name, "eth0", "nic", settings @ ..] => {
                let parent = settings.iter()
                    .find_map(|s| s.strip_prefix("parent="))
                    .ok_or_else(|| "Error: Missing parent for physical nic".to_string())?;
                if !self.host.links.contains_key(parent) {
                    return Err(format!("Error: Invalid devices: Device validation failed for \"eth0\": Parent {parent} not found"));
                }
                let workload = self.workloads.get_mut(*name)
                    .ok_or_else(|| "Error: Instance not found".to_string())?;
                workload.nic_parent = Some(parent.to_string());
                Ok(String::new())
            }
            ["start", name] => {
                let workload = self.workloads.get_mut(*name)
                    .ok_or_else(|| "Error: Instance not found".to_string())?;
                workload.running = true;
                Ok(String::new())
            }
            _ => Err(format!("Error: unknown command \"{}\"", args.join(" "))),
        }
    }
}

/// A host that applies the commands it is given to an in memory model. Every command is applied
/// in full or not at all, chained commands included, like an OVSDB transaction.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    failures: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn state(&self) -> HostState {
        self.state.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn add_link(&self, name: &str) {
        self.state.lock().unwrap().host.links.insert(name.to_string(), FakeLink::default());
    }

    pub fn add_route(&self, line: &str) {
        self.state.lock().unwrap().host.routes.push(line.to_string());
    }

    /// The next command containing `pattern` fails without changing anything.
    pub fn fail_next(&self, pattern: &str) {
        self.failures.lock().unwrap().push(pattern.to_string());
    }

    fn execute(&self, cmd: &[String]) -> Result<String, ProvisionError> {
        let command = cmd.join(" ");
        self.commands.lock().unwrap().push(command.clone());
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(pos) = failures.iter().position(|p| command.contains(p.as_str())) {
                failures.remove(pos);
                return Err(ProvisionError::CommandFailed {
                    command,
                    stderr: "injected failure".to_string(),
                    transient: false,
                });
            }
        }
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        let mut state = self.state.lock().unwrap();
        let mut scratch = state.clone();
        match scratch.dispatch(None, &args) {
            Ok(out) => {
                *state = scratch;
                Ok(out)
            }
            Err(stderr) => Err(ProvisionError::CommandFailed {
                command,
                stderr,
                transient: false,
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        Ok(self.execute(&cmd)?)
    }

    async fn run_allow_fail(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        match self.execute(&cmd) {
            Ok(out) => Ok(out),
            Err(err) => {
                tracing::warn!("{err}");
                Ok(String::new())
            }
        }
    }
}
