use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use crate::addressing::first_free_ipv4;

/// On disk form of the reservations, project name to the address it holds.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ReservationTable {
    reservations: BTreeMap<String, Reservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reservation {
    address: Ipv4Addr,
    /// topology file the project was defined in when the address was claimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topology: Option<String>,
}

/// Link-local addresses handed out to namespace uplinks. The route table alone can't be trusted
/// to say what is free, as two runs can scan it before either has added its route, so every
/// claim is made under an exclusive lock on the reservation file and recorded in it.
#[derive(Debug, Clone)]
pub struct LinkLocalReservations {
    path: PathBuf,
    base: Ipv4Addr,
    range_size: u32,
    owner: Option<String>,
}

impl LinkLocalReservations {
    pub fn new<P: AsRef<Path>>(path: P, base: Ipv4Addr, range_size: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            base,
            range_size,
            owner: None,
        }
    }

    /// Record claims as made for the topology file `owner`, so they can be found again once their
    /// project is removed from it.
    pub fn owned_by(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    /// The address reserved for `project`, reserving the first free one if there is none yet.
    /// `in_use` are the addresses currently seen in the host route table.
    pub fn claim(
        &self,
        project: &str,
        in_use: &HashSet<Ipv4Addr>,
    ) -> anyhow::Result<Ipv4Addr> {
        self.with_locked_table(|table| {
            if let Some(existing) = table.reservations.get(project) {
                return Ok((existing.address, false));
            }
            let mut taken = in_use.clone();
            taken.extend(table.reservations.values().map(|r| r.address));
            let addr = first_free_ipv4(self.base, self.range_size, &taken)?;
            table.reservations.insert(project.to_string(), Reservation {
                address: addr,
                topology: self.owner.clone(),
            });
            tracing::info!("reserved link-local address {addr} for project {project}");
            Ok((addr, true))
        })
    }

    /// Give up the reservation of `project`, returns the address it had.
    pub fn release(
        &self,
        project: &str,
    ) -> anyhow::Result<Option<Ipv4Addr>> {
        self.with_locked_table(|table| {
            let released = table.reservations.remove(project).map(|r| r.address);
            if let Some(addr) = released {
                tracing::info!("released link-local address {addr} of project {project}");
            }
            Ok((released, released.is_some()))
        })
    }

    pub fn reserved(
        &self,
        project: &str,
    ) -> anyhow::Result<Option<Ipv4Addr>> {
        self.with_locked_table(|table| Ok((table.reservations.get(project).map(|r| r.address), false)))
    }

    /// Release what was claimed for projects of the owning topology file that are no longer in
    /// `defined`. Claims of other topology files are left alone. Returns the released projects.
    pub fn release_removed(
        &self,
        defined: &[String],
    ) -> anyhow::Result<Vec<String>> {
        let Some(owner) = &self.owner else {
            return Ok(Vec::new());
        };
        self.with_locked_table(|table| {
            let removed: Vec<String> = table.reservations.iter()
                .filter(|(project, r)| r.topology.as_ref() == Some(owner) && !defined.contains(*project))
                .map(|(project, _)| project.clone())
                .collect();
            for project in &removed {
                if let Some(r) = table.reservations.remove(project) {
                    tracing::info!("released link-local address {} of project {project}, no longer in {owner}", r.address);
                }
            }
            let changed = !removed.is_empty();
            Ok((removed, changed))
        })
    }

    /// Run `f` with the table loaded while holding an exclusive lock on the file. `f` returns its
    /// result and whether the table changed and has to be written back.
    fn with_locked_table<T>(
        &self,
        f: impl FnOnce(&mut ReservationTable) -> anyhow::Result<(T, bool)>,
    ) -> anyhow::Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating folder for reservation file {:?}", &self.path))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("opening reservation file {:?}", &self.path))?;
        // blocks until any other run is done with the table, released on drop
        let mut lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| anyhow!("locking reservation file {:?}: {errno}", &self.path))?;
        let file: &mut File = &mut lock;

        let mut text = String::new();
        file.read_to_string(&mut text)
            .with_context(|| format!("reading reservation file {:?}", &self.path))?;
        let mut table: ReservationTable = if text.trim().is_empty() {
            ReservationTable::default()
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("parsing reservation file {:?}", &self.path))?
        };

        let (result, changed) = f(&mut table)?;
        if changed {
            let text = serde_json::to_string_pretty(&table)?;
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        Ok(result)
    }
}
