// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Subsystems and the subsystem registry.

use crate::backend::BackingController;
use crate::backend::BackingQueue;
use crate::session::Session;
use crate::target::TargetCaps;
use parking_lot::Mutex;
use slab::Slab;
use std::sync::Arc;
use thiserror::Error;

/// A malformed NVMe Qualified Name.
#[derive(Debug, Error)]
pub enum NqnError {
    /// The NQN is empty.
    #[error("empty NQN")]
    Empty,
    /// The NQN exceeds the 223-byte maximum.
    #[error("NQN is {0} bytes, longer than the 223 byte maximum")]
    TooLong(usize),
    /// The NQN does not carry the `nqn.` prefix.
    #[error("NQN missing 'nqn.' prefix: {0}")]
    MissingPrefix(String),
}

/// Service type of a subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubsystemType {
    /// The discovery service; no backing controller.
    Discovery,
    /// An NVMe subsystem backed by a physical controller.
    Nvme,
}

/// Backing resources of a subsystem, by service type.
pub enum SubsystemBacking {
    /// Discovery subsystems have no backing controller.
    Discovery,
    /// An NVMe subsystem forwards passthrough commands to a physical
    /// controller, using a single I/O queue pair shared by its sessions.
    Nvme {
        /// The backing controller's admin interface.
        ctrlr: Arc<dyn BackingController>,
        /// The I/O queue pair used for I/O passthrough.
        io_qpair: Arc<dyn BackingQueue>,
    },
}

/// A named subsystem a host can connect to.
pub struct Subsystem {
    nqn: String,
    backing: SubsystemBacking,
    poller_core: u32,
    sessions: Mutex<Slab<Arc<Session>>>,
}

impl Subsystem {
    /// Creates an NVMe subsystem backed by `ctrlr`, pinned to `poller_core`.
    pub fn new_nvme(
        nqn: impl Into<String>,
        poller_core: u32,
        ctrlr: Arc<dyn BackingController>,
        io_qpair: Arc<dyn BackingQueue>,
    ) -> anyhow::Result<Arc<Self>> {
        Self::new(nqn.into(), SubsystemBacking::Nvme { ctrlr, io_qpair }, poller_core)
    }

    /// Creates a discovery service subsystem pinned to `poller_core`.
    pub fn new_discovery(nqn: impl Into<String>, poller_core: u32) -> anyhow::Result<Arc<Self>> {
        Self::new(nqn.into(), SubsystemBacking::Discovery, poller_core)
    }

    fn new(nqn: String, backing: SubsystemBacking, poller_core: u32) -> anyhow::Result<Arc<Self>> {
        validate_nqn(&nqn)?;
        Ok(Arc::new(Self {
            nqn,
            backing,
            poller_core,
            sessions: Mutex::new(Slab::new()),
        }))
    }

    /// The subsystem NQN.
    pub fn nqn(&self) -> &str {
        &self.nqn
    }

    /// The subsystem's service type.
    pub fn subtype(&self) -> SubsystemType {
        match self.backing {
            SubsystemBacking::Discovery => SubsystemType::Discovery,
            SubsystemBacking::Nvme { .. } => SubsystemType::Nvme,
        }
    }

    /// The subsystem's backing resources.
    pub fn backing(&self) -> &SubsystemBacking {
        &self.backing
    }

    /// The CPU core whose poller owns this subsystem and its sessions.
    pub fn poller_core(&self) -> u32 {
        self.poller_core
    }

    /// Allocates a session; the slab slot determines the controller ID
    /// (slot + 1, keeping 0 reserved).
    pub(crate) fn create_session(self: &Arc<Self>, caps: &TargetCaps) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.vacant_entry();
        let cntlid = entry.key() as u16 + 1;
        let session = Session::new(self.clone(), cntlid, caps);
        entry.insert(session.clone());
        session
    }

    /// Looks up a session by controller ID.
    pub fn find_session(&self, cntlid: u16) -> Option<Arc<Session>> {
        let index = (cntlid as usize).checked_sub(1)?;
        self.sessions.lock().get(index).cloned()
    }

    pub(crate) fn remove_session(&self, cntlid: u16) {
        let Some(index) = (cntlid as usize).checked_sub(1) else {
            return;
        };
        let mut sessions = self.sessions.lock();
        if sessions.contains(index) {
            sessions.remove(index);
        }
    }
}

/// Read-only subsystem lookup, keyed by the NQNs carried in the Connect data
/// payload.
pub trait SubsystemRegistry: Send + Sync {
    /// Returns the subsystem named `subnqn`, if it exists and admits
    /// `hostnqn`.
    fn find(&self, subnqn: &[u8], hostnqn: &[u8]) -> Option<Arc<Subsystem>>;
}

/// NQNs are UTF-8, at most 223 bytes, and carry the `nqn.` prefix.
fn validate_nqn(nqn: &str) -> Result<(), NqnError> {
    if nqn.is_empty() {
        return Err(NqnError::Empty);
    }
    if nqn.len() > 223 {
        return Err(NqnError::TooLong(nqn.len()));
    }
    if !nqn.starts_with("nqn.") {
        return Err(NqnError::MissingPrefix(nqn.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nqn_validation() {
        assert!(validate_nqn("nqn.2016-06.io.test:sub1").is_ok());
        assert!(matches!(validate_nqn(""), Err(NqnError::Empty)));
        assert!(matches!(
            validate_nqn("not-an-nqn"),
            Err(NqnError::MissingPrefix(_))
        ));
        let long = format!("nqn.{}", "a".repeat(300));
        assert!(matches!(validate_nqn(&long), Err(NqnError::TooLong(304))));
    }

    #[test]
    fn session_table_allocates_sequential_cntlids() {
        let subsystem = Subsystem::new_discovery("nqn.test.disc", 0).unwrap();
        let caps = TargetCaps::default();

        let first = subsystem.create_session(&caps);
        let second = subsystem.create_session(&caps);
        assert_eq!(first.cntlid(), 1);
        assert_eq!(second.cntlid(), 2);

        assert!(subsystem.find_session(1).is_some());
        assert!(subsystem.find_session(0).is_none());
        assert!(subsystem.find_session(3).is_none());

        // Removing a session frees its controller ID for reuse.
        subsystem.remove_session(1);
        assert!(subsystem.find_session(1).is_none());
        let reused = subsystem.create_session(&caps);
        assert_eq!(reused.cntlid(), 1);
    }
}
