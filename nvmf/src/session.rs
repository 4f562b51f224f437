// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host-attached virtual controller state.

use crate::request::Request;
use crate::subsystem::Subsystem;
use crate::subsystem::SubsystemBacking;
use crate::target::TargetCaps;
use nvmf_spec::Cap;
use nvmf_spec::Cc;
use nvmf_spec::Csts;
use nvmf_spec::IdentifyController;
use nvmf_spec::Status;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use zerocopy::FromZeros;

/// Keep-alive granularity reported in the Identify data, in 100 ms units.
const KAS_100MS_UNITS: u16 = 10;

/// SGLS: data block and keyed data block descriptors supported.
const SGLS_SUPPORTED: u32 = 1 | (1 << 2);

/// The virtual controller property block: the registers a host can reach
/// through Property Get/Set. The register semantics themselves live in the
/// [`PropertyFile`](crate::properties::PropertyFile) collaborator.
#[derive(Debug, Copy, Clone)]
pub struct ControllerProperties {
    /// Controller Capabilities.
    pub cap: Cap,
    /// Controller Configuration; `cc.en` gates non-fabrics commands.
    pub cc: Cc,
    /// Controller Status.
    pub csts: Csts,
}

struct SessionState {
    num_connections: u16,
    /// At most one Async Event Request may be parked here.
    aer: Option<Request>,
    /// Last Keep Alive arrival; the timeout sweep is deferred.
    keep_alive: Option<Instant>,
}

/// A host-attached controller instance.
///
/// Allocated on the first admin-queue Connect against a subsystem and pinned
/// to the subsystem's poller; I/O-queue Connects attach to it by controller
/// ID.
pub struct Session {
    subsystem: Arc<Subsystem>,
    cntlid: u16,
    max_connections_allowed: u16,
    vcdata: Box<IdentifyController>,
    props: Mutex<ControllerProperties>,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(subsystem: Arc<Subsystem>, cntlid: u16, caps: &TargetCaps) -> Arc<Self> {
        let vcdata = virtual_controller_data(&subsystem, cntlid, caps);
        Arc::new(Self {
            subsystem,
            cntlid,
            max_connections_allowed: caps.max_queues_per_session,
            vcdata,
            props: Mutex::new(ControllerProperties {
                cap: Cap::new()
                    .with_mqes(caps.max_queue_depth - 1)
                    .with_cqr(true)
                    .with_to(1)
                    .with_css(1),
                cc: Cc::new(),
                csts: Csts::new(),
            }),
            state: Mutex::new(SessionState {
                num_connections: 0,
                aer: None,
                keep_alive: None,
            }),
        })
    }

    /// The controller ID reported in the Connect response.
    pub fn cntlid(&self) -> u16 {
        self.cntlid
    }

    /// The subsystem this session is bound to.
    pub fn subsystem(&self) -> &Arc<Subsystem> {
        &self.subsystem
    }

    /// The virtual controller data served by the virtualized Identify
    /// Controller path.
    pub fn controller_data(&self) -> &IdentifyController {
        &self.vcdata
    }

    /// A snapshot of the property block.
    pub fn properties(&self) -> ControllerProperties {
        *self.props.lock()
    }

    /// Mutates the property block; used by the property register file.
    pub fn update_properties(&self, f: impl FnOnce(&mut ControllerProperties)) {
        f(&mut self.props.lock());
    }

    /// Whether the controller enable bit is set.
    pub fn enabled(&self) -> bool {
        self.props.lock().cc.en()
    }

    /// Maximum queue pair connections this session admits.
    pub fn max_connections_allowed(&self) -> u16 {
        self.max_connections_allowed
    }

    /// Currently attached queue pair connections.
    pub fn num_connections(&self) -> u16 {
        self.state.lock().num_connections
    }

    /// Counts a new queue pair connection, refusing beyond the limit.
    pub(crate) fn try_add_connection(&self) -> bool {
        let mut state = self.state.lock();
        if state.num_connections >= self.max_connections_allowed {
            return false;
        }
        state.num_connections += 1;
        true
    }

    /// Detaches one connection. Tearing down the last connection tears down
    /// the session.
    pub fn disconnect(&self) {
        let last = {
            let mut state = self.state.lock();
            state.num_connections = state.num_connections.saturating_sub(1);
            state.num_connections == 0
        };
        if last {
            self.teardown();
        }
    }

    /// Parks an Async Event Request in the session's single AER slot.
    /// Returns the request back if the slot is already occupied.
    pub(crate) fn park_aer(&self, req: Request) -> Option<Request> {
        let mut state = self.state.lock();
        match state.aer {
            None => {
                state.aer = Some(req);
                None
            }
            Some(_) => Some(req),
        }
    }

    /// Releases the pinned Async Event Request, if any, without completing
    /// it.
    pub fn take_aer(&self) -> Option<Request> {
        self.state.lock().aer.take()
    }

    /// Records a Keep Alive arrival.
    pub(crate) fn touch_keep_alive(&self) {
        self.state.lock().keep_alive = Some(Instant::now());
    }

    /// The last recorded Keep Alive arrival, for a timeout sweep to consult.
    pub fn last_keep_alive(&self) -> Option<Instant> {
        self.state.lock().keep_alive
    }

    /// Tears the session down: the pinned Async Event Request, if any, is
    /// completed as aborted, and the session leaves the subsystem's table.
    pub fn teardown(&self) {
        if let Some(mut req) = self.take_aer() {
            tracing::debug!(cntlid = self.cntlid, "aborting pinned aer at teardown");
            req.set_status(Status::ABORTED_SQ_DELETION);
            let _ = req.complete();
        }
        self.subsystem.remove_session(self.cntlid);
    }
}

/// Builds the Identify Controller payload a session serves: the backing
/// controller's own data (or a synthetic identity for discovery), with the
/// fabrics-visible fields rewritten.
fn virtual_controller_data(
    subsystem: &Subsystem,
    cntlid: u16,
    caps: &TargetCaps,
) -> Box<IdentifyController> {
    let mut data = match subsystem.backing() {
        SubsystemBacking::Nvme { ctrlr, .. } => Box::new(ctrlr.controller_data()),
        SubsystemBacking::Discovery => Box::new(IdentifyController::new_zeroed()),
    };

    data.cntlid = cntlid;
    // One AER slot per session; AERL is zero's based.
    data.aerl = 0;
    data.kas = KAS_100MS_UNITS;
    data.maxcmd = caps.max_queue_depth;
    data.sgls = SGLS_SUPPORTED;

    data.subnqn = [0; 256];
    let nqn = subsystem.nqn().as_bytes();
    data.subnqn[..nqn.len()].copy_from_slice(nqn);

    data
}
