// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command dispatcher.

use crate::connection::QueueType;
use crate::nvme::DiscoveryLogFormatter;
use crate::poller::EventRing;
use crate::properties::PropertyFile;
use crate::request::Disposition;
use crate::request::Request;
use crate::subsystem::SubsystemRegistry;
use crate::subsystem::SubsystemType;
use crate::transport::TransportError;
use nvmf_spec::CapsuleView;
use nvmf_spec::SglDescriptorSubtype;
use nvmf_spec::SglDescriptorType;
use nvmf_spec::Status;
use std::sync::Arc;

/// Capability limits of a target.
#[derive(Debug, Copy, Clone)]
pub struct TargetCaps {
    /// Maximum queue pair connections (admin plus I/O) per session.
    pub max_queues_per_session: u16,
    /// Maximum submission queue depth accepted at Connect.
    pub max_queue_depth: u16,
}

impl Default for TargetCaps {
    fn default() -> Self {
        Self {
            max_queues_per_session: 4,
            max_queue_depth: 128,
        }
    }
}

/// The command-execution core of an NVMe-oF target.
///
/// [`Target::execute`] is the single entry point from the transport;
/// completion through the transport hook is the single exit.
pub struct Target {
    pub(crate) caps: TargetCaps,
    pub(crate) registry: Arc<dyn SubsystemRegistry>,
    pub(crate) events: Arc<dyn EventRing>,
    pub(crate) properties: Arc<dyn PropertyFile>,
    pub(crate) discovery_log: Arc<dyn DiscoveryLogFormatter>,
}

impl Target {
    /// Creates a target over its external collaborators.
    pub fn new(
        caps: TargetCaps,
        registry: Arc<dyn SubsystemRegistry>,
        events: Arc<dyn EventRing>,
        properties: Arc<dyn PropertyFile>,
        discovery_log: Arc<dyn DiscoveryLogFormatter>,
    ) -> anyhow::Result<Arc<Self>> {
        anyhow::ensure!(
            caps.max_queues_per_session >= 1,
            "a session needs at least its admin queue connection"
        );
        anyhow::ensure!(caps.max_queue_depth >= 2, "queue depth too small");
        Ok(Arc::new(Self {
            caps,
            registry,
            events,
            properties,
            discovery_log,
        }))
    }

    /// The target's capability limits.
    pub fn caps(&self) -> &TargetCaps {
        &self.caps
    }

    /// Executes one received command.
    ///
    /// Synchronous outcomes complete the request inline before returning;
    /// asynchronous ones (Connect hand-off, passthrough, a parked AER)
    /// complete later from their callback or event, in which case this
    /// returns `Ok(())` immediately.
    pub fn execute(self: &Arc<Self>, req: Request) -> Result<(), TransportError> {
        trace_command(&req);
        match self.dispatch(req) {
            Disposition::Done(req) => req.complete(),
            Disposition::Pending => Ok(()),
        }
    }

    fn dispatch(self: &Arc<Self>, mut req: Request) -> Disposition {
        if matches!(req.command().view(), CapsuleView::Fabrics(_)) {
            return self.process_fabrics(req);
        }

        // Only fabrics commands are allowed before Connect and while the
        // controller is disabled.
        let Some(session) = req.connection().session().filter(|s| s.enabled()) else {
            tracing::error!("non-fabrics command sent to a disabled controller");
            req.set_status(Status::COMMAND_SEQUENCE_ERROR);
            return Disposition::Done(req);
        };

        match req.connection().queue_type() {
            QueueType::Admin => match session.subsystem().subtype() {
                SubsystemType::Discovery => self.process_discovery_admin(req, session),
                SubsystemType::Nvme => self.process_admin(req, session),
            },
            QueueType::Io => self.process_io(req, session),
        }
    }
}

/// Emits one observational trace record per received command. Never affects
/// dispatch.
fn trace_command(req: &Request) {
    let queue = match req.connection().queue_type() {
        QueueType::Admin => "admin",
        QueueType::Io => "io",
    };

    match req.command().view() {
        CapsuleView::Fabrics(hdr) => {
            tracing::debug!(queue, fctype = ?hdr.fctype, cid = hdr.cid, "fabrics command capsule");
        }
        CapsuleView::Nvme(cmd) => {
            tracing::debug!(
                queue,
                opcode = cmd.cdw0.opcode(),
                fuse = cmd.cdw0.fuse(),
                cid = cmd.cdw0.cid(),
                nsid = cmd.nsid,
                cdw10 = cmd.cdw10,
                "command capsule"
            );
            let sgl = &cmd.dptr;
            match sgl.descriptor_type() {
                SglDescriptorType::KEYED_DATA_BLOCK => tracing::debug!(
                    address = sgl.address,
                    length = sgl.keyed_length(),
                    key = sgl.key(),
                    invalidate = sgl.subtype() == SglDescriptorSubtype::INVALIDATE_KEY,
                    "keyed sgl data block"
                ),
                SglDescriptorType::DATA_BLOCK => tracing::debug!(
                    address = sgl.address,
                    length = sgl.unkeyed_length(),
                    offset = sgl.subtype() == SglDescriptorSubtype::OFFSET,
                    "sgl data block"
                ),
                ty => {
                    tracing::debug!(sgl_type = ty.0, subtype = sgl.subtype().0, "sgl descriptor")
                }
            }
        }
    }
}
