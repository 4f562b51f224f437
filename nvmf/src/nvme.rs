// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! NVMe command processing: the discovery service, the virtualized admin
//! subset, and passthrough.

use crate::backend::Passthrough;
use crate::request::Disposition;
use crate::request::Request;
use crate::session::Session;
use crate::subsystem::SubsystemBacking;
use crate::target::Target;
use nvmf_spec::AdminOpcode;
use nvmf_spec::Cdw10GetFeatures;
use nvmf_spec::Cdw10GetLogPage;
use nvmf_spec::Cdw10Identify;
use nvmf_spec::Cdw10SetFeatures;
use nvmf_spec::Cdw11FeatureNumberOfQueues;
use nvmf_spec::Cns;
use nvmf_spec::Feature;
use nvmf_spec::LogPageIdentifier;
use nvmf_spec::Status;
use nvmf_spec::fabrics::DiscoveryLogPageHeader;
use std::sync::Arc;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// Fills discovery log page entry records.
///
/// The core writes the page header (generation counter and record count are
/// fixed at zero; runtime discovery updates are out of scope) and hands the
/// host-bounded buffer here for the per-entry fields.
pub trait DiscoveryLogFormatter: Send + Sync {
    /// Formats entry records into `page`, which starts with the page header
    /// and is truncated to the length the host asked for.
    fn format(&self, page: &mut [u8]);
}

impl Target {
    /// Serves admin commands on a discovery subsystem: Identify Controller
    /// and the discovery log page, nothing else. Always synchronous.
    pub(crate) fn process_discovery_admin(
        &self,
        mut req: Request,
        session: Arc<Session>,
    ) -> Disposition {
        let cmd = *req.command().nvme();

        let status = match req.data_mut() {
            None => {
                tracing::error!("discovery command with no data buffer");
                Status::INVALID_FIELD_IN_COMMAND
            }
            Some(buf) => match AdminOpcode(cmd.cdw0.opcode()) {
                AdminOpcode::IDENTIFY => {
                    if Cdw10Identify::from(cmd.cdw10).cns() == Cns::CONTROLLER.0 {
                        let src = session.controller_data().as_bytes();
                        let len = buf.len().min(src.len());
                        buf[..len].copy_from_slice(&src[..len]);
                        Status::SUCCESS
                    } else {
                        tracing::error!(cdw10 = cmd.cdw10, "unsupported discovery identify");
                        Status::INVALID_FIELD_IN_COMMAND
                    }
                }
                AdminOpcode::GET_LOG_PAGE => {
                    let lid = Cdw10GetLogPage::from(cmd.cdw10).lid();
                    if LogPageIdentifier(lid) == LogPageIdentifier::DISCOVERY {
                        // Discovery information never changes at runtime, so
                        // the generation counter and record count stay zero.
                        let header = DiscoveryLogPageHeader::new_zeroed();
                        let len = buf.len().min(size_of::<DiscoveryLogPageHeader>());
                        buf[..len].copy_from_slice(&header.as_bytes()[..len]);
                        self.discovery_log.format(buf);
                        Status::SUCCESS
                    } else {
                        tracing::error!(lid, "unsupported discovery log page");
                        Status::INVALID_FIELD_IN_COMMAND
                    }
                }
                opcode => {
                    tracing::error!(opcode = opcode.0, "unsupported discovery opcode");
                    Status::INVALID_FIELD_IN_COMMAND
                }
            },
        };

        req.set_status(status);
        Disposition::Done(req)
    }

    /// Serves admin commands on an NVMe subsystem: a virtualized subset, the
    /// rest passed through to the backing controller.
    pub(crate) fn process_admin(&self, mut req: Request, session: Arc<Session>) -> Disposition {
        let cmd = *req.command().nvme();
        req.set_status(Status::SUCCESS);

        match AdminOpcode(cmd.cdw0.opcode()) {
            AdminOpcode::IDENTIFY => {
                if Cdw10Identify::from(cmd.cdw10).cns() != Cns::CONTROLLER.0 {
                    return self.admin_passthrough(req, &session);
                }
                // Identify Controller comes from the session's virtual
                // controller data, not the backing controller.
                let src = session.controller_data().as_bytes();
                let status = match req.data_mut() {
                    Some(buf) if buf.len() >= src.len() => {
                        buf[..src.len()].copy_from_slice(src);
                        Status::SUCCESS
                    }
                    _ => {
                        tracing::error!("identify controller with missing or short buffer");
                        Status::INVALID_FIELD_IN_COMMAND
                    }
                };
                req.set_status(status);
                Disposition::Done(req)
            }
            AdminOpcode::GET_FEATURES => {
                match Feature(Cdw10GetFeatures::from(cmd.cdw10).fid()) {
                    Feature::NUMBER_OF_QUEUES => {
                        req.response_mut().dw0 = number_of_queues_dw0(&session);
                        Disposition::Done(req)
                    }
                    _ => self.admin_passthrough(req, &session),
                }
            }
            AdminOpcode::SET_FEATURES => {
                match Feature(Cdw10SetFeatures::from(cmd.cdw10).fid()) {
                    Feature::NUMBER_OF_QUEUES => {
                        // Queue counts cannot change once I/O queue pairs are
                        // attached.
                        if session.num_connections() > 1 {
                            tracing::debug!(
                                num_connections = session.num_connections(),
                                "set number of queues with queue pairs already active"
                            );
                            req.set_status(Status::COMMAND_SEQUENCE_ERROR);
                        } else {
                            req.response_mut().dw0 = number_of_queues_dw0(&session);
                        }
                        Disposition::Done(req)
                    }
                    _ => self.admin_passthrough(req, &session),
                }
            }
            AdminOpcode::ASYNCHRONOUS_EVENT_REQUEST => {
                // Park the request in the session until an event fires.
                match session.park_aer(req) {
                    None => Disposition::Pending,
                    Some(mut req) => {
                        tracing::debug!("async event request already active");
                        req.set_status(Status::ASYNC_EVENT_REQUEST_LIMIT_EXCEEDED);
                        Disposition::Done(req)
                    }
                }
            }
            AdminOpcode::KEEP_ALIVE => {
                session.touch_keep_alive();
                Disposition::Done(req)
            }
            opcode @ (AdminOpcode::CREATE_IO_SQ
            | AdminOpcode::CREATE_IO_CQ
            | AdminOpcode::DELETE_IO_SQ
            | AdminOpcode::DELETE_IO_CQ) => {
                // The fabrics model provides queues implicitly through
                // Connect.
                tracing::error!(opcode = opcode.0, "queue management opcode not allowed");
                req.set_status(Status::INVALID_COMMAND_OPCODE);
                Disposition::Done(req)
            }
            _ => self.admin_passthrough(req, &session),
        }
    }

    /// Serves I/O commands: pure passthrough to the subsystem's I/O queue
    /// pair.
    pub(crate) fn process_io(&self, mut req: Request, session: Arc<Session>) -> Disposition {
        let SubsystemBacking::Nvme { io_qpair, .. } = session.subsystem().backing() else {
            unreachable!("i/o command on a discovery subsystem");
        };

        match io_qpair.submit(Passthrough::new(req)) {
            Ok(()) => Disposition::Pending,
            Err(cmd) => {
                tracing::error!("backing controller rejected i/o submission");
                req = cmd.into_request();
                req.set_status(Status::INTERNAL_DEVICE_ERROR);
                Disposition::Done(req)
            }
        }
    }

    fn admin_passthrough(&self, req: Request, session: &Session) -> Disposition {
        let SubsystemBacking::Nvme { ctrlr, .. } = session.subsystem().backing() else {
            unreachable!("admin passthrough on a discovery subsystem");
        };

        let opcode = req.command().nvme().cdw0.opcode();
        tracing::debug!(opcode, "admin command passthrough");
        match ctrlr.submit_admin(Passthrough::new(req)) {
            Ok(()) => Disposition::Pending,
            Err(cmd) => {
                tracing::error!(opcode, "backing controller rejected admin submission");
                let mut req = cmd.into_request();
                req.set_status(Status::INTERNAL_DEVICE_ERROR);
                Disposition::Done(req)
            }
        }
    }
}

/// DW0 of the Number of Queues feature: one less than the allowed queue
/// count in both halves, matching what Connect will actually admit.
fn number_of_queues_dw0(session: &Session) -> u32 {
    let count = session.max_connections_allowed() - 1;
    Cdw11FeatureNumberOfQueues::new()
        .with_nsq(count)
        .with_ncq(count)
        .into()
}
