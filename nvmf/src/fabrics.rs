// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fabrics command processing: Connect and Property Get/Set.

use crate::connection::Connection;
use crate::connection::QueueType;
use crate::request::Disposition;
use crate::request::Request;
use crate::session::Session;
use crate::subsystem::Subsystem;
use crate::subsystem::SubsystemType;
use crate::target::Target;
use core::mem::offset_of;
use nvmf_spec::Completion;
use nvmf_spec::Status;
use nvmf_spec::fabrics;
use nvmf_spec::fabrics::ConnectCommand;
use nvmf_spec::fabrics::ConnectData;
use nvmf_spec::fabrics::ConnectResponseInvalid;
use nvmf_spec::fabrics::ConnectResponseSuccess;
use nvmf_spec::fabrics::FabricsCommandType;
use std::sync::Arc;
use zerocopy::FromBytes;

impl Target {
    /// Routes a fabrics capsule by session state, queue class, and `fctype`.
    ///
    /// Before Connect only Connect is legal; afterwards only the property
    /// commands, and only on the admin queue.
    pub(crate) fn process_fabrics(self: &Arc<Self>, mut req: Request) -> Disposition {
        let fctype = req.command().fabrics().fctype;

        let Some(session) = req.connection().session() else {
            if fctype == FabricsCommandType::CONNECT {
                return self.process_connect(req);
            }
            tracing::debug!(?fctype, "fabrics command on an unconnected queue");
            req.set_status(Status::COMMAND_SEQUENCE_ERROR);
            return Disposition::Done(req);
        };

        match req.connection().queue_type() {
            QueueType::Admin => match fctype {
                FabricsCommandType::PROPERTY_SET => self.process_property_set(req, session),
                FabricsCommandType::PROPERTY_GET => self.process_property_get(req, session),
                _ => {
                    tracing::debug!(?fctype, "unsupported fabrics command");
                    req.set_status(Status::INVALID_COMMAND_OPCODE);
                    Disposition::Done(req)
                }
            },
            QueueType::Io => {
                // No I/O-queue fabrics command other than Connect exists.
                tracing::debug!(?fctype, "fabrics command on an i/o queue");
                req.set_status(Status::INVALID_COMMAND_OPCODE);
                Disposition::Done(req)
            }
        }
    }

    /// Validates the Connect data payload, resolves the subsystem, and hands
    /// the request to the poller owning it. Session binding happens there;
    /// this poller keeps no reference after the hand-off.
    fn process_connect(self: &Arc<Self>, mut req: Request) -> Disposition {
        let data = req
            .data()
            .and_then(|buf| ConnectData::read_from_prefix(buf).ok())
            .map(|(data, _)| data);
        let Some(data) = data else {
            tracing::error!(
                length = req.data().map_or(0, <[u8]>::len),
                "connect command data too small"
            );
            req.set_status(Status::INVALID_FIELD_IN_COMMAND);
            return Disposition::Done(req);
        };

        let Some(subsystem) = self.registry.find(data.subnqn_bytes(), data.hostnqn_bytes())
        else {
            tracing::error!(
                subnqn = %String::from_utf8_lossy(data.subnqn_bytes()),
                "connect to unknown subsystem"
            );
            invalid_connect_response(req.response_mut(), 1, offset_of!(ConnectData, subnqn) as u16);
            return Disposition::Done(req);
        };

        let target = self.clone();
        self.events.enqueue(
            subsystem.poller_core(),
            Box::new(move || target.handle_connect(subsystem, data, req)),
        );
        Disposition::Pending
    }

    /// Runs on the poller owning the target subsystem: binds the connection
    /// to a session and completes the Connect.
    fn handle_connect(&self, subsystem: Arc<Subsystem>, data: ConnectData, mut req: Request) {
        let connect = *req.command().connect();
        let conn = req.connection().clone();
        self.session_connect(&subsystem, &connect, &data, &conn, req.response_mut());

        tracing::debug!(
            subnqn = subsystem.nqn(),
            qid = connect.qid,
            status = ?req.response().status.nvme_status(),
            cntlid = req.response().dw0 & 0xffff,
            "connect capsule response"
        );
        let _ = req.complete();
    }

    fn session_connect(
        &self,
        subsystem: &Arc<Subsystem>,
        connect: &ConnectCommand,
        data: &ConnectData,
        conn: &Arc<Connection>,
        rsp: &mut Completion,
    ) {
        if connect.recfmt != 0 {
            tracing::error!(recfmt = connect.recfmt, "unsupported connect record format");
            rsp.status.set_status(Status::FABRICS_INCOMPATIBLE_FORMAT.0);
            return;
        }

        // SQSIZE is zero's based and must fit the target's queue depth.
        if connect.sqsize == 0 || connect.sqsize > self.caps.max_queue_depth - 1 {
            tracing::error!(sqsize = connect.sqsize, "invalid connect sqsize");
            invalid_connect_response(rsp, 0, offset_of!(ConnectCommand, sqsize) as u16);
            return;
        }

        let admin_queue = connect.qid == fabrics::ADMIN_QUEUE_ID;
        if admin_queue != (conn.queue_type() == QueueType::Admin) {
            tracing::error!(qid = connect.qid, "connect qid does not match the queue class");
            invalid_connect_response(rsp, 0, offset_of!(ConnectCommand, qid) as u16);
            return;
        }

        let session = if admin_queue {
            // First connect against the subsystem's admin queue allocates
            // the session.
            subsystem.create_session(&self.caps)
        } else {
            if subsystem.subtype() == SubsystemType::Discovery {
                tracing::error!(subnqn = subsystem.nqn(), "i/o queue connect to discovery");
                invalid_connect_response(rsp, 1, offset_of!(ConnectData, subnqn) as u16);
                return;
            }
            match subsystem.find_session(data.cntlid) {
                Some(session) => session,
                None => {
                    tracing::error!(cntlid = data.cntlid, "connect to unknown controller id");
                    invalid_connect_response(rsp, 1, offset_of!(ConnectData, cntlid) as u16);
                    return;
                }
            }
        };

        if !session.try_add_connection() {
            tracing::error!(
                cntlid = session.cntlid(),
                max = session.max_connections_allowed(),
                "session queue pair limit reached"
            );
            rsp.status.set_status(Status::FABRICS_CONTROLLER_BUSY.0);
            return;
        }

        conn.bind_session(session.clone());
        rsp.status.set_status(Status::SUCCESS.0);
        rsp.dw0 = ConnectResponseSuccess::new()
            .with_cntlid(session.cntlid())
            .into();
    }

    fn process_property_get(&self, mut req: Request, session: Arc<Session>) -> Disposition {
        let cmd = *req.command().property_get();
        self.properties.get(&session, &cmd, req.response_mut());
        Disposition::Done(req)
    }

    fn process_property_set(&self, mut req: Request, session: Arc<Session>) -> Disposition {
        let cmd = *req.command().property_set();
        self.properties.set(&session, &cmd, req.response_mut());
        Disposition::Done(req)
    }
}

/// Populates a Connect response for an invalid parameter, pointing at the
/// offending byte offset (`ipo`) in the capsule (`iattr` 0) or the data
/// payload (`iattr` 1).
fn invalid_connect_response(rsp: &mut Completion, iattr: u8, ipo: u16) {
    rsp.status
        .set_status(Status::FABRICS_CONNECT_INVALID_PARAMETERS.0);
    rsp.dw0 = ConnectResponseInvalid::new()
        .with_iattr(iattr)
        .with_ipo(ipo)
        .into();
}
