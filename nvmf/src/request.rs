// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The request object tying a received capsule to its connection, buffers,
//! and response slot.

use crate::connection::Connection;
use crate::transport::TransportError;
use nvmf_spec::Capsule;
use nvmf_spec::Completion;
use nvmf_spec::Status;
use std::sync::Arc;
use zerocopy::FromZeros;

/// One in-flight command: the received capsule, the connection it arrived
/// on, an optional data buffer, and the response capsule slot.
///
/// Created by the transport when a capsule is received and consumed by
/// [`Request::complete`]. All mutation happens on the owning connection's
/// poller.
pub struct Request {
    conn: Arc<Connection>,
    cmd: Capsule,
    rsp: Completion,
    data: Option<Vec<u8>>,
}

/// How a handler left a request.
///
/// This is the core's synchrony contract: `Done` means the response capsule
/// is populated and the dispatcher completes the request inline; `Pending`
/// means ownership has already moved into a callback, a parked slot, or a
/// cross-poller event, and completion happens later.
#[must_use]
pub(crate) enum Disposition {
    /// Response populated; complete inline.
    Done(Request),
    /// Completion will arrive from a callback or future event.
    Pending,
}

impl Request {
    /// Creates a request for a received `cmd` capsule, with `data` holding
    /// the in-capsule or transport-staged data buffer, if any.
    pub fn new(conn: Arc<Connection>, cmd: Capsule, data: Option<Vec<u8>>) -> Self {
        Self {
            conn,
            cmd,
            rsp: Completion::new_zeroed(),
            data,
        }
    }

    /// The connection this request arrived on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// The received command capsule.
    pub fn command(&self) -> &Capsule {
        &self.cmd
    }

    /// The data buffer, if the command carried one.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Mutable access to the data buffer.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.data.as_deref_mut()
    }

    /// The response capsule slot.
    pub fn response(&self) -> &Completion {
        &self.rsp
    }

    /// Mutable access to the response capsule slot.
    pub fn response_mut(&mut self) -> &mut Completion {
        &mut self.rsp
    }

    /// Sets the response status.
    pub fn set_status(&mut self, status: Status) {
        self.rsp.status.set_status(status.0);
    }

    /// Completes the request: finalizes the response capsule and hands it
    /// back to the transport.
    ///
    /// The queue ID is forced to 0 and the phase bit cleared (the fabrics
    /// completion format), the connection's current SQ head is reported, and
    /// the command identifier is echoed. A transport error is logged and
    /// surfaced; the request is consumed either way.
    pub fn complete(mut self) -> Result<(), TransportError> {
        self.rsp.sqid = 0;
        self.rsp.status.set_phase(false);
        self.rsp.sqhd = self.conn.sq_head();
        self.rsp.cid = self.cmd.cid();

        tracing::debug!(
            cid = self.rsp.cid,
            cdw0 = self.rsp.dw0,
            sqhd = self.rsp.sqhd,
            status = ?self.rsp.status.nvme_status(),
            "completing request"
        );

        let transport = self.conn.transport().clone();
        transport.complete(self).inspect_err(|err| {
            tracing::error!(error = %err, "transport request completion error");
        })
    }
}
