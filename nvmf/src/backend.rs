// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backing physical controller interface used for passthrough.

use crate::request::Request;
use crate::transport::TransportError;
use nvmf_spec::Command;
use nvmf_spec::Completion;
use nvmf_spec::IdentifyController;

/// A command in flight to the backing controller.
///
/// Wraps the request for the duration of a passthrough: the backing driver
/// reads the raw command and data buffer from here, and resolves the
/// passthrough with the controller's completion. This is the typed
/// completion context carried from submission to completion.
pub struct Passthrough {
    req: Request,
}

impl Passthrough {
    pub(crate) fn new(req: Request) -> Self {
        Self { req }
    }

    /// The raw NVMe command to submit.
    pub fn command(&self) -> &Command {
        self.req.command().nvme()
    }

    /// The data buffer to transfer, if the command carries one.
    pub fn buffer(&mut self) -> Option<&mut [u8]> {
        self.req.data_mut()
    }

    /// Length of the data buffer in bytes.
    pub fn buffer_len(&self) -> usize {
        self.req.data().map_or(0, |data| data.len())
    }

    /// Resolves the passthrough: copies the backing controller's completion
    /// into the request's response slot and completes the request.
    pub fn complete(mut self, cpl: Completion) -> Result<(), TransportError> {
        *self.req.response_mut() = cpl;
        self.req.complete()
    }

    /// Hands the request back after a failed submission.
    pub(crate) fn into_request(self) -> Request {
        self.req
    }
}

/// The admin-queue interface of the physical controller backing a subsystem.
///
/// Serialization across the sessions sharing the controller is the backing
/// driver's concern; the core makes no ordering promise beyond what the
/// controller provides.
pub trait BackingController: Send + Sync {
    /// The backing controller's Identify Controller data, used to seed each
    /// session's virtual controller data.
    fn controller_data(&self) -> IdentifyController;

    /// Submits a raw admin command.
    ///
    /// On success the backing driver owns the passthrough until it resolves
    /// it with [`Passthrough::complete`], on the submitting poller. On
    /// failure the passthrough is handed back unresolved.
    fn submit_admin(&self, cmd: Passthrough) -> Result<(), Passthrough>;
}

/// The I/O queue pair a subsystem uses for passthrough.
pub trait BackingQueue: Send + Sync {
    /// Submits a raw I/O command; same ownership contract as
    /// [`BackingController::submit_admin`].
    fn submit(&self, cmd: Passthrough) -> Result<(), Passthrough>;
}
