// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The transport-facing completion interface.

use crate::request::Request;
use thiserror::Error;

/// An error delivering a completed response through the transport.
///
/// The request is retired by the core regardless of the result; the
/// transport owns whatever recovery is appropriate.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is being torn down and can no longer deliver
    /// completions.
    #[error("connection is being torn down")]
    ConnectionClosed,
    /// The transport failed to post the completion.
    #[error("failed to post completion")]
    Io(#[source] std::io::Error),
}

/// The transport half of a connection.
///
/// Implemented by the RDMA/TCP layer; the core only ever hands completed
/// requests back through it.
pub trait Transport: Send + Sync {
    /// Hands a request with a populated response capsule back to the
    /// transport for delivery.
    ///
    /// The core considers the request consumed even on error.
    fn complete(&self, req: Request) -> Result<(), TransportError>;
}
