// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command-execution core of an NVMe over Fabrics target.
//!
//! The core receives command capsules from a transport, classifies each by
//! queue class and controller state, routes it to the fabrics, discovery,
//! admin, or I/O handler, and produces a completion capsule delivered back
//! through the transport. A small command subset is served virtually per
//! session (Identify Controller, Number of Queues, Async Event Request,
//! Keep Alive, Connect, Property Get/Set); everything else passes through
//! to the physical controller backing the subsystem.
//!
//! Everything runs on single-threaded cooperative pollers: a connection is
//! pinned to one poller, a session to its subsystem's poller. The one place
//! request ownership crosses pollers is the Connect hand-off through
//! [`EventRing`]. Handlers either complete a request inline or move it into
//! a completion callback, the session's AER slot, or a cross-poller event;
//! the transport learns which through the synchronous return of
//! [`Target::execute`].

pub mod backend;
pub mod connection;
mod fabrics;
mod nvme;
pub mod poller;
pub mod properties;
pub mod request;
pub mod session;
pub mod subsystem;
pub mod target;
pub mod transport;

#[cfg(test)]
mod tests;

pub use connection::Connection;
pub use connection::QueueType;
pub use nvme::DiscoveryLogFormatter;
pub use request::Request;
pub use session::Session;
pub use subsystem::NqnError;
pub use subsystem::Subsystem;
pub use subsystem::SubsystemRegistry;
pub use target::Target;
pub use target::TargetCaps;
pub use transport::Transport;
pub use transport::TransportError;
