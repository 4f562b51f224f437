// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The session property register file interface.

use crate::session::Session;
use nvmf_spec::Completion;
use nvmf_spec::fabrics::PropertyGetCommand;
use nvmf_spec::fabrics::PropertySetCommand;

/// Implements the visible NVMe controller register semantics over a
/// session's property block, including the CC.EN enable transitions that
/// gate non-fabrics commands.
///
/// Both operations are synchronous: the implementation populates the
/// response capsule (value dwords for Get, status for either) before
/// returning.
pub trait PropertyFile: Send + Sync {
    /// Serves a Property Get command.
    fn get(&self, session: &Session, cmd: &PropertyGetCommand, rsp: &mut Completion);

    /// Serves a Property Set command.
    fn set(&self, session: &Session, cmd: &PropertySetCommand, rsp: &mut Completion);
}
