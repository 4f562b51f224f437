// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cross-poller event delivery.

/// A single-shot event bound to a poller core.
pub type PollerEvent = Box<dyn FnOnce() + Send>;

/// Delivers single-shot events to the poller owning a given CPU core.
///
/// The core uses this in exactly one place: handing a Connect request to the
/// poller that owns the target subsystem. The enqueuing poller must retain
/// no reference to anything moved into the event.
pub trait EventRing: Send + Sync {
    /// Queues `event` to run on the poller pinned to `core`.
    fn enqueue(&self, core: u32, event: PollerEvent);
}
