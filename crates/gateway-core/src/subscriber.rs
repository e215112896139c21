use bytes::Bytes;

use crate::serial::TrackerId;

pub type SubscriberId = u64;

/// The contract a websocket subscriber (or any other fanout sink) offers a
/// sublist: push a pre-encoded payload, non-blocking, and report whether the
/// subscriber is now closed so it can be dropped from the map in-line.
pub trait Subscriber: Send + Sync {
    /// Never blocks. Returns `true` if the subscriber is closed and should
    /// be removed; returning `false` after a dropped/overflowed push is the
    /// expected lossy-delivery path, not an error.
    fn push(&self, tid: TrackerId, payload: Bytes) -> bool;
}
