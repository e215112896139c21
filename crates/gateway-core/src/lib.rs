//! Protocol-agnostic gateway plumbing: connection wrapping, the device
//! registry and per-device session handlers, the sublist fanout, the
//! batched location store, and the acceptor that ties them together
//! (spec.md §4). The binary that deploys this crate owns configuration
//! loading, the database pool, and the HTTP control plane.

pub mod acceptor;
pub mod config;
pub mod conn;
pub mod device;
pub mod error;
pub mod events;
pub mod location_store;
pub mod misc_store;
pub mod proxyproto;
pub mod registry;
pub mod serial;
pub mod sublist;
pub mod subscriber;
pub mod websocket;

pub use config::DeviceConfig;
pub use error::{SessionError, StoreError};
pub use registry::{BoxFuture, ConfigFetcher, Device, DeviceHandler, DeviceRegistry, DeviceSnapshot, PgConfigStore, Protocol};
pub use serial::{Nsn, SnType, TrackerId};
