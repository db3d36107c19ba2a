//! Room signaling session client.
//!
//! This library maintains a client's signaling session with a room server:
//!
//! - Persistent websocket connection with exponential-backoff reconnect
//! - Typed message dispatch to registered handlers (inbound and outbound)
//! - Participant and track bookkeeping with change events
//! - Keepalive pings with server-provided timing and staleness detection
//! - Credential rotation mid-session via `refresh_token`
//!
//! # Architecture
//!
//! ```text
//! RoomSession (facade, one per room membership)
//! ├── ConnectionManager   connect/read/backoff supervise loop
//! ├── EventBus x2         inbound and outbound handler registries
//! ├── Tracker             participant -> tracks, track -> participant
//! └── KeepaliveSupervisor periodic pings, RTT from pongs
//! ```
//!
//! The session runs one inbound dispatch task. Lifecycle messages (`join`,
//! `update`, `refresh_token`, `pong`, `leave`) are applied to internal
//! state before application handlers run, so handlers always observe the
//! post-update tracker.
//!
//! Media itself is out of scope: SDP bodies and ICE candidates are relayed
//! opaquely between the server and a media-engine collaborator.
//!
//! # Modules
//!
//! - [`session`] - the facade most callers use
//! - [`config`] - session configuration from env or code
//! - [`events`] - handler registration and fault reporting
//! - [`tracker`] - room membership bookkeeping
//! - [`connection`] - transport supervision
//! - [`keepalive`] - heartbeat scheduling
//! - [`policy`] - simulcast layer selection
//! - [`sdp`] - ssrc extraction for diagnostics

#![warn(clippy::pedantic)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod events;
pub mod keepalive;
pub mod policy;
pub mod sdp;
pub mod session;
pub mod tracker;

pub use config::{ClientProfile, SessionConfig};
pub use connection::ConnectionState;
pub use errors::{ConfigError, SessionError};
pub use events::{SessionFault, SubscriptionId};
pub use session::RoomSession;
pub use tracker::TrackerEvent;
