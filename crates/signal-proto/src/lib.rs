//! Signaling protocol for the room client.
//!
//! This crate defines the closed set of control-plane messages exchanged
//! with a room server over the persistent signaling connection, and the
//! codec that converts between wire frames and typed messages.
//!
//! The wire representation is a binary frame carrying a tagged envelope:
//! every message has exactly one canonical kind tag, and the codec is total
//! and inverse on the protocol's own domain (`decode(encode(m)) == m`).
//! Kinds the client does not know are surfaced as an explicit
//! [`Message::Unrecognized`] variant so server-side protocol additions
//! never crash the client.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod types;

pub use codec::{decode, encode, CodecError};
pub use message::{Message, MessageKind};
