//! Wire types for the admin chat channel.
//!
//! This crate contains the serde-serializable shapes exchanged over the
//! real-time chat channel between the admin dashboard and the platform
//! backend. These types represent the "protocol layer" - the frames as they
//! appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Forward-compatible**: Inbound payloads the client does not recognize
//!   are passed through verbatim rather than rejected
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The connection lifecycle, keep-alive pulse, and reconnection machinery
//! live in `chatwire-client`.

pub mod frame;

pub use frame::*;
