// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A client-side implementation of the OPC UA wire stack - the binary
//! encoding / decoding layer for OPC UA types, the UA Connection Protocol
//! (UACP) transport and the Secure Conversation layer built above it.
//!
//! The crate is organised bottom up:
//!
//! * [`types`] - scalar and structured OPC UA types together with the
//!   [`types::encoding::BinaryEncoder`] trait for reading and writing them in
//!   the little-endian OPC UA Binary format.
//! * [`codec`] - a schema driven record codec for types described by field
//!   descriptors rather than hand written `BinaryEncoder` impls. Generated
//!   types register their [`codec::Schema`] in a [`codec::SchemaRegistry`].
//! * [`core`] - the UACP transport: message framing, the HEL / ACK handshake
//!   and the connection manager with atomic chunk send and receive.
//! * [`channel`] - the secure channel: OpenSecureChannel handshake, request
//!   multiplexing by request id, chunking of outbound messages and reassembly
//!   of inbound ones.
//!
//! Higher level service bindings (sessions, browsing, subscriptions) are out
//! of scope and are expected to be layered on [`channel::SecureChannel::send`].

#![allow(clippy::from_over_into)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;

/// Tracing macro for obtaining a lock on a `Mutex`. Sometimes deadlocks can happen in code,
/// and if they do, this macro is useful for finding out where they happened.
#[macro_export]
macro_rules! trace_lock {
    ( $x:expr ) => {{
        let v = $x.lock();
        v
    }};
}

/// Tracing macro for obtaining a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ( $x:expr ) => {{
        let v = $x.read();
        v
    }};
}

/// Tracing macro for obtaining a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ( $x:expr ) => {{
        let v = $x.write();
        v
    }};
}

pub mod channel;
pub mod codec;
pub mod core;
pub mod types;

pub mod prelude {
    pub use crate::channel::{
        ChannelSecurity, ChannelTimeouts, Connector, MessageBuffering, Response, SecureChannel,
    };
    pub use crate::codec::{Field, FieldType, PrimitiveKind, Schema, SchemaRegistry, Value};
    pub use crate::core::comms::{
        conn_mgr::{tcp_dial, ConnectionManager, DialFn},
        error::{Error, Origin},
        tcp_types::MessageChunking,
    };
    pub use crate::types::*;
}
