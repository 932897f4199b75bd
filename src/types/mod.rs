// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The types module contains the scalar and structured OPC UA types and the
//! [`encoding::BinaryEncoder`] trait that reads and writes them in the OPC UA Binary format.

pub mod basic_types;
pub mod byte_string;
pub mod date_time;
pub mod diagnostic_info;
pub mod encoding;
pub mod guid;
pub mod node_id;
pub mod service_types;
pub mod status_code;
pub mod status_codes;
pub mod string;

pub use crate::types::{
    byte_string::ByteString,
    date_time::{DateTime, DateTimeUtc},
    diagnostic_info::{DiagnosticInfo, DiagnosticInfoMask},
    encoding::{
        BinaryEncoder, DecodingOptions, EncodingError, EncodingResult, PathElement,
    },
    guid::Guid,
    node_id::{ExpandedNodeId, Identifier, NodeId},
    service_types::*,
    status_code::StatusCode,
    string::UAString,
};

pub mod constants {
    /// Default maximum number of bytes of a message, i.e. once all chunks are assembled - 64 MiB.
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 64;
    /// Default maximum number of chunks in a message.
    pub const MAX_CHUNK_COUNT: usize = 1000;
    /// Default maximum length in bytes of a string.
    pub const MAX_STRING_LENGTH: usize = 65536;
    /// Default maximum length in bytes of a byte string.
    pub const MAX_BYTE_STRING_LENGTH: usize = 65536;
    /// Default maximum number of elements in an array.
    pub const MAX_ARRAY_LENGTH: usize = 65536;
    /// Maximum depth the decoder will recurse into nested values before giving up.
    pub const MAX_DECODING_DEPTH: usize = 100;
}
