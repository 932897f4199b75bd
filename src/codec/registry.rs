// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A registry of record schemas keyed by the node id of their binary encoding. Generated
//! types register their schema once at construction time; the registry can then decode any
//! registered message body from its node id. Registries are plain instances so different
//! channels can carry different type sets.

use std::{collections::HashMap, io::Read, sync::Arc};

use crate::codec::{decoder::Decoder, schema::Schema, value::StructValue};
use crate::types::{
    encoding::{DecodingOptions, EncodingError, EncodingResult},
    node_id::NodeId,
    status_code::StatusCode,
};

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: parking_lot::RwLock<HashMap<NodeId, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> SchemaRegistry {
        SchemaRegistry::default()
    }

    /// Registers the schema for the record encoded under `node_id`, replacing any
    /// previous registration.
    pub fn register(&self, node_id: NodeId, schema: Arc<Schema>) {
        let mut schemas = trace_write_lock!(self.schemas);
        schemas.insert(node_id, schema);
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Arc<Schema>> {
        let schemas = trace_read_lock!(self.schemas);
        schemas.get(node_id).cloned()
    }

    /// Decodes a message body from the schema registered under `node_id`.
    pub fn decode_message<S: Read>(
        &self,
        node_id: &NodeId,
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<StructValue> {
        let schema = self.get(node_id).ok_or_else(|| {
            EncodingError::with_cause(
                StatusCode::BadDecodingError,
                format!("no schema registered for node id {}", node_id),
            )
        })?;
        let mut decoder = Decoder::new(stream, decoding_options);
        decoder.decode(&schema)
    }
}
