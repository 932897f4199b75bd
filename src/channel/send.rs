// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The send half of a secure channel. A logical message - the request node id followed by
//! the body - is split into chunks sized to the negotiated send buffer, each framed with a
//! secure message header, a security header and a sequence header. Sequence numbers are
//! assigned monotonically under the channel's send mutex; they wrap only on OPN messages
//! once the number space is nearly exhausted. If the chunk budget runs out mid message the
//! current chunk is rewritten into an `A` flagged abort chunk and no further chunks are
//! sent.

use std::{
    io::{Cursor, Write},
    sync::Arc,
};

use tokio::time::Instant;

use crate::channel::{SEQUENCE_NUMBER_RESTART, SEQUENCE_NUMBER_WRAP};
use crate::core::comms::{
    conn_mgr::ConnectionManager,
    error::Error,
    security_header::{
        AbortChunkBody, MessageChunkType, MessageIsFinalType, SecureMessageHeader, SecurityHeader,
        SequenceHeader, SECURE_MESSAGE_HEADER_SIZE, SEQUENCE_HEADER_SIZE,
    },
    tcp_types::MessageChunking,
};
use crate::types::{
    encoding::BinaryEncoder, node_id::ExpandedNodeId, status_code::StatusCode, string::UAString,
};

/// Everything the send pipeline needs to know about one outgoing request.
pub(crate) struct OutgoingMessage<'a> {
    pub message_type: MessageChunkType,
    pub channel_id: u32,
    pub request_id: u32,
    pub security_header: SecurityHeader,
    pub node_id: &'a ExpandedNodeId,
    pub body: &'a [u8],
}

pub(crate) struct SendState {
    conn_mgr: Arc<ConnectionManager>,
    /// The chunk assembly buffer, sized to the negotiated send buffer size.
    buffer: Vec<u8>,
    pub(crate) last_sequence_number: u32,
    max_message_size: u32,
    max_chunk_count: u32,
}

impl SendState {
    pub fn new(conn_mgr: Arc<ConnectionManager>, chunking: MessageChunking) -> SendState {
        SendState {
            conn_mgr,
            buffer: vec![0u8; chunking.send_buffer_size as usize],
            last_sequence_number: 0,
            max_message_size: chunking.max_message_size,
            max_chunk_count: chunking.max_chunk_count,
        }
    }

    /// Sends `message` as one or more chunks through the underlying UACP connection.
    /// Sequence headers are added automatically.
    pub async fn send_message(
        &mut self,
        message: OutgoingMessage<'_>,
        deadline: Option<Instant>,
    ) -> Result<(), Error> {
        // Serialize the node id followed by the body into a single logical byte source
        let mut payload = Cursor::new(Vec::with_capacity(
            message.node_id.byte_len() + message.body.len(),
        ));
        message.node_id.encode(&mut payload).map_err(Error::from)?;
        payload
            .write_all(message.body)
            .map_err(|err| Error::local(StatusCode::BadInternalError, err.to_string()))?;
        let payload = payload.into_inner();

        if self.max_message_size != 0 && payload.len() > self.max_message_size as usize {
            return Err(Error::local(
                StatusCode::BadRequestTooLarge,
                format!(
                    "message of {} bytes exceeds the max message size {}",
                    payload.len(),
                    self.max_message_size
                ),
            ));
        }

        let header_size = SECURE_MESSAGE_HEADER_SIZE
            + message.security_header.byte_len()
            + SEQUENCE_HEADER_SIZE;
        if header_size >= self.buffer.len() {
            return Err(Error::local(
                StatusCode::BadTcpInternalError,
                "send buffer is smaller than the chunk headers",
            ));
        }
        let max_body_size = self.buffer.len() - header_size;

        // Determine the first sequence number. A controlled overflow back to the start of
        // the numbering space is only allowed on OPN messages once the last number is
        // beyond the wrap threshold.
        let is_open = message.message_type.is_open_secure_channel();
        let mut sequence_number = if is_open && self.last_sequence_number > SEQUENCE_NUMBER_WRAP {
            SEQUENCE_NUMBER_RESTART
        } else {
            self.next_sequence_number()?
        };

        let chunk_count = (payload.len().max(1) + max_body_size - 1) / max_body_size;
        for (index, chunk) in payload.chunks(max_body_size).enumerate() {
            if self.max_chunk_count != 0 && index as u32 == self.max_chunk_count {
                // One chunk too many; rewrite the current chunk into an abort and stop
                let err = Error::local(
                    StatusCode::BadTcpMessageTooLarge,
                    format!("maximum number of chunks ({}) reached", self.max_chunk_count),
                );
                return self.send_abort(&message, sequence_number, &err, deadline).await;
            }
            let is_final = if index == chunk_count - 1 {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            let size = self.write_chunk(&message, is_final, sequence_number, chunk)?;
            self.conn_mgr
                .send_chunk(&mut self.buffer[..size], deadline)
                .await?;
            self.last_sequence_number = sequence_number;
            if index + 1 < chunk_count {
                sequence_number = self.next_sequence_number()?;
            }
        }
        Ok(())
    }

    fn next_sequence_number(&self) -> Result<u32, Error> {
        // Wrap is forbidden here; the channel must be renewed before the space runs out
        self.last_sequence_number.checked_add(1).ok_or_else(|| {
            Error::local(
                StatusCode::BadInternalError,
                "sequence number space exhausted",
            )
        })
    }

    /// Serializes one chunk into the send buffer and returns its size.
    fn write_chunk(
        &mut self,
        message: &OutgoingMessage<'_>,
        is_final: MessageIsFinalType,
        sequence_number: u32,
        body: &[u8],
    ) -> Result<usize, Error> {
        let message_size = SECURE_MESSAGE_HEADER_SIZE
            + message.security_header.byte_len()
            + SEQUENCE_HEADER_SIZE
            + body.len();
        let mut stream = Cursor::new(&mut self.buffer[..]);
        SecureMessageHeader {
            message_type: message.message_type,
            is_final,
            message_size: message_size as u32,
            secure_channel_id: message.channel_id,
        }
        .encode(&mut stream)
        .map_err(Error::from)?;
        message
            .security_header
            .encode(&mut stream)
            .map_err(Error::from)?;
        SequenceHeader {
            sequence_number,
            request_id: message.request_id,
        }
        .encode(&mut stream)
        .map_err(Error::from)?;
        stream
            .write_all(body)
            .map_err(|err| Error::local(StatusCode::BadTcpInternalError, err.to_string()))?;
        Ok(message_size)
    }

    /// Sends an `A` flagged chunk carrying the status code and reason of the failure,
    /// then surfaces the failure to the caller.
    async fn send_abort(
        &mut self,
        message: &OutgoingMessage<'_>,
        sequence_number: u32,
        err: &Error,
        deadline: Option<Instant>,
    ) -> Result<(), Error> {
        let abort = AbortChunkBody {
            status: err.code().bits(),
            reason: UAString::from(err.reason().unwrap_or_default()),
        };
        let size = {
            let body = abort.encode_to_vec();
            self.write_chunk(message, MessageIsFinalType::FinalError, sequence_number, &body)?
        };
        self.conn_mgr
            .send_chunk(&mut self.buffer[..size], deadline)
            .await?;
        self.last_sequence_number = sequence_number;
        Err(err.clone())
    }
}
