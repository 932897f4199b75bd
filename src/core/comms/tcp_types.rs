// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of the UA Connection Protocol types - the 8 byte message
//! header and the HEL / ACK / ERR handshake message bodies.

use std::io::{Read, Write};

use crate::types::{
    encoding::*,
    status_code::StatusCode,
    string::UAString,
};

pub const HELLO_MESSAGE: &[u8] = b"HEL";
pub const ACKNOWLEDGE_MESSAGE: &[u8] = b"ACK";
pub const ERROR_MESSAGE: &[u8] = b"ERR";
pub const REVERSE_HELLO_MESSAGE: &[u8] = b"RHE";

pub const CHUNK_MESSAGE: &[u8] = b"MSG";
pub const OPEN_SECURE_CHANNEL_MESSAGE: &[u8] = b"OPN";
pub const CLOSE_SECURE_CHANNEL_MESSAGE: &[u8] = b"CLO";

pub const CHUNK_FINAL: u8 = b'F';
pub const CHUNK_INTERMEDIATE: u8 = b'C';
pub const CHUNK_FINAL_ERROR: u8 = b'A';

/// Minimum size in bytes that a transport buffer may be, from part 6 errata.
pub const MIN_CHUNK_SIZE: usize = 8192;

/// Size in bytes of an OPC UA Connection Protocol message header.
pub const MESSAGE_HEADER_LEN: usize = 8;

/// Maximum length in bytes of strings at the UACP layer, i.e. strings in HEL, ACK, ERR
/// and RHE message bodies.
pub const MAX_MESSAGE_STRING_LEN: usize = 4096;

/// The largest message that can legally arrive during the handshake - a header plus the
/// largest HEL body.
pub const HANDSHAKE_MAX_SIZE: usize = MESSAGE_HEADER_LEN + 24 + MAX_MESSAGE_STRING_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Invalid,
    Hello,
    Acknowledge,
    Error,
    ReverseHello,
    /// A secure channel chunk - MSG, OPN or CLO.
    Chunk,
}

/// The UACP message header common to every message - a 3 byte ASCII type, a 1 byte chunk
/// flag and the message size in bytes including the header itself.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub message_size: u32,
}

impl BinaryEncoder<MessageHeader> for MessageHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        let result = match self.message_type {
            MessageType::Hello => stream.write(HELLO_MESSAGE),
            MessageType::Acknowledge => stream.write(ACKNOWLEDGE_MESSAGE),
            MessageType::Error => stream.write(ERROR_MESSAGE),
            MessageType::ReverseHello => stream.write(REVERSE_HELLO_MESSAGE),
            _ => {
                // Chunks carry a secure message header and are written by the secure
                // channel, not through this type
                return Err(EncodingError::with_cause(
                    StatusCode::BadEncodingError,
                    "chunk headers are written by the secure channel",
                ));
            }
        };
        size += process_encode_io_result(result)?;
        size += write_u8(stream, CHUNK_FINAL)?;
        size += write_u32(stream, self.message_size)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut message_type = [0u8; 4];
        process_decode_io_result(stream.read_exact(&mut message_type))?;
        let message_size = read_u32(stream)?;
        Ok(MessageHeader {
            message_type: MessageHeader::message_type(&message_type),
            message_size,
        })
    }
}

impl MessageHeader {
    pub fn new(message_type: MessageType) -> MessageHeader {
        MessageHeader {
            message_type,
            message_size: 0,
        }
    }

    /// Decodes the message type from the leading 4 bytes of a header - the 3 byte ASCII
    /// code and the chunk flag. The flag must be `F` for every message except chunks,
    /// which also allow `C` and `A`.
    pub fn message_type(t: &[u8]) -> MessageType {
        if t.len() != 4 {
            MessageType::Invalid
        } else {
            let message_type = match &t[0..3] {
                HELLO_MESSAGE => MessageType::Hello,
                ACKNOWLEDGE_MESSAGE => MessageType::Acknowledge,
                ERROR_MESSAGE => MessageType::Error,
                REVERSE_HELLO_MESSAGE => MessageType::ReverseHello,
                CHUNK_MESSAGE | OPEN_SECURE_CHANNEL_MESSAGE | CLOSE_SECURE_CHANNEL_MESSAGE => {
                    MessageType::Chunk
                }
                _ => {
                    error!("message type doesn't match anything");
                    MessageType::Invalid
                }
            };

            match t[3] {
                CHUNK_FINAL => message_type,
                CHUNK_INTERMEDIATE | CHUNK_FINAL_ERROR => {
                    if message_type == MessageType::Chunk {
                        message_type
                    } else {
                        MessageType::Invalid
                    }
                }
                _ => MessageType::Invalid,
            }
        }
    }
}

/// The chunking parameters each peer announces in HEL / ACK. Buffer sizes are what the
/// announcing peer is prepared to receive or send per chunk; the message size and chunk
/// count bound whole reassembled messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageChunking {
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Default for MessageChunking {
    fn default() -> Self {
        MessageChunking {
            receive_buffer_size: 1024 * 64,
            send_buffer_size: 1024 * 64,
            max_message_size: 1024 * 1024 * 64,
            max_chunk_count: 1000,
        }
    }
}

impl BinaryEncoder<MessageChunking> for MessageChunking {
    fn byte_len(&self) -> usize {
        16
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.receive_buffer_size.encode(stream)?;
        size += self.send_buffer_size.encode(stream)?;
        size += self.max_message_size.encode(stream)?;
        size += self.max_chunk_count.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let receive_buffer_size = u32::decode(stream, decoding_options)?;
        let send_buffer_size = u32::decode(stream, decoding_options)?;
        let max_message_size = u32::decode(stream, decoding_options)?;
        let max_chunk_count = u32::decode(stream, decoding_options)?;
        Ok(MessageChunking {
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
        })
    }
}

impl MessageChunking {
    /// Buffer sizes below 8192 bytes are illegal per part 6.
    pub fn is_valid_buffer_sizes(&self) -> bool {
        self.receive_buffer_size >= MIN_CHUNK_SIZE as u32
            && self.send_buffer_size >= MIN_CHUNK_SIZE as u32
    }
}

/// Implementation of the HEL message in OPC UA
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub message_header: MessageHeader,
    pub protocol_version: u32,
    pub chunking: MessageChunking,
    pub endpoint_url: UAString,
}

impl BinaryEncoder<HelloMessage> for HelloMessage {
    fn byte_len(&self) -> usize {
        self.message_header.byte_len() + 4 + self.chunking.byte_len() + self.endpoint_url.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.message_header.encode(stream)?;
        size += self.protocol_version.encode(stream)?;
        size += self.chunking.encode(stream)?;
        size += self.endpoint_url.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let protocol_version = u32::decode(stream, decoding_options)?;
        let chunking = MessageChunking::decode(stream, decoding_options)?;
        let endpoint_url = UAString::decode(stream, decoding_options)?;
        Ok(HelloMessage {
            message_header,
            protocol_version,
            chunking,
            endpoint_url,
        })
    }
}

impl HelloMessage {
    /// Creates a HEL message
    pub fn new(endpoint_url: &str, chunking: MessageChunking) -> HelloMessage {
        let mut msg = HelloMessage {
            message_header: MessageHeader::new(MessageType::Hello),
            protocol_version: 0,
            chunking,
            endpoint_url: UAString::from(endpoint_url),
        };
        msg.message_header.message_size = msg.byte_len() as u32;
        msg
    }

    pub fn is_endpoint_valid_length(&self) -> bool {
        if let Some(ref endpoint_url) = self.endpoint_url.value() {
            endpoint_url.len() <= MAX_MESSAGE_STRING_LEN
        } else {
            error!("Hello message contains no endpoint url");
            false
        }
    }

    pub fn is_valid_buffer_sizes(&self) -> bool {
        self.chunking.is_valid_buffer_sizes()
    }
}

/// Implementation of the ACK message in OPC UA
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgeMessage {
    pub message_header: MessageHeader,
    pub protocol_version: u32,
    pub chunking: MessageChunking,
}

impl BinaryEncoder<AcknowledgeMessage> for AcknowledgeMessage {
    fn byte_len(&self) -> usize {
        self.message_header.byte_len() + 4 + self.chunking.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        size += self.message_header.encode(stream)?;
        size += self.protocol_version.encode(stream)?;
        size += self.chunking.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let protocol_version = u32::decode(stream, decoding_options)?;
        let chunking = MessageChunking::decode(stream, decoding_options)?;
        Ok(AcknowledgeMessage {
            message_header,
            protocol_version,
            chunking,
        })
    }
}

impl AcknowledgeMessage {
    pub fn new(chunking: MessageChunking) -> AcknowledgeMessage {
        let mut ack = AcknowledgeMessage {
            message_header: MessageHeader::new(MessageType::Acknowledge),
            protocol_version: 0,
            chunking,
        };
        ack.message_header.message_size = ack.byte_len() as u32;
        ack
    }
}

/// Implementation of the ERR message in OPC UA
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message_header: MessageHeader,
    pub error: u32,
    pub reason: UAString,
}

impl BinaryEncoder<ErrorMessage> for ErrorMessage {
    fn byte_len(&self) -> usize {
        self.message_header.byte_len() + self.error.byte_len() + self.reason.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        size += self.message_header.encode(stream)?;
        size += self.error.encode(stream)?;
        size += self.reason.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let error = u32::decode(stream, decoding_options)?;
        let reason = UAString::decode(stream, decoding_options)?;
        Ok(ErrorMessage {
            message_header,
            error,
            reason,
        })
    }
}

impl ErrorMessage {
    pub fn from_status_code(status_code: StatusCode) -> ErrorMessage {
        let mut error = ErrorMessage {
            message_header: MessageHeader::new(MessageType::Error),
            error: status_code.bits(),
            reason: UAString::from(status_code.description()),
        };
        error.message_header.message_size = error.byte_len() as u32;
        error
    }
}
