// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the types that frame a secure channel chunk - the 12 byte secure message
//! header, the security headers, the sequence header and the abort body.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use crate::core::comms::tcp_types::{
    CHUNK_FINAL, CHUNK_FINAL_ERROR, CHUNK_INTERMEDIATE, CHUNK_MESSAGE,
    CLOSE_SECURE_CHANNEL_MESSAGE, OPEN_SECURE_CHANNEL_MESSAGE,
};
use crate::types::{
    byte_string::ByteString, encoding::*, status_code::StatusCode, string::UAString,
};

/// The size of a secure message header, used by several places
pub const SECURE_MESSAGE_HEADER_SIZE: usize = 12;

/// The size of a sequence header
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Security policies this stack knows the URI of. Only `None` can actually be used; the
/// rest are rejected when a channel is configured with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    Unknown,
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
}

impl SecurityPolicy {
    pub const NONE_URI: &'static str = "http://opcfoundation.org/UA/SecurityPolicy#None";
    pub const BASIC_128_RSA_15_URI: &'static str =
        "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
    pub const BASIC_256_URI: &'static str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
    pub const BASIC_256_SHA_256_URI: &'static str =
        "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

    pub fn to_uri(&self) -> &'static str {
        match self {
            SecurityPolicy::None => Self::NONE_URI,
            SecurityPolicy::Basic128Rsa15 => Self::BASIC_128_RSA_15_URI,
            SecurityPolicy::Basic256 => Self::BASIC_256_URI,
            SecurityPolicy::Basic256Sha256 => Self::BASIC_256_SHA_256_URI,
            SecurityPolicy::Unknown => "",
        }
    }
}

impl FromStr for SecurityPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            Self::NONE_URI => SecurityPolicy::None,
            Self::BASIC_128_RSA_15_URI => SecurityPolicy::Basic128Rsa15,
            Self::BASIC_256_URI => SecurityPolicy::Basic256,
            Self::BASIC_256_SHA_256_URI => SecurityPolicy::Basic256Sha256,
            _ => SecurityPolicy::Unknown,
        })
    }
}

/// The kind of a chunk at the secure channel level - MSG, OPN or CLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageChunkType {
    Message,
    OpenSecureChannel,
    CloseSecureChannel,
}

impl fmt::Display for MessageChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageChunkType::Message => "MSG",
            MessageChunkType::OpenSecureChannel => "OPN",
            MessageChunkType::CloseSecureChannel => "CLO",
        };
        write!(f, "{}", s)
    }
}

impl MessageChunkType {
    pub fn is_open_secure_channel(&self) -> bool {
        *self == MessageChunkType::OpenSecureChannel
    }

    fn message_type_bytes(&self) -> &'static [u8] {
        match self {
            MessageChunkType::Message => CHUNK_MESSAGE,
            MessageChunkType::OpenSecureChannel => OPEN_SECURE_CHANNEL_MESSAGE,
            MessageChunkType::CloseSecureChannel => CLOSE_SECURE_CHANNEL_MESSAGE,
        }
    }
}

/// Whether a chunk is the final chunk in a message at the secure conversation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIsFinalType {
    /// The message has more chunks after this one
    Intermediate,
    /// Final chunk
    Final,
    /// Final chunk, message aborted
    FinalError,
}

impl MessageIsFinalType {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            MessageIsFinalType::Final | MessageIsFinalType::FinalError
        )
    }
}

/// The secure conversation message header - the UACP header fields plus the secure
/// channel id.
#[derive(Debug, Clone, PartialEq)]
pub struct SecureMessageHeader {
    pub message_type: MessageChunkType,
    pub is_final: MessageIsFinalType,
    /// The size of the chunk (message) including the header
    pub message_size: u32,
    pub secure_channel_id: u32,
}

impl BinaryEncoder<SecureMessageHeader> for SecureMessageHeader {
    fn byte_len(&self) -> usize {
        SECURE_MESSAGE_HEADER_SIZE
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let is_final = match self.is_final {
            MessageIsFinalType::Intermediate => CHUNK_INTERMEDIATE,
            MessageIsFinalType::Final => CHUNK_FINAL,
            MessageIsFinalType::FinalError => CHUNK_FINAL_ERROR,
        };
        let mut size = 0;
        size += process_encode_io_result(stream.write(self.message_type.message_type_bytes()))?;
        size += write_u8(stream, is_final)?;
        size += write_u32(stream, self.message_size)?;
        size += write_u32(stream, self.secure_channel_id)?;
        assert_eq!(size, self.byte_len());
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut message_type_code = [0u8; 3];
        process_decode_io_result(stream.read_exact(&mut message_type_code))?;
        let message_type = match &message_type_code[..] {
            CHUNK_MESSAGE => MessageChunkType::Message,
            OPEN_SECURE_CHANNEL_MESSAGE => MessageChunkType::OpenSecureChannel,
            CLOSE_SECURE_CHANNEL_MESSAGE => MessageChunkType::CloseSecureChannel,
            _ => {
                error!("Invalid secure message type code");
                return Err(StatusCode::BadTcpMessageTypeInvalid.into());
            }
        };
        let is_final = match read_u8(stream)? {
            CHUNK_FINAL => MessageIsFinalType::Final,
            CHUNK_INTERMEDIATE => MessageIsFinalType::Intermediate,
            CHUNK_FINAL_ERROR => MessageIsFinalType::FinalError,
            _ => {
                error!("Invalid chunk flag");
                return Err(StatusCode::BadTcpMessageTypeInvalid.into());
            }
        };
        let message_size = read_u32(stream)?;
        let secure_channel_id = read_u32(stream)?;
        Ok(SecureMessageHeader {
            message_type,
            is_final,
            message_size,
            secure_channel_id,
        })
    }
}

/// Rewrites the chunk flag of an already serialized chunk. The buffer must start with a
/// secure message header.
pub fn set_chunk_flag(chunk: &mut [u8], is_final: MessageIsFinalType) {
    chunk[3] = match is_final {
        MessageIsFinalType::Intermediate => CHUNK_INTERMEDIATE,
        MessageIsFinalType::Final => CHUNK_FINAL,
        MessageIsFinalType::FinalError => CHUNK_FINAL_ERROR,
    };
}

/// Holds the security header associated with the chunk. Secure channel requests use an
/// asymmetric security header, regular messages use a symmetric security header.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityHeader {
    Asymmetric(AsymmetricSecurityHeader),
    Symmetric(SymmetricSecurityHeader),
}

impl BinaryEncoder<SecurityHeader> for SecurityHeader {
    fn byte_len(&self) -> usize {
        match self {
            SecurityHeader::Asymmetric(value) => value.byte_len(),
            SecurityHeader::Symmetric(value) => value.byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match self {
            SecurityHeader::Asymmetric(value) => value.encode(stream),
            SecurityHeader::Symmetric(value) => value.encode(stream),
        }
    }

    fn decode<S: Read>(_: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        // The security header kind depends on the chunk's message type, so callers decode
        // the concrete header themselves
        Err(StatusCode::BadDecodingError.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricSecurityHeader {
    pub token_id: u32,
}

impl BinaryEncoder<SymmetricSecurityHeader> for SymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.token_id.encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let token_id = u32::decode(stream, decoding_options)?;
        Ok(SymmetricSecurityHeader { token_id })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    pub security_policy_uri: UAString,
    pub sender_certificate: ByteString,
    pub receiver_certificate_thumbprint: ByteString,
}

impl BinaryEncoder<AsymmetricSecurityHeader> for AsymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        let mut size = 0;
        size += self.security_policy_uri.byte_len();
        size += self.sender_certificate.byte_len();
        size += self.receiver_certificate_thumbprint.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.security_policy_uri.encode(stream)?;
        size += self.sender_certificate.encode(stream)?;
        size += self.receiver_certificate_thumbprint.encode(stream)?;
        assert_eq!(size, self.byte_len());
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let security_policy_uri = UAString::decode(stream, decoding_options)?;
        let sender_certificate = ByteString::decode(stream, decoding_options)?;
        let receiver_certificate_thumbprint = ByteString::decode(stream, decoding_options)?;
        Ok(AsymmetricSecurityHeader {
            security_policy_uri,
            sender_certificate,
            receiver_certificate_thumbprint,
        })
    }
}

impl AsymmetricSecurityHeader {
    pub fn none() -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(SecurityPolicy::None.to_uri()),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
    }
}

/// Sequence numbers are monotonic across all chunks on a channel and associate every
/// chunk with the request it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    pub sequence_number: u32,
    pub request_id: u32,
}

impl BinaryEncoder<SequenceHeader> for SequenceHeader {
    fn byte_len(&self) -> usize {
        SEQUENCE_HEADER_SIZE
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        size += self.sequence_number.encode(stream)?;
        size += self.request_id.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let sequence_number = u32::decode(stream, decoding_options)?;
        let request_id = u32::decode(stream, decoding_options)?;
        Ok(SequenceHeader {
            sequence_number,
            request_id,
        })
    }
}

/// The body of an `A` flagged chunk - the status code of the abandoned send and a textual
/// reason.
#[derive(Debug, Clone, PartialEq)]
pub struct AbortChunkBody {
    pub status: u32,
    pub reason: UAString,
}

impl BinaryEncoder<AbortChunkBody> for AbortChunkBody {
    fn byte_len(&self) -> usize {
        self.status.byte_len() + self.reason.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.status.encode(stream)?;
        size += self.reason.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let status = u32::decode(stream, decoding_options)?;
        let reason = UAString::decode(stream, decoding_options)?;
        Ok(AbortChunkBody { status, reason })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn secure_message_header_round_trip() {
        let header = SecureMessageHeader {
            message_type: MessageChunkType::OpenSecureChannel,
            is_final: MessageIsFinalType::Final,
            message_size: 100,
            secure_channel_id: 42,
        };
        let bytes = header.encode_to_vec();
        assert_eq!(bytes.len(), SECURE_MESSAGE_HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"OPNF");
        let decoded =
            SecureMessageHeader::decode(&mut Cursor::new(bytes), &DecodingOptions::test())
                .unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn chunk_flag_rewrite() {
        let header = SecureMessageHeader {
            message_type: MessageChunkType::Message,
            is_final: MessageIsFinalType::Final,
            message_size: 24,
            secure_channel_id: 1,
        };
        let mut bytes = header.encode_to_vec();
        set_chunk_flag(&mut bytes, MessageIsFinalType::Intermediate);
        assert_eq!(&bytes[0..4], b"MSGC");
        set_chunk_flag(&mut bytes, MessageIsFinalType::FinalError);
        assert_eq!(&bytes[0..4], b"MSGA");
    }

    #[test]
    fn asymmetric_header_none() {
        let header = AsymmetricSecurityHeader::none();
        let bytes = header.encode_to_vec();
        assert_eq!(bytes.len(), header.byte_len());
        let decoded =
            AsymmetricSecurityHeader::decode(&mut Cursor::new(bytes), &DecodingOptions::test())
                .unwrap();
        assert_eq!(decoded, header);
        assert_eq!(
            decoded.security_policy_uri.as_ref(),
            SecurityPolicy::None.to_uri()
        );
    }

    #[test]
    fn sequence_header_round_trip() {
        let header = SequenceHeader {
            sequence_number: 35,
            request_id: 0x0001_0002,
        };
        let bytes = header.encode_to_vec();
        assert_eq!(bytes.len(), SEQUENCE_HEADER_SIZE);
        let decoded =
            SequenceHeader::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn security_policy_uris() {
        assert_eq!(
            SecurityPolicy::from_str(SecurityPolicy::None.to_uri()).unwrap(),
            SecurityPolicy::None
        );
        assert_eq!(
            SecurityPolicy::from_str("http://example.org/other").unwrap(),
            SecurityPolicy::Unknown
        );
    }
}
