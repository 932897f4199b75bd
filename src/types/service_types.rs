// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The hand maintained subset of OPC UA service types that the secure channel itself
//! exchanges with a server - the OpenSecureChannel / CloseSecureChannel service set,
//! `ServiceFault` and their supporting structures. Anything beyond that is expected to be
//! generated elsewhere and carried through [`crate::channel::SecureChannel::send`] as an
//! opaque body.

use std::{
    convert::TryFrom,
    io::{Read, Write},
};

use crate::types::{
    byte_string::ByteString,
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    encoding::*,
    node_id::NodeId,
    status_code::StatusCode,
    string::UAString,
};

/// Numeric identifiers (namespace 0) for the objects this stack reads or writes on the wire.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectId {
    ServiceFault_Encoding_DefaultBinary = 397,
    OpenSecureChannelRequest_Encoding_DefaultBinary = 446,
    OpenSecureChannelResponse_Encoding_DefaultBinary = 449,
    CloseSecureChannelRequest_Encoding_DefaultBinary = 452,
    CloseSecureChannelResponse_Encoding_DefaultBinary = 455,
}

impl TryFrom<u32> for ObjectId {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            397 => Ok(ObjectId::ServiceFault_Encoding_DefaultBinary),
            446 => Ok(ObjectId::OpenSecureChannelRequest_Encoding_DefaultBinary),
            449 => Ok(ObjectId::OpenSecureChannelResponse_Encoding_DefaultBinary),
            452 => Ok(ObjectId::CloseSecureChannelRequest_Encoding_DefaultBinary),
            455 => Ok(ObjectId::CloseSecureChannelResponse_Encoding_DefaultBinary),
            _ => Err(()),
        }
    }
}

/// The security mode negotiated for a channel. Only `None` is implemented by this stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSecurityMode {
    Invalid = 0,
    None = 1,
    Sign = 2,
    SignAndEncrypt = 3,
}

impl From<i32> for MessageSecurityMode {
    fn from(value: i32) -> Self {
        match value {
            1 => MessageSecurityMode::None,
            2 => MessageSecurityMode::Sign,
            3 => MessageSecurityMode::SignAndEncrypt,
            _ => MessageSecurityMode::Invalid,
        }
    }
}

impl BinaryEncoder<MessageSecurityMode> for MessageSecurityMode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_i32(stream, *self as i32)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(MessageSecurityMode::from(read_i32(stream)?))
    }
}

/// Whether an OpenSecureChannel request issues a fresh token or renews an existing one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityTokenRequestType {
    Issue = 0,
    Renew = 1,
}

impl BinaryEncoder<SecurityTokenRequestType> for SecurityTokenRequestType {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_i32(stream, *self as i32)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        match read_i32(stream)? {
            0 => Ok(SecurityTokenRequestType::Issue),
            1 => Ok(SecurityTokenRequestType::Renew),
            v => {
                error!("Invalid security token request type {}", v);
                Err(StatusCode::BadDecodingError.into())
            }
        }
    }
}

/// An extension object holds a serialized object identified by its node id. The channel
/// layer only ever carries null extension objects itself, but bodies pass through intact.
#[derive(PartialEq, Debug, Clone)]
pub enum ExtensionObjectEncoding {
    None,
    ByteString(ByteString),
}

#[derive(PartialEq, Debug, Clone)]
pub struct ExtensionObject {
    pub node_id: NodeId,
    pub body: ExtensionObjectEncoding,
}

impl Default for ExtensionObject {
    fn default() -> Self {
        Self::null()
    }
}

impl BinaryEncoder<ExtensionObject> for ExtensionObject {
    fn byte_len(&self) -> usize {
        let mut size = self.node_id.byte_len() + 1;
        if let ExtensionObjectEncoding::ByteString(ref value) = self.body {
            size += value.byte_len();
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.node_id.encode(stream)?;
        match self.body {
            ExtensionObjectEncoding::None => {
                size += write_u8(stream, 0x0)?;
            }
            ExtensionObjectEncoding::ByteString(ref value) => {
                size += write_u8(stream, 0x1)?;
                size += value.encode(stream)?;
            }
        }
        assert_eq!(size, self.byte_len());
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let node_id = NodeId::decode(stream, decoding_options)?;
        let encoding = read_u8(stream)?;
        let body = match encoding {
            0x0 => ExtensionObjectEncoding::None,
            0x1 => {
                ExtensionObjectEncoding::ByteString(ByteString::decode(stream, decoding_options)?)
            }
            _ => {
                error!("Invalid extension object encoding {}", encoding);
                return Err(StatusCode::BadDecodingError.into());
            }
        };
        Ok(ExtensionObject { node_id, body })
    }
}

impl ExtensionObject {
    /// Creates a null extension object, i.e. one with no value or payload
    pub fn null() -> ExtensionObject {
        ExtensionObject {
            node_id: NodeId::null(),
            body: ExtensionObjectEncoding::None,
        }
    }
}

/// The header passed with every service request.
#[derive(PartialEq, Debug, Clone)]
pub struct RequestHeader {
    pub authentication_token: NodeId,
    pub timestamp: DateTime,
    pub request_handle: u32,
    pub return_diagnostics: u32,
    pub audit_entry_id: UAString,
    pub timeout_hint: u32,
    pub additional_header: ExtensionObject,
}

impl Default for RequestHeader {
    fn default() -> Self {
        RequestHeader {
            authentication_token: NodeId::null(),
            timestamp: DateTime::null(),
            request_handle: 0,
            return_diagnostics: 0,
            audit_entry_id: UAString::null(),
            timeout_hint: 0,
            additional_header: ExtensionObject::null(),
        }
    }
}

impl BinaryEncoder<RequestHeader> for RequestHeader {
    fn byte_len(&self) -> usize {
        let mut size = 0;
        size += self.authentication_token.byte_len();
        size += self.timestamp.byte_len();
        size += self.request_handle.byte_len();
        size += self.return_diagnostics.byte_len();
        size += self.audit_entry_id.byte_len();
        size += self.timeout_hint.byte_len();
        size += self.additional_header.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.authentication_token.encode(stream)?;
        size += self.timestamp.encode(stream)?;
        size += self.request_handle.encode(stream)?;
        size += self.return_diagnostics.encode(stream)?;
        size += self.audit_entry_id.encode(stream)?;
        size += self.timeout_hint.encode(stream)?;
        size += self.additional_header.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let authentication_token = NodeId::decode(stream, decoding_options)?;
        let timestamp = DateTime::decode(stream, decoding_options)?;
        let request_handle = u32::decode(stream, decoding_options)?;
        let return_diagnostics = u32::decode(stream, decoding_options)?;
        let audit_entry_id = UAString::decode(stream, decoding_options)?;
        let timeout_hint = u32::decode(stream, decoding_options)?;
        let additional_header = ExtensionObject::decode(stream, decoding_options)?;
        Ok(RequestHeader {
            authentication_token,
            timestamp,
            request_handle,
            return_diagnostics,
            audit_entry_id,
            timeout_hint,
            additional_header,
        })
    }
}

impl RequestHeader {
    pub fn new(request_handle: u32, timeout_hint: u32) -> RequestHeader {
        RequestHeader {
            timestamp: DateTime::now(),
            request_handle,
            timeout_hint,
            ..Default::default()
        }
    }
}

/// The header returned with every service response.
#[derive(PartialEq, Debug, Clone)]
pub struct ResponseHeader {
    pub timestamp: DateTime,
    pub request_handle: u32,
    pub service_result: StatusCode,
    pub service_diagnostics: DiagnosticInfo,
    pub string_table: Option<Vec<UAString>>,
    pub additional_header: ExtensionObject,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        ResponseHeader {
            timestamp: DateTime::null(),
            request_handle: 0,
            service_result: StatusCode::Good,
            service_diagnostics: DiagnosticInfo::null(),
            string_table: None,
            additional_header: ExtensionObject::null(),
        }
    }
}

impl BinaryEncoder<ResponseHeader> for ResponseHeader {
    fn byte_len(&self) -> usize {
        let mut size = 0;
        size += self.timestamp.byte_len();
        size += self.request_handle.byte_len();
        size += self.service_result.byte_len();
        size += self.service_diagnostics.byte_len();
        size += byte_len_array(&self.string_table);
        size += self.additional_header.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.timestamp.encode(stream)?;
        size += self.request_handle.encode(stream)?;
        size += self.service_result.encode(stream)?;
        size += self.service_diagnostics.encode(stream)?;
        size += write_array(stream, &self.string_table)?;
        size += self.additional_header.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let timestamp = DateTime::decode(stream, decoding_options)?;
        let request_handle = u32::decode(stream, decoding_options)?;
        let service_result = StatusCode::decode(stream, decoding_options)?;
        let service_diagnostics = DiagnosticInfo::decode(stream, decoding_options)?;
        let string_table = read_array(stream, decoding_options)?;
        let additional_header = ExtensionObject::decode(stream, decoding_options)?;
        Ok(ResponseHeader {
            timestamp,
            request_handle,
            service_result,
            service_diagnostics,
            string_table,
            additional_header,
        })
    }
}

/// The token issued by the server when a secure channel is opened or renewed.
#[derive(PartialEq, Debug, Clone)]
pub struct ChannelSecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub created_at: DateTime,
    /// Lifetime of the token in milliseconds.
    pub revised_lifetime: u32,
}

impl Default for ChannelSecurityToken {
    fn default() -> Self {
        ChannelSecurityToken {
            channel_id: 0,
            token_id: 0,
            created_at: DateTime::null(),
            revised_lifetime: 0,
        }
    }
}

impl BinaryEncoder<ChannelSecurityToken> for ChannelSecurityToken {
    fn byte_len(&self) -> usize {
        let mut size = 0;
        size += self.channel_id.byte_len();
        size += self.token_id.byte_len();
        size += self.created_at.byte_len();
        size += self.revised_lifetime.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.channel_id.encode(stream)?;
        size += self.token_id.encode(stream)?;
        size += self.created_at.encode(stream)?;
        size += self.revised_lifetime.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let channel_id = u32::decode(stream, decoding_options)?;
        let token_id = u32::decode(stream, decoding_options)?;
        let created_at = DateTime::decode(stream, decoding_options)?;
        let revised_lifetime = u32::decode(stream, decoding_options)?;
        Ok(ChannelSecurityToken {
            channel_id,
            token_id,
            created_at,
            revised_lifetime,
        })
    }
}

/// Creates a secure channel with a server.
#[derive(PartialEq, Debug, Clone)]
pub struct OpenSecureChannelRequest {
    pub request_header: RequestHeader,
    pub client_protocol_version: u32,
    pub request_type: SecurityTokenRequestType,
    pub security_mode: MessageSecurityMode,
    pub client_nonce: ByteString,
    /// Requested lifetime of the security token in milliseconds.
    pub requested_lifetime: u32,
}

impl BinaryEncoder<OpenSecureChannelRequest> for OpenSecureChannelRequest {
    fn byte_len(&self) -> usize {
        let mut size = 0;
        size += self.request_header.byte_len();
        size += self.client_protocol_version.byte_len();
        size += self.request_type.byte_len();
        size += self.security_mode.byte_len();
        size += self.client_nonce.byte_len();
        size += self.requested_lifetime.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.request_header.encode(stream)?;
        size += self.client_protocol_version.encode(stream)?;
        size += self.request_type.encode(stream)?;
        size += self.security_mode.encode(stream)?;
        size += self.client_nonce.encode(stream)?;
        size += self.requested_lifetime.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let request_header = RequestHeader::decode(stream, decoding_options)?;
        let client_protocol_version = u32::decode(stream, decoding_options)?;
        let request_type = SecurityTokenRequestType::decode(stream, decoding_options)?;
        let security_mode = MessageSecurityMode::decode(stream, decoding_options)?;
        let client_nonce = ByteString::decode(stream, decoding_options)?;
        let requested_lifetime = u32::decode(stream, decoding_options)?;
        Ok(OpenSecureChannelRequest {
            request_header,
            client_protocol_version,
            request_type,
            security_mode,
            client_nonce,
            requested_lifetime,
        })
    }
}

/// The response to an OpenSecureChannel request.
#[derive(PartialEq, Debug, Clone)]
pub struct OpenSecureChannelResponse {
    pub response_header: ResponseHeader,
    pub server_protocol_version: u32,
    pub security_token: ChannelSecurityToken,
    pub server_nonce: ByteString,
}

impl BinaryEncoder<OpenSecureChannelResponse> for OpenSecureChannelResponse {
    fn byte_len(&self) -> usize {
        let mut size = 0;
        size += self.response_header.byte_len();
        size += self.server_protocol_version.byte_len();
        size += self.security_token.byte_len();
        size += self.server_nonce.byte_len();
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = 0;
        size += self.response_header.encode(stream)?;
        size += self.server_protocol_version.encode(stream)?;
        size += self.security_token.encode(stream)?;
        size += self.server_nonce.encode(stream)?;
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let response_header = ResponseHeader::decode(stream, decoding_options)?;
        let server_protocol_version = u32::decode(stream, decoding_options)?;
        let security_token = ChannelSecurityToken::decode(stream, decoding_options)?;
        let server_nonce = ByteString::decode(stream, decoding_options)?;
        Ok(OpenSecureChannelResponse {
            response_header,
            server_protocol_version,
            security_token,
            server_nonce,
        })
    }
}

/// Closes a secure channel. The server does not respond to this request.
#[derive(PartialEq, Debug, Clone)]
pub struct CloseSecureChannelRequest {
    pub request_header: RequestHeader,
}

impl BinaryEncoder<CloseSecureChannelRequest> for CloseSecureChannelRequest {
    fn byte_len(&self) -> usize {
        self.request_header.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.request_header.encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let request_header = RequestHeader::decode(stream, decoding_options)?;
        Ok(CloseSecureChannelRequest { request_header })
    }
}

/// The standard response body carried when a service invocation fails.
#[derive(PartialEq, Debug, Clone)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

impl BinaryEncoder<ServiceFault> for ServiceFault {
    fn byte_len(&self) -> usize {
        self.response_header.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.response_header.encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let response_header = ResponseHeader::decode(stream, decoding_options)?;
        Ok(ServiceFault { response_header })
    }
}
