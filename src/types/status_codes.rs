// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Status codes from OPC UA Part 4, or at least the subset of the full table that this
//! stack can raise or expects to receive. Codes are values in the top 16 bits of the
//! `StatusCode`, while the bottom 16 bits hold qualifying flags.

#![allow(non_upper_case_globals)]

bitflags! {
    pub struct StatusCode: u32 {
        /// The operation succeeded.
        const Good = 0x0000_0000;
        /// An unexpected error occurred.
        const BadUnexpectedError = 0x8001_0000;
        /// An internal error occurred as a result of a programming or configuration error.
        const BadInternalError = 0x8002_0000;
        /// Not enough memory to complete the operation.
        const BadOutOfMemory = 0x8003_0000;
        /// An operating system resource is not available.
        const BadResourceUnavailable = 0x8004_0000;
        /// A low level communication error occurred.
        const BadCommunicationError = 0x8005_0000;
        /// Encoding halted because of invalid data in the objects being serialized.
        const BadEncodingError = 0x8006_0000;
        /// Decoding halted because of invalid data in the stream.
        const BadDecodingError = 0x8007_0000;
        /// The message encoding/decoding limits imposed by the stack have been exceeded.
        const BadEncodingLimitsExceeded = 0x8008_0000;
        /// An unrecognized response was received from the server.
        const BadUnknownResponse = 0x8009_0000;
        /// The operation timed out.
        const BadTimeout = 0x800A_0000;
        /// The server does not support the requested service.
        const BadServiceUnsupported = 0x800B_0000;
        /// The operation was cancelled because the application is shutting down.
        const BadShutdown = 0x800C_0000;
        /// The operation could not complete because the client is not connected to the server.
        const BadServerNotConnected = 0x800D_0000;
        /// There was nothing to do because the client passed a list of operations with no elements.
        const BadNothingToDo = 0x800F_0000;
        /// The request could not be processed because it specified too many operations.
        const BadTooManyOperations = 0x8010_0000;
        /// An error occurred verifying security.
        const BadSecurityChecksFailed = 0x8013_0000;
        /// The specified secure channel is no longer valid.
        const BadSecureChannelIdInvalid = 0x8022_0000;
        /// The timestamp is outside the range allowed by the server.
        const BadInvalidTimestamp = 0x8023_0000;
        /// The syntax of a node id is not valid.
        const BadNodeIdInvalid = 0x8033_0000;
        /// The requested operation is not implemented.
        const BadNotImplemented = 0x8040_0000;
        /// The security mode does not meet the requirements set by the server.
        const BadSecurityModeRejected = 0x8054_0000;
        /// The security policy does not meet the requirements set by the server.
        const BadSecurityPolicyRejected = 0x8055_0000;
        /// The sequence number is not valid.
        const BadSequenceNumberUnknown = 0x807A_0000;
        /// The server cannot process the request because it is too busy.
        const BadTcpServerTooBusy = 0x807D_0000;
        /// The type of the message specified in the header is invalid.
        const BadTcpMessageTypeInvalid = 0x807E_0000;
        /// The secure channel id in the header is not valid.
        const BadTcpSecureChannelUnknown = 0x807F_0000;
        /// The size of the message specified in the header is too large.
        const BadTcpMessageTooLarge = 0x8080_0000;
        /// There are not enough resources to process the request.
        const BadTcpNotEnoughResources = 0x8081_0000;
        /// An internal error occurred in the transport layer.
        const BadTcpInternalError = 0x8082_0000;
        /// The server does not recognize the endpoint url.
        const BadTcpEndpointUrlInvalid = 0x8083_0000;
        /// The request could not be sent because of a network interruption.
        const BadRequestInterrupted = 0x8084_0000;
        /// Timeout occurred while processing the request.
        const BadRequestTimeout = 0x8085_0000;
        /// The secure channel has been closed.
        const BadSecureChannelClosed = 0x8086_0000;
        /// The token has expired or is not recognized.
        const BadSecureChannelTokenUnknown = 0x8087_0000;
        /// The sequence number is not valid.
        const BadSequenceNumberInvalid = 0x8088_0000;
        /// One or more arguments are invalid.
        const BadInvalidArgument = 0x80AB_0000;
        /// Could not establish a network connection to the remote server.
        const BadConnectionRejected = 0x80AC_0000;
        /// The server has disconnected from the client.
        const BadDisconnect = 0x80AD_0000;
        /// The network connection has been closed.
        const BadConnectionClosed = 0x80AE_0000;
        /// The operation cannot be completed because the object is closed, uninitialized or in some other invalid state.
        const BadInvalidState = 0x80AF_0000;
        /// Cannot move beyond end of the stream.
        const BadEndOfStream = 0x80B0_0000;
        /// The request message size exceeds limits set by the server.
        const BadRequestTooLarge = 0x80B8_0000;
        /// The response message size exceeds limits set by the client.
        const BadResponseTooLarge = 0x80B9_0000;

        // Bits and masks
        const IS_ERROR     = 0x8000_0000;
        const IS_UNCERTAIN = 0x4000_0000;
        /// Mask for the status code section
        const STATUS_MASK  = 0xFFFF_0000;
        /// Mask for the bits section
        const BIT_MASK     = 0x0000_FFFF;

        // Historian bits 0:4
        const HISTORICAL_CALCULATED   = 0b0000_0000_0000_0001;
        const HISTORICAL_INTERPOLATED = 0b0000_0000_0000_0010;
        const HISTORICAL_PARTIAL      = 0b0000_0000_0000_0100;
        const HISTORICAL_EXTRA_DATA   = 0b0000_0000_0000_1000;
        const HISTORICAL_MULTI_VALUE  = 0b0000_0000_0001_0000;
        // Overflow bit 7
        const OVERFLOW                = 0b0000_0000_1000_0000;
        // Limit bits 8:9
        const LIMIT_LOW               = 0b0000_0001_0000_0000;
        const LIMIT_HIGH              = 0b0000_0010_0000_0000;
        const LIMIT_CONSTANT          = 0b0000_0011_0000_0000;
        // Semantics changed bit 14
        const SEMANTICS_CHANGED       = 0b0100_0000_0000_0000;
        // Structure changed bit 15
        const STRUCTURE_CHANGED       = 0b1000_0000_0000_0000;
    }
}

impl StatusCode {
    /// The name of the status code section of the value, e.g. "BadTimeout".
    pub fn name(&self) -> &'static str {
        match self.status() {
            StatusCode::Good => "Good",
            StatusCode::BadUnexpectedError => "BadUnexpectedError",
            StatusCode::BadInternalError => "BadInternalError",
            StatusCode::BadOutOfMemory => "BadOutOfMemory",
            StatusCode::BadResourceUnavailable => "BadResourceUnavailable",
            StatusCode::BadCommunicationError => "BadCommunicationError",
            StatusCode::BadEncodingError => "BadEncodingError",
            StatusCode::BadDecodingError => "BadDecodingError",
            StatusCode::BadEncodingLimitsExceeded => "BadEncodingLimitsExceeded",
            StatusCode::BadUnknownResponse => "BadUnknownResponse",
            StatusCode::BadTimeout => "BadTimeout",
            StatusCode::BadServiceUnsupported => "BadServiceUnsupported",
            StatusCode::BadShutdown => "BadShutdown",
            StatusCode::BadServerNotConnected => "BadServerNotConnected",
            StatusCode::BadNothingToDo => "BadNothingToDo",
            StatusCode::BadTooManyOperations => "BadTooManyOperations",
            StatusCode::BadSecurityChecksFailed => "BadSecurityChecksFailed",
            StatusCode::BadSecureChannelIdInvalid => "BadSecureChannelIdInvalid",
            StatusCode::BadInvalidTimestamp => "BadInvalidTimestamp",
            StatusCode::BadNodeIdInvalid => "BadNodeIdInvalid",
            StatusCode::BadNotImplemented => "BadNotImplemented",
            StatusCode::BadSecurityModeRejected => "BadSecurityModeRejected",
            StatusCode::BadSecurityPolicyRejected => "BadSecurityPolicyRejected",
            StatusCode::BadSequenceNumberUnknown => "BadSequenceNumberUnknown",
            StatusCode::BadTcpServerTooBusy => "BadTcpServerTooBusy",
            StatusCode::BadTcpMessageTypeInvalid => "BadTcpMessageTypeInvalid",
            StatusCode::BadTcpSecureChannelUnknown => "BadTcpSecureChannelUnknown",
            StatusCode::BadTcpMessageTooLarge => "BadTcpMessageTooLarge",
            StatusCode::BadTcpNotEnoughResources => "BadTcpNotEnoughResources",
            StatusCode::BadTcpInternalError => "BadTcpInternalError",
            StatusCode::BadTcpEndpointUrlInvalid => "BadTcpEndpointUrlInvalid",
            StatusCode::BadRequestInterrupted => "BadRequestInterrupted",
            StatusCode::BadRequestTimeout => "BadRequestTimeout",
            StatusCode::BadSecureChannelClosed => "BadSecureChannelClosed",
            StatusCode::BadSecureChannelTokenUnknown => "BadSecureChannelTokenUnknown",
            StatusCode::BadSequenceNumberInvalid => "BadSequenceNumberInvalid",
            StatusCode::BadInvalidArgument => "BadInvalidArgument",
            StatusCode::BadConnectionRejected => "BadConnectionRejected",
            StatusCode::BadDisconnect => "BadDisconnect",
            StatusCode::BadConnectionClosed => "BadConnectionClosed",
            StatusCode::BadInvalidState => "BadInvalidState",
            StatusCode::BadEndOfStream => "BadEndOfStream",
            StatusCode::BadRequestTooLarge => "BadRequestTooLarge",
            StatusCode::BadResponseTooLarge => "BadResponseTooLarge",
            _ => "Unknown",
        }
    }

    /// A description of the status code section of the value.
    pub fn description(&self) -> &'static str {
        match self.status() {
            StatusCode::Good => "The operation succeeded",
            StatusCode::BadUnexpectedError => "An unexpected error occurred",
            StatusCode::BadInternalError => "An internal error occurred as a result of a programming or configuration error",
            StatusCode::BadOutOfMemory => "Not enough memory to complete the operation",
            StatusCode::BadResourceUnavailable => "An operating system resource is not available",
            StatusCode::BadCommunicationError => "A low level communication error occurred",
            StatusCode::BadEncodingError => "Encoding halted because of invalid data in the objects being serialized",
            StatusCode::BadDecodingError => "Decoding halted because of invalid data in the stream",
            StatusCode::BadEncodingLimitsExceeded => "The message encoding/decoding limits imposed by the stack have been exceeded",
            StatusCode::BadUnknownResponse => "An unrecognized response was received from the server",
            StatusCode::BadTimeout => "The operation timed out",
            StatusCode::BadServiceUnsupported => "The server does not support the requested service",
            StatusCode::BadShutdown => "The operation was cancelled because the application is shutting down",
            StatusCode::BadServerNotConnected => "The operation could not complete because the client is not connected to the server",
            StatusCode::BadNothingToDo => "There was nothing to do because the client passed a list of operations with no elements",
            StatusCode::BadTooManyOperations => "The request could not be processed because it specified too many operations",
            StatusCode::BadSecurityChecksFailed => "An error occurred verifying security",
            StatusCode::BadSecureChannelIdInvalid => "The specified secure channel is no longer valid",
            StatusCode::BadInvalidTimestamp => "The timestamp is outside the range allowed by the server",
            StatusCode::BadNodeIdInvalid => "The syntax of a node id is not valid",
            StatusCode::BadNotImplemented => "The requested operation is not implemented",
            StatusCode::BadSecurityModeRejected => "The security mode does not meet the requirements set by the server",
            StatusCode::BadSecurityPolicyRejected => "The security policy does not meet the requirements set by the server",
            StatusCode::BadSequenceNumberUnknown => "The sequence number is not valid",
            StatusCode::BadTcpServerTooBusy => "The server cannot process the request because it is too busy",
            StatusCode::BadTcpMessageTypeInvalid => "The type of the message specified in the header is invalid",
            StatusCode::BadTcpSecureChannelUnknown => "The secure channel id in the header is not valid",
            StatusCode::BadTcpMessageTooLarge => "The size of the message specified in the header is too large",
            StatusCode::BadTcpNotEnoughResources => "There are not enough resources to process the request",
            StatusCode::BadTcpInternalError => "An internal error occurred in the transport layer",
            StatusCode::BadTcpEndpointUrlInvalid => "The server does not recognize the endpoint url",
            StatusCode::BadRequestInterrupted => "The request could not be sent because of a network interruption",
            StatusCode::BadRequestTimeout => "Timeout occurred while processing the request",
            StatusCode::BadSecureChannelClosed => "The secure channel has been closed",
            StatusCode::BadSecureChannelTokenUnknown => "The token has expired or is not recognized",
            StatusCode::BadSequenceNumberInvalid => "The sequence number is not valid",
            StatusCode::BadInvalidArgument => "One or more arguments are invalid",
            StatusCode::BadConnectionRejected => "Could not establish a network connection to remote server",
            StatusCode::BadDisconnect => "The server has disconnected from the client",
            StatusCode::BadConnectionClosed => "The network connection has been closed",
            StatusCode::BadInvalidState => "The operation cannot be completed because the object is closed, uninitialized or in some other invalid state",
            StatusCode::BadEndOfStream => "Cannot move beyond end of the stream",
            StatusCode::BadRequestTooLarge => "The request message size exceeds limits set by the server",
            StatusCode::BadResponseTooLarge => "The response message size exceeds limits set by the client",
            _ => "Unknown status code",
        }
    }
}
