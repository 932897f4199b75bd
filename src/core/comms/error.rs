// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The error type surfaced by the transport and secure channel layers. Every error carries
//! an OPC UA status code and an origin - `Local` for errors raised by this stack, `Remote`
//! for errors reported by the peer in an ERR message or abort chunk, which carry the
//! peer's status code and textual reason.

use std::fmt;

use crate::types::{encoding::EncodingError, status_code::StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    code: StatusCode,
    origin: Origin,
    reason: Option<String>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 0x{:08X}: {}",
            self.origin,
            self.code.bits(),
            self.code.description()
        )?;
        if let Some(ref reason) = self.reason {
            write!(f, ", reason: {}", reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<EncodingError> for Error {
    fn from(err: EncodingError) -> Self {
        let code = err.code();
        let path = err.path();
        let mut reason = if path.is_empty() {
            String::new()
        } else {
            path
        };
        if let Some(cause) = err.cause() {
            if !reason.is_empty() {
                reason.push_str(": ");
            }
            reason.push_str(cause);
        }
        if reason.is_empty() {
            Error::local_no_reason(code)
        } else {
            Error::local(code, reason)
        }
    }
}

impl Error {
    /// An error raised by this stack.
    pub fn local<T: Into<String>>(code: StatusCode, reason: T) -> Error {
        Error {
            code,
            origin: Origin::Local,
            reason: Some(reason.into()),
        }
    }

    /// A local error with nothing more to say than its status code.
    pub fn local_no_reason(code: StatusCode) -> Error {
        Error {
            code,
            origin: Origin::Local,
            reason: None,
        }
    }

    /// An error reported by the peer.
    pub fn remote<T: Into<String>>(code: StatusCode, reason: T) -> Error {
        Error {
            code,
            origin: Origin::Remote,
            reason: Some(reason.into()),
        }
    }

    /// The OPC UA status code for the error.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Whether the error was generated locally or reported by the peer.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        self.code == StatusCode::BadTimeout
    }
}

#[test]
fn error_display() {
    let err = Error::local(StatusCode::BadTimeout, "deadline reached");
    assert_eq!(
        err.to_string(),
        "local 0x800A0000: The operation timed out, reason: deadline reached"
    );
    let err = Error::remote(StatusCode::BadTcpServerTooBusy, "try later");
    assert_eq!(err.origin(), Origin::Remote);
    assert_eq!(err.code(), StatusCode::BadTcpServerTooBusy);
}
