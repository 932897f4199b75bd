// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `UAString`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{
    encoding::{
        process_decode_io_result, process_encode_io_result, write_i32, BinaryEncoder,
        DecodingOptions, EncodingError, EncodingResult,
    },
    status_code::StatusCode,
};

/// To avoid naming conflict hell, the OPC UA String type is typed `UAString` so it does not collide
/// with the Rust `String`.
///
/// A string contains UTF-8 encoded characters or a null value. A null value is distinct from
/// being an empty string so internally, the code maintains that distinction by holding the value
/// as an `Option<String>`.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
pub struct UAString {
    value: Option<String>,
}

impl fmt::Display for UAString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref value) = self.value {
            write!(f, "{}", value)
        } else {
            write!(f, "[null]")
        }
    }
}

impl BinaryEncoder<UAString> for UAString {
    fn byte_len(&self) -> usize {
        // Length plus the actual string length in bytes for a non-null string.
        4 + match self.value {
            Some(ref value) => value.len(),
            None => 0,
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        // Strings are encoded as UTF8 chars preceded by an Int32 length. A -1 indicates a
        // null string. Null and empty are not distinguished on emission - peers expect the
        // -1 form for both.
        match self.value {
            Some(ref value) if !value.is_empty() => {
                let mut size: usize = 0;
                size += write_i32(stream, value.len() as i32)?;
                size += process_encode_io_result(stream.write(value.as_bytes()))?;
                assert_eq!(size, self.byte_len());
                Ok(size)
            }
            _ => write_i32(stream, -1),
        }
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let len = i32::decode(stream, decoding_options)?;
        // Null string?
        if len == -1 {
            Ok(UAString::null())
        } else if len < -1 {
            error!("String buf length is a negative number {}", len);
            Err(StatusCode::BadDecodingError.into())
        } else if len as usize > decoding_options.max_string_length {
            error!(
                "String buf length {} exceeds decoding limit {}",
                len, decoding_options.max_string_length
            );
            Err(StatusCode::BadDecodingError.into())
        } else {
            // Create a buffer filled with zeroes and read the string over the top
            let mut buf = vec![0u8; len as usize];
            process_decode_io_result(stream.read_exact(&mut buf))?;
            let value = String::from_utf8(buf).map_err(|err| {
                trace!("Decoded string was not valid UTF-8 - {}", err);
                EncodingError::with_cause(StatusCode::BadDecodingError, err.to_string())
            })?;
            Ok(UAString::from(value))
        }
    }
}

impl From<UAString> for String {
    fn from(value: UAString) -> Self {
        value.as_ref().to_string()
    }
}

impl AsRef<str> for UAString {
    fn as_ref(&self) -> &str {
        match self.value {
            Some(ref value) => value,
            None => "",
        }
    }
}

impl<'a> From<&'a str> for UAString {
    fn from(value: &'a str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<&String> for UAString {
    fn from(value: &String) -> Self {
        UAString {
            value: Some(value.clone()),
        }
    }
}

impl From<String> for UAString {
    fn from(value: String) -> Self {
        UAString { value: Some(value) }
    }
}

impl Default for UAString {
    fn default() -> Self {
        UAString::null()
    }
}

impl PartialEq<str> for UAString {
    fn eq(&self, other: &str) -> bool {
        match self.value {
            None => false,
            Some(ref v) => v.eq(other),
        }
    }
}

impl UAString {
    pub fn value(&self) -> &Option<String> {
        &self.value
    }

    pub fn set_value(&mut self, value: Option<String>) {
        self.value = value;
    }

    /// Returns true if the string is null or empty, false otherwise
    pub fn is_empty(&self) -> bool {
        match self.value {
            Some(ref v) => v.is_empty(),
            None => true,
        }
    }

    /// Returns the length of the string in bytes or -1 for null.
    pub fn len(&self) -> isize {
        match self.value {
            Some(ref v) => v.len() as isize,
            None => -1,
        }
    }

    /// Create a null string (not the same as an empty string).
    pub fn null() -> UAString {
        UAString { value: None }
    }

    /// Test if the string is null.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

#[test]
fn string_null() {
    let s = UAString::null();
    assert!(s.is_null());
    assert!(s.is_empty());
    assert_eq!(s.len(), -1);
}

#[test]
fn string_empty() {
    let s = UAString::from("");
    assert!(!s.is_null());
    assert!(s.is_empty());
    assert_eq!(s.len(), 0);
}

#[test]
fn string_value() {
    let v = "Mary had a little lamb";
    let s = UAString::from(v);
    assert!(!s.is_null());
    assert!(!s.is_empty());
    assert_eq!(s.as_ref(), v);
}

#[test]
fn string_null_bytes() {
    // A null string encodes as a -1 length prefix and nothing else
    let s = UAString::null();
    assert_eq!(s.encode_to_vec(), vec![0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn string_empty_bytes() {
    // Null and empty are conflated on emission, so "" also encodes as -1
    let s = UAString::from("");
    assert_eq!(s.encode_to_vec(), vec![0xFF, 0xFF, 0xFF, 0xFF]);
    // The conflation is one way; the decoded value is the null string
    let decoded = UAString::decode(
        &mut std::io::Cursor::new(s.encode_to_vec()),
        &DecodingOptions::test(),
    )
    .unwrap();
    assert!(decoded.is_null());
}

#[test]
fn string_bytes() {
    let s = UAString::from("foobar");
    assert_eq!(
        s.encode_to_vec(),
        vec![0x06, 0x00, 0x00, 0x00, 0x66, 0x6F, 0x6F, 0x62, 0x61, 0x72]
    );
}
