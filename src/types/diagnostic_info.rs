// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DiagnosticInfo`.

use std::io::{Read, Write};

use crate::types::{encoding::*, status_code::StatusCode, string::UAString};

bitflags! {
    pub struct DiagnosticInfoMask: u8 {
        const HAS_SYMBOLIC_ID = 0x01;
        const HAS_NAMESPACE = 0x02;
        const HAS_LOCALIZED_TEXT = 0x04;
        const HAS_LOCALE = 0x08;
        const HAS_ADDITIONAL_INFO = 0x10;
        const HAS_INNER_STATUS_CODE = 0x20;
        const HAS_INNER_DIAGNOSTIC_INFO = 0x40;
    }
}

/// Diagnostic information. The type contains itself through a boxed optional field, and the
/// codec follows the indirection on demand guarded by the decoding depth gauge.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    /// A symbolic name for the status code.
    pub symbolic_id: Option<i32>,
    /// A namespace that qualifies the symbolic id.
    pub namespace_uri: Option<i32>,
    /// The locale used for the localized text.
    pub locale: Option<i32>,
    /// A human readable summary of the status code.
    pub localized_text: Option<i32>,
    /// Detailed application specific diagnostic information.
    pub additional_info: Option<UAString>,
    /// A status code provided by an underlying system.
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostic info associated with the inner status code.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncoder<DiagnosticInfo> for DiagnosticInfo {
    fn byte_len(&self) -> usize {
        let mut size: usize = 0;
        size += 1; // encoding mask
        if let Some(ref symbolic_id) = self.symbolic_id {
            size += symbolic_id.byte_len();
        }
        if let Some(ref namespace_uri) = self.namespace_uri {
            size += namespace_uri.byte_len()
        }
        if let Some(ref locale) = self.locale {
            size += locale.byte_len()
        }
        if let Some(ref localized_text) = self.localized_text {
            size += localized_text.byte_len()
        }
        if let Some(ref additional_info) = self.additional_info {
            size += additional_info.byte_len()
        }
        if let Some(ref inner_status_code) = self.inner_status_code {
            size += inner_status_code.byte_len()
        }
        if let Some(ref inner_diagnostic_info) = self.inner_diagnostic_info {
            size += inner_diagnostic_info.byte_len()
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        size += write_u8(stream, self.encoding_mask().bits())?;
        if let Some(ref symbolic_id) = self.symbolic_id {
            size += write_i32(stream, *symbolic_id)?;
        }
        if let Some(ref namespace_uri) = self.namespace_uri {
            size += namespace_uri.encode(stream)?;
        }
        if let Some(ref locale) = self.locale {
            size += locale.encode(stream)?;
        }
        if let Some(ref localized_text) = self.localized_text {
            size += localized_text.encode(stream)?;
        }
        if let Some(ref additional_info) = self.additional_info {
            size += additional_info.encode(stream)?;
        }
        if let Some(ref inner_status_code) = self.inner_status_code {
            size += inner_status_code.encode(stream)?;
        }
        if let Some(ref inner_diagnostic_info) = self.inner_diagnostic_info {
            size += inner_diagnostic_info.encode(stream)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask =
            DiagnosticInfoMask::from_bits_truncate(u8::decode(stream, decoding_options)?);
        let mut diagnostic_info = DiagnosticInfo::default();

        if encoding_mask.contains(DiagnosticInfoMask::HAS_SYMBOLIC_ID) {
            diagnostic_info.symbolic_id = Some(i32::decode(stream, decoding_options)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_NAMESPACE) {
            diagnostic_info.namespace_uri = Some(i32::decode(stream, decoding_options)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_LOCALE) {
            diagnostic_info.locale = Some(i32::decode(stream, decoding_options)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_LOCALIZED_TEXT) {
            diagnostic_info.localized_text = Some(i32::decode(stream, decoding_options)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_ADDITIONAL_INFO) {
            diagnostic_info.additional_info = Some(UAString::decode(stream, decoding_options)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_INNER_STATUS_CODE) {
            diagnostic_info.inner_status_code = Some(StatusCode::decode(stream, decoding_options)?);
        }
        if encoding_mask.contains(DiagnosticInfoMask::HAS_INNER_DIAGNOSTIC_INFO) {
            // Recursive decode is bounded by the depth gauge
            let _depth_lock = decoding_options.depth_lock()?;
            diagnostic_info.inner_diagnostic_info =
                Some(Box::new(DiagnosticInfo::decode(stream, decoding_options)?));
        }
        Ok(diagnostic_info)
    }
}

impl Default for DiagnosticInfo {
    fn default() -> Self {
        DiagnosticInfo::null()
    }
}

impl DiagnosticInfo {
    pub fn null() -> DiagnosticInfo {
        DiagnosticInfo {
            symbolic_id: None,
            namespace_uri: None,
            locale: None,
            localized_text: None,
            additional_info: None,
            inner_status_code: None,
            inner_diagnostic_info: None,
        }
    }

    pub fn encoding_mask(&self) -> DiagnosticInfoMask {
        let mut encoding_mask = DiagnosticInfoMask::empty();
        if self.symbolic_id.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_NAMESPACE;
        }
        if self.locale.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_LOCALE;
        }
        if self.localized_text.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_LOCALIZED_TEXT;
        }
        if self.additional_info.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            encoding_mask |= DiagnosticInfoMask::HAS_INNER_DIAGNOSTIC_INFO;
        }
        encoding_mask
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn diagnostic_info_round_trip() {
        let d = DiagnosticInfo {
            symbolic_id: Some(10),
            namespace_uri: None,
            locale: None,
            localized_text: Some(4),
            additional_info: Some(UAString::from("pump 3 offline")),
            inner_status_code: Some(StatusCode::BadTimeout),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                symbolic_id: Some(99),
                ..DiagnosticInfo::null()
            })),
        };
        let bytes = d.encode_to_vec();
        assert_eq!(bytes.len(), d.byte_len());
        let decoded =
            DiagnosticInfo::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn diagnostic_info_depth_limit() {
        // Build a nest deeper than the decoder permits
        let mut d = DiagnosticInfo::null();
        for _ in 0..200 {
            d = DiagnosticInfo {
                inner_diagnostic_info: Some(Box::new(d)),
                ..DiagnosticInfo::null()
            };
        }
        let bytes = d.encode_to_vec();
        let result = DiagnosticInfo::decode(&mut Cursor::new(bytes), &DecodingOptions::test());
        assert!(result.is_err());
    }
}
