// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The schema driven encoder. Walks a record's fields in wire order, evaluating switch
//! predicates, asserting external length fields and routing bit sized fields through the
//! bit packer.

use std::io::Write;

use crate::codec::{
    bit::BitWriter,
    schema::{Field, FieldType, PrimitiveKind, Schema},
    switch_applies,
    value::{StructValue, Value},
};
use crate::types::{
    encoding::{write_u8, BinaryEncoder, EncodingError, EncodingResult},
    status_code::StatusCode,
};

/// Writes dynamic record values to an output stream.
pub struct Encoder<'a, S: Write> {
    stream: &'a mut S,
    bits: BitWriter,
    written: usize,
}

impl<'a, S: Write> Encoder<'a, S> {
    pub fn new(stream: &'a mut S) -> Encoder<'a, S> {
        Encoder {
            stream,
            bits: BitWriter::new(),
            written: 0,
        }
    }

    /// The number of bytes written since the encoder was created.
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Encodes one logical record. A trailing partial byte of bit fields is flushed so the
    /// bit cache always resets at the record boundary.
    pub fn encode(&mut self, schema: &Schema, value: &StructValue) -> EncodingResult<usize> {
        let start = self.written;
        self.encode_struct(schema, value)
            .map_err(|e| e.in_field(schema.name()))?;
        self.written += self.bits.flush(&mut *self.stream)?;
        Ok(self.written - start)
    }

    fn encode_struct(&mut self, schema: &Schema, value: &StructValue) -> EncodingResult<()> {
        // Values of the fields processed so far, for switch and length field references.
        let mut processed: Vec<(&str, &Value)> = Vec::new();
        for field in schema.flattened_fields() {
            let applies = switch_applies(field, StatusCode::BadEncodingError, |name| {
                processed.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
            })
            .map_err(|e| e.in_field(&field.name))?;
            if !applies {
                continue;
            }

            let v = value.get(&field.name).ok_or_else(|| {
                EncodingError::with_cause(StatusCode::BadEncodingError, "no value supplied")
                    .in_field(&field.name)
            })?;

            if let Some(ref length_field) = field.length_field {
                self.check_length(field, length_field, v, &processed)
                    .map_err(|e| e.in_field(&field.name))?;
            }

            if field.bit_size > 0 {
                self.encode_bits(field, v)
                    .map_err(|e| e.in_field(&field.name))?;
            } else {
                self.encode_value(&field.field_type, v)
                    .map_err(|e| e.in_field(&field.name))?;
            }
            processed.push((field.name.as_str(), v));
        }
        Ok(())
    }

    /// Asserts that the value of the referenced length field equals the actual array length.
    fn check_length(
        &self,
        field: &Field,
        length_field: &str,
        v: &Value,
        processed: &[(&str, &Value)],
    ) -> EncodingResult<()> {
        let length_value = processed
            .iter()
            .find(|(n, _)| *n == length_field)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                EncodingError::with_cause(
                    StatusCode::BadEncodingError,
                    format!("length field `{}` has not been encoded yet", length_field),
                )
            })?;
        let expected = length_value.as_i64().ok_or_else(|| {
            EncodingError::with_cause(
                StatusCode::BadEncodingError,
                format!(
                    "length field `{}` is not an integer, got {}",
                    length_field,
                    length_value.kind_name()
                ),
            )
        })?;
        let actual = v
            .as_array()
            .map(|a| a.len())
            .ok_or_else(|| {
                EncodingError::with_cause(
                    StatusCode::BadEncodingError,
                    format!("length field `{}` set on a non-array field", field.name),
                )
            })?;
        if actual as i64 != expected {
            Err(EncodingError::with_cause(
                StatusCode::BadEncodingError,
                format!(
                    "array length {} does not match length field `{}` value {}",
                    actual, length_field, expected
                ),
            ))
        } else {
            Ok(())
        }
    }

    fn encode_bits(&mut self, field: &Field, v: &Value) -> EncodingResult<()> {
        if field.bit_size > 8 {
            return Err(EncodingError::with_cause(
                StatusCode::BadEncodingError,
                format!("invalid bit length {}", field.bit_size),
            ));
        }
        match v {
            Value::Byte(b) => {
                self.written += self.bits.push_to(&mut *self.stream, *b, field.bit_size)?;
                Ok(())
            }
            _ => Err(EncodingError::with_cause(
                StatusCode::BadEncodingError,
                format!(
                    "bit sized fields must be backed by a byte value, got {}",
                    v.kind_name()
                ),
            )),
        }
    }

    fn encode_value(&mut self, field_type: &FieldType, v: &Value) -> EncodingResult<()> {
        match field_type {
            FieldType::Primitive(kind) => self.encode_primitive(*kind, v),
            FieldType::Array(element_type) => {
                let values = v.as_array().ok_or_else(|| {
                    EncodingError::with_cause(
                        StatusCode::BadEncodingError,
                        format!("expected Array value, got {}", v.kind_name()),
                    )
                })?;
                for (i, item) in values.iter().enumerate() {
                    self.encode_value(element_type, item)
                        .map_err(|e| e.at_index(i))?;
                }
                Ok(())
            }
            FieldType::Record(schema) => {
                let value = v.as_struct().ok_or_else(|| {
                    EncodingError::with_cause(
                        StatusCode::BadEncodingError,
                        format!("expected Struct value, got {}", v.kind_name()),
                    )
                })?;
                self.encode_struct(schema, value)
            }
            FieldType::RecursiveRecord(schema) => {
                let schema = schema.upgrade().ok_or_else(|| {
                    EncodingError::with_cause(
                        StatusCode::BadEncodingError,
                        "recursive schema reference is dangling",
                    )
                })?;
                let value = v.as_struct().ok_or_else(|| {
                    EncodingError::with_cause(
                        StatusCode::BadEncodingError,
                        format!("expected Struct value, got {}", v.kind_name()),
                    )
                })?;
                self.encode_struct(&schema, value)
            }
            FieldType::Union(variants) => {
                let (discriminant, inner) = match v {
                    Value::Union {
                        discriminant,
                        value,
                    } => (*discriminant, value.as_ref()),
                    _ => {
                        return Err(EncodingError::with_cause(
                            StatusCode::BadEncodingError,
                            format!("expected Union value, got {}", v.kind_name()),
                        ))
                    }
                };
                let variant = variants
                    .iter()
                    .find(|x| x.discriminant == discriminant)
                    .ok_or_else(|| {
                        EncodingError::with_cause(
                            StatusCode::BadEncodingError,
                            format!("no union variant for discriminant {}", discriminant),
                        )
                    })?;
                self.written += write_u8(&mut *self.stream, discriminant)?;
                let value = inner.as_struct().ok_or_else(|| {
                    EncodingError::with_cause(
                        StatusCode::BadEncodingError,
                        format!("union value must be a struct, got {}", inner.kind_name()),
                    )
                })?;
                self.encode_struct(&variant.schema, value)
            }
        }
    }

    fn encode_primitive(&mut self, kind: PrimitiveKind, v: &Value) -> EncodingResult<()> {
        let size = match (kind, v) {
            (PrimitiveKind::Bool, Value::Bool(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::SByte, Value::SByte(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Byte, Value::Byte(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Int16, Value::Int16(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::UInt16, Value::UInt16(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Int32, Value::Int32(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::UInt32, Value::UInt32(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Int64, Value::Int64(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::UInt64, Value::UInt64(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Float, Value::Float(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Double, Value::Double(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Bit, Value::Bit(value)) => {
                self.bits.push_to(&mut *self.stream, *value as u8, 1)?
            }
            (PrimitiveKind::String, Value::String(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::DateTime, Value::DateTime(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::Guid, Value::Guid(value)) => value.encode(&mut *self.stream)?,
            (PrimitiveKind::ByteString, Value::ByteString(value)) => {
                value.encode(&mut *self.stream)?
            }
            _ => {
                return Err(EncodingError::with_cause(
                    StatusCode::BadEncodingError,
                    format!("expected {:?} value, got {}", kind, v.kind_name()),
                ))
            }
        };
        self.written += size;
        Ok(())
    }
}
