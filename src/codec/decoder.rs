// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The schema driven decoder. Mirrors the encoder: switch predicates decide which fields
//! are present, array fields are preallocated from their length field and bit sized fields
//! are drawn from the bit cache.

use std::io::Read;

use crate::codec::{
    bit::BitReader,
    schema::{Field, FieldType, PrimitiveKind, Schema},
    switch_applies,
    value::{StructValue, Value},
};
use crate::types::{
    encoding::{read_u8, BinaryEncoder, DecodingOptions, EncodingError, EncodingResult},
    status_code::StatusCode,
    ByteString, DateTime, Guid, UAString,
};

/// Reads dynamic record values from an input stream.
pub struct Decoder<'a, S: Read> {
    stream: &'a mut S,
    bits: BitReader,
    decoding_options: &'a DecodingOptions,
}

impl<'a, S: Read> Decoder<'a, S> {
    pub fn new(stream: &'a mut S, decoding_options: &'a DecodingOptions) -> Decoder<'a, S> {
        Decoder {
            stream,
            bits: BitReader::new(),
            decoding_options,
        }
    }

    /// Decodes one logical record described by `schema`.
    pub fn decode(&mut self, schema: &Schema) -> EncodingResult<StructValue> {
        self.decode_struct(schema)
            .map_err(|e| e.in_field(schema.name()))
    }

    fn decode_struct(&mut self, schema: &Schema) -> EncodingResult<StructValue> {
        let mut out = StructValue::new();
        for field in schema.flattened_fields() {
            let applies = switch_applies(field, StatusCode::BadDecodingError, |name| {
                out.get(name)
            })
            .map_err(|e| e.in_field(&field.name))?;
            if !applies {
                continue;
            }

            let v = if field.bit_size > 0 {
                self.decode_bits(field)
            } else if field.length_field.is_some() {
                self.decode_sized_array(field, &out)
            } else {
                self.decode_value(&field.field_type)
            }
            .map_err(|e| e.in_field(&field.name))?;
            out.set(field.name.clone(), v);
        }
        Ok(out)
    }

    fn decode_bits(&mut self, field: &Field) -> EncodingResult<Value> {
        if field.bit_size > 8 {
            return Err(EncodingError::with_cause(
                StatusCode::BadDecodingError,
                format!("invalid bit length {}", field.bit_size),
            ));
        }
        match field.field_type {
            FieldType::Primitive(PrimitiveKind::Byte) => {
                Ok(Value::Byte(self.bits.read(&mut *self.stream, field.bit_size)?))
            }
            _ => Err(EncodingError::with_cause(
                StatusCode::BadDecodingError,
                "bit sized fields must be backed by a byte value",
            )),
        }
    }

    /// Decodes an array field whose element count comes from an earlier length field.
    fn decode_sized_array(&mut self, field: &Field, out: &StructValue) -> EncodingResult<Value> {
        let length_field = field.length_field.as_deref().unwrap();
        let length_value = out.get(length_field).ok_or_else(|| {
            EncodingError::with_cause(
                StatusCode::BadDecodingError,
                format!("length field `{}` has not been decoded yet", length_field),
            )
        })?;
        let len = length_value.as_i64().ok_or_else(|| {
            EncodingError::with_cause(
                StatusCode::BadDecodingError,
                format!(
                    "length field `{}` is not an integer, got {}",
                    length_field,
                    length_value.kind_name()
                ),
            )
        })?;
        if len < 0 {
            return Err(EncodingError::with_cause(
                StatusCode::BadDecodingError,
                format!("length field `{}` is negative", length_field),
            ));
        }
        if len as usize > self.decoding_options.max_array_length {
            error!(
                "Array length {} exceeds decoding limit {}",
                len, self.decoding_options.max_array_length
            );
            return Err(StatusCode::BadDecodingError.into());
        }
        let element_type = match &field.field_type {
            FieldType::Array(element_type) => element_type,
            _ => {
                return Err(EncodingError::with_cause(
                    StatusCode::BadDecodingError,
                    "length field set on a non-array field",
                ))
            }
        };
        let mut values = Vec::with_capacity(len as usize);
        for i in 0..len as usize {
            values.push(self.decode_value(element_type).map_err(|e| e.at_index(i))?);
        }
        Ok(Value::Array(values))
    }

    fn decode_value(&mut self, field_type: &FieldType) -> EncodingResult<Value> {
        match field_type {
            FieldType::Primitive(kind) => self.decode_primitive(*kind),
            FieldType::Array(_) => Err(EncodingError::with_cause(
                StatusCode::BadDecodingError,
                "array field requires a length field",
            )),
            FieldType::Record(schema) => {
                let _depth_lock = self.decoding_options.depth_lock()?;
                Ok(Value::Struct(self.decode_struct(schema)?))
            }
            FieldType::RecursiveRecord(schema) => {
                let schema = schema.upgrade().ok_or_else(|| {
                    EncodingError::with_cause(
                        StatusCode::BadDecodingError,
                        "recursive schema reference is dangling",
                    )
                })?;
                let _depth_lock = self.decoding_options.depth_lock()?;
                Ok(Value::Struct(self.decode_struct(&schema)?))
            }
            FieldType::Union(variants) => {
                let discriminant = read_u8(&mut *self.stream)?;
                let variant = variants
                    .iter()
                    .find(|x| x.discriminant == discriminant)
                    .ok_or_else(|| {
                        EncodingError::with_cause(
                            StatusCode::BadDecodingError,
                            format!("no union variant for discriminant {}", discriminant),
                        )
                    })?;
                let _depth_lock = self.decoding_options.depth_lock()?;
                let value = self.decode_struct(&variant.schema)?;
                Ok(Value::Union {
                    discriminant,
                    value: Box::new(Value::Struct(value)),
                })
            }
        }
    }

    fn decode_primitive(&mut self, kind: PrimitiveKind) -> EncodingResult<Value> {
        let stream = &mut *self.stream;
        let decoding_options = self.decoding_options;
        let v = match kind {
            PrimitiveKind::Bool => Value::Bool(bool::decode(stream, decoding_options)?),
            PrimitiveKind::SByte => Value::SByte(i8::decode(stream, decoding_options)?),
            PrimitiveKind::Byte => Value::Byte(u8::decode(stream, decoding_options)?),
            PrimitiveKind::Int16 => Value::Int16(i16::decode(stream, decoding_options)?),
            PrimitiveKind::UInt16 => Value::UInt16(u16::decode(stream, decoding_options)?),
            PrimitiveKind::Int32 => Value::Int32(i32::decode(stream, decoding_options)?),
            PrimitiveKind::UInt32 => Value::UInt32(u32::decode(stream, decoding_options)?),
            PrimitiveKind::Int64 => Value::Int64(i64::decode(stream, decoding_options)?),
            PrimitiveKind::UInt64 => Value::UInt64(u64::decode(stream, decoding_options)?),
            PrimitiveKind::Float => Value::Float(f32::decode(stream, decoding_options)?),
            PrimitiveKind::Double => Value::Double(f64::decode(stream, decoding_options)?),
            PrimitiveKind::Bit => Value::Bit(self.bits.read(stream, 1)? == 1),
            PrimitiveKind::String => Value::String(UAString::decode(stream, decoding_options)?),
            PrimitiveKind::DateTime => {
                Value::DateTime(DateTime::decode(stream, decoding_options)?)
            }
            PrimitiveKind::Guid => Value::Guid(Guid::decode(stream, decoding_options)?),
            PrimitiveKind::ByteString => {
                Value::ByteString(ByteString::decode(stream, decoding_options)?)
            }
        };
        Ok(v)
    }
}
