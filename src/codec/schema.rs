// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Record schemas. A schema is an ordered list of field descriptors whose order is the
//! wire order. Generated types build one `Schema` per record at construction and register
//! it with a [`crate::codec::SchemaRegistry`].

use std::sync::{Arc, Weak};

/// Sentinel meaning a field carries no switch value.
pub const SWITCH_VALUE_NONE: i64 = -1;

/// The comparison applied between a switch field's value and the switch value to decide
/// whether a gated field is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOperand {
    Equals,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl SwitchOperand {
    pub fn applies(&self, value: i64, switch_value: i64) -> bool {
        match self {
            SwitchOperand::Equals => value == switch_value,
            SwitchOperand::NotEqual => value != switch_value,
            SwitchOperand::GreaterThan => value > switch_value,
            SwitchOperand::LessThan => value < switch_value,
            SwitchOperand::GreaterThanOrEqual => value >= switch_value,
            SwitchOperand::LessThanOrEqual => value <= switch_value,
        }
    }
}

/// The closed set of scalar kinds a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Bool,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    /// A single logical bit packed into a shared byte.
    Bit,
    String,
    DateTime,
    Guid,
    ByteString,
}

impl PrimitiveKind {
    /// True for the kinds a `length_field` or `switch_field` reference may resolve to.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimitiveKind::SByte
                | PrimitiveKind::Byte
                | PrimitiveKind::Int16
                | PrimitiveKind::UInt16
                | PrimitiveKind::Int32
                | PrimitiveKind::UInt32
                | PrimitiveKind::Int64
                | PrimitiveKind::UInt64
        )
    }
}

/// A variant of a tagged union, selected by the leading discriminant byte.
#[derive(Debug, Clone)]
pub struct UnionVariant {
    pub discriminant: u8,
    pub schema: Arc<Schema>,
}

/// The closed sum of things a field can be. There is no reflection; composites nest
/// through `Record`, and a self-referential record holds a weak reference to its own
/// schema which the codec follows on demand.
#[derive(Debug, Clone)]
pub enum FieldType {
    Primitive(PrimitiveKind),
    /// An array whose element count comes from an earlier field named by `length_field`.
    Array(Box<FieldType>),
    Record(Arc<Schema>),
    /// A record referring back to an enclosing schema, e.g. a diagnostic info that nests
    /// itself. Built with [`std::sync::Arc::new_cyclic`].
    RecursiveRecord(Weak<Schema>),
    /// A tagged union with a leading discriminant byte selecting the variant schema.
    Union(Vec<UnionVariant>),
}

/// One field of a record. Field order in the schema is the wire order.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    /// When 1..=8 the field is bit packed. 0 means not bit packed; values above 8 are
    /// rejected by the codec.
    pub bit_size: u8,
    /// Name of an earlier field whose integer value is the element count of this array field.
    pub length_field: Option<String>,
    /// Name of an earlier field used as a gate.
    pub switch_field: Option<String>,
    /// The value the switch field is compared against, or `SWITCH_VALUE_NONE`.
    pub switch_value: i64,
    /// The comparison operator. Defaults to `Equals` when a switch value is set.
    pub switch_operand: Option<SwitchOperand>,
}

impl Field {
    pub fn new<T: Into<String>>(name: T, field_type: FieldType) -> Field {
        Field {
            name: name.into(),
            field_type,
            bit_size: 0,
            length_field: None,
            switch_field: None,
            switch_value: SWITCH_VALUE_NONE,
            switch_operand: None,
        }
    }

    pub fn primitive<T: Into<String>>(name: T, kind: PrimitiveKind) -> Field {
        Field::new(name, FieldType::Primitive(kind))
    }

    pub fn bits(mut self, bit_size: u8) -> Field {
        self.bit_size = bit_size;
        self
    }

    pub fn length_field<T: Into<String>>(mut self, name: T) -> Field {
        self.length_field = Some(name.into());
        self
    }

    pub fn switch_field<T: Into<String>>(mut self, name: T) -> Field {
        self.switch_field = Some(name.into());
        self
    }

    pub fn switch_value(mut self, value: i64) -> Field {
        self.switch_value = value;
        self
    }

    pub fn switch_operand(mut self, operand: SwitchOperand) -> Field {
        self.switch_operand = Some(operand);
        self
    }
}

/// An ordered record description. A schema may embed a base schema whose fields are
/// flattened in front of the record's own, in the base type's declaration order.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    base: Option<Arc<Schema>>,
    fields: Vec<Field>,
}

impl Schema {
    pub fn new<T: Into<String>>(name: T) -> Schema {
        Schema {
            name: name.into(),
            base: None,
            fields: Vec::new(),
        }
    }

    /// Sets the embedded base type whose fields precede this schema's own.
    pub fn base(mut self, base: Arc<Schema>) -> Schema {
        self.base = Some(base);
        self
    }

    pub fn field(mut self, field: Field) -> Schema {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fields of this record in wire order, base type fields first.
    pub fn flattened_fields(&self) -> Vec<&Field> {
        let mut fields = Vec::with_capacity(self.fields.len());
        if let Some(ref base) = self.base {
            fields.extend(base.flattened_fields());
        }
        fields.extend(self.fields.iter());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_fields_flatten_first() {
        let base = Arc::new(
            Schema::new("Base")
                .field(Field::primitive("A", PrimitiveKind::UInt32))
                .field(Field::primitive("B", PrimitiveKind::UInt32)),
        );
        let schema = Schema::new("Derived")
            .base(base)
            .field(Field::primitive("C", PrimitiveKind::UInt32));
        let names: Vec<&str> = schema
            .flattened_fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn switch_operands() {
        assert!(SwitchOperand::Equals.applies(5, 5));
        assert!(!SwitchOperand::Equals.applies(5, 6));
        assert!(SwitchOperand::NotEqual.applies(5, 6));
        assert!(SwitchOperand::GreaterThan.applies(7, 6));
        assert!(SwitchOperand::LessThan.applies(5, 6));
        assert!(SwitchOperand::GreaterThanOrEqual.applies(6, 6));
        assert!(SwitchOperand::LessThanOrEqual.applies(6, 6));
    }
}
