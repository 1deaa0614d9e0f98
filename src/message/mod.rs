//! Self-describing structured messages.
//!
//! This module defines the payload unit moved by the transport: an ordered
//! sequence of typed fields, each optionally named and/or numbered, whose
//! values are primitives or nested sub-messages. It provides the immutable
//! [`StructuredMessage`] plus the [`MessageBuilder`] used to assemble one
//! before transmission.
//!
//! # Overview
//!
//! Messages are self-describing: every field carries its own type tag on the
//! wire, so a reader needs no external schema to walk the content. Field
//! order is significant and preserved end-to-end: readers never reorder, and
//! two fields may share a name or ordinal (lookups return the first match,
//! iteration returns all of them in insertion order).
//!
//! # Key Components
//!
//! - [`StructuredMessage`]: Immutable ordered field sequence.
//! - [`MessageBuilder`]: Accumulates fields, finalized with [`MessageBuilder::build`].
//! - [`Field`] / [`Value`]: A single entry and its typed payload.
//!
//! # Example
//! ```rust
//! use conduit::message::StructuredMessage;
//!
//! let msg = StructuredMessage::builder()
//!     .push_named("ping", 1i32)
//!     .build();
//! assert_eq!(msg.len(), 1);
//! assert_eq!(msg.by_name("ping").unwrap().value.as_i32(), Some(1));
//! ```
//!
//! # See Also
//!
//! - [`codec`](crate::codec): Streaming reader/writer for one message at a time.
mod field;

use bincode::{Decode, Encode};

pub use field::{Field, Value};

/// An immutable, ordered sequence of typed fields.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct StructuredMessage {
    fields: Vec<Field>,
}

impl StructuredMessage {
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_at(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// First field with the given name.
    pub fn by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.as_deref() == Some(name))
    }

    /// All fields with the given name, in insertion order.
    pub fn all_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> {
        self.fields
            .iter()
            .filter(move |f| f.name.as_deref() == Some(name))
    }

    /// First field with the given ordinal.
    pub fn by_ordinal(&self, ordinal: u16) -> Option<&Field> {
        self.fields.iter().find(|f| f.ordinal == Some(ordinal))
    }
}

impl<'a> IntoIterator for &'a StructuredMessage {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Accumulates fields for a [`StructuredMessage`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    fields: Vec<Field>,
}

impl MessageBuilder {
    /// Append an anonymous field, matched positionally only.
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.fields.push(Field::anonymous(value));
        self
    }

    pub fn push_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(Field::named(name, value));
        self
    }

    pub fn push_ordinal(mut self, ordinal: u16, value: impl Into<Value>) -> Self {
        self.fields.push(Field::ordered(ordinal, value));
        self
    }

    /// Append a field carrying both a name and an ordinal.
    pub fn push_full(
        mut self,
        name: impl Into<String>,
        ordinal: u16,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.push(Field {
            name: Some(name.into()),
            ordinal: Some(ordinal),
            value: value.into(),
        });
        self
    }

    pub fn build(self) -> StructuredMessage {
        StructuredMessage {
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_insertion_order() {
        let msg = StructuredMessage::builder()
            .push_named("b", 2i32)
            .push_named("a", 1i32)
            .push(true)
            .build();

        let names: Vec<_> = msg.fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(
            names,
            vec![Some("b".to_string()), Some("a".to_string()), None]
        );
    }

    #[test]
    fn lookup_by_name_returns_first_match() {
        let msg = StructuredMessage::builder()
            .push_named("address", "10.0.0.1")
            .push_named("address", "10.0.0.2")
            .build();

        assert_eq!(
            msg.by_name("address").unwrap().value.as_str(),
            Some("10.0.0.1")
        );
        assert_eq!(msg.all_by_name("address").count(), 2);
    }

    #[test]
    fn lookup_by_ordinal() {
        let msg = StructuredMessage::builder()
            .push_ordinal(7, "x")
            .push_full("y", 9, 1i64)
            .build();

        assert_eq!(msg.by_ordinal(9).unwrap().name.as_deref(), Some("y"));
        assert!(msg.by_ordinal(1).is_none());
    }

    #[test]
    fn nested_messages_recurse() {
        let inner = StructuredMessage::builder().push_named("leaf", 1i32).build();
        let middle = StructuredMessage::builder()
            .push_named("inner", inner.clone())
            .build();
        let outer = StructuredMessage::builder()
            .push_named("middle", middle)
            .build();

        let nested = outer
            .by_name("middle")
            .and_then(|f| f.value.as_message())
            .and_then(|m| m.by_name("inner"))
            .and_then(|f| f.value.as_message())
            .unwrap();
        assert_eq!(nested, &inner);
    }
}
