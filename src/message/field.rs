use bincode::{Decode, Encode};

use super::StructuredMessage;

/// A wire value carried by a single [`Field`].
///
/// Values are either primitives or a nested [`StructuredMessage`]; nesting
/// recurses with no fixed depth limit.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Message(StructuredMessage),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<StructuredMessage> for Value {
    fn from(value: StructuredMessage) -> Self {
        Value::Message(value)
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&StructuredMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }
}

/// A single entry in a [`StructuredMessage`].
///
/// A field may carry a name and/or an ordinal; both may be absent, in which
/// case the field is anonymous and matched positionally only.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Field {
    pub name: Option<String>,
    pub ordinal: Option<u16>,
    pub value: Value,
}

impl Field {
    pub fn anonymous(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            ordinal: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            ordinal: None,
            value: value.into(),
        }
    }

    pub fn ordered(ordinal: u16, value: impl Into<Value>) -> Self {
        Self {
            name: None,
            ordinal: Some(ordinal),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_from_primitives() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7i32), Value::I32(7));
        assert_eq!(Value::from(7i64), Value::I64(7));
        assert_eq!(Value::from("ping"), Value::Str("ping".to_string()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
    }

    #[test]
    fn field_constructors() {
        let field = Field::named("port", 8080i32);
        assert_eq!(field.name.as_deref(), Some("port"));
        assert_eq!(field.ordinal, None);
        assert_eq!(field.value, Value::I32(8080));

        let field = Field::ordered(3, "x");
        assert_eq!(field.name, None);
        assert_eq!(field.ordinal, Some(3));
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::Str("a".into()).as_str(), Some("a"));
        assert_eq!(Value::I32(1).as_str(), None);
        assert_eq!(Value::I32(1).as_i32(), Some(1));
        assert_eq!(Value::I64(2).as_i64(), Some(2));
    }
}
