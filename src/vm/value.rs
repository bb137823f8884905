//! Mirror values
//!
//! A `Value` is a local mirror of a value in the target VM. Primitives
//! and strings are copied; objects and arrays are carried as ids plus a
//! type description, so reading their contents goes back through the
//! connection.

use std::fmt;
use std::sync::Arc;

use crate::vm::types::{PrimitiveType, TypeDesc, TypeRegistry, STRING_CLASS};
use crate::vm::{ArrayRef, ObjectRef};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Null,
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Object(ObjectRef),
    Array(ArrayRef),
}

impl Value {
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean(_)
                | Self::Byte(_)
                | Self::Char(_)
                | Self::Short(_)
                | Self::Int(_)
                | Self::Long(_)
                | Self::Float(_)
                | Self::Double(_)
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Byte(_)
                | Self::Char(_)
                | Self::Short(_)
                | Self::Int(_)
                | Self::Long(_)
                | Self::Float(_)
                | Self::Double(_)
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Byte(_) | Self::Char(_) | Self::Short(_) | Self::Int(_) | Self::Long(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Byte(v) => Some(v as f64),
            Self::Char(v) => Some(v as u32 as f64),
            Self::Short(v) => Some(v as f64),
            Self::Int(v) => Some(v as f64),
            Self::Long(v) => Some(v as f64),
            Self::Float(v) => Some(v as f64),
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Byte(v) => Some(v as i64),
            Self::Char(v) => Some(v as u32 as i64),
            Self::Short(v) => Some(v as i64),
            Self::Int(v) => Some(v as i64),
            Self::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Short label for error messages ("int", "object", ...).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Char(_) => "char",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => "String",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    /// Type description of this value, when it has one. `Void` and
    /// `Null` do not; null's compatibility is decided by the parameter
    /// side during overload matching.
    pub fn type_desc(&self, types: &TypeRegistry) -> Option<Arc<TypeDesc>> {
        match self {
            Self::Void | Self::Null => None,
            Self::Boolean(_) => Some(TypeDesc::primitive(PrimitiveType::Boolean)),
            Self::Byte(_) => Some(TypeDesc::primitive(PrimitiveType::Byte)),
            Self::Char(_) => Some(TypeDesc::primitive(PrimitiveType::Char)),
            Self::Short(_) => Some(TypeDesc::primitive(PrimitiveType::Short)),
            Self::Int(_) => Some(TypeDesc::primitive(PrimitiveType::Int)),
            Self::Long(_) => Some(TypeDesc::primitive(PrimitiveType::Long)),
            Self::Float(_) => Some(TypeDesc::primitive(PrimitiveType::Float)),
            Self::Double(_) => Some(TypeDesc::primitive(PrimitiveType::Double)),
            Self::Str(_) => Some(types.lookup(STRING_CLASS)),
            Self::Object(o) => Some(o.ty.clone()),
            Self::Array(a) => Some(a.ty.clone()),
        }
    }

    /// Narrow an arithmetic result to the widest operand type.
    ///
    /// Promotion order is double, float, long; everything narrower
    /// (including byte and short operands) produces an int.
    pub fn promoted(result: f64, a: &Value, b: &Value) -> Value {
        if matches!(a, Self::Double(_)) || matches!(b, Self::Double(_)) {
            Self::Double(result)
        } else if matches!(a, Self::Float(_)) || matches!(b, Self::Float(_)) {
            Self::Float(result as f32)
        } else if matches!(a, Self::Long(_)) || matches!(b, Self::Long(_)) {
            Self::Long(result as i64)
        } else {
            Self::Int(result as i32)
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Local rendering without going back to the target. Objects and arrays
/// show type and id; `DebugSession::value_to_string` is the remote-aware
/// variant that invokes `toString` and expands array elements.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Object(o) => write!(f, "({}){}", o.ty.name(), o.id),
            Self::Array(a) => write!(f, "({}){}", a.ty.name(), a.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_follows_widest_operand() {
        let a = Value::Int(2);
        assert_eq!(Value::promoted(5.0, &a, &Value::Double(3.0)), Value::Double(5.0));
        assert_eq!(Value::promoted(5.0, &a, &Value::Float(3.0)), Value::Float(5.0));
        assert_eq!(Value::promoted(5.0, &a, &Value::Long(3)), Value::Long(5));
        assert_eq!(Value::promoted(5.0, &a, &Value::Int(3)), Value::Int(5));
    }

    #[test]
    fn narrow_operands_promote_to_int() {
        let a = Value::Byte(2);
        let b = Value::Short(3);
        assert_eq!(Value::promoted(5.0, &a, &b), Value::Int(5));
    }

    #[test]
    fn char_is_numeric_but_not_boolean() {
        let c = Value::Char('A');
        assert!(c.is_numeric());
        assert_eq!(c.as_i64(), Some(65));
        assert_eq!(c.as_bool(), None);
    }
}
