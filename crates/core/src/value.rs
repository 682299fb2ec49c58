//! Column types and scalar values
//!
//! This module defines:
//! - ColumnType: the closed set of scalar types a component column may have
//! - Value: the runtime representation of a column value
//! - the order-preserving score encoding used by backend index sets
//!
//! ## Width fidelity
//!
//! Values are carried as `i64`/`u64`/`f64` supersets of the narrower widths;
//! `ColumnType::normalize` enforces the declared width on every write so that
//! values round-trip through the backend without loss. An `f32` column stores
//! the exactly-representable `f64` image of the written value.
//!
//! ## Index ordering contract
//!
//! Index sets order entries by `(score, text, id)`. `score_bits` maps any
//! numeric value to a `u64` whose unsigned ordering equals the natural
//! ordering of the value (sign-flip for signed integers, the standard
//! monotone transform for IEEE-754 doubles). Text columns use score 0 and
//! order by the text itself. This encoding is part of the persisted
//! compatibility contract; changing it requires migration.

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sign bit used by the integer score transform
const SIGN_BIT: u64 = 1 << 63;

/// Scalar type of a component column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// IEEE-754 single precision
    F32,
    /// IEEE-754 double precision
    F64,
    /// UTF-8 text, at most `max_len` bytes
    Str {
        /// Maximum encoded length in bytes
        max_len: u16,
    },
    /// Byte string, at most `len` bytes
    Bytes {
        /// Maximum length in bytes
        len: u16,
    },
}

/// Runtime value of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Signed integer (columns I8..I64)
    Int(i64),
    /// Unsigned integer (columns U8..U64)
    UInt(u64),
    /// Floating point (columns F32/F64)
    Float(f64),
    /// Text (Str columns)
    Str(String),
    /// Raw bytes (Bytes columns)
    Bytes(Vec<u8>),
}

impl ColumnType {
    /// True for the integer and float types
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ColumnType::Str { .. } | ColumnType::Bytes { .. })
    }

    /// True for text columns (value-major index member encoding)
    pub fn is_text(&self) -> bool {
        matches!(self, ColumnType::Str { .. })
    }

    /// Inclusive signed range for the signed integer types
    fn signed_range(&self) -> Option<(i64, i64)> {
        match self {
            ColumnType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ColumnType::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ColumnType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ColumnType::I64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Inclusive unsigned maximum for the unsigned integer types
    fn unsigned_max(&self) -> Option<u64> {
        match self {
            ColumnType::U8 => Some(u8::MAX as u64),
            ColumnType::U16 => Some(u16::MAX as u64),
            ColumnType::U32 => Some(u32::MAX as u64),
            ColumnType::U64 => Some(u64::MAX),
            _ => None,
        }
    }

    /// Smallest representable value of the type
    ///
    /// Used to expand a `-∞` range boundary.
    pub fn min_value(&self) -> Value {
        match self {
            ColumnType::I8 | ColumnType::I16 | ColumnType::I32 | ColumnType::I64 => {
                Value::Int(self.signed_range().expect("signed").0)
            }
            ColumnType::U8 | ColumnType::U16 | ColumnType::U32 | ColumnType::U64 => Value::UInt(0),
            ColumnType::F32 => Value::Float(f32::MIN as f64),
            ColumnType::F64 => Value::Float(f64::MIN),
            ColumnType::Str { .. } => Value::Str(String::new()),
            ColumnType::Bytes { .. } => Value::Bytes(Vec::new()),
        }
    }

    /// Largest representable value of the type
    ///
    /// Used to expand a `+∞` range boundary. Text and byte columns use the
    /// largest value their declared capacity can hold.
    pub fn max_value(&self) -> Value {
        match self {
            ColumnType::I8 | ColumnType::I16 | ColumnType::I32 | ColumnType::I64 => {
                Value::Int(self.signed_range().expect("signed").1)
            }
            ColumnType::U8 | ColumnType::U16 | ColumnType::U32 | ColumnType::U64 => {
                Value::UInt(self.unsigned_max().expect("unsigned"))
            }
            ColumnType::F32 => Value::Float(f32::MAX as f64),
            ColumnType::F64 => Value::Float(f64::MAX),
            // No largest text/bytes value; callers use an open upper bound.
            ColumnType::Str { max_len } => Value::Str("\u{10FFFF}".repeat(*max_len as usize / 4)),
            ColumnType::Bytes { len } => Value::Bytes(vec![0xFF; *len as usize]),
        }
    }

    /// Default value used when a column definition declares none
    pub fn zero(&self) -> Value {
        match self {
            ColumnType::I8 | ColumnType::I16 | ColumnType::I32 | ColumnType::I64 => Value::Int(0),
            ColumnType::U8 | ColumnType::U16 | ColumnType::U32 | ColumnType::U64 => Value::UInt(0),
            ColumnType::F32 | ColumnType::F64 => Value::Float(0.0),
            ColumnType::Str { .. } => Value::Str(String::new()),
            ColumnType::Bytes { .. } => Value::Bytes(Vec::new()),
        }
    }

    /// Normalize a value to this column type
    ///
    /// Cross-kind integer literals are accepted when in range (an `Int` into
    /// a `U64` column and vice versa); integer literals are widened into
    /// float columns; everything else out of range or of the wrong kind is a
    /// `QueryError`.
    pub fn normalize(&self, v: &Value) -> Result<Value> {
        match (self, v) {
            // Signed columns
            (t, Value::Int(x)) if t.signed_range().is_some() => {
                let (lo, hi) = t.signed_range().expect("signed");
                if *x < lo || *x > hi {
                    return Err(out_of_range(t, v));
                }
                Ok(Value::Int(*x))
            }
            (t, Value::UInt(x)) if t.signed_range().is_some() => {
                let (_, hi) = t.signed_range().expect("signed");
                if *x > hi as u64 {
                    return Err(out_of_range(t, v));
                }
                Ok(Value::Int(*x as i64))
            }
            // Unsigned columns
            (t, Value::UInt(x)) if t.unsigned_max().is_some() => {
                if *x > t.unsigned_max().expect("unsigned") {
                    return Err(out_of_range(t, v));
                }
                Ok(Value::UInt(*x))
            }
            (t, Value::Int(x)) if t.unsigned_max().is_some() => {
                if *x < 0 || (*x as u64) > t.unsigned_max().expect("unsigned") {
                    return Err(out_of_range(t, v));
                }
                Ok(Value::UInt(*x as u64))
            }
            // Float columns
            (ColumnType::F64, Value::Float(x)) => Ok(Value::Float(*x)),
            (ColumnType::F32, Value::Float(x)) => {
                if x.is_finite() && (*x > f32::MAX as f64 || *x < f32::MIN as f64) {
                    return Err(out_of_range(self, v));
                }
                // Store the f64 image of the rounded f32 so reads round-trip.
                Ok(Value::Float(*x as f32 as f64))
            }
            (ColumnType::F32 | ColumnType::F64, Value::Int(x)) => Ok(Value::Float(*x as f64)),
            (ColumnType::F32 | ColumnType::F64, Value::UInt(x)) => Ok(Value::Float(*x as f64)),
            // Text columns
            (ColumnType::Str { max_len }, Value::Str(s)) => {
                if s.len() > *max_len as usize {
                    return Err(TesseraError::query(format!(
                        "text value of {} bytes exceeds column capacity {}",
                        s.len(),
                        max_len
                    )));
                }
                Ok(Value::Str(s.clone()))
            }
            // Byte columns
            (ColumnType::Bytes { len }, Value::Bytes(b)) => {
                if b.len() > *len as usize {
                    return Err(TesseraError::query(format!(
                        "byte value of {} bytes exceeds column capacity {}",
                        b.len(),
                        len
                    )));
                }
                Ok(Value::Bytes(b.clone()))
            }
            _ => Err(TesseraError::query(format!(
                "value {} does not fit column type {:?}",
                v, self
            ))),
        }
    }

    /// Convert a decoded wire argument to a value of this type
    ///
    /// The wire carries JSON scalars; floats never implicitly truncate into
    /// integer columns.
    pub fn from_json(&self, v: &serde_json::Value) -> Result<Value> {
        let raw = match v {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    if !matches!(self, ColumnType::F32 | ColumnType::F64) {
                        return Err(TesseraError::query(
                            "float literal cannot address a non-float column",
                        ));
                    }
                    Value::Float(f)
                } else {
                    return Err(TesseraError::query("unrepresentable numeric literal"));
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => {
                return Err(TesseraError::query(format!(
                    "unsupported literal {} for column type {:?}",
                    other, self
                )))
            }
        };
        self.normalize(&raw)
    }

    /// Order-preserving score for index sets
    ///
    /// The value must already be normalized to this column type.
    pub fn score_bits(&self, v: &Value) -> u64 {
        match v {
            Value::Int(x) => (*x as u64) ^ SIGN_BIT,
            Value::UInt(x) => *x,
            Value::Float(x) => {
                let bits = x.to_bits();
                if bits & SIGN_BIT != 0 {
                    !bits
                } else {
                    bits | SIGN_BIT
                }
            }
            Value::Str(_) | Value::Bytes(_) => 0,
        }
    }

    /// Text part of the index member for value-major ordering
    ///
    /// Empty for numeric columns (the score alone orders them).
    pub fn index_text(&self, v: &Value) -> String {
        match v {
            Value::Str(s) => s.clone(),
            // Bytes order by their escaped text image; fixed lengths keep
            // this consistent across writes.
            Value::Bytes(b) => b.iter().map(|x| format!("{:02x}", x)).collect(),
            _ => String::new(),
        }
    }
}

impl Value {
    /// Kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Caller identity view of the value, for OWNER filtering
    pub fn as_caller_id(&self) -> Option<u64> {
        match self {
            Value::Int(x) if *x >= 0 => Some(*x as u64),
            Value::UInt(x) => Some(*x),
            _ => None,
        }
    }

    /// JSON image for the wire surface
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(x) => serde_json::Value::from(*x),
            Value::UInt(x) => serde_json::Value::from(*x),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::from(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(
                b.iter().map(|x| format!("{:02x}", x)).collect::<String>(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::UInt(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for x in b {
                    write!(f, "{:02x}", x)?;
                }
                Ok(())
            }
        }
    }
}

fn out_of_range(t: &ColumnType, v: &Value) -> TesseraError {
    TesseraError::query(format!("literal {} out of range for {:?}", v, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_signed_width() {
        assert_eq!(
            ColumnType::I8.normalize(&Value::Int(127)).unwrap(),
            Value::Int(127)
        );
        assert!(ColumnType::I8.normalize(&Value::Int(128)).is_err());
        assert!(ColumnType::I8.normalize(&Value::Int(-129)).is_err());
        assert_eq!(
            ColumnType::I32.normalize(&Value::UInt(7)).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_normalize_unsigned_rejects_negative() {
        assert!(ColumnType::U32.normalize(&Value::Int(-1)).is_err());
        assert_eq!(
            ColumnType::U32.normalize(&Value::Int(42)).unwrap(),
            Value::UInt(42)
        );
        assert!(ColumnType::U8.normalize(&Value::UInt(256)).is_err());
    }

    #[test]
    fn test_normalize_float_widening() {
        assert_eq!(
            ColumnType::F64.normalize(&Value::Int(3)).unwrap(),
            Value::Float(3.0)
        );
        // f32 column clamps precision to the f32 image
        let v = ColumnType::F32.normalize(&Value::Float(0.1)).unwrap();
        assert_eq!(v, Value::Float(0.1f32 as f64));
        assert!(ColumnType::F32.normalize(&Value::Float(1e60)).is_err());
    }

    #[test]
    fn test_normalize_text_capacity() {
        let t = ColumnType::Str { max_len: 4 };
        assert!(t.normalize(&Value::Str("abcd".into())).is_ok());
        assert!(t.normalize(&Value::Str("abcde".into())).is_err());
        assert!(t.normalize(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_from_json_rejects_float_into_int() {
        let err = ColumnType::I32.from_json(&serde_json::json!(1.5)).unwrap_err();
        assert_eq!(err.code(), "QueryError");
        assert_eq!(
            ColumnType::I32.from_json(&serde_json::json!(7)).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_from_json_out_of_type_literal() {
        // Spec: out-of-type numeric literals are rejected with QueryError
        let err = ColumnType::I8.from_json(&serde_json::json!(4096)).unwrap_err();
        assert_eq!(err.code(), "QueryError");
    }

    #[test]
    fn test_min_max_boundaries() {
        assert_eq!(ColumnType::I16.min_value(), Value::Int(-32768));
        assert_eq!(ColumnType::I16.max_value(), Value::Int(32767));
        assert_eq!(ColumnType::U8.max_value(), Value::UInt(255));
        assert_eq!(ColumnType::U64.min_value(), Value::UInt(0));
    }

    #[test]
    fn test_score_bits_orders_signed() {
        let t = ColumnType::I64;
        let neg = t.score_bits(&Value::Int(-5));
        let zero = t.score_bits(&Value::Int(0));
        let pos = t.score_bits(&Value::Int(5));
        assert!(neg < zero && zero < pos);
    }

    #[test]
    fn test_score_bits_orders_floats_across_zero() {
        let t = ColumnType::F64;
        let a = t.score_bits(&Value::Float(-10.0));
        let b = t.score_bits(&Value::Float(-0.5));
        let c = t.score_bits(&Value::Float(0.0));
        let d = t.score_bits(&Value::Float(2.25));
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn test_caller_id_view() {
        assert_eq!(Value::Int(7).as_caller_id(), Some(7));
        assert_eq!(Value::UInt(7).as_caller_id(), Some(7));
        assert_eq!(Value::Int(-1).as_caller_id(), None);
        assert_eq!(Value::Str("x".into()).as_caller_id(), None);
    }

    #[test]
    fn test_json_round_trip_u64_extreme() {
        let v = ColumnType::U64
            .from_json(&serde_json::json!(u64::MAX))
            .unwrap();
        assert_eq!(v, Value::UInt(u64::MAX));
        assert_eq!(v.to_json(), serde_json::json!(u64::MAX));
    }

    proptest! {
        #[test]
        fn prop_int_score_is_monotone(a in any::<i64>(), b in any::<i64>()) {
            let t = ColumnType::I64;
            let sa = t.score_bits(&Value::Int(a));
            let sb = t.score_bits(&Value::Int(b));
            prop_assert_eq!(a.cmp(&b), sa.cmp(&sb));
        }

        #[test]
        fn prop_float_score_is_monotone(a in any::<f64>(), b in any::<f64>()) {
            prop_assume!(a.is_finite() && b.is_finite());
            let t = ColumnType::F64;
            let sa = t.score_bits(&Value::Float(a));
            let sb = t.score_bits(&Value::Float(b));
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), sa.cmp(&sb));
        }

        #[test]
        fn prop_narrow_widths_round_trip(x in any::<i16>()) {
            let v = ColumnType::I16.normalize(&Value::Int(x as i64)).unwrap();
            prop_assert_eq!(v, Value::Int(x as i64));
        }
    }
}
