use crate::document::FieldBuffer;
use crate::error::VellumError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The kind of a [`Value`], used by field constraints and typed indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Integer,
    Double,
    Text,
    Blob,
    Array,
    Document,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::Text => "text",
            ValueKind::Blob => "blob",
            ValueKind::Array => "array",
            ValueKind::Document => "document",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Text(CompactString),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Document(FieldBuffer),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::Text(_) => ValueKind::Text,
            Value::Blob(_) => ValueKind::Blob,
            Value::Array(_) => ValueKind::Array,
            Value::Document(_) => ValueKind::Document,
        }
    }

    pub fn text(s: &str) -> Value {
        Value::Text(CompactString::from(s))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integers and doubles share one comparison rank and one encoding
    /// tag; several call sites treat the two as interchangeable kinds.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Double(_))
    }

    /// The comparison SQL operators use: an integer and a double with the
    /// same numeric value are equal here (`2 = 2.0` holds), and the two
    /// zeros coincide. The `Ord` implementation breaks those ties
    /// deterministically to stay aligned with the key encoding.
    pub fn sql_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(x), Value::Double(y)) => cmp_int_double(*x, *y),
            (Value::Double(x), Value::Integer(y)) => cmp_int_double(*y, *x).reverse(),
            (Value::Double(x), Value::Double(y)) => {
                x.partial_cmp(y).unwrap_or_else(|| x.total_cmp(y))
            }
            _ => self.cmp(other),
        }
    }

    /// Truthiness used by WHERE filters: a value is falsy when it is the
    /// zero value of its kind.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Blob(b) => !b.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Document(d) => d.len() != 0,
        }
    }

    /// Converts the value to the requested kind.
    ///
    /// Integer and Double convert into each other where lossless, Text
    /// parses into numbers, and Text and Blob exchange their bytes.
    /// Anything else fails with a conversion error.
    pub fn convert_to(&self, kind: ValueKind) -> Result<Value, VellumError> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        let fail = || VellumError::Conversion {
            from: self.kind().to_string(),
            to: kind.to_string(),
        };
        match (self, kind) {
            (Value::Bool(b), ValueKind::Integer) => Ok(Value::Integer(i64::from(*b))),
            (Value::Integer(i), ValueKind::Bool) => Ok(Value::Bool(*i != 0)),
            (Value::Integer(i), ValueKind::Double) => Ok(Value::Double(*i as f64)),
            (Value::Double(d), ValueKind::Integer) => {
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                    Ok(Value::Integer(*d as i64))
                } else {
                    Err(fail())
                }
            }
            (Value::Text(s), ValueKind::Integer) => {
                s.trim().parse::<i64>().map(Value::Integer).map_err(|_| fail())
            }
            (Value::Text(s), ValueKind::Double) => {
                s.trim().parse::<f64>().map(Value::Double).map_err(|_| fail())
            }
            (Value::Text(s), ValueKind::Blob) => Ok(Value::Blob(s.as_bytes().to_vec())),
            (Value::Blob(b), ValueKind::Text) => std::str::from_utf8(b)
                .map(|s| Value::Text(CompactString::from(s)))
                .map_err(|_| fail()),
            _ => Err(fail()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            // Integers and doubles share a rank so the two compare by
            // numeric value rather than by kind.
            Value::Integer(_) | Value::Double(_) => 2,
            Value::Text(_) => 3,
            Value::Blob(_) => 4,
            Value::Array(_) => 5,
            Value::Document(_) => 6,
        }
    }
}

// The total order over numerics matches the key encoding byte for byte:
// values order by numeric value, and an integer sorts directly after the
// double carrying the same value (5.0 before 5). SQL operators collapse
// that tie through `sql_cmp` instead.
fn cmp_numeric(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Integer(x), Value::Double(y)) => match cmp_int_double(*x, *y) {
            Ordering::Equal => Ordering::Greater,
            other => other,
        },
        (Value::Double(x), Value::Integer(y)) => match cmp_int_double(*y, *x) {
            Ordering::Equal => Ordering::Less,
            other => other.reverse(),
        },
        _ => unreachable!("cmp_numeric called on non-numeric values"),
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Exact comparison of an integer with a double by numeric value.
/// Converting the integer to a double first would collapse values above
/// 2^53 onto one another; this splits on the double's integral part
/// instead. Equal means the same real number (so 0 equals both zeros);
/// NaN follows the IEEE total order, as `f64::total_cmp` does.
pub(crate) fn cmp_int_double(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return if d.is_sign_positive() {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    if d >= TWO_POW_63 {
        return Ordering::Less;
    }
    if d < -TWO_POW_63 {
        return Ordering::Greater;
    }
    // The integral part is exact in i128 within [-2^63, 2^63).
    let trunc = d.trunc();
    match (i as i128).cmp(&(trunc as i128)) {
        Ordering::Equal => {
            let frac = d - trunc;
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

fn cmp_documents(a: &FieldBuffer, b: &FieldBuffer) -> Ordering {
    for ((fa, va), (fb, vb)) in a.iter().zip(b.iter()) {
        let name_cmp = fa.as_bytes().cmp(fb.as_bytes());
        if name_cmp != Ordering::Equal {
            return name_cmp;
        }
        let value_cmp = va.cmp(vb);
        if value_cmp != Ordering::Equal {
            return value_cmp;
        }
    }
    a.len().cmp(&b.len())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
                cmp_numeric(self, other)
            }
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => cmp_documents(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Document(d) => {
                write!(f, "{{")?;
                for (i, (field, v)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(CompactString::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(CompactString::from(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, ValueKind};
    use crate::document::FieldBuffer;
    use std::cmp::Ordering;

    #[test]
    fn kinds_order_by_rank() {
        let ordered = [
            Value::Null,
            Value::Bool(true),
            Value::Integer(i64::MAX),
            Value::text("a"),
            Value::Blob(vec![0]),
            Value::Array(vec![]),
            Value::Document(FieldBuffer::new()),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].cmp(&pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn numerics_order_by_value_with_the_double_first_on_ties() {
        assert_eq!(Value::Integer(2).cmp(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(
            Value::Integer(0).cmp(&Value::Double(-0.5)),
            Ordering::Greater
        );
        assert_eq!(
            Value::Double(f64::NEG_INFINITY).cmp(&Value::Integer(i64::MIN)),
            Ordering::Less
        );
        assert_eq!(
            Value::Integer(i64::MAX).cmp(&Value::Double(f64::INFINITY)),
            Ordering::Less
        );
        // Numerically equal cross-kind pairs break the tie with the
        // double first, mirroring the key encoding.
        assert_eq!(Value::Double(3.0).cmp(&Value::Integer(3)), Ordering::Less);
        assert_eq!(Value::Integer(3).cmp(&Value::Double(3.0)), Ordering::Greater);
        assert_eq!(
            Value::Double(-0.0).cmp(&Value::Double(0.0)),
            Ordering::Less
        );
        assert_eq!(Value::Double(0.0).cmp(&Value::Integer(0)), Ordering::Less);
    }

    #[test]
    fn sql_comparison_collapses_the_numeric_tie() {
        assert_eq!(Value::Integer(5).sql_cmp(&Value::Double(5.0)), Ordering::Equal);
        assert_eq!(Value::Double(5.0).sql_cmp(&Value::Integer(5)), Ordering::Equal);
        assert_eq!(Value::Double(-0.0).sql_cmp(&Value::Double(0.0)), Ordering::Equal);
        assert_eq!(Value::Integer(0).sql_cmp(&Value::Double(-0.0)), Ordering::Equal);
        assert_eq!(Value::Integer(2).sql_cmp(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(
            Value::text("a").sql_cmp(&Value::text("b")),
            Ordering::Less
        );
    }

    #[test]
    fn large_integers_compare_exactly_against_doubles() {
        // 2^63 is the double nearest to i64::MAX; rounding through f64
        // would call these equal.
        let two_pow_63 = 9_223_372_036_854_775_808.0;
        assert_eq!(
            Value::Integer(i64::MAX).cmp(&Value::Double(two_pow_63)),
            Ordering::Less
        );
        assert_eq!(
            Value::Double(two_pow_63).cmp(&Value::Integer(i64::MAX)),
            Ordering::Greater
        );
        assert_eq!(
            Value::Integer(i64::MIN).sql_cmp(&Value::Double(-two_pow_63)),
            Ordering::Equal
        );
        assert_eq!(
            Value::Integer(i64::MIN).cmp(&Value::Double(-two_pow_63)),
            Ordering::Greater
        );
    }

    #[test]
    fn arrays_compare_elementwise_shorter_first() {
        let a = Value::Array(vec![Value::Integer(1)]);
        let b = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(a.cmp(&b), Ordering::Less);
    }

    #[test]
    fn documents_compare_by_field_then_value() {
        let mut a = FieldBuffer::new();
        a.add("a", Value::Integer(1));
        let mut b = FieldBuffer::new();
        b.add("a", Value::Integer(2));
        assert_eq!(
            Value::Document(a.clone()).cmp(&Value::Document(b)),
            Ordering::Less
        );
        let mut c = FieldBuffer::new();
        c.add("b", Value::Integer(0));
        assert_eq!(Value::Document(a).cmp(&Value::Document(c)), Ordering::Less);
    }

    #[test]
    fn conversions() {
        assert_eq!(
            Value::text("42").convert_to(ValueKind::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::Double(4.0).convert_to(ValueKind::Integer).unwrap(),
            Value::Integer(4)
        );
        assert!(Value::Double(4.5).convert_to(ValueKind::Integer).is_err());
        assert_eq!(
            Value::text("ab").convert_to(ValueKind::Blob).unwrap(),
            Value::Blob(vec![b'a', b'b'])
        );
        assert!(Value::Null.convert_to(ValueKind::Integer).is_err());
    }

    #[test]
    fn truthiness_is_zero_value_of_kind() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::text("").is_truthy());
        assert!(Value::Double(0.5).is_truthy());
        assert!(Value::Bool(true).is_truthy());
    }
}
