//! Column values and their comparison semantics
//!
//! `ColumnValue` is the tagged scalar stored in every row slot. Text and
//! embeddings carry owned buffers. Comparison rules:
//! - numerics compare numerically, promoting int to float when mixed
//! - text compares lexicographically
//! - embeddings have no defined ordering or equality for predicates; callers
//!   must reject such comparisons before they reach the storage layer

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Tagged scalar value for a single column slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// Boolean
    Bool(bool),
    /// UTF-8 text
    Text(String),
    /// Fixed-dimension embedding vector
    Embedding(Vec<f32>),
}

impl ColumnValue {
    /// Human-readable name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Int(_) => "int",
            ColumnValue::Float(_) => "float",
            ColumnValue::Bool(_) => "bool",
            ColumnValue::Text(_) => "text",
            ColumnValue::Embedding(_) => "embedding",
        }
    }

    /// Check for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Compare two values for predicate evaluation
    ///
    /// Returns `None` when the pair has no defined ordering: any comparison
    /// involving an embedding, a null, or mismatched non-numeric types.
    /// Mixed int/float pairs promote to f64.
    pub fn compare(&self, other: &ColumnValue) -> Option<Ordering> {
        use ColumnValue::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality for predicate evaluation; `None` where undefined
    pub fn predicate_eq(&self, other: &ColumnValue) -> Option<bool> {
        self.compare(other).map(|ord| ord == Ordering::Equal)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::Int(v) => write!(f, "{}", v),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::Bool(v) => write!(f, "{}", v),
            ColumnValue::Text(v) => write!(f, "{}", v),
            ColumnValue::Embedding(v) => write!(f, "[{} floats]", v.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_float_promotion() {
        assert_eq!(
            ColumnValue::Int(1).compare(&ColumnValue::Float(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            ColumnValue::Float(0.5).compare(&ColumnValue::Int(1)),
            Some(Ordering::Less)
        );
        assert_eq!(
            ColumnValue::Int(2).compare(&ColumnValue::Float(1.5)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn text_compares_lexicographically() {
        assert_eq!(
            ColumnValue::Text("alice".into()).compare(&ColumnValue::Text("bob".into())),
            Some(Ordering::Less)
        );
        assert_eq!(
            ColumnValue::Text("bob".into()).predicate_eq(&ColumnValue::Text("bob".into())),
            Some(true)
        );
    }

    #[test]
    fn embeddings_have_no_ordering() {
        let a = ColumnValue::Embedding(vec![1.0, 0.0]);
        let b = ColumnValue::Embedding(vec![1.0, 0.0]);
        assert_eq!(a.compare(&b), None);
        assert_eq!(a.predicate_eq(&b), None);
    }

    #[test]
    fn null_has_no_ordering() {
        assert_eq!(ColumnValue::Null.compare(&ColumnValue::Int(1)), None);
        assert_eq!(ColumnValue::Null.compare(&ColumnValue::Null), None);
    }

    #[test]
    fn cross_type_has_no_ordering() {
        assert_eq!(
            ColumnValue::Text("1".into()).compare(&ColumnValue::Int(1)),
            None
        );
        assert_eq!(
            ColumnValue::Bool(true).compare(&ColumnValue::Int(1)),
            None
        );
    }

    #[test]
    fn serde_roundtrip_all_variants() {
        let values = vec![
            ColumnValue::Null,
            ColumnValue::Int(-42),
            ColumnValue::Float(3.25),
            ColumnValue::Bool(true),
            ColumnValue::Text("hello".into()),
            ColumnValue::Embedding(vec![0.1, 0.2, 0.3]),
        ];
        for value in values {
            let bytes = bincode::serialize(&value).unwrap();
            let decoded: ColumnValue = bincode::deserialize(&bytes).unwrap();
            assert_eq!(value, decoded);
        }
    }
}
