//! Predicate AST, conjunctive normalization, and residual evaluation.
//!
//! Queries are built programmatically; the planner analyzes the normalized
//! form and whatever it cannot push into an index access survives as a
//! post-filter evaluated through [`FieldAccess`].

use crate::error::{Error, Result};
use crate::schema::FieldAccess;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    fn negated(self) -> ComparisonOp {
        match self {
            ComparisonOp::Eq => ComparisonOp::NotEq,
            ComparisonOp::NotEq => ComparisonOp::Eq,
            ComparisonOp::Lt => ComparisonOp::GtEq,
            ComparisonOp::LtEq => ComparisonOp::Gt,
            ComparisonOp::Gt => ComparisonOp::LtEq,
            ComparisonOp::GtEq => ComparisonOp::Lt,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    /// Every term must appear.
    All,
    /// Any term may appear.
    Any,
    /// Terms must appear consecutively.
    Phrase,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Compare { field: String, op: ComparisonOp, value: Value },
    In { field: String, values: Vec<Value> },
    IsNull { field: String },
    IsNotNull { field: String },
    /// String-pattern constraint: the field starts with the given prefix.
    StartsWith { field: String, prefix: String },
    TextSearch { field: String, op: TextOp, query: String },
    WithinBox { lat_field: String, lng_field: String, min: (f64, f64), max: (f64, f64) },
    /// Vector-similarity constraint; ranking, not boolean — it passes
    /// residual evaluation and is satisfied by a vector-search operator.
    NearestTo { field: String, target: Vec<f32>, k: usize },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
        Predicate::Compare { field: field.into(), op: ComparisonOp::Eq, value: value.into() }
    }

    pub fn not_eq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
        Predicate::Compare { field: field.into(), op: ComparisonOp::NotEq, value: value.into() }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
        Predicate::Compare { field: field.into(), op: ComparisonOp::Lt, value: value.into() }
    }

    pub fn lt_eq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
        Predicate::Compare { field: field.into(), op: ComparisonOp::LtEq, value: value.into() }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
        Predicate::Compare { field: field.into(), op: ComparisonOp::Gt, value: value.into() }
    }

    pub fn gt_eq(field: impl Into<String>, value: impl Into<Value>) -> Predicate {
        Predicate::Compare { field: field.into(), op: ComparisonOp::GtEq, value: value.into() }
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In { field: field.into(), values: values.into_iter().map(Into::into).collect() }
    }

    pub fn is_null(field: impl Into<String>) -> Predicate { Predicate::IsNull { field: field.into() } }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Predicate {
        Predicate::StartsWith { field: field.into(), prefix: prefix.into() }
    }

    pub fn matches(field: impl Into<String>, op: TextOp, query: impl Into<String>) -> Predicate {
        Predicate::TextSearch { field: field.into(), op, query: query.into() }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, Predicate::And(mut b)) => {
                b.insert(0, p);
                Predicate::And(b)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut a), Predicate::Or(b)) => {
                a.extend(b);
                Predicate::Or(a)
            }
            (Predicate::Or(mut a), p) => {
                a.push(p);
                Predicate::Or(a)
            }
            (p, Predicate::Or(mut b)) => {
                b.insert(0, p);
                Predicate::Or(b)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    pub fn negate(self) -> Predicate { Predicate::Not(Box::new(self)) }

    /// Push negations inward, flatten nested conjunctions/disjunctions and
    /// drop `True` units. The result is either a leaf, `And` of leaves and
    /// `Or`s, or a top-level `Or`.
    pub fn normalize(self) -> Predicate {
        match self {
            Predicate::Not(inner) => match *inner {
                Predicate::Not(inner) => inner.normalize(),
                Predicate::Compare { field, op, value } => Predicate::Compare { field, op: op.negated(), value },
                Predicate::IsNull { field } => Predicate::IsNotNull { field },
                Predicate::IsNotNull { field } => Predicate::IsNull { field },
                Predicate::And(children) => {
                    Predicate::Or(children.into_iter().map(|c| c.negate().normalize()).collect()).normalize()
                }
                Predicate::Or(children) => {
                    Predicate::And(children.into_iter().map(|c| c.negate().normalize()).collect()).normalize()
                }
                Predicate::True => Predicate::Or(Vec::new()),
                other => Predicate::Not(Box::new(other.normalize())),
            },
            Predicate::And(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        Predicate::True => {}
                        Predicate::And(grandchildren) => flat.extend(grandchildren),
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => Predicate::True,
                    1 => flat.pop().unwrap(),
                    _ => Predicate::And(flat),
                }
            }
            Predicate::Or(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.normalize() {
                        Predicate::Or(grandchildren) => flat.extend(grandchildren),
                        Predicate::True => return Predicate::True,
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    1 => flat.pop().unwrap(),
                    _ => Predicate::Or(flat),
                }
            }
            leaf => leaf,
        }
    }

    /// The conjuncts of a normalized predicate.
    pub fn conjuncts(&self) -> Vec<Predicate> {
        match self {
            Predicate::True => Vec::new(),
            Predicate::And(children) => children.clone(),
            other => vec![other.clone()],
        }
    }

    /// Fields this predicate reads.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        let mut push = |field: &str| {
            if !out.iter().any(|f| f == field) {
                out.push(field.to_string());
            }
        };
        match self {
            Predicate::True => {}
            Predicate::Compare { field, .. }
            | Predicate::In { field, .. }
            | Predicate::IsNull { field }
            | Predicate::IsNotNull { field }
            | Predicate::StartsWith { field, .. }
            | Predicate::TextSearch { field, .. }
            | Predicate::NearestTo { field, .. } => push(field),
            Predicate::WithinBox { lat_field, lng_field, .. } => {
                push(lat_field);
                push(lng_field);
            }
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.referenced_fields(out);
                }
            }
            Predicate::Not(inner) => inner.referenced_fields(out),
        }
    }

    /// Evaluate against one item. Vector-similarity constraints pass; they
    /// rank rather than filter.
    pub fn evaluate<I: FieldAccess>(&self, item: &I) -> Result<bool> {
        Ok(match self {
            Predicate::True => true,
            Predicate::Compare { field, op, value } => {
                let actual = item.field_value(field).unwrap_or(Value::Null);
                if actual.is_null() || value.is_null() {
                    // Comparisons against null never match; null-checks exist
                    // for that.
                    return Ok(false);
                }
                let ordering = actual.cmp(value);
                match op {
                    ComparisonOp::Eq => ordering == Ordering::Equal,
                    ComparisonOp::NotEq => ordering != Ordering::Equal,
                    ComparisonOp::Lt => ordering == Ordering::Less,
                    ComparisonOp::LtEq => ordering != Ordering::Greater,
                    ComparisonOp::Gt => ordering == Ordering::Greater,
                    ComparisonOp::GtEq => ordering != Ordering::Less,
                }
            }
            Predicate::In { field, values } => {
                let actual = item.field_value(field).unwrap_or(Value::Null);
                !actual.is_null() && values.contains(&actual)
            }
            Predicate::IsNull { field } => item.field_value(field).unwrap_or(Value::Null).is_null(),
            Predicate::IsNotNull { field } => !item.field_value(field).unwrap_or(Value::Null).is_null(),
            Predicate::StartsWith { field, prefix } => {
                matches!(item.field_value(field), Some(Value::String(s)) if s.starts_with(prefix.as_str()))
            }
            Predicate::TextSearch { field, op, query } => {
                let text = match item.field_value(field) {
                    Some(Value::String(text)) => text.to_lowercase(),
                    _ => return Ok(false),
                };
                let tokens: Vec<&str> = text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
                let query = query.to_lowercase();
                let terms: Vec<&str> = query.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
                match op {
                    TextOp::All => terms.iter().all(|t| tokens.contains(t)),
                    TextOp::Any => terms.iter().any(|t| tokens.contains(t)),
                    TextOp::Phrase => !terms.is_empty() && tokens.windows(terms.len()).any(|w| w == terms.as_slice()),
                }
            }
            Predicate::WithinBox { lat_field, lng_field, min, max } => {
                let lat = item.field_value(lat_field).and_then(|v| v.as_float());
                let lng = item.field_value(lng_field).and_then(|v| v.as_float());
                match (lat, lng) {
                    (Some(lat), Some(lng)) => lat >= min.0 && lat <= max.0 && lng >= min.1 && lng <= max.1,
                    _ => false,
                }
            }
            Predicate::NearestTo { .. } => true,
            Predicate::And(children) => {
                for child in children {
                    if !child.evaluate(item)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.evaluate(item)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::Not(inner) => !inner.evaluate(item)?,
        })
    }

    /// Reject constructs the engine cannot execute.
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::In { field, values } if values.is_empty() => {
                Err(Error::InvalidQuery(format!("IN over {field} has no values")))
            }
            Predicate::NearestTo { k: 0, field, .. } => Err(Error::InvalidQuery(format!("nearest-to on {field} with k = 0"))),
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            Predicate::Not(inner) => inner.validate(),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => write!(f, "true"),
            Predicate::Compare { field, op, value } => write!(f, "{field} {} {value}", op.symbol()),
            Predicate::In { field, values } => {
                write!(f, "{field} in [")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Predicate::IsNull { field } => write!(f, "{field} is null"),
            Predicate::IsNotNull { field } => write!(f, "{field} is not null"),
            Predicate::StartsWith { field, prefix } => write!(f, "{field} starts_with {prefix:?}"),
            Predicate::TextSearch { field, op, query } => write!(f, "{field} text({op:?}) {query:?}"),
            Predicate::WithinBox { lat_field, lng_field, min, max } => {
                write!(f, "({lat_field},{lng_field}) within [{:?}..{:?}]", min, max)
            }
            Predicate::NearestTo { field, k, .. } => write!(f, "{field} nearest-to k={k}"),
            Predicate::And(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Predicate::Or(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Predicate::Not(inner) => write!(f, "not {inner}"),
        }
    }
}
