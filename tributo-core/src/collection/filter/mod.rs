//! Boolean filter expressions over document columns.
//!
//! Filters are written in a small SQL-like language:
//!
//! ```text
//! vigente = TRUE AND (text ILIKE '%iptu%' OR text ILIKE '%isenção%')
//! ano >= 2010 AND norma NOT LIKE 'Decreto%'
//! nivel IN (1, 2) AND numero IS NOT NULL
//! ```
//!
//! or composed in code with the [`Predicate`] constructors. Evaluation is
//! three-valued: an atom over a missing field is UNKNOWN, and only TRUE
//! matches, so absent metadata never satisfies a comparison.

mod lexer;
mod parser;

use super::error::{CollectionError, Result};
use super::schema::{CollectionSchema, ColumnType};
use super::types::{Document, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
        case_insensitive: bool,
    },
    IsNull {
        column: String,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Parses a filter expression.
    pub fn parse(expression: &str) -> Result<Self> {
        parser::parse(expression)
    }

    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            column: column.into(),
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            column: column.into(),
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull {
            column: column.into(),
        }
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            column: column.into(),
            values,
        }
    }

    pub fn all(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut terms) => {
                terms.push(other);
                Predicate::And(terms)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut terms) => {
                terms.push(other);
                Predicate::Or(terms)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Type-checks the predicate against a schema.
    ///
    /// Rejects unknown columns and operator/type combinations the evaluator
    /// cannot answer, so bad filters fail before any scan work starts.
    pub fn validate(&self, schema: &CollectionSchema) -> Result<()> {
        match self {
            Predicate::Const(_) => Ok(()),
            Predicate::Compare { column, op, value } => {
                let column_type = column_type(schema, column)?;
                check_literal(column, column_type, value)?;
                if op.is_ordering() && column_type == ColumnType::Boolean {
                    return Err(invalid(format!(
                        "operator '{}' is not supported on boolean column '{}'",
                        op.symbol(),
                        column
                    )));
                }
                Ok(())
            }
            Predicate::Like { column, .. } => match column_type(schema, column)? {
                ColumnType::Utf8 => Ok(()),
                other => Err(invalid(format!(
                    "LIKE needs a text column, '{}' is {}",
                    column, other
                ))),
            },
            Predicate::IsNull { column } => column_type(schema, column).map(|_| ()),
            Predicate::In { column, values } => {
                let column_type = column_type(schema, column)?;
                values
                    .iter()
                    .try_for_each(|v| check_literal(column, column_type, v))
            }
            Predicate::Not(inner) => inner.validate(schema),
            Predicate::And(terms) | Predicate::Or(terms) => {
                terms.iter().try_for_each(|t| t.validate(schema))
            }
        }
    }

    /// Returns true only when the predicate evaluates to TRUE for `document`.
    pub fn matches(&self, document: &Document) -> bool {
        self.evaluate(document) == Some(true)
    }

    /// Three-valued evaluation; `None` is UNKNOWN.
    pub fn evaluate(&self, document: &Document) -> Option<bool> {
        match self {
            Predicate::Const(b) => Some(*b),
            Predicate::Compare { column, op, value } => {
                let field = lookup(document, column)?;
                compare_values(&field, value).map(|ordering| op.holds(ordering))
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let field = lookup(document, column)?;
                let text = field.as_str()?;
                Some(if *case_insensitive {
                    like_match(&text.to_lowercase(), &pattern.to_lowercase())
                } else {
                    like_match(text, pattern)
                })
            }
            Predicate::IsNull { column } => Some(lookup(document, column).is_none()),
            Predicate::In { column, values } => {
                let field = lookup(document, column)?;
                let mut unknown = false;
                for candidate in values {
                    match compare_values(&field, candidate) {
                        Some(Ordering::Equal) => return Some(true),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Predicate::Not(inner) => inner.evaluate(document).map(|b| !b),
            Predicate::And(terms) => {
                let mut result = Some(true);
                for term in terms {
                    match term.evaluate(document) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(terms) => {
                let mut result = Some(false);
                for term in terms {
                    match term.evaluate(document) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Const(true) => write!(f, "TRUE"),
            Predicate::Const(false) => write!(f, "FALSE"),
            Predicate::Compare { column, op, value } => {
                write!(f, "{} {} {}", Ident(column), op.symbol(), value)
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let keyword = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(f, "{} {} {}", Ident(column), keyword, Value::String(pattern.clone()))
            }
            Predicate::IsNull { column } => write!(f, "{} IS NULL", Ident(column)),
            Predicate::In { column, values } => {
                write!(f, "{} IN (", Ident(column))?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, ")")
            }
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
            Predicate::And(terms) => write_joined(f, terms, "AND", true),
            Predicate::Or(terms) => write_joined(f, terms, "OR", false),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Predicate], keyword: &str, empty: bool) -> fmt::Result {
    if terms.is_empty() {
        return write!(f, "{}", Predicate::Const(empty));
    }
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", keyword)?;
        }
        match term {
            Predicate::And(_) | Predicate::Or(_) => write!(f, "({})", term)?,
            _ => write!(f, "{}", term)?,
        }
    }
    Ok(())
}

/// Renders a column name, quoting it when it is not a plain identifier.
struct Ident<'a>(&'a str);

impl fmt::Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plain = self
            .0
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
            && self.0.chars().all(|c| c.is_alphanumeric() || c == '_');
        let reserved = matches!(
            self.0.to_ascii_uppercase().as_str(),
            "AND" | "OR" | "NOT" | "LIKE" | "ILIKE" | "IN" | "IS" | "NULL" | "TRUE" | "FALSE"
        );
        if plain && !reserved {
            f.write_str(self.0)
        } else {
            write!(f, "\"{}\"", self.0.replace('"', "\"\""))
        }
    }
}

fn invalid(message: String) -> CollectionError {
    CollectionError::InvalidPredicate(message)
}

fn column_type(schema: &CollectionSchema, column: &str) -> Result<ColumnType> {
    match column {
        "id" | "text" => Ok(ColumnType::Utf8),
        _ => schema
            .column(column)
            .map(|c| c.column_type)
            .ok_or_else(|| invalid(format!("unknown column '{}'", column))),
    }
}

fn check_literal(column: &str, column_type: ColumnType, value: &Value) -> Result<()> {
    let compatible = match value {
        Value::String(_) => column_type == ColumnType::Utf8,
        Value::Integer(_) | Value::Float(_) => column_type.is_numeric(),
        Value::Boolean(_) => column_type == ColumnType::Boolean,
    };
    if compatible {
        Ok(())
    } else {
        Err(invalid(format!(
            "literal {} does not match {} column '{}'",
            value, column_type, column
        )))
    }
}

fn lookup(document: &Document, column: &str) -> Option<Value> {
    match column {
        "id" => Some(Value::String(document.id.clone())),
        "text" => Some(Value::String(document.text.clone())),
        _ => document.metadata.get(column).cloned(),
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = (left.as_f64()?, right.as_f64()?);
            a.partial_cmp(&b)
        }
    }
}

/// SQL LIKE matching: `%` matches any run of characters, `_` exactly one.
enum LikeToken {
    Many,
    One,
    Char(char),
}

/// `%` matches any run, `_` one character; a backslash makes the next
/// character literal.
fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Many,
            '_' => LikeToken::One,
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            c => LikeToken::Char(c),
        });
    }
    tokens
}

fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern = like_tokens(pattern);
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(LikeToken::One) => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Many) => {
                backtrack = Some((p, t));
                p += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|token| matches!(token, LikeToken::Many))
}
