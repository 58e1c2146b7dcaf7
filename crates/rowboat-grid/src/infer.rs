//! Heuristic column typing for captured string grids.
//!
//! Classification is purely lexical. Digits-only strings such as ZIP codes
//! or account numbers infer as INTEGER, and integers wider than 64 bits
//! pass classification but fail on typed read-back. Callers that need
//! exact types should treat the result as a presentation hint.

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{GridError, GridResult};
use crate::metadata::{default_label, ColumnMetadata, Nullability, SqlType};
use crate::table::Table;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

lazy_static! {
    static ref INTEGER_REGEX: Regex = Regex::new(r"^[+-]?[0-9]+$").unwrap();
    static ref DECIMAL_REGEX: Regex = Regex::new(r"^[+-]?[0-9]+\.[0-9]+$").unwrap();
    static ref TIMESTAMP_REGEX: Regex =
        Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]{3})?$")
            .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiteralKind {
    Boolean,
    Integer,
    Decimal,
    Timestamp,
    Text,
}

fn classify(value: &str) -> LiteralKind {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        LiteralKind::Boolean
    } else if INTEGER_REGEX.is_match(value) {
        LiteralKind::Integer
    } else if DECIMAL_REGEX.is_match(value) {
        LiteralKind::Decimal
    } else if TIMESTAMP_REGEX.is_match(value)
        && NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).is_ok()
    {
        LiteralKind::Timestamp
    } else {
        LiteralKind::Text
    }
}

/// Integers widen to decimals; any other disagreement falls back to text.
fn merge(a: LiteralKind, b: LiteralKind) -> LiteralKind {
    match (a, b) {
        (a, b) if a == b => a,
        (LiteralKind::Integer, LiteralKind::Decimal)
        | (LiteralKind::Decimal, LiteralKind::Integer) => LiteralKind::Decimal,
        _ => LiteralKind::Text,
    }
}

#[derive(Debug, Default)]
struct ColumnStats {
    rows: usize,
    nulls: usize,
    kind: Option<LiteralKind>,
    max_len: usize,
    max_whole: usize,
    max_fraction: usize,
    timestamp_fraction: bool,
}

impl ColumnStats {
    fn observe(&mut self, value: Option<&str>) {
        self.rows += 1;
        let Some(value) = value else {
            self.nulls += 1;
            return;
        };
        let kind = classify(value);
        self.kind = Some(match self.kind {
            None => kind,
            Some(previous) => merge(previous, kind),
        });
        self.max_len = self.max_len.max(value.chars().count());
        match kind {
            LiteralKind::Integer | LiteralKind::Decimal => {
                let digits = value.trim_start_matches(['+', '-']);
                let (whole, fraction) = match digits.split_once('.') {
                    Some((whole, fraction)) => (whole.len(), fraction.len()),
                    None => (digits.len(), 0),
                };
                self.max_whole = self.max_whole.max(whole);
                self.max_fraction = self.max_fraction.max(fraction);
            }
            LiteralKind::Timestamp => {
                if value.contains('.') {
                    self.timestamp_fraction = true;
                }
            }
            _ => {}
        }
    }

    fn into_metadata(self) -> ColumnMetadata {
        let nullability = if self.rows == 0 {
            Nullability::Unknown
        } else if self.nulls > 0 {
            Nullability::Nullable
        } else {
            Nullability::NotNullable
        };
        let mut metadata = ColumnMetadata {
            label: String::new(),
            sql_type: SqlType::Varchar,
            nullability,
            signed: false,
            display_size: self.max_len,
            precision: self.max_len,
            scale: 0,
            first_row_is_header: false,
        };
        match self.kind {
            None | Some(LiteralKind::Text) => {}
            Some(LiteralKind::Boolean) => {
                metadata.sql_type = SqlType::Boolean;
            }
            Some(LiteralKind::Integer) => {
                metadata.sql_type = SqlType::Integer;
                metadata.signed = true;
                metadata.precision = self.max_whole;
                metadata.scale = self.max_whole;
            }
            Some(LiteralKind::Decimal) => {
                metadata.sql_type = SqlType::Double;
                metadata.signed = true;
                metadata.precision = self.max_whole;
                metadata.scale = self.max_fraction;
                metadata.display_size = if self.max_whole > 0 {
                    self.max_whole + self.max_fraction + 1
                } else {
                    self.max_fraction
                };
            }
            Some(LiteralKind::Timestamp) => {
                metadata.sql_type = SqlType::Timestamp;
                metadata.scale = if self.timestamp_fraction { 3 } else { 0 };
            }
        }
        metadata
    }
}

/// Infers the type of one column from its observed values.
///
/// A column with no rows infers as VARCHAR with unknown nullability. An
/// empty string is a present value, not a null.
pub fn infer_column<'a, I>(values: I) -> ColumnMetadata
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut stats = ColumnStats::default();
    for value in values {
        stats.observe(value);
    }
    stats.into_metadata()
}

/// Infers metadata for every column of a table, labeling columns from the
/// diverted header row when one is present.
pub fn infer_table(table: &Table, header: Option<&[String]>) -> Vec<ColumnMetadata> {
    (0..table.column_count())
        .map(|index| {
            let mut metadata = infer_column(table.column(index).values());
            metadata.first_row_is_header = header.is_some();
            let label = header
                .and_then(|h| h.get(index))
                .filter(|label| !label.is_empty());
            metadata.label = match label {
                Some(label) => label.clone(),
                None => default_label(index),
            };
            metadata
        })
        .collect()
}

/// A cell value read back under an inferred type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Varchar(String),
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(NaiveDateTime),
}

/// Reads a cell under an inferred type. Missing cells read as
/// [`TypedValue::Null`]; a value that does not parse under the requested
/// type is a [`GridError::TypeConversion`].
pub fn parse_typed(value: Option<&str>, sql_type: SqlType) -> GridResult<TypedValue> {
    let Some(value) = value else {
        return Ok(TypedValue::Null);
    };
    match sql_type {
        SqlType::Varchar => Ok(TypedValue::Varchar(value.to_string())),
        SqlType::Boolean => {
            if value.eq_ignore_ascii_case("true") {
                Ok(TypedValue::Boolean(true))
            } else if value.eq_ignore_ascii_case("false") {
                Ok(TypedValue::Boolean(false))
            } else {
                Err(conversion_error(value, SqlType::Boolean))
            }
        }
        SqlType::Integer => value
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|_| conversion_error(value, SqlType::Integer)),
        SqlType::Double => value
            .parse::<f64>()
            .map(TypedValue::Double)
            .map_err(|_| conversion_error(value, SqlType::Double)),
        SqlType::Timestamp => NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
            .map(TypedValue::Timestamp)
            .map_err(|_| conversion_error(value, SqlType::Timestamp)),
    }
}

fn conversion_error(value: &str, sql_type: SqlType) -> GridError {
    GridError::TypeConversion(format!("cannot read {value:?} as {sql_type}"))
}
