use std::fmt;

/// The SQL-facing type assigned to an inferred column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Varchar,
    Boolean,
    Integer,
    Double,
    Timestamp,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Varchar => "VARCHAR",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::Double => "DOUBLE",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullability {
    NotNullable,
    Nullable,
    /// No rows were observed, so nothing is known.
    Unknown,
}

/// What inference concluded about one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub label: String,
    pub sql_type: SqlType,
    pub nullability: Nullability,
    pub signed: bool,
    /// Suggested column width in characters.
    pub display_size: usize,
    pub precision: usize,
    pub scale: usize,
    /// Whether the label came from a diverted header row.
    pub first_row_is_header: bool,
}

/// The label used when no header row supplies one.
pub fn default_label(index: usize) -> String {
    format!("_c{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_names() {
        assert_eq!(SqlType::Varchar.to_string(), "VARCHAR");
        assert_eq!(SqlType::Timestamp.to_string(), "TIMESTAMP");
    }

    #[test]
    fn test_default_labels() {
        assert_eq!(default_label(0), "_c0");
        assert_eq!(default_label(12), "_c12");
    }
}
