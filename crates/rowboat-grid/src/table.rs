use crate::tokenizer::RowSink;

/// A captured grid of string cells.
///
/// Rows keep the width they were captured with. Reads outside a row's
/// width return `None`, so ragged rows present as trailing missing cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The width of the widest row.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(column)).map(String::as_str)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn column(&self, index: usize) -> Column<'_> {
        Column { table: self, index }
    }

    /// Drops all captured rows, releasing their storage. The consumer calls
    /// this when it is done cursoring over the table.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn last_row_width(&self) -> Option<usize> {
        self.rows.last().map(Vec::len)
    }
}

/// A by-index view over one column of a [`Table`].
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Column<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Cell values from top to bottom; rows narrower than this column
    /// yield `None`.
    pub fn values(&self) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let index = self.index;
        self.table
            .rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str))
    }
}

/// How a [`TableBuilder`] partitions and bounds incoming rows.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Start a new table whenever the row width changes.
    pub multi_table: bool,
    /// Divert the first row into a header instead of the first table.
    pub skip_first_row: bool,
    /// Upper bound on processed rows, counting a diverted header row.
    /// Zero means unbounded.
    pub max_rows: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            multi_table: true,
            skip_first_row: false,
            max_rows: 0,
        }
    }
}

/// Assembles tokenizer events into one or more [`Table`]s.
///
/// In multi-table mode a row whose width differs from the previous row
/// starts a new table, so one dispatch that prints several differently
/// shaped result sets back to back partitions into one table per shape
/// run. Once the row bound is reached the builder reports itself as
/// saturated and drops everything that still arrives.
#[derive(Debug)]
pub struct TableBuilder {
    options: TableOptions,
    tables: Vec<Table>,
    row: Vec<String>,
    header: Option<Vec<String>>,
    await_header: bool,
    rows_seen: usize,
}

impl TableBuilder {
    pub fn new(options: TableOptions) -> Self {
        let await_header = options.skip_first_row;
        Self {
            options,
            tables: Vec::new(),
            row: Vec::new(),
            header: None,
            await_header,
            rows_seen: 0,
        }
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Finalizes the builder. A pending row that never saw its row
    /// boundary (output without a trailing line break) becomes a final
    /// row, subject to the same header diversion and row bound as any
    /// other row.
    pub fn finish(mut self) -> (Vec<Table>, Option<Vec<String>>) {
        if !self.row.is_empty() {
            self.on_row();
        }
        (self.tables, self.header)
    }

    fn append_row(&mut self, row: Vec<String>) {
        if self.options.multi_table {
            let width_changed = self
                .tables
                .last()
                .and_then(Table::last_row_width)
                .is_some_and(|width| width != row.len());
            if width_changed {
                self.tables.push(Table::new());
            }
        }
        if self.tables.is_empty() {
            self.tables.push(Table::new());
        }
        if let Some(table) = self.tables.last_mut() {
            table.push_row(row);
        }
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new(TableOptions::default())
    }
}

impl RowSink for TableBuilder {
    fn on_cell(&mut self, value: String) {
        if !self.is_saturated() {
            self.row.push(value);
        }
    }

    fn on_row(&mut self) {
        if self.is_saturated() {
            self.row.clear();
            return;
        }
        let row = std::mem::take(&mut self.row);
        self.rows_seen += 1;
        if self.await_header {
            self.await_header = false;
            self.header = Some(row);
            return;
        }
        self.append_row(row);
    }

    fn is_saturated(&self) -> bool {
        self.options.max_rows != 0 && self.rows_seen >= self.options.max_rows
    }
}
