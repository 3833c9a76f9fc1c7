/// Parsed statement: the statement kind plus clause *strings*. The WHERE
/// fragment is compiled later by the predicate compiler against the schema
/// in force; ORDER BY/GROUP BY/HAVING/LIMIT stay textual until the stage
/// that consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Describe,
    Meta,
    ShowTables,
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub kind: Option<StatementKind>,
    /// Target table path (file path, extension selects the storage format).
    pub table: String,
    /// SELECT expressions, or INSERT/UPDATE column names.
    pub columns: Vec<String>,
    /// INSERT/UPDATE value literals, quotes preserved.
    pub values: Vec<String>,
    /// CREATE TABLE definition entries, raw.
    pub definition: Vec<String>,
    pub distinct: bool,
    /// USE INDEX(...) hint body.
    pub index: Option<String>,
    pub where_clause: Option<String>,
    pub group_by: Option<String>,
    pub having: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
    /// INSERT ... FROM source path.
    pub from: Option<String>,
    /// SELECT ... INTO target path.
    pub into: Option<String>,
    /// Trailing option token (SHOW TABLES -R).
    pub option: Option<String>,
}

impl Query {
    pub fn kind(&self) -> StatementKind {
        self.kind.expect("parsed query always has a kind")
    }

    pub fn where_str(&self) -> &str {
        self.where_clause.as_deref().unwrap_or("")
    }

    pub fn order_by_str(&self) -> &str {
        self.order_by.as_deref().unwrap_or("")
    }

    pub fn group_by_str(&self) -> &str {
        self.group_by.as_deref().unwrap_or("")
    }

    pub fn limit_str(&self) -> &str {
        self.limit.as_deref().unwrap_or("")
    }

    pub fn is_select_star(&self) -> bool {
        self.columns.len() == 1 && self.columns[0] == "*"
    }
}
