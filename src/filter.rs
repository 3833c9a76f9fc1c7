//! WHERE-clause predicate compiler.
//!
//! Grammar:
//! ```text
//! expression ::= primary (AND primary | OR primary)*
//! primary    ::= '(' expression ')' | condition
//! condition  ::= column operator value
//! operator   ::= '=' | '<=' | '<' | '>=' | '>' | '<>' | '!=' | LIKE
//! value      ::= quoted_string | NULL | number
//! ```
//!
//! No operator precedence; AND/OR chains associate left. Use parentheses
//! for explicit grouping. Column names resolve against the schema in force
//! at compile time and literals are coerced to the column type.

use std::cmp::Ordering;

use crate::core::{EngineError, IndexDef, Row, Schema, Value};
use crate::parser::parse_order_by;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    LesserEqual,
    Lesser,
    GreaterEqual,
    Greater,
    NotEqual,
    Like,
}

impl CompareOp {
    /// Operators an ordered index can seek on. `<>` and `LIKE` always fall
    /// through to the residual layer.
    const fn seekable(self) -> bool {
        matches!(
            self,
            Self::Equal | Self::Lesser | Self::LesserEqual | Self::Greater | Self::GreaterEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Condition {
        op: CompareOp,
        column: usize,
        value: Value,
    },
    Logical {
        op: LogicalOp,
        children: Vec<Filter>,
    },
}

/// Result of splitting a predicate against an index: `first` holds the
/// conjuncts an index seek can consume, `second` the residual filter.
#[derive(Debug, Clone, Default)]
pub struct FilterLayers {
    pub first: Option<Filter>,
    pub second: Option<Filter>,
}

impl Filter {
    /// Compile a WHERE-clause fragment (without the `WHERE` keyword).
    /// Empty input compiles to no filter.
    pub fn compile(where_clause: &str, schema: &Schema) -> Result<Option<Self>, EngineError> {
        let trimmed = where_clause.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let mut p = Parser { rest: trimmed, schema };
        let f = p.expression()?;
        Ok(Some(f))
    }

    /// Evaluate the tree against a row. AND short-circuits on the first
    /// mismatch, OR on the first match.
    pub fn matches(&self, row: &Row) -> Result<bool, EngineError> {
        match self {
            Self::Condition { op, column, value } => {
                Ok(condition_matches(*op, row.get(*column)?, value))
            }
            Self::Logical { op, children } => {
                match op {
                    LogicalOp::And => {
                        for c in children {
                            if !c.matches(row)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    LogicalOp::Or => {
                        for c in children {
                            if c.matches(row)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                }
            }
        }
    }

    fn contains_or(&self) -> bool {
        match self {
            Self::Condition { .. } => false,
            Self::Logical { op, children } => {
                *op == LogicalOp::Or || children.iter().any(Self::contains_or)
            }
        }
    }

    fn flatten_and<'a>(&'a self, out: &mut Vec<&'a Self>) {
        match self {
            Self::Logical {
                op: LogicalOp::And,
                children,
            } => {
                for c in children {
                    c.flatten_and(out);
                }
            }
            other => out.push(other),
        }
    }

    /// Split this predicate against a target index per the sargable-prefix
    /// rule: equality conjuncts on the index key columns extend the usable
    /// prefix in key order, the first range conjunct closes it, and any OR
    /// in the tree makes the whole predicate residual.
    pub fn split(&self, schema: &Schema, index: &IndexDef) -> FilterLayers {
        if self.contains_or() {
            return FilterLayers {
                first: None,
                second: Some(self.clone()),
            };
        }

        let mut conjuncts = Vec::new();
        self.flatten_and(&mut conjuncts);
        let mut used = vec![false; conjuncts.len()];

        for key in &index.keys {
            let Some(key_col) = schema.column_at(key) else {
                break;
            };
            let mut found = false;
            let mut range = false;
            for (i, c) in conjuncts.iter().enumerate() {
                if let Self::Condition { op, column, .. } = c {
                    if *column == key_col && op.seekable() {
                        used[i] = true;
                        found = true;
                        if *op != CompareOp::Equal {
                            range = true;
                        }
                    }
                }
            }
            if !found || range {
                break;
            }
        }

        let mut first = Vec::new();
        let mut second = Vec::new();
        for (i, c) in conjuncts.into_iter().enumerate() {
            if used[i] {
                first.push(c.clone());
            } else {
                second.push(c.clone());
            }
        }
        FilterLayers {
            first: assemble(first),
            second: assemble(second),
        }
    }
}

fn assemble(mut conjuncts: Vec<Filter>) -> Option<Filter> {
    match conjuncts.len() {
        0 => None,
        1 => conjuncts.pop(),
        _ => Some(Filter::Logical {
            op: LogicalOp::And,
            children: conjuncts,
        }),
    }
}

/// NULL compares equal only to an explicit NULL literal; range operators
/// never match NULL. No three-valued logic.
fn condition_matches(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Equal => {
            if left.is_null() || right.is_null() {
                left.is_null() && right.is_null()
            } else {
                left.compare(right) == Some(Ordering::Equal)
            }
        }
        CompareOp::NotEqual => {
            if left.is_null() || right.is_null() {
                left.is_null() != right.is_null()
            } else {
                matches!(left.compare(right), Some(o) if o != Ordering::Equal)
            }
        }
        CompareOp::Lesser => matches!(left.compare(right), Some(Ordering::Less)),
        CompareOp::LesserEqual => {
            matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal))
        }
        CompareOp::Greater => matches!(left.compare(right), Some(Ordering::Greater)),
        CompareOp::GreaterEqual => {
            matches!(left.compare(right), Some(Ordering::Greater | Ordering::Equal))
        }
        CompareOp::Like => match (left, right) {
            (Value::Text(text), Value::Text(pattern)) => like_match(text, pattern),
            _ => false,
        },
    }
}

/// LIKE matching: `%` (or `*`) matches any run, `_` exactly one character.
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    match_recursive(&text, &pattern, 0, 0)
}

fn match_recursive(text: &[char], pattern: &[char], ti: usize, pi: usize) -> bool {
    if pi >= pattern.len() {
        return ti >= text.len();
    }
    let pc = pattern[pi];
    if pc == '%' || pc == '*' {
        if match_recursive(text, pattern, ti, pi + 1) {
            return true;
        }
        return ti < text.len() && match_recursive(text, pattern, ti + 1, pi);
    }
    if ti >= text.len() {
        return false;
    }
    if pc == '_' || text[ti] == pc {
        return match_recursive(text, pattern, ti + 1, pi + 1);
    }
    false
}

/// Pick the best index for a WHERE/ORDER BY pair.
///
/// Scoring: a fully indexable WHERE tree dominates (+100), an ORDER BY
/// matching the index key prefix is secondary (+50, plus one per matched
/// column), narrower indexes break ties. With neither clause the first
/// declared index wins. `None` when no index helps.
pub fn best_index(
    where_clause: &str,
    orderby: &str,
    schema: &Schema,
) -> Result<Option<usize>, EngineError> {
    let where_clause = where_clause.trim();
    let orderby = orderby.trim();
    if where_clause.is_empty() && orderby.is_empty() {
        return Ok(if schema.indexes.is_empty() { None } else { Some(0) });
    }

    let filter = Filter::compile(where_clause, schema)?;
    let order_cols: Vec<String> = parse_order_by(orderby)
        .into_iter()
        .map(|(c, _)| c)
        .collect();

    let mut best = None;
    let mut best_score = 0i64;
    for (i, index) in schema.indexes.iter().enumerate() {
        let mut score = 0i64;
        if let Some(f) = &filter {
            let layers = f.split(schema, index);
            if layers.first.is_some() && layers.second.is_none() {
                score += 100;
            }
        }
        if !order_cols.is_empty() && !index.keys.is_empty() {
            let check = order_cols.len().min(index.keys.len());
            let prefix_match = (0..check)
                .all(|k| order_cols[k].eq_ignore_ascii_case(&index.keys[k]));
            if prefix_match && order_cols.len() <= index.keys.len() {
                score += 50 + order_cols.len() as i64;
            }
        }
        if score > 0 {
            score += 10 - index.keys.len() as i64;
        }
        if score > best_score {
            best_score = score;
            best = Some(i);
        }
    }
    Ok(best)
}

// Recursive-descent scanner over the clause text.

struct Parser<'a> {
    rest: &'a str,
    schema: &'a Schema,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    /// Case-insensitive keyword at a word boundary; consumes on match.
    fn keyword(&mut self, kw: &str) -> bool {
        if self.rest.len() >= kw.len()
            && self.rest.is_char_boundary(kw.len())
            && self.rest[..kw.len()].eq_ignore_ascii_case(kw)
            && !self.rest[kw.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.rest = &self.rest[kw.len()..];
            true
        } else {
            false
        }
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        self.rest.len() >= kw.len()
            && self.rest.is_char_boundary(kw.len())
            && self.rest[..kw.len()].eq_ignore_ascii_case(kw)
            && !self.rest[kw.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn expression(&mut self) -> Result<Filter, EngineError> {
        let mut left = self.primary()?;
        loop {
            self.skip_ws();
            let op = if self.keyword("AND") {
                LogicalOp::And
            } else if self.keyword("OR") {
                LogicalOp::Or
            } else {
                break;
            };
            self.skip_ws();
            if self.at_end() {
                let side = if op == LogicalOp::And { "AND" } else { "OR" };
                return Err(EngineError::UnexpectedEndOfInput(format!(
                    "expected condition after {side}"
                )));
            }
            let right = self.primary()?;
            left = Filter::Logical {
                op,
                children: vec![left, right],
            };
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Filter, EngineError> {
        self.skip_ws();
        if self.at_end() {
            return Err(EngineError::UnexpectedEndOfInput(
                "expected expression".into(),
            ));
        }
        if let Some(inner) = self.rest.strip_prefix('(') {
            self.rest = inner;
            let f = self.expression()?;
            self.skip_ws();
            match self.rest.strip_prefix(')') {
                Some(after) => {
                    self.rest = after;
                    Ok(f)
                }
                None => Err(EngineError::MissingClosingParenthesis),
            }
        } else {
            self.condition()
        }
    }

    fn condition(&mut self) -> Result<Filter, EngineError> {
        let name = self.column_name()?;
        let column = self
            .schema
            .column_at(&name)
            .ok_or(EngineError::UnknownColumn(name))?;
        let op = self.operator()?;
        let target = self.schema.columns[column].data_type;
        let value = self.value(target)?;
        Ok(Filter::Condition { op, column, value })
    }

    fn column_name(&mut self) -> Result<String, EngineError> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !c.is_alphanumeric() && c != '_')
            .unwrap_or(self.rest.len());
        if end == 0 {
            if self.at_end() {
                return Err(EngineError::UnexpectedEndOfInput(
                    "expected column name".into(),
                ));
            }
            return Err(EngineError::Parse(format!(
                "expected column name at '{}'",
                truncate(self.rest)
            )));
        }
        let name = self.rest[..end].to_string();
        self.rest = &self.rest[end..];
        Ok(name)
    }

    fn operator(&mut self) -> Result<CompareOp, EngineError> {
        self.skip_ws();

        // Explicitly rejected SQL operators get a descriptive message
        // instead of a mis-parse.
        if self.peek_keyword("BETWEEN") {
            return Err(EngineError::UnsupportedOperator(
                "BETWEEN operator is not supported. Use 'column >= value1 AND column <= value2' instead".into(),
            ));
        }
        if self.peek_keyword("IN") {
            return Err(EngineError::UnsupportedOperator(
                "IN operator is not supported. Use 'column = value1 OR column = value2' instead"
                    .into(),
            ));
        }
        if self.peek_keyword("NOT") {
            return Err(EngineError::UnsupportedOperator(
                "NOT operator is not supported".into(),
            ));
        }
        if self.peek_keyword("IS") {
            return Err(EngineError::UnsupportedOperator(
                "IS operator is not supported. Use '=' for equality or check for NULL values"
                    .into(),
            ));
        }

        for (sym, op) in [
            ("<=", CompareOp::LesserEqual),
            (">=", CompareOp::GreaterEqual),
            ("<>", CompareOp::NotEqual),
            ("!=", CompareOp::NotEqual),
            ("<", CompareOp::Lesser),
            (">", CompareOp::Greater),
            ("=", CompareOp::Equal),
        ] {
            if let Some(after) = self.rest.strip_prefix(sym) {
                self.rest = after;
                return Ok(op);
            }
        }
        if self.keyword("LIKE") {
            return Ok(CompareOp::Like);
        }
        if self.at_end() {
            return Err(EngineError::UnexpectedEndOfInput("expected operator".into()));
        }
        Err(EngineError::Parse(format!(
            "invalid operator at '{}'",
            truncate(self.rest)
        )))
    }

    fn value(&mut self, target: crate::core::DataType) -> Result<Value, EngineError> {
        self.skip_ws();
        if self.at_end() {
            return Err(EngineError::UnexpectedEndOfInput("expected value".into()));
        }
        let first = self.rest.chars().next().unwrap_or('\0');

        if first == '\'' || first == '"' {
            let body = &self.rest[1..];
            let Some(end) = body.find(first) else {
                return Err(EngineError::UnterminatedLiteral);
            };
            let content = &body[..end];
            self.rest = &body[end + 1..];
            // A quoted literal that fails coercion to a non-text column is
            // kept as text; the comparison then simply never matches.
            return Ok(Value::coerce(content, target)
                .unwrap_or_else(|_| Value::Text(content.to_string())));
        }

        if self.keyword("NULL") {
            return Ok(Value::Null);
        }

        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
            .unwrap_or(self.rest.len());
        let token = &self.rest[..end];
        if token.is_empty() || token.parse::<f64>().is_err() {
            return Err(EngineError::InvalidValueFormat(truncate(self.rest).into()));
        }
        self.rest = &self.rest[end..];
        Value::coerce(token, target)
    }
}

fn truncate(s: &str) -> &str {
    let end = s
        .char_indices()
        .nth(24)
        .map_or(s.len(), |(i, _)| i);
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Schema};
    use std::sync::Arc;

    fn lineitem_schema() -> Schema {
        let mut s = Schema::new("lineitem");
        s.add_column("l_orderkey", DataType::Integer)
            .add_column("l_quantity", DataType::Integer)
            .add_column("l_shipmode", DataType::Text)
            .add_column("l_price", DataType::Real)
            .add_index("primary", &["l_orderkey", "l_quantity"]);
        s
    }

    fn row(schema: &Schema, orderkey: i64, quantity: i64, shipmode: &str, price: f64) -> Row {
        Row::from_values(
            Arc::new(schema.clone()),
            vec![
                Value::Integer(orderkey),
                Value::Integer(quantity),
                Value::Text(shipmode.into()),
                Value::Real(price),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_compile_and_compare_roundtrip() {
        let s = lineitem_schema();
        let f = Filter::compile("l_orderkey = 1001 AND l_quantity > 5", &s)
            .unwrap()
            .unwrap();
        assert!(f.matches(&row(&s, 1001, 6, "AIR", 1.0)).unwrap());
        assert!(!f.matches(&row(&s, 1001, 5, "AIR", 1.0)).unwrap());
        assert!(!f.matches(&row(&s, 1000, 6, "AIR", 1.0)).unwrap());
    }

    #[test]
    fn test_empty_where_compiles_to_none() {
        let s = lineitem_schema();
        assert!(Filter::compile("", &s).unwrap().is_none());
        assert!(Filter::compile("   ", &s).unwrap().is_none());
    }

    #[test]
    fn test_or_and_parentheses() {
        let s = lineitem_schema();
        let f = Filter::compile("(l_shipmode = 'AIR' OR l_shipmode = 'RAIL') AND l_quantity < 10", &s)
            .unwrap()
            .unwrap();
        assert!(f.matches(&row(&s, 1, 5, "RAIL", 1.0)).unwrap());
        assert!(!f.matches(&row(&s, 1, 15, "RAIL", 1.0)).unwrap());
        assert!(!f.matches(&row(&s, 1, 5, "SHIP", 1.0)).unwrap());
    }

    #[test]
    fn test_unknown_column() {
        let s = lineitem_schema();
        assert!(matches!(
            Filter::compile("nope = 1", &s),
            Err(EngineError::UnknownColumn(c)) if c == "nope"
        ));
    }

    #[test]
    fn test_rejected_operators() {
        let s = lineitem_schema();
        assert!(matches!(
            Filter::compile("l_quantity BETWEEN 1 AND 5", &s),
            Err(EngineError::UnsupportedOperator(m)) if m.contains("BETWEEN")
        ));
        assert!(matches!(
            Filter::compile("l_quantity IN (1, 2)", &s),
            Err(EngineError::UnsupportedOperator(m)) if m.contains("IN")
        ));
        assert!(matches!(
            Filter::compile("l_shipmode IS NULL", &s),
            Err(EngineError::UnsupportedOperator(m)) if m.contains("IS")
        ));
    }

    #[test]
    fn test_parse_failures() {
        let s = lineitem_schema();
        assert!(matches!(
            Filter::compile("l_shipmode = 'oops", &s),
            Err(EngineError::UnterminatedLiteral)
        ));
        assert!(matches!(
            Filter::compile("l_quantity = 1 AND", &s),
            Err(EngineError::UnexpectedEndOfInput(_))
        ));
        assert!(matches!(
            Filter::compile("(l_quantity = 1", &s),
            Err(EngineError::MissingClosingParenthesis)
        ));
        assert!(matches!(
            Filter::compile("l_quantity = abc", &s),
            Err(EngineError::InvalidValueFormat(_))
        ));
    }

    #[test]
    fn test_null_semantics() {
        let s = lineitem_schema();
        let mut r = row(&s, 1, 1, "AIR", 1.0);
        r.set(2, Value::Null).unwrap();

        let eq_null = Filter::compile("l_shipmode = NULL", &s).unwrap().unwrap();
        assert!(eq_null.matches(&r).unwrap());
        let eq_air = Filter::compile("l_shipmode = 'AIR'", &s).unwrap().unwrap();
        assert!(!eq_air.matches(&r).unwrap());
        let ne_air = Filter::compile("l_shipmode <> 'AIR'", &s).unwrap().unwrap();
        assert!(ne_air.matches(&r).unwrap());
    }

    #[test]
    fn test_like() {
        let s = lineitem_schema();
        let r = row(&s, 1, 1, "TRUCK", 1.0);
        for (pattern, expect) in [
            ("TRU%", true),
            ("%UCK", true),
            ("%RUC%", true),
            ("T_UCK", true),
            ("TRUCK", true),
            ("AIR%", false),
        ] {
            let f = Filter::compile(&format!("l_shipmode LIKE '{pattern}'"), &s)
                .unwrap()
                .unwrap();
            assert_eq!(f.matches(&r).unwrap(), expect, "pattern {pattern}");
        }
    }

    #[test]
    fn test_split_prefix_rule() {
        // Index keys [a, b, c]; predicate a=1 AND c=2 -> only a=1 seekable.
        let mut s = Schema::new("t");
        s.add_column("a", DataType::Integer)
            .add_column("b", DataType::Integer)
            .add_column("c", DataType::Integer)
            .add_index("primary", &["a", "b", "c"]);
        let f = Filter::compile("a = 1 AND c = 2", &s).unwrap().unwrap();
        let layers = f.split(&s, &s.indexes[0]);
        assert_eq!(
            layers.first,
            Some(Filter::Condition {
                op: CompareOp::Equal,
                column: 0,
                value: Value::Integer(1)
            })
        );
        assert_eq!(
            layers.second,
            Some(Filter::Condition {
                op: CompareOp::Equal,
                column: 2,
                value: Value::Integer(2)
            })
        );
    }

    #[test]
    fn test_split_range_closes_prefix() {
        let mut s = Schema::new("t");
        s.add_column("a", DataType::Integer)
            .add_column("b", DataType::Integer)
            .add_index("primary", &["a", "b"]);
        let f = Filter::compile("a > 1 AND b = 2", &s).unwrap().unwrap();
        let layers = f.split(&s, &s.indexes[0]);
        // The range on `a` closes the prefix; b=2 stays residual.
        assert!(matches!(
            layers.first,
            Some(Filter::Condition { op: CompareOp::Greater, column: 0, .. })
        ));
        assert!(matches!(
            layers.second,
            Some(Filter::Condition { column: 1, .. })
        ));
    }

    #[test]
    fn test_split_or_is_all_residual() {
        let s = lineitem_schema();
        let f = Filter::compile("l_orderkey = 1 OR l_quantity = 2", &s)
            .unwrap()
            .unwrap();
        let layers = f.split(&s, &s.indexes[0]);
        assert!(layers.first.is_none());
        assert_eq!(layers.second, Some(f));
    }

    #[test]
    fn test_split_completeness() {
        // first AND second must be logically equivalent to the original.
        let s = lineitem_schema();
        let f = Filter::compile(
            "l_orderkey = 1001 AND l_quantity <= 7 AND l_shipmode = 'AIR'",
            &s,
        )
        .unwrap()
        .unwrap();
        let layers = f.split(&s, &s.indexes[0]);
        for r in [
            row(&s, 1001, 7, "AIR", 1.0),
            row(&s, 1001, 8, "AIR", 1.0),
            row(&s, 1001, 7, "RAIL", 1.0),
            row(&s, 1000, 7, "AIR", 1.0),
        ] {
            let original = f.matches(&r).unwrap();
            let first = layers.first.as_ref().map_or(Ok(true), |x| x.matches(&r)).unwrap();
            let second = layers.second.as_ref().map_or(Ok(true), |x| x.matches(&r)).unwrap();
            assert_eq!(original, first && second);
        }
    }

    #[test]
    fn test_best_index() {
        let mut s = lineitem_schema();
        s.add_index("by_shipmode", &["l_shipmode"]);

        // Fully indexable WHERE beats everything.
        let i = best_index("l_shipmode = 'AIR'", "", &s).unwrap();
        assert_eq!(i, Some(1));
        // ORDER BY prefix match.
        let i = best_index("", "l_orderkey, l_quantity", &s).unwrap();
        assert_eq!(i, Some(0));
        // Neither clause: primary.
        let i = best_index("", "", &s).unwrap();
        assert_eq!(i, Some(0));
        // Residual-only predicate scores nothing.
        let i = best_index("l_price > 3.5", "", &s).unwrap();
        assert_eq!(i, None);
    }
}
