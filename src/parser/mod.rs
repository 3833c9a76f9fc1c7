//! SQL statement parsing.
//!
//! This is deliberately not a full SQL front end: a statement parses into a
//! [`Query`] carrying the statement kind plus clause strings. The predicate
//! compiler owns the WHERE grammar; ORDER BY/GROUP BY/HAVING/LIMIT bodies
//! stay textual until the pipeline stage that consumes them.

mod common;
mod query;
mod statements;

pub use common::{extract_alias, parse_group_by, parse_order_by, split_top_level_commas, strip_alias};
pub use query::{Query, StatementKind};

use crate::core::EngineError;

pub fn parse_statement(sql: &str) -> Result<Query, EngineError> {
    let input = sql.trim().trim_end_matches(';').trim();
    if input.is_empty() {
        return Err(EngineError::Parse("empty SQL statement".into()));
    }

    let word_end = input
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(input.len());
    let head = &input[..word_end];
    let rest = &input[word_end..];

    match head.to_ascii_uppercase().as_str() {
        "SELECT" => statements::select(rest),
        "INSERT" => statements::insert(rest, false),
        "REPLACE" => statements::insert(rest, true),
        "UPDATE" => statements::update(rest),
        "DELETE" => statements::delete(rest),
        "CREATE" => statements::create(rest),
        "DROP" => statements::drop(rest),
        "ALTER" => statements::alter(rest),
        "DESCRIBE" | "DESC" => statements::describe(rest),
        "META" => statements::meta(rest),
        "SHOW" => {
            let rest = rest.trim_start();
            if rest.len() >= 6 && rest.is_char_boundary(6) && rest[..6].eq_ignore_ascii_case("TABLES")
            {
                statements::show_tables(&rest[6..])
            } else {
                Err(EngineError::Parse(format!(
                    "unsupported SHOW statement: SHOW {rest}"
                )))
            }
        }
        "BEGIN" => statements::begin(rest),
        "COMMIT" => Ok(Query {
            kind: Some(StatementKind::Commit),
            ..Query::default()
        }),
        "ROLLBACK" => Ok(Query {
            kind: Some(StatementKind::Rollback),
            ..Query::default()
        }),
        other => Err(EngineError::Parse(format!(
            "unsupported SQL statement: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_clauses() {
        let q = parse_statement(
            "SELECT id, name FROM data/t.flintdb USE INDEX(primary) WHERE id > 3 \
             GROUP BY name HAVING COUNT(id) > 1 ORDER BY name DESC LIMIT 5, 10",
        )
        .unwrap();
        assert_eq!(q.kind(), StatementKind::Select);
        assert_eq!(q.table, "data/t.flintdb");
        assert_eq!(q.columns, vec!["id", "name"]);
        assert_eq!(q.index.as_deref(), Some("primary"));
        assert_eq!(q.where_clause.as_deref(), Some("id > 3"));
        assert_eq!(q.group_by.as_deref(), Some("name"));
        assert_eq!(q.having.as_deref(), Some("COUNT(id) > 1"));
        assert_eq!(q.order_by.as_deref(), Some("name DESC"));
        assert_eq!(q.limit.as_deref(), Some("5, 10"));
    }

    #[test]
    fn test_parse_select_distinct_star() {
        let q = parse_statement("SELECT DISTINCT * FROM t.csv").unwrap();
        assert!(q.distinct);
        assert!(q.is_select_star());
        assert_eq!(q.table, "t.csv");
    }

    #[test]
    fn test_where_with_quoted_keyword() {
        let q = parse_statement("SELECT * FROM t.flintdb WHERE name = 'x FROM y'").unwrap();
        assert_eq!(q.where_clause.as_deref(), Some("name = 'x FROM y'"));
    }

    #[test]
    fn test_parse_insert_values() {
        let q = parse_statement("INSERT INTO t.flintdb (id, name) VALUES (1, 'Alice')").unwrap();
        assert_eq!(q.kind(), StatementKind::Insert);
        assert_eq!(q.columns, vec!["id", "name"]);
        assert_eq!(q.values, vec!["1", "'Alice'"]);
    }

    #[test]
    fn test_parse_replace_from() {
        let q = parse_statement("REPLACE INTO t.flintdb FROM src.tsv WHERE id > 2 LIMIT 10")
            .unwrap();
        assert_eq!(q.kind(), StatementKind::Replace);
        assert_eq!(q.from.as_deref(), Some("src.tsv"));
        assert_eq!(q.where_clause.as_deref(), Some("id > 2"));
        assert_eq!(q.limit.as_deref(), Some("10"));
    }

    #[test]
    fn test_parse_update() {
        let q = parse_statement("UPDATE t.flintdb SET qty = 99, name = 'x, y' WHERE id = 2")
            .unwrap();
        assert_eq!(q.columns, vec!["qty", "name"]);
        assert_eq!(q.values, vec!["99", "'x, y'"]);
        assert_eq!(q.where_clause.as_deref(), Some("id = 2"));
    }

    #[test]
    fn test_parse_delete_requires_from() {
        assert!(parse_statement("DELETE t.flintdb").is_err());
        let q = parse_statement("DELETE FROM t.flintdb WHERE id = 1").unwrap();
        assert_eq!(q.kind(), StatementKind::Delete);
    }

    #[test]
    fn test_parse_create() {
        let q = parse_statement(
            "CREATE TABLE t.flintdb (id INT, name VARCHAR(64), PRIMARY KEY (id))",
        )
        .unwrap();
        assert_eq!(
            q.definition,
            vec!["id INT", "name VARCHAR(64)", "PRIMARY KEY (id)"]
        );
    }

    #[test]
    fn test_parse_show_tables() {
        let q = parse_statement("SHOW TABLES data -R").unwrap();
        assert_eq!(q.kind(), StatementKind::ShowTables);
        assert_eq!(q.where_clause.as_deref(), Some("data"));
        assert_eq!(q.option.as_deref(), Some("-R"));
    }

    #[test]
    fn test_parse_transactions() {
        let q = parse_statement("BEGIN TRANSACTION t.flintdb").unwrap();
        assert_eq!(q.kind(), StatementKind::Begin);
        assert_eq!(q.table, "t.flintdb");
        assert_eq!(parse_statement("COMMIT").unwrap().kind(), StatementKind::Commit);
        assert_eq!(
            parse_statement("ROLLBACK").unwrap().kind(),
            StatementKind::Rollback
        );
    }

    #[test]
    fn test_unsupported_statement() {
        assert!(parse_statement("GRANT ALL ON x").is_err());
        assert!(parse_statement("").is_err());
    }
}
