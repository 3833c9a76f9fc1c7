//! Per-statement parsers. Heads are matched with nom; clause bodies are
//! sliced at top-level keyword boundaries and kept as strings.

use nom::character::complete::multispace0;

use crate::core::EngineError;

use super::common::{find_top_level, keyword, path_token, split_top_level_commas, ws};
use super::query::{Query, StatementKind};

fn parse_err(e: nom::Err<nom::error::Error<&str>>) -> EngineError {
    EngineError::Parse(format!("{e:?}"))
}

fn table_path(input: &str) -> Result<(String, &str), EngineError> {
    let (rest, _) = multispace0::<_, nom::error::Error<&str>>(input).map_err(parse_err)?;
    let (rest, path) = path_token(rest).map_err(|_| {
        EngineError::Parse(format!("expected table path at '{}'", head_of(input)))
    })?;
    Ok((path, rest))
}

fn head_of(s: &str) -> &str {
    let end = s.char_indices().nth(24).map_or(s.len(), |(i, _)| i);
    s[..end].trim()
}

/// Take a balanced `( ... )` group, returning the inner text.
fn take_parenthesized(input: &str) -> Result<(&str, &str), EngineError> {
    let input = input.trim_start();
    let Some(body) = input.strip_prefix('(') else {
        return Err(EngineError::Parse(format!(
            "expected '(' at '{}'",
            head_of(input)
        )));
    };
    let bytes = body.as_bytes();
    let mut depth = 1i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[..i], &body[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(EngineError::MissingClosingParenthesis)
}

/// Clause keywords recognized after the FROM target, in no particular
/// order of appearance.
const SELECT_CLAUSES: [&str; 7] = [
    "USE INDEX",
    "WHERE",
    "GROUP BY",
    "HAVING",
    "ORDER BY",
    "LIMIT",
    "INTO",
];

/// Split `input` into (head, [(clause keyword, body), ...]).
fn split_clauses<'a>(input: &'a str, clauses: &[&'static str]) -> (&'a str, Vec<(&'static str, &'a str)>) {
    let mut marks: Vec<(usize, &'static str)> = clauses
        .iter()
        .filter_map(|kw| find_top_level(input, kw).map(|pos| (pos, *kw)))
        .collect();
    marks.sort_by_key(|(pos, _)| *pos);

    let head_end = marks.first().map_or(input.len(), |(pos, _)| *pos);
    let head = input[..head_end].trim();

    let mut out = Vec::with_capacity(marks.len());
    for (i, (pos, kw)) in marks.iter().enumerate() {
        let body_start = pos + kw.len();
        let body_end = marks.get(i + 1).map_or(input.len(), |(next, _)| *next);
        out.push((*kw, input[body_start..body_end].trim()));
    }
    (head, out)
}

fn apply_clause(q: &mut Query, kw: &str, body: &str) -> Result<(), EngineError> {
    match kw {
        "USE INDEX" => {
            let (inner, _) = take_parenthesized(body)?;
            q.index = Some(inner.trim().to_string());
        }
        "WHERE" => q.where_clause = Some(body.to_string()),
        "GROUP BY" => q.group_by = Some(body.to_string()),
        "HAVING" => q.having = Some(body.to_string()),
        "ORDER BY" => q.order_by = Some(body.to_string()),
        "LIMIT" => q.limit = Some(body.to_string()),
        "INTO" => q.into = Some(body.to_string()),
        _ => return Err(EngineError::Parse(format!("unhandled clause {kw}"))),
    }
    Ok(())
}

pub fn select(rest: &str) -> Result<Query, EngineError> {
    let mut q = Query {
        kind: Some(StatementKind::Select),
        ..Query::default()
    };

    let mut rest = rest.trim_start();
    if rest.len() >= 8
        && rest.is_char_boundary(8)
        && rest[..8].eq_ignore_ascii_case("DISTINCT")
        && !rest[8..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        q.distinct = true;
        rest = rest[8..].trim_start();
    }

    let from_pos = find_top_level(rest, "FROM")
        .ok_or_else(|| EngineError::Parse("SELECT requires a FROM clause".into()))?;
    q.columns = split_top_level_commas(&rest[..from_pos]);
    if q.columns.is_empty() {
        return Err(EngineError::Parse("SELECT requires a column list".into()));
    }

    let after_from = &rest[from_pos + "FROM".len()..];
    let (table, tail) = table_path(after_from)?;
    q.table = table;

    let (head, clauses) = split_clauses(tail, &SELECT_CLAUSES);
    if !head.is_empty() {
        return Err(EngineError::Parse(format!(
            "unexpected input after table: '{head}'"
        )));
    }
    for (kw, body) in clauses {
        apply_clause(&mut q, kw, body)?;
    }
    Ok(q)
}

pub fn insert(rest: &str, replace: bool) -> Result<Query, EngineError> {
    let mut q = Query {
        kind: Some(if replace {
            StatementKind::Replace
        } else {
            StatementKind::Insert
        }),
        ..Query::default()
    };

    let (rest, _) = ws::<_, nom::error::Error<&str>, _>(keyword("INTO"))(rest)
        .map_err(|_| EngineError::Parse("expected INTO after INSERT/REPLACE".into()))?;
    let (table, rest) = table_path(rest)?;
    q.table = table;

    let mut rest = rest.trim_start();
    if rest.starts_with('(') {
        let (inner, after) = take_parenthesized(rest)?;
        q.columns = split_top_level_commas(inner);
        rest = after.trim_start();
    }

    if let Ok((after, _)) = ws::<_, nom::error::Error<&str>, _>(keyword("VALUES"))(rest) {
        let (inner, after_values) = take_parenthesized(after)?;
        q.values = split_top_level_commas(inner);
        if !after_values.trim().is_empty() {
            return Err(EngineError::Parse(format!(
                "unexpected input after VALUES: '{}'",
                head_of(after_values)
            )));
        }
        return Ok(q);
    }

    if let Ok((after, _)) = ws::<_, nom::error::Error<&str>, _>(keyword("FROM"))(rest) {
        let (source, tail) = table_path(after)?;
        q.from = Some(source);
        let (head, clauses) = split_clauses(tail, &["WHERE", "ORDER BY", "LIMIT"]);
        if !head.is_empty() {
            return Err(EngineError::Parse(format!(
                "unexpected input after source: '{head}'"
            )));
        }
        for (kw, body) in clauses {
            apply_clause(&mut q, kw, body)?;
        }
        return Ok(q);
    }

    Err(EngineError::Parse(
        "INSERT requires VALUES (...) or FROM <source>".into(),
    ))
}

pub fn update(rest: &str) -> Result<Query, EngineError> {
    let mut q = Query {
        kind: Some(StatementKind::Update),
        ..Query::default()
    };
    let (table, rest) = table_path(rest)?;
    q.table = table;

    let (rest, _) = ws::<_, nom::error::Error<&str>, _>(keyword("SET"))(rest)
        .map_err(|_| EngineError::Parse("expected SET after UPDATE <table>".into()))?;

    let (assignments_text, clauses) = split_clauses(rest, &["WHERE"]);
    for assignment in split_top_level_commas(assignments_text) {
        let Some((col, val)) = assignment.split_once('=') else {
            return Err(EngineError::Parse(format!(
                "malformed SET assignment: '{assignment}'"
            )));
        };
        q.columns.push(col.trim().to_string());
        q.values.push(val.trim().to_string());
    }
    for (kw, body) in clauses {
        apply_clause(&mut q, kw, body)?;
    }
    Ok(q)
}

pub fn delete(rest: &str) -> Result<Query, EngineError> {
    let mut q = Query {
        kind: Some(StatementKind::Delete),
        ..Query::default()
    };
    let (rest, _) = ws::<_, nom::error::Error<&str>, _>(keyword("FROM"))(rest)
        .map_err(|_| EngineError::Parse("expected FROM after DELETE".into()))?;
    let (table, tail) = table_path(rest)?;
    q.table = table;
    let (head, clauses) = split_clauses(tail, &["WHERE"]);
    if !head.is_empty() {
        return Err(EngineError::Parse(format!(
            "unexpected input after table: '{head}'"
        )));
    }
    for (kw, body) in clauses {
        apply_clause(&mut q, kw, body)?;
    }
    Ok(q)
}

pub fn create(rest: &str) -> Result<Query, EngineError> {
    let mut q = Query {
        kind: Some(StatementKind::Create),
        ..Query::default()
    };
    let (rest, _) = ws::<_, nom::error::Error<&str>, _>(keyword("TABLE"))(rest)
        .map_err(|_| EngineError::Parse("expected TABLE after CREATE".into()))?;
    let (table, rest) = table_path(rest)?;
    q.table = table;
    let (inner, tail) = take_parenthesized(rest)?;
    q.definition = split_top_level_commas(inner);
    if q.definition.is_empty() {
        return Err(EngineError::Parse(
            "CREATE TABLE requires at least one column definition".into(),
        ));
    }
    if !tail.trim().is_empty() {
        return Err(EngineError::Parse(format!(
            "unexpected input after definition: '{}'",
            head_of(tail)
        )));
    }
    Ok(q)
}

pub fn drop(rest: &str) -> Result<Query, EngineError> {
    let (rest, _) = ws::<_, nom::error::Error<&str>, _>(keyword("TABLE"))(rest)
        .map_err(|_| EngineError::Parse("expected TABLE after DROP".into()))?;
    let (table, _) = table_path(rest)?;
    Ok(Query {
        kind: Some(StatementKind::Drop),
        table,
        ..Query::default()
    })
}

pub fn alter(rest: &str) -> Result<Query, EngineError> {
    let (rest, _) = ws::<_, nom::error::Error<&str>, _>(keyword("TABLE"))(rest)
        .map_err(|_| EngineError::Parse("expected TABLE after ALTER".into()))?;
    let (table, tail) = table_path(rest)?;
    Ok(Query {
        kind: Some(StatementKind::Alter),
        table,
        option: Some(tail.trim().to_string()),
        ..Query::default()
    })
}

pub fn describe(rest: &str) -> Result<Query, EngineError> {
    let (table, _) = table_path(rest)?;
    Ok(Query {
        kind: Some(StatementKind::Describe),
        table,
        ..Query::default()
    })
}

pub fn meta(rest: &str) -> Result<Query, EngineError> {
    let (table, _) = table_path(rest)?;
    Ok(Query {
        kind: Some(StatementKind::Meta),
        table,
        ..Query::default()
    })
}

pub fn show_tables(rest: &str) -> Result<Query, EngineError> {
    let mut q = Query {
        kind: Some(StatementKind::ShowTables),
        ..Query::default()
    };
    for token in rest.split_whitespace() {
        if token.eq_ignore_ascii_case("-R") {
            q.option = Some("-R".to_string());
        } else {
            // Directory to scan; the dispatcher defaults to ".".
            q.where_clause = Some(token.to_string());
        }
    }
    Ok(q)
}

pub fn begin(rest: &str) -> Result<Query, EngineError> {
    let rest = match ws::<_, nom::error::Error<&str>, _>(keyword("TRANSACTION"))(rest) {
        Ok((after, _)) => after,
        Err(_) => rest,
    };
    let table = match table_path(rest) {
        Ok((t, _)) => t,
        Err(_) => String::new(),
    };
    Ok(Query {
        kind: Some(StatementKind::Begin),
        table,
        ..Query::default()
    })
}
