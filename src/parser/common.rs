//! Shared lexical helpers for statement parsing.
//!
//! Clause bodies (WHERE, ORDER BY, ...) are kept as raw strings and split at
//! top-level keyword boundaries: quotes and parentheses protect their
//! contents, so `WHERE name = 'x FROM y'` splits correctly.

use nom::{
    bytes::complete::{tag_no_case, take_while1},
    character::complete::multispace0,
    error::ParseError,
    sequence::delimited,
    IResult,
};

/// Wrap a parser so it eats surrounding whitespace.
pub fn ws<'a, O, E: ParseError<&'a str>, F>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

pub fn identifier(input: &str) -> IResult<&str, String> {
    let (rest, id) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    Ok((rest, id.to_string()))
}

/// A table path token: identifier characters plus `. / \ -`.
pub fn path_token(input: &str) -> IResult<&str, String> {
    let (rest, p) =
        take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '/' | '\\' | '-'))(
            input,
        )?;
    Ok((rest, p.to_string()))
}

pub fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| tag_no_case(kw)(input)
}

/// Find a top-level occurrence of `kw` (case-insensitive, word-bounded,
/// outside quotes and parentheses). Returns the byte offset.
pub fn find_top_level(input: &str, kw: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let kw_bytes = kw.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {
                if depth == 0 && i + kw_bytes.len() <= bytes.len() {
                    let candidate = &bytes[i..i + kw_bytes.len()];
                    if candidate.eq_ignore_ascii_case(kw_bytes)
                        && boundary_before(bytes, i)
                        && boundary_after(bytes, i + kw_bytes.len())
                    {
                        return Some(i);
                    }
                }
            }
        }
        i += 1;
    }
    None
}

fn boundary_before(bytes: &[u8], i: usize) -> bool {
    i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_')
}

fn boundary_after(bytes: &[u8], i: usize) -> bool {
    i >= bytes.len() || !(bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
}

/// Split a list on top-level commas, trimming each element.
pub fn split_top_level_commas(input: &str) -> Vec<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
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
            b')' => depth -= 1,
            b',' if depth == 0 => {
                let piece = input[start..i].trim();
                if !piece.is_empty() {
                    out.push(piece.to_string());
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let piece = input[start..].trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
    out
}

/// Parse an ORDER BY clause body: `col [ASC|DESC], ...` → `(column, desc)`.
pub fn parse_order_by(orderby: &str) -> Vec<(String, bool)> {
    split_top_level_commas(orderby)
        .into_iter()
        .filter_map(|part| {
            let mut it = part.split_whitespace();
            let col = it.next()?.to_string();
            let desc = it
                .next()
                .is_some_and(|d| d.eq_ignore_ascii_case("DESC"));
            Some((col, desc))
        })
        .collect()
}

/// Parse a GROUP BY clause body into column names.
pub fn parse_group_by(groupby: &str) -> Vec<String> {
    split_top_level_commas(groupby)
}

/// Extract a trailing alias from a SELECT expression:
/// `COUNT(*) AS total`, `COUNT(*) total`, `qty q`.
pub fn extract_alias(expr: &str) -> Option<String> {
    let expr = expr.trim();
    let body_end = expr.rfind(')').map_or_else(
        || expr.find(char::is_whitespace).unwrap_or(expr.len()),
        |i| i + 1,
    );
    let tail = expr[body_end..].trim();
    if tail.is_empty() {
        return None;
    }
    let tail = if tail.len() > 3 && tail.is_char_boundary(3) && tail[..3].eq_ignore_ascii_case("AS ")
    {
        tail[3..].trim()
    } else {
        tail
    };
    let is_ident = !tail.is_empty()
        && tail
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_');
    if is_ident {
        Some(tail.to_string())
    } else {
        None
    }
}

/// Strip the expression body of a trailing alias (inverse of `extract_alias`).
pub fn strip_alias(expr: &str) -> &str {
    let expr = expr.trim();
    if extract_alias(expr).is_none() {
        return expr;
    }
    let body_end = expr.rfind(')').map_or_else(
        || expr.find(char::is_whitespace).unwrap_or(expr.len()),
        |i| i + 1,
    );
    expr[..body_end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_top_level_respects_quotes() {
        let s = "name = 'x WHERE y' AND qty > 1";
        assert_eq!(find_top_level(s, "WHERE"), None);
        assert!(find_top_level(s, "AND").is_some());
    }

    #[test]
    fn test_find_top_level_respects_parens() {
        let s = "COUNT(x) FROM t";
        assert_eq!(find_top_level("(a FROM b)", "FROM"), None);
        assert!(find_top_level(s, "FROM").is_some());
    }

    #[test]
    fn test_word_boundary() {
        assert_eq!(find_top_level("informal = 1", "IN"), None);
        assert_eq!(find_top_level("fromage = 1", "FROM"), None);
    }

    #[test]
    fn test_split_commas() {
        assert_eq!(
            split_top_level_commas("a, COUNT(b, c), 'x,y'"),
            vec!["a", "COUNT(b, c)", "'x,y'"]
        );
    }

    #[test]
    fn test_order_by() {
        assert_eq!(
            parse_order_by("a DESC, b, c ASC"),
            vec![("a".into(), true), ("b".into(), false), ("c".into(), false)]
        );
    }

    #[test]
    fn test_alias() {
        assert_eq!(extract_alias("COUNT(*) AS total"), Some("total".into()));
        assert_eq!(extract_alias("COUNT(*) v"), Some("v".into()));
        assert_eq!(extract_alias("COUNT(*)"), None);
        assert_eq!(extract_alias("qty"), None);
        assert_eq!(strip_alias("SUM(qty) s"), "SUM(qty)");
    }
}
