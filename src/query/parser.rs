use crate::core::error::{Error, Result};
use crate::core::value::Value;
use crate::query::ast::{BoolQuery, PrefixQuery, Query, RangeQuery, TermQuery, WildcardQuery};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    multi::many1,
    sequence::preceded,
    IResult,
};

fn parse_field_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

fn leaf_query(field: &str, value: &str) -> Query {
    if value.starts_with('[') && value.ends_with(']') {
        let inner = value.trim_start_matches('[').trim_end_matches(']');
        if let Some((lo, hi)) = inner.split_once(" TO ") {
            return Query::Range(RangeQuery {
                field: field.to_string(),
                gte: Some(parse_field_value(lo.trim())),
                lte: Some(parse_field_value(hi.trim())),
                gt: None,
                lt: None,
            });
        }
    }
    if let Some(prefix) = value.strip_suffix('*') {
        if !prefix.contains('*') && !prefix.contains('?') {
            return Query::Prefix(PrefixQuery { field: field.to_string(), prefix: prefix.to_string() });
        }
    }
    if value.contains('*') || value.contains('?') {
        return Query::Wildcard(WildcardQuery { field: field.to_string(), pattern: value.to_string() });
    }
    Query::Term(TermQuery { field: field.to_string(), value: value.to_string() })
}

/// Parse the simple `field:term`, `field:[a TO b]`, `field:prefix*` surface
/// syntax, with whitespace-separated terms joined by an implicit OR and
/// explicit `AND`/`OR`/`NOT` keywords.
pub fn parse_search_query(input: &str) -> Result<Query> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Query::MatchAll);
    }

    let tokens: Vec<&str> = input.split_whitespace().collect();
    if !tokens.iter().any(|t| matches!(*t, "AND" | "OR" | "NOT")) {
        if tokens.len() == 1 {
            return Ok(parse_single_token(tokens[0]));
        }
        let mut bool_query = BoolQuery::new();
        for t in tokens {
            bool_query = bool_query.with_should(parse_single_token(t));
        }
        return Ok(Query::Bool(bool_query));
    }

    let mut bool_query = BoolQuery::new();
    let mut negate_next = false;
    let mut mode_and = false;
    for token in tokens {
        match token {
            "AND" => mode_and = true,
            "OR" => mode_and = false,
            "NOT" => negate_next = true,
            _ => {
                let query = parse_single_token(token);
                if negate_next {
                    bool_query = bool_query.with_must_not(query);
                    negate_next = false;
                } else if mode_and {
                    bool_query = bool_query.with_must(query);
                } else {
                    bool_query = bool_query.with_should(query);
                }
            }
        }
    }
    Ok(Query::Bool(bool_query))
}

fn parse_single_token(token: &str) -> Query {
    match token.split_once(':') {
        Some((field, value)) => leaf_query(field, value),
        None => Query::Term(TermQuery { field: "_all".to_string(), value: token.to_string() }),
    }
}

fn field_ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn value_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != ' ' && c != '(' && c != ')')(input)
}

fn parse_pxql_leaf(input: &str) -> IResult<&str, Query> {
    let (input, field) = field_ident(input)?;
    let (input, _) = char(':')(input)?;
    let (input, value) = value_token(input)?;
    Ok((input, leaf_query(field, value)))
}

fn parse_pxql_and(input: &str) -> IResult<&str, Query> {
    let (input, _) = tag("(AND")(input)?;
    let (input, clauses) = many1(preceded(multispace1, parse_pxql_clause))(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    Ok((input, Query::Bool(BoolQuery { must: clauses, ..Default::default() })))
}

fn parse_pxql_or(input: &str) -> IResult<&str, Query> {
    let (input, _) = tag("(OR")(input)?;
    let (input, clauses) = many1(preceded(multispace1, parse_pxql_clause))(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    Ok((input, Query::Bool(BoolQuery { should: clauses, ..Default::default() })))
}

fn parse_pxql_not(input: &str) -> IResult<&str, Query> {
    let (input, _) = tag("(NOT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, clause) = parse_pxql_clause(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    Ok((input, Query::Bool(BoolQuery { must_not: vec![clause], ..Default::default() })))
}

fn parse_pxql_clause(input: &str) -> IResult<&str, Query> {
    alt((parse_pxql_and, parse_pxql_or, parse_pxql_not, parse_pxql_leaf))(input)
}

/// Parse the parenthesised PxQL grammar: `(AND a:1 b:2)`, `(OR a:1 (NOT b:2))`.
pub fn parse_grammar(input: &str) -> Result<Query> {
    let trimmed = input.trim();
    match parse_pxql_clause(trimmed) {
        Ok((rest, query)) if rest.trim().is_empty() => Ok(query),
        _ => Err(Error::InvalidQuery(format!("invalid PxQL query: {input}"))),
    }
}

/// Dispatch on the `/^\(.+\)$/`-style shape: parenthesised input goes through
/// the PxQL grammar, everything else through the simple grammar.
pub fn parse_query(input: &str) -> Result<Query> {
    let trimmed = input.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        parse_grammar(trimmed)
    } else {
        parse_search_query(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_matches_all() {
        assert_eq!(parse_search_query("").unwrap(), Query::MatchAll);
    }

    #[test]
    fn single_term_query() {
        let q = parse_search_query("status:open").unwrap();
        assert_eq!(q, Query::Term(TermQuery { field: "status".into(), value: "open".into() }));
    }

    #[test]
    fn range_query_parses_bounds() {
        let q = parse_search_query("price:[10 TO 100]").unwrap();
        match q {
            Query::Range(r) => {
                assert_eq!(r.field, "price");
                assert_eq!(r.gte, Some(Value::from(10.0)));
                assert_eq!(r.lte, Some(Value::from(100.0)));
            }
            _ => panic!("expected range query"),
        }
    }

    #[test]
    fn pxql_and_of_two_leaves() {
        let q = parse_grammar("(AND status:open priority:high)").unwrap();
        match q {
            Query::Bool(b) => assert_eq!(b.must.len(), 2),
            _ => panic!("expected bool query"),
        }
    }

    #[test]
    fn pxql_nested_not() {
        let q = parse_grammar("(OR status:open (NOT priority:low))").unwrap();
        match q {
            Query::Bool(b) => assert_eq!(b.should.len(), 2),
            _ => panic!("expected bool query"),
        }
    }

    #[test]
    fn dispatch_routes_parenthesised_input_to_pxql() {
        let q = parse_query("(AND a:1 b:2)").unwrap();
        assert!(matches!(q, Query::Bool(_)));
    }
}
