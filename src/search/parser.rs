//! Query string parser using nom combinators.
//!
//! Parses the Lucene-style query syntax accepted by the search facade:
//! - Terms and fields: `alice`, `name:alice`, `name:"Alice Smith"`
//! - Boolean: `AND`/`&&`, `OR`/`||`, `NOT`/`!`, `+required`, `-excluded`
//! - Grouping: `(a OR b) AND c`, `title:(rust nom)`
//! - Ranges: `age:[18 TO 30]`, `age:{18 TO *]`, `age:>=18`
//! - Prefix/wildcard/fuzzy/boost: `al*`, `a?ice`, `alise~1`, `alice^2`
//!
//! Juxtaposed clauses are optional (OR). Keywords are case-sensitive and need
//! word boundaries. Leading wildcards are rejected.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{cut, map, map_res, not, opt, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};

use super::query_builder::{Occur, QueryBuilder, QueryNode};
use crate::error::{Result, SearchError};

/// Deepest parenthesis nesting the parser accepts.
const MAX_PARSE_NESTING: usize = 64;

/// Characters that end an unquoted term unless escaped.
const TERM_SPECIAL: &str = "()[]{}:\"^~";

const WILDCARDS: &[char] = &['*', '?'];

type Marked = (Option<Occur>, QueryNode);

/// Parse a query string into a [`QueryNode`] tree.
///
/// # Examples
/// ```
/// use search_sync::search::{parse_query, QueryNode};
///
/// let node = parse_query("name:alice").unwrap();
/// assert_eq!(node, QueryNode::term("name", "alice"));
/// assert!(parse_query("name:(alice").is_err());
/// ```
///
/// # Errors
/// Returns [`SearchError::InvalidQuery`] for empty or malformed input.
pub fn parse_query(input: &str) -> Result<QueryNode> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SearchError::InvalidQuery("empty query".into()));
    }
    if nesting(trimmed) > MAX_PARSE_NESTING {
        return Err(SearchError::InvalidQuery("too many nested groups".into()));
    }
    match or_query(trimmed, "") {
        Ok(("", node)) => Ok(node),
        Ok((remaining, _)) => Err(SearchError::InvalidQuery(format!(
            "Unexpected input after query: '{remaining}'"
        ))),
        Err(e) => Err(SearchError::InvalidQuery(format!("Parse error: {e}"))),
    }
}

fn nesting(input: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                max = max.max(depth);
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

fn or_query<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    let (input, first) = and_query(input, field)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, alt((keyword("OR"), tag("||"))), multispace0),
        cut(|i: &'a str| and_query(i, field)),
    ))(input)?;

    if rest.is_empty() {
        return Ok((input, first));
    }
    let builder = std::iter::once(first)
        .chain(rest)
        .fold(QueryBuilder::new(), QueryBuilder::node);
    Ok((input, builder.build_or()))
}

fn and_query<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    let (input, first) = sequence(input, field)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, alt((keyword("AND"), tag("&&"))), multispace0),
        cut(|i: &'a str| sequence(i, field)),
    ))(input)?;

    if rest.is_empty() {
        return Ok((input, build_sequence(first)));
    }
    let mut builder = QueryBuilder::new();
    for part in std::iter::once(first).chain(rest) {
        builder = match <[Marked; 1]>::try_from(part) {
            Ok([(occur, node)]) => builder.clause(occur.unwrap_or(Occur::Must), node),
            Err(part) => builder.clause(Occur::Must, build_sequence(part)),
        };
    }
    Ok((input, builder.build_and()))
}

/// Whitespace-separated clauses.
fn sequence<'a>(input: &'a str, field: &str) -> IResult<&'a str, Vec<Marked>> {
    let (input, first) = clause(input, field)?;
    let (input, rest) = many0(preceded(multispace1, |i: &'a str| clause(i, field)))(input)?;
    let mut parts = vec![first];
    parts.extend(rest);
    Ok((input, parts))
}

fn build_sequence(parts: Vec<Marked>) -> QueryNode {
    parts
        .into_iter()
        .fold(QueryBuilder::new(), |builder, (occur, node)| match occur {
            Some(occur) => builder.clause(occur, node),
            None => builder.node(node),
        })
        .build_or()
}

fn clause<'a>(input: &'a str, field: &str) -> IResult<&'a str, Marked> {
    let (input, _) = not(bool_operator)(input)?;
    let (input, occur) = opt(alt((
        value(Occur::Must, char('+')),
        value(Occur::MustNot, char('-')),
        value(Occur::MustNot, char('!')),
        value(Occur::MustNot, terminated(keyword("NOT"), multispace1)),
    )))(input)?;
    let (input, node) = primary(input, field)?;
    let (input, boost) = opt(preceded(char('^'), cut(number)))(input)?;

    let node = match boost {
        Some(boost) => QueryNode::Boost { query: Box::new(node), boost },
        None => node,
    };
    Ok((input, (occur, node)))
}

fn bool_operator(input: &str) -> IResult<&str, &str> {
    alt((keyword("AND"), keyword("OR"), tag("&&"), tag("||")))(input)
}

fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (remaining, matched) = tag(kw)(input)?;
        if remaining
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }
        Ok((remaining, matched))
    }
}

fn primary<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    alt((
        |i: &'a str| group(i, field),
        fielded,
        |i: &'a str| field_value(i, field),
    ))(input)
}

fn group<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    delimited(
        char('('),
        delimited(multispace0, |i: &'a str| or_query(i, field), multispace0),
        cut(char(')')),
    )(input)
}

fn fielded<'a>(input: &'a str) -> IResult<&'a str, QueryNode> {
    let (input, name) = terminated(field_name, char(':'))(input)?;
    let (input, _) = multispace0(input)?;
    cut(alt((
        |i: &'a str| group(i, name),
        |i: &'a str| field_value(i, name),
    )))(input)
}

fn field_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '*' | '@' | '$'))(input)
}

fn field_value<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    alt((
        |i: &'a str| range(i, field),
        |i: &'a str| comparison(i, field),
        |i: &'a str| phrase(i, field),
        |i: &'a str| term(i, field),
    ))(input)
}

fn range<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    let (input, open) = alt((char('['), char('{')))(input)?;
    let (input, (_, lower, _, _, _, upper, _, close)) = cut(tuple((
        multispace0,
        range_bound,
        multispace1,
        tag("TO"),
        multispace1,
        range_bound,
        multispace0,
        alt((char(']'), char('}'))),
    )))(input)?;

    Ok((
        input,
        QueryNode::Range {
            field: field.to_string(),
            lower,
            upper,
            include_lower: open == '[',
            include_upper: close == ']',
        },
    ))
}

fn range_bound(input: &str) -> IResult<&str, Option<String>> {
    map(
        alt((
            quoted,
            map(take_while1(|c: char| !c.is_whitespace() && c != ']' && c != '}'), str::to_string),
        )),
        |bound| if bound == "*" { None } else { Some(bound) },
    )(input)
}

/// `field:>=18` style open ranges.
fn comparison<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    let (input, op) = alt((tag(">="), tag("<="), tag(">"), tag("<")))(input)?;
    let (input, bound) = cut(alt((quoted, term_text)))(input)?;
    let field = field.to_string();

    let node = match op {
        ">=" | ">" => QueryNode::Range {
            field,
            lower: Some(bound),
            upper: None,
            include_lower: op == ">=",
            include_upper: false,
        },
        _ => QueryNode::Range {
            field,
            lower: None,
            upper: Some(bound),
            include_lower: false,
            include_upper: op == "<=",
        },
    };
    Ok((input, node))
}

fn phrase<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    let (input, text) = quoted(input)?;
    // slop is accepted and ignored
    let (input, _) = opt(preceded(char('~'), number))(input)?;
    Ok((input, QueryNode::term(field, text)))
}

fn term<'a>(input: &'a str, field: &str) -> IResult<&'a str, QueryNode> {
    let start = input;
    let (input, text) = term_text(input)?;
    let (input, fuzzy) = opt(preceded(char('~'), opt(number)))(input)?;
    let field = field.to_string();

    if let Some(edits) = fuzzy {
        let max_edits = edits.filter(|e| e.fract() == 0.0).map(|e| e.min(2.0) as u8);
        return Ok((input, QueryNode::Fuzzy { field, value: text, max_edits }));
    }

    let node = if text == "*" {
        if field.is_empty() || field == "*" {
            QueryNode::MatchAll
        } else {
            QueryNode::Wildcard { field, value: text }
        }
    } else if text.starts_with(WILDCARDS) {
        return Err(nom::Err::Failure(Error::new(start, ErrorKind::Verify)));
    } else if let Some(prefix) = text.strip_suffix('*').filter(|p| !p.contains(WILDCARDS)) {
        QueryNode::Prefix { field, value: prefix.to_string() }
    } else if text.contains(WILDCARDS) {
        QueryNode::Wildcard { field, value: text }
    } else {
        QueryNode::Term { field, value: text }
    };
    Ok((input, node))
}

/// Unquoted term with backslash escapes.
fn term_text(input: &str) -> IResult<&str, String> {
    let mut out = String::new();
    let mut rest = input;
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => break,
            },
            Some(c) if !c.is_whitespace() && !TERM_SPECIAL.contains(c) => out.push(c),
            _ => break,
        }
        rest = chars.as_str();
    }
    if out.is_empty() {
        Err(nom::Err::Error(Error::new(input, ErrorKind::TakeWhile1)))
    } else {
        Ok((rest, out))
    }
}

fn quoted(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"')(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), out)),
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => return Err(nom::Err::Failure(Error::new(rest, ErrorKind::Char))),
            },
            Some(c) => out.push(c),
            None => return Err(nom::Err::Failure(Error::new(rest, ErrorKind::Char))),
        }
        rest = chars.as_str();
    }
}

fn number(input: &str) -> IResult<&str, f32> {
    map_res(take_while1(|c: char| c.is_ascii_digit() || c == '.'), str::parse::<f32>)(input)
}
