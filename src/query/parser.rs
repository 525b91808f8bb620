use nom::{IResult, Parser};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, multispace0, multispace1, one_of};
use nom::combinator::{map, opt, verify};
use nom::number::complete::float;
use nom::sequence::{delimited, preceded};
use crate::core::error::{Error, ErrorKind, Result};

/// Operator written between two clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    None,
    And,
    Or,
}

/// Prefix on a clause: `+`, `-`/`!`/`NOT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    None,
    Required,
    Prohibited,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClause {
    pub conjunction: Conjunction,
    pub modifier: Modifier,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub field: Option<String>,
    pub body: Body,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Word(Word),
    Phrase(String),
    Range(RawRange),
    Group(Vec<ParsedClause>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub has_wildcard: bool,   // Unescaped `*` or `?` present
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRange {
    pub lower: Option<String>,   // None for `*`
    pub upper: Option<String>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
}

/// Parse Lucene classic syntax into a flat list of top level clauses.
/// Examples:
/// - "rust programming" -> two clauses, no conjunction
/// - "title:rust AND year:[2000 TO *]" -> field term, AND, field range
/// - "+\"exact phrase\"^2 -draft" -> required boosted phrase, prohibited term
/// - "|title|:5" -> length pseudo-field term (resolved by the compiler)
pub fn parse_query(input: &str) -> Result<Vec<ParsedClause>> {
    match clauses(input) {
        Ok((rest, parsed)) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                Ok(parsed)
            } else {
                Err(Error::new(
                    ErrorKind::Parse,
                    format!("unexpected input <{}> in query <{}>", rest, input),
                ))
            }
        }
        Err(e) => Err(Error::new(
            ErrorKind::Parse,
            format!("cannot parse query <{}>: {}", input, e),
        )),
    }
}

fn clauses(input: &str) -> IResult<&str, Vec<ParsedClause>> {
    let mut parsed = Vec::new();
    let mut rest = input;

    loop {
        let (r, _) = multispace0(rest)?;
        if r.is_empty() || r.starts_with(')') {
            return Ok((r, parsed));
        }

        let (r, conjunction) = opt(conjunction).parse(r)?;
        let (r, _) = multispace0(r)?;
        let (r, modifier) = opt(modifier).parse(r)?;
        let (r, _) = multispace0(r)?;
        if (conjunction.is_some() || modifier.is_some()) && (r.is_empty() || r.starts_with(')')) {
            return Err(nom::Err::Failure(nom::error::Error::new(r, nom::error::ErrorKind::Eof)));
        }
        let (r, node) = clause(r)?;

        parsed.push(ParsedClause {
            conjunction: conjunction.unwrap_or(Conjunction::None),
            modifier: modifier.unwrap_or(Modifier::None),
            node,
        });
        rest = r;
    }
}

fn clause(input: &str) -> IResult<&str, Node> {
    let (input, field) = opt(field_prefix).parse(input)?;
    let (input, body) = alt((
        map(group, Body::Group),
        map(quoted, Body::Phrase),
        map(range, Body::Range),
        map(word, Body::Word),
    )).parse(input)?;
    let (input, boost) = opt(boost).parse(input)?;

    Ok((input, Node { field, body, boost }))
}

fn group(input: &str) -> IResult<&str, Vec<ParsedClause>> {
    delimited(char('('), clauses, preceded(multispace0, char(')'))).parse(input)
}

fn boost(input: &str) -> IResult<&str, f32> {
    preceded(char('^'), verify(float, |b: &f32| b.is_finite() && *b > 0.0)).parse(input)
}

fn conjunction(input: &str) -> IResult<&str, Conjunction> {
    if let Ok((rest, _)) = keyword(input, "AND").or_else(|_| keyword(input, "&&")) {
        return Ok((rest, Conjunction::And));
    }
    if let Ok((rest, _)) = keyword(input, "OR").or_else(|_| keyword(input, "||")) {
        return Ok((rest, Conjunction::Or));
    }
    fail(input)
}

fn modifier(input: &str) -> IResult<&str, Modifier> {
    if let Ok((rest, _)) = keyword(input, "NOT") {
        return Ok((rest, Modifier::Prohibited));
    }
    let (rest, c) = one_of("+-!").parse(input)?;
    match c {
        '+' => Ok((rest, Modifier::Required)),
        _ => Ok((rest, Modifier::Prohibited)),
    }
}

/// Operator word, only when it stands alone.
fn keyword<'a>(input: &'a str, word: &str) -> IResult<&'a str, &'a str> {
    let (rest, matched) = tag(word).parse(input)?;
    match rest.chars().next() {
        None => Ok((rest, matched)),
        Some(c) if c.is_whitespace() || c == '(' || c == ')' || c == '"' => Ok((rest, matched)),
        _ => fail(input),
    }
}

fn field_prefix(input: &str) -> IResult<&str, String> {
    let (rest, field) = escaped_run(input, true)?;
    let (rest, _) = char(':').parse(rest)?;
    Ok((rest, field.text))
}

fn word(input: &str) -> IResult<&str, Word> {
    escaped_run(input, false)
}

fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"').parse(input)?;
    let mut text = String::new();
    let mut escaped = false;

    for (i, c) in rest.char_indices() {
        if escaped {
            text.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => return Ok((&rest[i + 1..], text)),
            _ => text.push(c),
        }
    }

    fail(input)
}

fn range(input: &str) -> IResult<&str, RawRange> {
    let (input, open) = one_of("[{").parse(input)?;
    let (input, _) = multispace0(input)?;
    let (input, lower) = range_bound(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = tag("TO").parse(input)?;
    let (input, _) = multispace1(input)?;
    let (input, upper) = range_bound(input)?;
    let (input, _) = multispace0(input)?;
    let (input, close) = one_of("]}").parse(input)?;

    Ok((input, RawRange {
        lower,
        upper,
        lower_inclusive: open == '[',
        upper_inclusive: close == ']',
    }))
}

fn range_bound(input: &str) -> IResult<&str, Option<String>> {
    if input.starts_with('"') {
        let (rest, text) = quoted(input)?;
        return Ok((rest, Some(text)));
    }

    let end = input
        .find(|c: char| c.is_whitespace() || c == ']' || c == '}')
        .unwrap_or(input.len());
    if end == 0 {
        return fail(input);
    }

    let raw = &input[..end];
    let bound = if raw == "*" { None } else { Some(raw.to_string()) };
    Ok((&input[end..], bound))
}

fn is_special(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | '^' | '[' | ']' | '{' | '}')
}

/// Run of term characters with backslash escapes. Stops at `:` only when
/// reading a field name, so values like ISO instants keep their colons.
fn escaped_run(input: &str, stop_at_colon: bool) -> IResult<&str, Word> {
    let mut text = String::new();
    let mut has_wildcard = false;
    let mut escaped = false;
    let mut end = input.len();

    for (i, c) in input.char_indices() {
        if escaped {
            text.push(c);
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if is_special(c) || (stop_at_colon && c == ':') {
            end = i;
            break;
        }
        if c == '*' || c == '?' {
            has_wildcard = true;
        }
        text.push(c);
    }

    if escaped {
        text.push('\\');
    }
    if end == 0 || text.is_empty() {
        return fail(input);
    }

    Ok((&input[end..], Word { text, has_wildcard }))
}

fn fail<T>(input: &str) -> IResult<&str, T> {
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_node(node: &Node) -> &str {
        match &node.body {
            Body::Word(w) => &w.text,
            other => panic!("expected word, got {:?}", other),
        }
    }

    #[test]
    fn bare_terms() {
        let parsed = parse_query("rust programming").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(word_node(&parsed[0].node), "rust");
        assert_eq!(parsed[1].conjunction, Conjunction::None);
        assert_eq!(parsed[1].node.field, None);
    }

    #[test]
    fn field_terms_and_operators() {
        let parsed = parse_query("title:rust AND NOT author:smith").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].node.field.as_deref(), Some("title"));
        assert_eq!(parsed[1].conjunction, Conjunction::And);
        assert_eq!(parsed[1].modifier, Modifier::Prohibited);
        assert_eq!(word_node(&parsed[1].node), "smith");
    }

    #[test]
    fn length_field_names_keep_pipes() {
        let parsed = parse_query("|title|:5 |||authors|||:[2 TO *]").unwrap();
        assert_eq!(parsed[0].node.field.as_deref(), Some("|title|"));
        assert_eq!(parsed[1].node.field.as_deref(), Some("|||authors|||"));
        match &parsed[1].node.body {
            Body::Range(r) => {
                assert_eq!(r.lower.as_deref(), Some("2"));
                assert_eq!(r.upper, None);
            }
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn exclusive_and_mixed_ranges() {
        let parsed = parse_query("an:{10 TO 20] ").unwrap();
        match &parsed[0].node.body {
            Body::Range(r) => {
                assert!(!r.lower_inclusive);
                assert!(r.upper_inclusive);
            }
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn phrases_groups_and_boosts() {
        let parsed = parse_query("+\"exact phrase\"^2 -(draft OR wip)").unwrap();
        assert_eq!(parsed[0].modifier, Modifier::Required);
        assert_eq!(parsed[0].node.boost, Some(2.0));
        assert_eq!(parsed[0].node.body, Body::Phrase("exact phrase".to_string()));
        match &parsed[1].node.body {
            Body::Group(inner) => {
                assert_eq!(inner.len(), 2);
                assert_eq!(inner[1].conjunction, Conjunction::Or);
            }
            other => panic!("expected group, got {:?}", other),
        }
        assert_eq!(parsed[1].modifier, Modifier::Prohibited);
    }

    #[test]
    fn values_keep_colons_and_negative_signs() {
        let parsed = parse_query("published:2020-01-01T10:00:00Z delta:-5").unwrap();
        assert_eq!(word_node(&parsed[0].node), "2020-01-01T10:00:00Z");
        assert_eq!(word_node(&parsed[1].node), "-5");
    }

    #[test]
    fn wildcards_are_flagged_unless_escaped() {
        let parsed = parse_query("country:* *:* name:ab\\*").unwrap();
        match &parsed[0].node.body {
            Body::Word(w) => assert!(w.has_wildcard),
            other => panic!("expected word, got {:?}", other),
        }
        assert_eq!(parsed[1].node.field.as_deref(), Some("*"));
        match &parsed[2].node.body {
            Body::Word(w) => {
                assert!(!w.has_wildcard);
                assert_eq!(w.text, "ab*");
            }
            other => panic!("expected word, got {:?}", other),
        }
    }

    #[test]
    fn unbalanced_input_is_a_parse_error() {
        assert!(parse_query("(rust").is_err());
        assert!(parse_query("\"open phrase").is_err());
        assert!(parse_query("rust)").is_err());
    }

    #[test]
    fn dangling_operators_are_parse_errors() {
        for text in ["rust AND", "rust OR ", "rust &&", "(rust ||)", "rust NOT", "rust -", "AND"] {
            let err = parse_query(text).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Parse, "{}", text);
        }
        assert_eq!(parse_query("rust AND go").unwrap().len(), 2);
        assert_eq!(word_node(&parse_query("rust and").unwrap()[1].node), "and");
    }

    #[test]
    fn boosts_must_be_positive() {
        assert_eq!(parse_query("rust^1.5").unwrap()[0].node.boost, Some(1.5));
        for text in ["rust^-1", "rust^0", "rust^NaN", "rust^inf"] {
            assert!(parse_query(text).is_err(), "{}", text);
        }
    }
}
