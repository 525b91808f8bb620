use regex::Regex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::engine::indexer::{IndexedDocument, NumericValue};
use crate::query::ast::{Occur, Query, RangeBounds, TermRangeQuery};

/// Query tree prepared for evaluation: wildcard patterns compiled once per
/// search instead of once per document.
#[derive(Debug, Clone)]
pub enum Matcher {
    Term { field: String, value: String },
    Phrase { field: String, terms: Vec<String> },
    Range { field: String, bounds: RangeBounds },
    TermRange(TermRangeQuery),
    Boolean { clauses: Vec<(Matcher, Occur)>, minimum_should_match: u32 },
    DisjunctionMax { clauses: Vec<Matcher>, tie_breaker: f32 },
    Wildcard { field: String, pattern: Regex },
    FieldPresence { field: String },
    Boost { matcher: Box<Matcher>, boost: f32 },
    MatchAll,
    MatchNone,
}

impl Matcher {
    pub fn compile(query: &Query) -> Result<Self> {
        Ok(match query {
            Query::Term(t) => Matcher::Term { field: t.field.clone(), value: t.value.clone() },
            Query::Phrase(p) => Matcher::Phrase { field: p.field.clone(), terms: p.terms.clone() },
            Query::Range(r) => Matcher::Range { field: r.field.clone(), bounds: r.bounds },
            Query::TermRange(r) => Matcher::TermRange(r.clone()),
            Query::Boolean(b) => Matcher::Boolean {
                clauses: b
                    .clauses
                    .iter()
                    .map(|c| Ok((Matcher::compile(&c.query)?, c.occur)))
                    .collect::<Result<Vec<_>>>()?,
                minimum_should_match: b.minimum_should_match,
            },
            Query::DisjunctionMax(d) => Matcher::DisjunctionMax {
                clauses: d.clauses.iter().map(Matcher::compile).collect::<Result<Vec<_>>>()?,
                tie_breaker: d.tie_breaker,
            },
            Query::Wildcard(w) => Matcher::Wildcard {
                field: w.field.clone(),
                pattern: wildcard_regex(&w.pattern)?,
            },
            Query::FieldPresence(f) => Matcher::FieldPresence { field: f.field.clone() },
            Query::Boost(b) => Matcher::Boost {
                matcher: Box::new(Matcher::compile(&b.query)?),
                boost: b.boost,
            },
            Query::MatchAll => Matcher::MatchAll,
            Query::MatchNone(_) => Matcher::MatchNone,
        })
    }

    /// Score of `doc`, or `None` when it does not match.
    pub fn score(&self, doc: &IndexedDocument) -> Option<f32> {
        match self {
            Matcher::MatchAll => Some(1.0),
            Matcher::MatchNone => None,
            Matcher::Term { field, value } => {
                let freq = term_frequency(doc, field, value);
                (freq > 0).then(|| (freq as f32).sqrt())
            }
            Matcher::Phrase { field, terms } => {
                let freq = phrase_frequency(doc, field, terms);
                (freq > 0).then(|| (freq as f32).sqrt() * terms.len() as f32)
            }
            Matcher::Range { field, bounds } => {
                let values = doc.numbers.get(field)?;
                values.iter().any(|v| in_bounds(*v, bounds)).then_some(1.0)
            }
            Matcher::TermRange(range) => {
                let streams = doc.tokens.get(&range.field)?;
                streams.iter().flatten().any(|t| in_term_range(t, range)).then_some(1.0)
            }
            Matcher::Wildcard { field, pattern } => {
                let streams = doc.tokens.get(field)?;
                streams.iter().flatten().any(|t| pattern.is_match(t)).then_some(1.0)
            }
            Matcher::FieldPresence { field } => doc.has_field(field).then_some(1.0),
            Matcher::Boost { matcher, boost } => matcher.score(doc).map(|s| s * boost),
            Matcher::DisjunctionMax { clauses, tie_breaker } => {
                let scores: Vec<f32> = clauses.iter().filter_map(|c| c.score(doc)).collect();
                let best = scores.iter().copied().fold(None, |acc: Option<f32>, s| {
                    Some(acc.map_or(s, |a| a.max(s)))
                })?;
                let total: f32 = scores.iter().sum();
                Some(best + tie_breaker * (total - best))
            }
            Matcher::Boolean { clauses, minimum_should_match } => {
                score_boolean(clauses, *minimum_should_match, doc)
            }
        }
    }
}

fn score_boolean(clauses: &[(Matcher, Occur)], minimum_should_match: u32, doc: &IndexedDocument) -> Option<f32> {
    let mut score = 0.0;
    let mut required = 0;
    let mut should_matched = 0;

    for (matcher, occur) in clauses {
        match occur {
            Occur::MustNot => {
                if matcher.score(doc).is_some() {
                    return None;
                }
            }
            Occur::Must => {
                score += matcher.score(doc)?;
                required += 1;
            }
            Occur::Should => {
                if let Some(s) = matcher.score(doc) {
                    score += s;
                    should_matched += 1;
                }
            }
        }
    }

    // Without required clauses at least one optional clause has to match
    let needed = if required == 0 { minimum_should_match.max(1) } else { minimum_should_match };
    (should_matched >= needed).then_some(score)
}

fn term_frequency(doc: &IndexedDocument, field: &str, value: &str) -> usize {
    doc.tokens
        .get(field)
        .map(|streams| streams.iter().flatten().filter(|t| *t == value).count())
        .unwrap_or(0)
}

fn phrase_frequency(doc: &IndexedDocument, field: &str, terms: &[String]) -> usize {
    if terms.is_empty() {
        return 0;
    }
    doc.tokens
        .get(field)
        .map(|streams| {
            streams
                .iter()
                .map(|tokens| tokens.windows(terms.len()).filter(|w| *w == terms).count())
                .sum()
        })
        .unwrap_or(0)
}

fn in_bounds(value: NumericValue, bounds: &RangeBounds) -> bool {
    match (value, bounds) {
        (NumericValue::Int(v), RangeBounds::Int32 { lower, upper }) => {
            *lower as i64 <= v && v <= *upper as i64
        }
        (NumericValue::Int(v), RangeBounds::Int64 { lower, upper })
        | (NumericValue::Int(v), RangeBounds::Date { lower, upper }) => *lower <= v && v <= *upper,
        (v, RangeBounds::Float32 { lower, upper }) => {
            let v = v.as_f64() as f32;
            *lower <= v && v <= *upper
        }
        (v, RangeBounds::Float64 { lower, upper }) => {
            let v = v.as_f64();
            *lower <= v && v <= *upper
        }
        (NumericValue::Float(_), _) => false,
    }
}

fn in_term_range(term: &str, range: &TermRangeQuery) -> bool {
    let above = match &range.lower {
        None => true,
        Some(lower) if range.lower_inclusive => term >= lower.as_str(),
        Some(lower) => term > lower.as_str(),
    };
    let below = match &range.upper {
        None => true,
        Some(upper) if range.upper_inclusive => term <= upper.as_str(),
        Some(upper) => term < upper.as_str(),
    };
    above && below
}

/// `*` matches any run, `?` one character, everything else is literal.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| {
        Error::new(ErrorKind::InvalidArgument, format!("invalid wildcard <{}>: {}", pattern, e))
    })
}
