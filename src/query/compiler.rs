use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::analysis::analyzer::Analyzer;
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{
    BooleanClause, BooleanQuery, DisjunctionMaxQuery, FieldPresenceQuery, Occur, PhraseQuery,
    Query, RangeBounds, RangeQuery, TermRangeQuery, WildcardQuery,
};
use crate::query::parser::{parse_query, Body, Conjunction, Modifier, Node, ParsedClause, RawRange, Word};
use crate::schema::schema::{
    is_length_field, parse_date_millis, rewrite_length_field, FieldCatalog, FieldType,
    CHAR_LENGTH_PREFIX, LIST_LENGTH_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DefaultOperator {
    #[default]
    Or,
    And,
}

/// Search field with an optional boost, written `title^2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryField {
    pub name: String,
    pub boost: f32,
}

impl QueryField {
    pub fn new(name: &str) -> Self {
        QueryField { name: name.to_string(), boost: 1.0 }
    }

    pub fn boosted(name: &str, boost: f32) -> Self {
        QueryField { name: name.to_string(), boost }
    }

    /// `name` or `name^boost`. A boost must be a finite number above zero.
    pub fn parse(text: &str) -> Result<Self> {
        let Some((name, boost)) = text.rsplit_once('^') else {
            return Ok(QueryField::new(text));
        };
        match boost.parse::<f32>() {
            Ok(boost) if boost.is_finite() && boost > 0.0 && !name.is_empty() => Ok(QueryField::boosted(name, boost)),
            _ => Err(Error::malformed(format!("search field <{}> has an invalid boost", text))),
        }
    }
}

/// Per-compile settings. Immutable for the duration of one compile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub default_fields: Vec<QueryField>,
    pub default_operator: DefaultOperator,
    pub minimum_should_match: u32,
    pub dismax_tie_breaker: Option<f32>,   // Some(tie) enables disjunction-max
}

impl CompileOptions {
    pub fn with_default_field(mut self, field: QueryField) -> Self {
        self.default_fields.push(field);
        self
    }

    pub fn with_operator(mut self, operator: DefaultOperator) -> Self {
        self.default_operator = operator;
        self
    }

    pub fn with_minimum_should_match(mut self, mm: u32) -> Self {
        self.minimum_should_match = mm;
        self
    }

    pub fn with_dismax(mut self, tie_breaker: f32) -> Self {
        self.dismax_tie_breaker = Some(tie_breaker);
        self
    }
}

/// Value type a numeric range can be built over
trait RangeValue: Copy + FromStr {
    const MIN: Self;
    const MAX: Self;
    fn step_up(self) -> Option<Self>;
    fn step_down(self) -> Option<Self>;
}

impl RangeValue for i32 {
    const MIN: Self = i32::MIN;
    const MAX: Self = i32::MAX;
    fn step_up(self) -> Option<Self> { self.checked_add(1) }
    fn step_down(self) -> Option<Self> { self.checked_sub(1) }
}

impl RangeValue for i64 {
    const MIN: Self = i64::MIN;
    const MAX: Self = i64::MAX;
    fn step_up(self) -> Option<Self> { self.checked_add(1) }
    fn step_down(self) -> Option<Self> { self.checked_sub(1) }
}

impl RangeValue for f32 {
    const MIN: Self = f32::NEG_INFINITY;
    const MAX: Self = f32::INFINITY;
    fn step_up(self) -> Option<Self> { Some(self.next_up()) }
    fn step_down(self) -> Option<Self> { Some(self.next_down()) }
}

impl RangeValue for f64 {
    const MIN: Self = f64::NEG_INFINITY;
    const MAX: Self = f64::INFINITY;
    fn step_up(self) -> Option<Self> { Some(self.next_up()) }
    fn step_down(self) -> Option<Self> { Some(self.next_down()) }
}

/// Rewrites query text into a typed query tree using the field catalog.
/// Holds no per-request state; everything request specific arrives in
/// [`CompileOptions`].
pub struct QueryCompiler<'a> {
    catalog: &'a FieldCatalog,
    analyzer: &'a Analyzer,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(catalog: &'a FieldCatalog, analyzer: &'a Analyzer) -> Self {
        QueryCompiler { catalog, analyzer }
    }

    pub fn compile(&self, text: &str, options: &CompileOptions) -> Result<Query> {
        if text.trim().is_empty() {
            return Ok(Query::MatchAll);
        }
        let clauses = parse_query(text)?;
        self.compile_clauses(&clauses, None, options)
    }

    fn compile_clauses(
        &self,
        clauses: &[ParsedClause],
        field: Option<&str>,
        options: &CompileOptions,
    ) -> Result<Query> {
        let mut built: Vec<BooleanClause> = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let query = self.compile_node(&clause.node, field, options)?;
            add_clause(&mut built, clause.conjunction, clause.modifier, query, options.default_operator);
        }

        // A lone unmodified clause stands for itself
        if built.len() == 1 && clauses[0].modifier == Modifier::None {
            if let Some(only) = built.pop() {
                return Ok(only.query);
            }
        }

        Ok(Query::Boolean(BooleanQuery {
            clauses: built,
            minimum_should_match: options.minimum_should_match,
        }))
    }

    fn compile_node(&self, node: &Node, inherited: Option<&str>, options: &CompileOptions) -> Result<Query> {
        let field = node.field.as_deref().or(inherited);

        let query = match &node.body {
            Body::Group(inner) => self.compile_clauses(inner, field, options)?,
            Body::Word(word) => self.for_fields(field, options, |f| self.word_query(f, word, options))?,
            Body::Phrase(text) => {
                self.for_fields(field, options, |f| self.value_query(f, text, true, options))?
            }
            Body::Range(range) => self.for_fields(field, options, |f| self.range_query(f, range))?,
        };

        Ok(match node.boost {
            Some(boost) => query.boosted(boost),
            None => query,
        })
    }

    /// Builds the clause against an explicit field, or once per default
    /// field combined by sum (boolean) or by disjunction-max.
    fn for_fields<F>(&self, field: Option<&str>, options: &CompileOptions, build: F) -> Result<Query>
    where
        F: Fn(&str) -> Result<Query>,
    {
        if let Some(field) = field {
            return build(field);
        }

        match options.default_fields.as_slice() {
            [] => Err(Error::malformed(
                "query has a clause without field and no default search field is configured".to_string(),
            )),
            [only] => Ok(build(&only.name)?.boosted(only.boost)),
            fields => {
                let mut variants = Vec::with_capacity(fields.len());
                for qf in fields {
                    variants.push(build(&qf.name)?.boosted(qf.boost));
                }

                Ok(match options.dismax_tie_breaker {
                    Some(tie_breaker) => Query::DisjunctionMax(DisjunctionMaxQuery {
                        clauses: variants,
                        tie_breaker,
                    }),
                    None => {
                        let mut boolean = BooleanQuery::new(options.minimum_should_match);
                        for variant in variants {
                            boolean.add(variant, Occur::Should);
                        }
                        Query::Boolean(boolean)
                    }
                })
            }
        }
    }

    fn word_query(&self, raw_field: &str, word: &Word, options: &CompileOptions) -> Result<Query> {
        if word.has_wildcard {
            return Ok(self.wildcard_query(raw_field, &word.text));
        }
        self.value_query(raw_field, &word.text, false, options)
    }

    /// Term-like lookup of one literal: typed equality range for numeric,
    /// date and length fields, analyzed terms for text.
    fn value_query(&self, raw_field: &str, text: &str, phrase: bool, options: &CompileOptions) -> Result<Query> {
        let field = rewrite_length_field(raw_field);

        if is_length_field(&field) {
            let range = RawRange::exact(text);
            return self.numeric_range(&field, FieldType::Int32, &range);
        }

        if let Some(field_type) = self.catalog.field_type(&field) {
            if field_type.is_numeric_or_date() {
                let range = RawRange::exact(text);
                return self.numeric_range(&field, field_type, &range);
            }
        }

        let mut terms = self.analyzer.terms(text);
        Ok(match terms.len() {
            0 => Query::match_none(format!("{} has no searchable terms in <{}>", field, text)),
            1 => Query::term(&field, &terms.remove(0)),
            _ if phrase => Query::Phrase(PhraseQuery { field, terms }),
            _ => {
                let mut boolean = BooleanQuery::new(options.minimum_should_match);
                for term in &terms {
                    boolean.add(Query::term(&field, term), Occur::Should);
                }
                Query::Boolean(boolean)
            }
        })
    }

    fn wildcard_query(&self, raw_field: &str, pattern: &str) -> Query {
        if pattern == "*" {
            if raw_field == "*" {
                return Query::MatchAll;
            }
            let field = rewrite_length_field(raw_field);
            let present = field
                .strip_prefix(CHAR_LENGTH_PREFIX)
                .or_else(|| field.strip_prefix(LIST_LENGTH_PREFIX))
                .unwrap_or(&field);
            return Query::FieldPresence(FieldPresenceQuery { field: present.to_string() });
        }

        let field = rewrite_length_field(raw_field);
        let pattern = match self.catalog.field_type(&field) {
            Some(FieldType::Text) | None => pattern.to_lowercase(),
            Some(_) => pattern.to_string(),
        };
        Query::Wildcard(WildcardQuery { field, pattern })
    }

    fn range_query(&self, raw_field: &str, range: &RawRange) -> Result<Query> {
        let field = rewrite_length_field(raw_field);

        if is_length_field(&field) {
            return self.numeric_range(&field, FieldType::Int32, range);
        }

        match self.catalog.field_type(&field) {
            Some(field_type) if field_type.is_numeric_or_date() => {
                self.numeric_range(&field, field_type, range)
            }
            _ => Ok(Query::TermRange(TermRangeQuery {
                field,
                lower: range.lower.as_ref().map(|s| s.to_lowercase()),
                upper: range.upper.as_ref().map(|s| s.to_lowercase()),
                lower_inclusive: range.lower_inclusive,
                upper_inclusive: range.upper_inclusive,
            })),
        }
    }

    fn numeric_range(&self, field: &str, field_type: FieldType, range: &RawRange) -> Result<Query> {
        let bounds = match field_type {
            FieldType::Int32 => typed_bounds::<i32>(field, range, |s| s.parse().ok())?
                .map(|(lower, upper)| RangeBounds::Int32 { lower, upper }),
            FieldType::Int64 => typed_bounds::<i64>(field, range, |s| s.parse().ok())?
                .map(|(lower, upper)| RangeBounds::Int64 { lower, upper }),
            FieldType::Float32 => typed_bounds::<f32>(field, range, parse_float)?
                .map(|(lower, upper)| RangeBounds::Float32 { lower, upper }),
            FieldType::Float64 => typed_bounds::<f64>(field, range, parse_float)?
                .map(|(lower, upper)| RangeBounds::Float64 { lower, upper }),
            FieldType::Date => typed_bounds::<i64>(field, range, parse_date_millis)?
                .map(|(lower, upper)| RangeBounds::Date { lower, upper }),
            FieldType::Text => {
                return Err(Error::new(
                    ErrorKind::Internal,
                    format!("not a valid numeric field <{}>", field),
                ));
            }
        };

        Ok(match bounds {
            Some(bounds) => Query::Range(RangeQuery { field: field.to_string(), bounds }),
            None if field_type.is_date() => Query::match_none(format!("{} expects date", field)),
            None => Query::match_none(format!("{} expects numeric", field)),
        })
    }
}

impl RawRange {
    fn exact(value: &str) -> Self {
        RawRange {
            lower: Some(value.to_string()),
            upper: Some(value.to_string()),
            lower_inclusive: true,
            upper_inclusive: true,
        }
    }
}

fn parse_float<T: FromStr>(value: &str) -> Option<T> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }
    trimmed.parse().ok()
}

/// Parses and adjusts both bounds to inclusive form. `Ok(None)` means a
/// literal did not parse for the type; overflow while stepping is an error.
fn typed_bounds<T: RangeValue>(
    field: &str,
    range: &RawRange,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<(T, T)>> {
    let lower = match &range.lower {
        None => T::MIN,
        Some(raw) => match parse(raw) {
            Some(value) if range.lower_inclusive => value,
            Some(value) => value.step_up().ok_or_else(|| overflow(field, raw))?,
            None => return Ok(None),
        },
    };
    let upper = match &range.upper {
        None => T::MAX,
        Some(raw) => match parse(raw) {
            Some(value) if range.upper_inclusive => value,
            Some(value) => value.step_down().ok_or_else(|| overflow(field, raw))?,
            None => return Ok(None),
        },
    };
    Ok(Some((lower, upper)))
}

fn overflow(field: &str, raw: &str) -> Error {
    Error::new(
        ErrorKind::Overflow,
        format!("exclusive bound <{}> on field <{}> overflows the field type", raw, field),
    )
}

/// Occurrence rules of the classic query syntax: `AND` makes both
/// neighbours required, `OR` under a default AND relaxes the previous one.
fn add_clause(
    clauses: &mut Vec<BooleanClause>,
    conjunction: Conjunction,
    modifier: Modifier,
    query: Query,
    operator: DefaultOperator,
) {
    if let Some(last) = clauses.last_mut() {
        if conjunction == Conjunction::And && last.occur != Occur::MustNot {
            last.occur = Occur::Must;
        }
        if operator == DefaultOperator::And && conjunction == Conjunction::Or && last.occur != Occur::MustNot {
            last.occur = Occur::Should;
        }
    }

    let prohibited = modifier == Modifier::Prohibited;
    let required = match operator {
        DefaultOperator::Or => {
            modifier == Modifier::Required || (conjunction == Conjunction::And && !prohibited)
        }
        DefaultOperator::And => !prohibited && conjunction != Conjunction::Or,
    };

    let occur = if prohibited {
        Occur::MustNot
    } else if required {
        Occur::Must
    } else {
        Occur::Should
    };
    clauses.push(BooleanClause { query, occur });
}
