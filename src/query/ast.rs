use serde::{Serialize, Deserialize};

/// Compiled query tree. Built once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Term(TermQuery),
    Phrase(PhraseQuery),
    Range(RangeQuery),           // Numeric/date range with typed bounds
    TermRange(TermRangeQuery),   // Lexicographic range on text fields
    Boolean(BooleanQuery),
    DisjunctionMax(DisjunctionMaxQuery),
    Wildcard(WildcardQuery),
    FieldPresence(FieldPresenceQuery),
    Boost(BoostQuery),
    MatchAll,
    MatchNone(MatchNoneQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermQuery {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseQuery {
    pub field: String,
    pub terms: Vec<String>,
}

/// Inclusive bounds, already adjusted for exclusive endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RangeBounds {
    Int32 { lower: i32, upper: i32 },
    Int64 { lower: i64, upper: i64 },
    Float32 { lower: f32, upper: f32 },
    Float64 { lower: f64, upper: f64 },
    Date { lower: i64, upper: i64 },   // Millis since epoch
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub field: String,
    pub bounds: RangeBounds,
}

impl RangeQuery {
    /// Bounds are always inclusive once compiled.
    pub fn lower_inclusive(&self) -> bool {
        true
    }

    pub fn upper_inclusive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermRangeQuery {
    pub field: String,
    pub lower: Option<String>,
    pub upper: Option<String>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occur {
    Must,
    Should,
    MustNot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanClause {
    pub query: Query,
    pub occur: Occur,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanQuery {
    pub clauses: Vec<BooleanClause>,
    pub minimum_should_match: u32,
}

/// Scores by the best clause plus `tie_breaker` times the others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisjunctionMaxQuery {
    pub clauses: Vec<Query>,
    pub tie_breaker: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildcardQuery {
    pub field: String,
    pub pattern: String,   // `*` and `?` wildcards
}

/// Matches documents holding any value in `field`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPresenceQuery {
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostQuery {
    pub query: Box<Query>,
    pub boost: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchNoneQuery {
    pub reason: String,
}

impl Query {
    pub fn term(field: &str, value: &str) -> Self {
        Query::Term(TermQuery { field: field.to_string(), value: value.to_string() })
    }

    pub fn match_none(reason: String) -> Self {
        Query::MatchNone(MatchNoneQuery { reason })
    }

    pub fn boosted(self, boost: f32) -> Self {
        if boost == 1.0 {
            self
        } else {
            Query::Boost(BoostQuery { query: Box::new(self), boost })
        }
    }
}

impl BooleanQuery {
    pub fn new(minimum_should_match: u32) -> Self {
        BooleanQuery {
            clauses: Vec::new(),
            minimum_should_match,
        }
    }

    pub fn with_clause(mut self, query: Query, occur: Occur) -> Self {
        self.clauses.push(BooleanClause { query, occur });
        self
    }

    pub fn add(&mut self, query: Query, occur: Occur) {
        self.clauses.push(BooleanClause { query, occur });
    }
}
