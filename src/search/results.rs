use std::cmp::Ordering;
use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::core::types::Document;

/// Per-document value a result list can be sorted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SortValue {
    Number(f64),
    Text(String),
}

impl SortValue {
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Number(a), SortValue::Number(b)) => a.total_cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
            (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn ascending(field: &str) -> Self {
        SortField { field: field.to_string(), descending: false }
    }

    pub fn descending(field: &str) -> Self {
        SortField { field: field.to_string(), descending: true }
    }
}

/// Facet counting request for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRequest {
    pub field: String,
    pub max_facets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetResult {
    pub field: String,
    pub counts: Vec<FacetCount>,
}

/// Document with relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub unique_id: String,
    pub index_name: String,
    pub shard_number: u32,
    pub score: f32,
    pub sort_value: Option<SortValue>,
    pub timestamp: i64,
    pub document: Option<Document>,   // Present unless fetch type is None
}

/// Hits and facet counts produced by one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQueryResult {
    pub index_name: String,
    pub shard_number: u32,
    pub total_hits: u64,
    pub hits: Vec<ScoredResult>,
    pub facets: Vec<FacetResult>,
}

/// Position of the last hit handed to the caller. Passing it back returns
/// the page that follows in the same total order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCursor {
    pub index_name: String,
    pub unique_id: String,
    pub score: f32,
    pub sort_value: Option<SortValue>,
}

impl ResultCursor {
    pub fn from_result(result: &ScoredResult) -> Self {
        ResultCursor {
            index_name: result.index_name.clone(),
            unique_id: result.unique_id.clone(),
            score: result.score,
            sort_value: result.sort_value.clone(),
        }
    }

    /// True if `result` sorts strictly after this cursor.
    pub fn precedes(&self, result: &ScoredResult, sort: Option<&SortField>) -> bool {
        let cursor = RankKey {
            sort_value: self.sort_value.as_ref(),
            score: self.score,
            index_name: &self.index_name,
            unique_id: &self.unique_id,
        };
        compare_keys(&cursor, &RankKey::of(result), sort) == Ordering::Less
    }
}

struct RankKey<'a> {
    sort_value: Option<&'a SortValue>,
    score: f32,
    index_name: &'a str,
    unique_id: &'a str,
}

impl<'a> RankKey<'a> {
    fn of(result: &'a ScoredResult) -> Self {
        RankKey {
            sort_value: result.sort_value.as_ref(),
            score: result.score,
            index_name: &result.index_name,
            unique_id: &result.unique_id,
        }
    }
}

fn compare_keys(a: &RankKey, b: &RankKey, sort: Option<&SortField>) -> Ordering {
    let by_sort = match sort {
        None => Ordering::Equal,
        Some(sort) => match (a.sort_value, b.sort_value) {
            (Some(x), Some(y)) if sort.descending => y.compare(x),
            (Some(x), Some(y)) => x.compare(y),
            // Missing values go last in either direction
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    };

    by_sort
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.index_name.cmp(b.index_name))
        .then_with(|| a.unique_id.cmp(b.unique_id))
}

/// Total result order: sort field when given, then score descending, then
/// index name and unique id ascending. Identical inputs always produce
/// identical pages.
pub fn compare_results(a: &ScoredResult, b: &ScoredResult, sort: Option<&SortField>) -> Ordering {
    compare_keys(&RankKey::of(a), &RankKey::of(b), sort)
}

/// Top-K collector for efficient result collection
pub struct TopKCollector {
    pub hits: Vec<ScoredResult>,
    pub k: usize,
    pub sort: Option<SortField>,
    pub total_collected: u64,
}

impl TopKCollector {
    pub fn new(k: usize, sort: Option<SortField>) -> Self {
        TopKCollector {
            hits: Vec::with_capacity(k.min(1024) * 2),
            k,
            sort,
            total_collected: 0,
        }
    }

    pub fn collect(&mut self, hit: ScoredResult) {
        self.total_collected += 1;
        if self.k == 0 {
            return;
        }

        self.hits.push(hit);
        if self.hits.len() >= self.k.saturating_mul(2) {
            self.shrink();
        }
    }

    fn shrink(&mut self) {
        let sort = self.sort.as_ref();
        self.hits.sort_by(|a, b| compare_results(a, b, sort));
        self.hits.truncate(self.k);
    }

    pub fn into_results(mut self) -> Vec<ScoredResult> {
        self.shrink();
        self.hits
    }
}

/// Sums per-label counts across shards, then keeps the top labels per field.
pub fn merge_facets(shard_facets: &[Vec<FacetResult>], requests: &[CountRequest]) -> Vec<FacetResult> {
    requests
        .iter()
        .map(|request| {
            let mut sums: HashMap<&str, u64> = HashMap::new();
            for facets in shard_facets {
                for facet in facets.iter().filter(|f| f.field == request.field) {
                    for count in &facet.counts {
                        *sums.entry(&count.label).or_insert(0) += count.count;
                    }
                }
            }

            let mut counts: Vec<FacetCount> = sums
                .into_iter()
                .map(|(label, count)| FacetCount { label: label.to_string(), count })
                .collect();
            sort_facet_counts(&mut counts);
            counts.truncate(request.max_facets);

            FacetResult { field: request.field.clone(), counts }
        })
        .collect()
}

/// Count descending, label ascending
pub fn sort_facet_counts(counts: &mut [FacetCount]) {
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
}

/// Merged view over all shard results of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResults {
    pub total_hits: u64,
    pub hits: Vec<ScoredResult>,
    pub facets: Vec<FacetResult>,
}

pub fn merge_shard_results(
    shard_results: Vec<ShardQueryResult>,
    sort: Option<&SortField>,
    start: usize,
    amount: usize,
    count_requests: &[CountRequest],
) -> MergedResults {
    let total_hits = shard_results.iter().map(|r| r.total_hits).sum();
    let shard_facets: Vec<Vec<FacetResult>> = shard_results.iter().map(|r| r.facets.clone()).collect();

    let mut hits: Vec<ScoredResult> = shard_results.into_iter().flat_map(|r| r.hits).collect();
    hits.sort_by(|a, b| compare_results(a, b, sort));
    let hits = hits.into_iter().skip(start).take(amount).collect();

    MergedResults {
        total_hits,
        hits,
        facets: merge_facets(&shard_facets, count_requests),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(index: &str, id: &str, score: f32) -> ScoredResult {
        ScoredResult {
            unique_id: id.to_string(),
            index_name: index.to_string(),
            shard_number: 0,
            score,
            sort_value: None,
            timestamp: 0,
            document: None,
        }
    }

    fn shard(shard_number: u32, hits: Vec<ScoredResult>) -> ShardQueryResult {
        ShardQueryResult {
            index_name: "books".to_string(),
            shard_number,
            total_hits: hits.len() as u64,
            hits,
            facets: Vec::new(),
        }
    }

    fn ids(hits: &[ScoredResult]) -> Vec<&str> {
        hits.iter().map(|h| h.unique_id.as_str()).collect()
    }

    #[test]
    fn ties_break_on_index_then_id() {
        let mut hits = vec![hit("b", "1", 1.0), hit("a", "2", 1.0), hit("a", "1", 1.0), hit("z", "0", 2.0)];
        hits.sort_by(|x, y| compare_results(x, y, None));
        let order: Vec<(&str, &str)> = hits.iter().map(|h| (h.index_name.as_str(), h.unique_id.as_str())).collect();
        assert_eq!(order, vec![("z", "0"), ("a", "1"), ("a", "2"), ("b", "1")]);
    }

    #[test]
    fn merge_is_stable_regardless_of_shard_order() {
        let a = shard(0, vec![hit("books", "c", 1.0), hit("books", "a", 0.5)]);
        let b = shard(1, vec![hit("books", "b", 1.0), hit("books", "d", 0.5)]);

        let forward = merge_shard_results(vec![a.clone(), b.clone()], None, 0, 10, &[]);
        let reverse = merge_shard_results(vec![b, a], None, 0, 10, &[]);

        assert_eq!(ids(&forward.hits), vec!["b", "c", "a", "d"]);
        assert_eq!(forward, reverse);
        assert_eq!(forward.total_hits, 4);
    }

    #[test]
    fn start_and_amount_page_the_merged_list() {
        let a = shard(0, vec![hit("books", "1", 4.0), hit("books", "3", 2.0)]);
        let b = shard(1, vec![hit("books", "2", 3.0), hit("books", "4", 1.0)]);
        let page = merge_shard_results(vec![a, b], None, 1, 2, &[]);
        assert_eq!(ids(&page.hits), vec!["2", "3"]);
    }

    #[test]
    fn cursor_precedes_following_hits_only() {
        let last = hit("books", "b", 1.0);
        let cursor = ResultCursor::from_result(&last);

        assert!(cursor.precedes(&hit("books", "c", 1.0), None));
        assert!(cursor.precedes(&hit("books", "a", 0.5), None));
        assert!(!cursor.precedes(&hit("books", "a", 1.0), None));
        assert!(!cursor.precedes(&last, None));
    }

    #[test]
    fn field_sort_puts_missing_values_last() {
        let mut with_low = hit("books", "low", 0.1);
        with_low.sort_value = Some(SortValue::Number(1.0));
        let mut with_high = hit("books", "high", 0.1);
        with_high.sort_value = Some(SortValue::Number(9.0));
        let missing = hit("books", "missing", 5.0);

        let desc = SortField::descending("year");
        let mut hits = vec![missing.clone(), with_low.clone(), with_high.clone()];
        hits.sort_by(|a, b| compare_results(a, b, Some(&desc)));
        assert_eq!(ids(&hits), vec!["high", "low", "missing"]);

        let asc = SortField::ascending("year");
        hits.sort_by(|a, b| compare_results(a, b, Some(&asc)));
        assert_eq!(ids(&hits), vec!["low", "high", "missing"]);
    }

    #[test]
    fn collector_keeps_best_k() {
        let mut collector = TopKCollector::new(2, None);
        for (id, score) in [("a", 0.1), ("b", 3.0), ("c", 2.0), ("d", 0.5), ("e", 2.0)] {
            collector.collect(hit("books", id, score));
        }
        assert_eq!(collector.total_collected, 5);
        assert_eq!(ids(&collector.into_results()), vec!["b", "c"]);
    }

    #[test]
    fn unbounded_k_keeps_everything() {
        let mut collector = TopKCollector::new(usize::MAX, None);
        for (id, score) in [("a", 0.1), ("b", 3.0), ("c", 2.0)] {
            collector.collect(hit("books", id, score));
        }
        assert_eq!(ids(&collector.into_results()), vec!["b", "c", "a"]);
    }

    #[test]
    fn facet_counts_sum_across_shards() {
        let facets = |counts: &[(&str, u64)]| {
            vec![FacetResult {
                field: "country".to_string(),
                counts: counts.iter().map(|(l, c)| FacetCount { label: l.to_string(), count: *c }).collect(),
            }]
        };
        let merged = merge_facets(
            &[facets(&[("es", 2), ("fr", 1)]), facets(&[("fr", 2), ("de", 3)])],
            &[CountRequest { field: "country".to_string(), max_facets: 2 }],
        );

        assert_eq!(merged[0].counts, vec![
            FacetCount { label: "de".to_string(), count: 3 },
            FacetCount { label: "fr".to_string(), count: 3 },
        ]);
    }
}
