//! Query description and ranking.

use super::distance::DistanceMetric;
use super::error::{CollectionError, Result};
use super::filter::Predicate;
use super::schema::{check_finite, CollectionSchema};
use super::types::{Document, Record, SearchResult};
use std::cmp::Ordering;
use std::sync::Arc;

pub const DEFAULT_NPROBES: usize = 8;

/// A filter as supplied by the caller: expression text, parsed at search
/// time, or a predicate built in code.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Text(String),
    Predicate(Predicate),
}

impl FilterExpr {
    /// Parses (if needed) and type-checks the filter against `schema`.
    pub fn resolve(&self, schema: &CollectionSchema) -> Result<Predicate> {
        let predicate = match self {
            FilterExpr::Text(text) => Predicate::parse(text)?,
            FilterExpr::Predicate(predicate) => predicate.clone(),
        };
        predicate.validate(schema)?;
        Ok(predicate)
    }
}

impl From<&str> for FilterExpr {
    fn from(value: &str) -> Self {
        FilterExpr::Text(value.to_string())
    }
}

impl From<String> for FilterExpr {
    fn from(value: String) -> Self {
        FilterExpr::Text(value)
    }
}

impl From<Predicate> for FilterExpr {
    fn from(value: Predicate) -> Self {
        FilterExpr::Predicate(value)
    }
}

/// A similarity search request.
///
/// # Example
///
/// ```
/// use tributo_core::collection::{DistanceMetric, SearchQuery};
///
/// let query = SearchQuery::new(vec![1.0, 0.0, 0.0])
///     .metric(DistanceMetric::Cosine)
///     .limit(5)
///     .prefilter("vigente = TRUE")
///     .postfilter("ano >= 2010")
///     .overfetch(4);
/// assert_eq!(query.top_k, 5);
/// ```
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    /// Defaults to the collection's schema metric.
    pub metric: Option<DistanceMetric>,
    pub top_k: usize,
    pub prefilter: Option<FilterExpr>,
    pub postfilter: Option<FilterExpr>,
    pub nprobes: usize,
    pub overfetch: usize,
    /// Skip records inserted after the last index build.
    pub fast_search: bool,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            metric: None,
            top_k: 10,
            prefilter: None,
            postfilter: None,
            nprobes: DEFAULT_NPROBES,
            overfetch: 1,
            fast_search: false,
        }
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn limit(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn prefilter(mut self, filter: impl Into<FilterExpr>) -> Self {
        self.prefilter = Some(filter.into());
        self
    }

    pub fn postfilter(mut self, filter: impl Into<FilterExpr>) -> Self {
        self.postfilter = Some(filter.into());
        self
    }

    pub fn nprobes(mut self, nprobes: usize) -> Self {
        self.nprobes = nprobes;
        self
    }

    pub fn overfetch(mut self, factor: usize) -> Self {
        self.overfetch = factor;
        self
    }

    pub fn fast_search(mut self) -> Self {
        self.fast_search = true;
        self
    }
}

/// A query after validation, ready to run against a snapshot of records.
#[derive(Debug)]
pub(crate) struct PreparedQuery {
    pub vector: Vec<f32>,
    pub metric: DistanceMetric,
    pub top_k: usize,
    pub prefilter: Option<Predicate>,
    pub postfilter: Option<Predicate>,
    pub nprobes: usize,
    pub overfetch: usize,
    pub fast_search: bool,
}

impl PreparedQuery {
    /// Validates in a fixed order: `top_k`, then the vector dimension, then
    /// both predicates. Nothing is scanned before this succeeds.
    pub fn prepare(query: SearchQuery, schema: &CollectionSchema) -> Result<Self> {
        if query.top_k == 0 {
            return Err(CollectionError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        if query.vector.len() != schema.dimension {
            return Err(CollectionError::DimensionMismatch {
                expected: schema.dimension,
                actual: query.vector.len(),
            });
        }
        check_finite(&query.vector)?;
        let prefilter = query.prefilter.as_ref().map(|f| f.resolve(schema)).transpose()?;
        let postfilter = query.postfilter.as_ref().map(|f| f.resolve(schema)).transpose()?;

        Ok(Self {
            metric: query.metric.unwrap_or(schema.metric),
            vector: query.vector,
            top_k: query.top_k,
            prefilter,
            postfilter,
            nprobes: query.nprobes.max(1),
            overfetch: query.overfetch.max(1),
            fast_search: query.fast_search,
        })
    }

    /// Whether a row passes the prefilter.
    pub fn admits(&self, document: &Document) -> bool {
        self.prefilter.as_ref().map_or(true, |p| p.matches(document))
    }

    /// How many candidates an index should supply for the result to fill `top_k`.
    pub fn candidate_target(&self) -> usize {
        self.top_k.saturating_mul(self.overfetch)
    }

    /// Scores the candidates and returns the final result list.
    pub fn rank<'a, I>(&self, candidates: I) -> Vec<SearchResult>
    where
        I: IntoIterator<Item = &'a Arc<Record>>,
    {
        let mut scored: Vec<(f32, &Record)> = candidates
            .into_iter()
            .filter(|r| self.admits(&r.document))
            .map(|r| (self.metric.distance(&self.vector, &r.document.embedding), &**r))
            .collect();

        scored.sort_by(|a, b| by_distance_then_seq(a, b));

        let window = match &self.postfilter {
            Some(_) => self.top_k.saturating_mul(self.overfetch),
            None => self.top_k,
        };
        scored.truncate(window);

        scored
            .into_iter()
            .filter(|(_, r)| {
                self.postfilter
                    .as_ref()
                    .map_or(true, |p| p.matches(&r.document))
            })
            .take(self.top_k)
            .map(|(distance, r)| SearchResult {
                document: r.document.clone(),
                score: self.metric.score(distance),
                distance,
            })
            .collect()
    }
}

fn by_distance_then_seq(a: &(f32, &Record), b: &(f32, &Record)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.seq.cmp(&b.1.seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::schema::ColumnType;
    use crate::collection::types::Document;

    fn records(vectors: &[(&str, Vec<f32>, bool)]) -> Vec<Arc<Record>> {
        vectors
            .iter()
            .enumerate()
            .map(|(seq, (text, embedding, vigente))| {
                Arc::new(Record {
                    seq: seq as u64,
                    document: Document::new(*text, embedding.clone())
                        .with_id(format!("docs-{}", seq))
                        .with_metadata("vigente", *vigente),
                })
            })
            .collect()
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new(2).with_column("vigente", ColumnType::Boolean)
    }

    #[test]
    fn test_validation_order() {
        let schema = schema();

        let err = PreparedQuery::prepare(SearchQuery::new(vec![1.0]).limit(0), &schema).unwrap_err();
        assert!(matches!(err, CollectionError::InvalidArgument(_)));

        let err = PreparedQuery::prepare(
            SearchQuery::new(vec![1.0]).prefilter("nope = 1"),
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::DimensionMismatch { expected: 2, actual: 1 }));

        let err = PreparedQuery::prepare(SearchQuery::new(vec![f32::NAN, 0.0]), &schema).unwrap_err();
        assert!(matches!(err, CollectionError::InvalidArgument(_)));

        let err = PreparedQuery::prepare(
            SearchQuery::new(vec![1.0, 0.0]).postfilter("nope = 1"),
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidPredicate(_)));
    }

    #[test]
    fn test_ties_go_to_first_inserted() {
        let rows = records(&[
            ("far", vec![0.0, 1.0], true),
            ("twin-a", vec![1.0, 0.0], true),
            ("twin-b", vec![2.0, 0.0], true),
        ]);
        let query = PreparedQuery::prepare(SearchQuery::new(vec![1.0, 0.0]).limit(3), &schema()).unwrap();
        let texts: Vec<String> = query.rank(&rows).into_iter().map(|r| r.document.text).collect();
        assert_eq!(texts, vec!["twin-a", "twin-b", "far"]);
    }

    #[test]
    fn test_postfilter_window() {
        let rows = records(&[
            ("a", vec![1.0, 0.0], false),
            ("b", vec![0.9, 0.1], false),
            ("c", vec![0.5, 0.5], true),
            ("d", vec![0.0, 1.0], true),
        ]);

        // Window of top_k * overfetch = 2 holds only non-matching rows.
        let narrow = PreparedQuery::prepare(
            SearchQuery::new(vec![1.0, 0.0]).limit(1).overfetch(2).postfilter("vigente = TRUE"),
            &schema(),
        )
        .unwrap();
        assert!(narrow.rank(&rows).is_empty());

        let wide = PreparedQuery::prepare(
            SearchQuery::new(vec![1.0, 0.0]).limit(1).overfetch(3).postfilter("vigente = TRUE"),
            &schema(),
        )
        .unwrap();
        let results = wide.rank(&rows);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.text, "c");
    }

    #[test]
    fn test_prefilter_never_returns_violations() {
        let rows = records(&[
            ("a", vec![1.0, 0.0], false),
            ("b", vec![0.0, 1.0], true),
        ]);
        let query = PreparedQuery::prepare(
            SearchQuery::new(vec![1.0, 0.0]).limit(5).prefilter(Predicate::eq("vigente", true)),
            &schema(),
        )
        .unwrap();
        let results = query.rank(&rows);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.text, "b");
    }
}
