//! Ranking evaluation.
//!
//! Scores a run (system output) against qrels (graded relevance
//! judgments) with standard IR metrics named in `metric@cutoff` notation:
//! `ndcg@10`, `mrr`, `mrr@5`, `map`, `recall@100`, `precision@10`,
//! `hit_rate@10`.
//!
//! nDCG uses linear gains so judgment grades contribute proportionally;
//! every other metric treats a document as relevant when its grade is
//! positive. Averages run over the queries present in the run, and a run
//! query without judgments scores zero instead of being skipped, so
//! missing ground truth drags the aggregate down rather than hiding.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::dataset::QrelRow;
use crate::error::{Error, Result};
use crate::store::ScoredPoint;
use crate::strategy::points::extract_result;

/// Graded ground truth: query id to document id to relevance grade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Qrels {
    judgments: BTreeMap<String, BTreeMap<String, u32>>,
}

impl Qrels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group judgment rows by query. A repeated (query, document) pair
    /// keeps the grade seen last.
    pub fn from_rows(rows: &[QrelRow]) -> Self {
        let mut judgments: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        for row in rows {
            judgments
                .entry(row.query_id.clone())
                .or_default()
                .insert(row.corpus_id.clone(), row.score);
        }
        Self { judgments }
    }

    pub fn insert(&mut self, query_id: impl Into<String>, doc_id: impl Into<String>, grade: u32) {
        self.judgments
            .entry(query_id.into())
            .or_default()
            .insert(doc_id.into(), grade);
    }

    pub fn grades(&self, query_id: &str) -> Option<&BTreeMap<String, u32>> {
        self.judgments.get(query_id)
    }

    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }
}

/// System output: query id to document id to similarity score.
#[derive(Debug, Clone, Default)]
pub struct Run {
    rankings: BTreeMap<String, BTreeMap<String, f32>>,
}

impl Run {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the hits for one query, keyed by payload document id. If a
    /// document somehow appears twice its higher score wins.
    pub fn insert_query(&mut self, query_id: impl Into<String>, hits: &[ScoredPoint]) {
        let entry = self.rankings.entry(query_id.into()).or_default();
        for hit in hits {
            let (doc_id, score) = extract_result(hit);
            let slot = entry.entry(doc_id).or_insert(score);
            if score > *slot {
                *slot = score;
            }
        }
    }

    /// The ranked document list for one query: descending score with ties
    /// broken by ascending document id.
    pub fn ranking(&self, query_id: &str) -> Option<Vec<(&str, f32)>> {
        let docs = self.rankings.get(query_id)?;
        let mut ranked: Vec<(&str, f32)> =
            docs.iter().map(|(doc, score)| (doc.as_str(), *score)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        Some(ranked)
    }

    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.rankings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rankings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rankings.is_empty()
    }
}

/// One evaluation metric, optionally with a rank cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Ndcg(usize),
    Mrr(Option<usize>),
    Map,
    Recall(usize),
    Precision(usize),
    HitRate(usize),
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        let (name, cutoff) = match spec.split_once('@') {
            Some((name, k)) => {
                let k: usize = k.parse().map_err(|_| Error::UnknownMetric(spec.to_string()))?;
                if k == 0 {
                    return Err(Error::UnknownMetric(spec.to_string()));
                }
                (name, Some(k))
            }
            None => (spec, None),
        };
        match (name.to_ascii_lowercase().as_str(), cutoff) {
            ("ndcg", Some(k)) => Ok(Metric::Ndcg(k)),
            ("mrr", k) => Ok(Metric::Mrr(k)),
            ("map", None) => Ok(Metric::Map),
            ("recall", Some(k)) => Ok(Metric::Recall(k)),
            ("precision", Some(k)) => Ok(Metric::Precision(k)),
            ("hit_rate", Some(k)) => Ok(Metric::HitRate(k)),
            _ => Err(Error::UnknownMetric(spec.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Ndcg(k) => write!(f, "ndcg@{k}"),
            Metric::Mrr(None) => write!(f, "mrr"),
            Metric::Mrr(Some(k)) => write!(f, "mrr@{k}"),
            Metric::Map => write!(f, "map"),
            Metric::Recall(k) => write!(f, "recall@{k}"),
            Metric::Precision(k) => write!(f, "precision@{k}"),
            Metric::HitRate(k) => write!(f, "hit_rate@{k}"),
        }
    }
}

/// Parse a comma-separated metric list such as `"ndcg@10,mrr,recall@100"`.
pub fn parse_metrics(spec: &str) -> Result<Vec<Metric>> {
    let metrics: Vec<Metric> = spec
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect::<Result<_>>()?;
    if metrics.is_empty() {
        return Err(Error::UnknownMetric(spec.to_string()));
    }
    Ok(metrics)
}

fn grade_of(grades: &BTreeMap<String, u32>, doc: &str) -> f64 {
    grades.get(doc).copied().unwrap_or(0) as f64
}

fn is_relevant(grades: &BTreeMap<String, u32>, doc: &str) -> bool {
    grades.get(doc).map_or(false, |grade| *grade > 0)
}

fn relevant_count(grades: &BTreeMap<String, u32>) -> usize {
    grades.values().filter(|grade| **grade > 0).count()
}

fn ndcg_at_k(ranked: &[(&str, f32)], grades: &BTreeMap<String, u32>, k: usize) -> f64 {
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, (doc, _))| grade_of(grades, doc) / ((i + 2) as f64).log2())
        .sum();
    let mut ideal: Vec<f64> = grades.values().map(|grade| *grade as f64).collect();
    ideal.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let idcg: f64 = ideal
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, gain)| gain / ((i + 2) as f64).log2())
        .sum();
    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

fn reciprocal_rank(
    ranked: &[(&str, f32)],
    grades: &BTreeMap<String, u32>,
    cutoff: Option<usize>,
) -> f64 {
    let take = cutoff.unwrap_or(ranked.len());
    for (i, (doc, _)) in ranked.iter().take(take).enumerate() {
        if is_relevant(grades, doc) {
            return 1.0 / (i + 1) as f64;
        }
    }
    0.0
}

fn precision_at_k(ranked: &[(&str, f32)], grades: &BTreeMap<String, u32>, k: usize) -> f64 {
    let hits = ranked
        .iter()
        .take(k)
        .filter(|(doc, _)| is_relevant(grades, doc))
        .count();
    hits as f64 / k as f64
}

fn recall_at_k(ranked: &[(&str, f32)], grades: &BTreeMap<String, u32>, k: usize) -> f64 {
    let total_relevant = relevant_count(grades);
    if total_relevant == 0 {
        return 0.0;
    }
    let hits = ranked
        .iter()
        .take(k)
        .filter(|(doc, _)| is_relevant(grades, doc))
        .count();
    hits as f64 / total_relevant as f64
}

fn hit_rate_at_k(ranked: &[(&str, f32)], grades: &BTreeMap<String, u32>, k: usize) -> f64 {
    let hit = ranked
        .iter()
        .take(k)
        .any(|(doc, _)| is_relevant(grades, doc));
    if hit {
        1.0
    } else {
        0.0
    }
}

fn average_precision(ranked: &[(&str, f32)], grades: &BTreeMap<String, u32>) -> f64 {
    let total_relevant = relevant_count(grades);
    if total_relevant == 0 {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (i, (doc, _)) in ranked.iter().enumerate() {
        if is_relevant(grades, doc) {
            hits += 1;
            sum += hits as f64 / (i + 1) as f64;
        }
    }
    sum / total_relevant as f64
}

fn score_query(metric: Metric, ranked: &[(&str, f32)], grades: &BTreeMap<String, u32>) -> f64 {
    match metric {
        Metric::Ndcg(k) => ndcg_at_k(ranked, grades, k),
        Metric::Mrr(cutoff) => reciprocal_rank(ranked, grades, cutoff),
        Metric::Map => average_precision(ranked, grades),
        Metric::Recall(k) => recall_at_k(ranked, grades, k),
        Metric::Precision(k) => precision_at_k(ranked, grades, k),
        Metric::HitRate(k) => hit_rate_at_k(ranked, grades, k),
    }
}

/// Score a run against qrels, averaging each metric over every query in
/// the run. Returns metric name to averaged score, keyed by the canonical
/// metric spelling.
pub fn evaluate(qrels: &Qrels, run: &Run, metrics: &[Metric]) -> BTreeMap<String, f64> {
    let empty = BTreeMap::new();
    let mut report = BTreeMap::new();
    let query_count = run.len();
    for metric in metrics {
        let mut total = 0.0;
        for query_id in run.queries() {
            let Some(ranking) = run.ranking(query_id) else {
                continue;
            };
            let grades = qrels.grades(query_id).unwrap_or(&empty);
            total += score_query(*metric, &ranking, grades);
        }
        let average = if query_count == 0 {
            0.0
        } else {
            total / query_count as f64
        };
        report.insert(metric.to_string(), average);
    }
    report
}
