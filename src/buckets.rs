use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::RecommendationRecord;

/// Half-open `[lo, hi)` interval; the last band of a family also accepts `hi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub label: &'static str,
    pub lo: f64,
    pub hi: f64,
}

impl Band {
    pub const fn new(label: &'static str, lo: f64, hi: f64) -> Self {
        Self { label, lo, hi }
    }

    pub fn midpoint(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }
}

pub fn band_index(bands: &[Band], value: f64) -> Option<usize> {
    if !value.is_finite() {
        return None;
    }
    let last = bands.len().checked_sub(1)?;
    bands.iter().enumerate().position(|(i, b)| {
        value >= b.lo && (value < b.hi || (i == last && value <= b.hi))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub label: String,
    pub count: usize,
    pub correct: usize,
    /// `None` when the bucket is empty.
    pub accuracy_pct: Option<f64>,
    pub avg_confidence_pct: Option<f64>,
    pub avg_ev_pct: Option<f64>,
    pub settled: usize,
    pub total_profit_loss: f64,
    pub avg_profit_loss: Option<f64>,
    pub roi_pct: Option<f64>,
}

impl BucketStats {
    pub fn has_samples(&self, min: usize) -> bool {
        self.count >= min.max(1)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Accumulator {
    count: usize,
    correct: usize,
    confidence_sum: f64,
    ev_sum: f64,
    ev_count: usize,
    pl_sum: f64,
    settled: usize,
}

impl Accumulator {
    pub(crate) fn push(&mut self, record: &RecommendationRecord) {
        self.count += 1;
        if record.was_correct == Some(true) {
            self.correct += 1;
        }
        self.confidence_sum += record.confidence_pct();
        if let Some(ev) = record.expected_value_pct() {
            self.ev_sum += ev;
            self.ev_count += 1;
        }
        if let Some(pl) = record.profit_loss_10 {
            self.pl_sum += pl;
            self.settled += 1;
        }
    }

    pub(crate) fn finish(&self, label: impl Into<String>, stake: f64) -> BucketStats {
        let n = self.count as f64;
        BucketStats {
            label: label.into(),
            count: self.count,
            correct: self.correct,
            accuracy_pct: (self.count > 0).then(|| self.correct as f64 / n * 100.0),
            avg_confidence_pct: (self.count > 0).then(|| self.confidence_sum / n),
            avg_ev_pct: (self.ev_count > 0).then(|| self.ev_sum / self.ev_count as f64),
            settled: self.settled,
            total_profit_loss: self.pl_sum,
            avg_profit_loss: (self.settled > 0).then(|| self.pl_sum / self.settled as f64),
            roi_pct: (self.settled > 0 && stake > 0.0)
                .then(|| self.pl_sum / (self.settled as f64 * stake) * 100.0),
        }
    }
}

/// Aggregates over a fixed band family. Every band is reported, empty ones included.
pub fn aggregate_bands<'a>(
    records: impl IntoIterator<Item = &'a RecommendationRecord>,
    bands: &[Band],
    value: impl Fn(&RecommendationRecord) -> Option<f64>,
    stake: f64,
) -> Vec<BucketStats> {
    let mut accs = vec![Accumulator::default(); bands.len()];
    for record in records {
        let Some(idx) = value(record).and_then(|v| band_index(bands, v)) else {
            continue;
        };
        accs[idx].push(record);
    }
    bands
        .iter()
        .zip(&accs)
        .map(|(band, acc)| acc.finish(band.label, stake))
        .collect()
}

/// Aggregates by an arbitrary key. Buckets come back largest first, then by key.
pub fn aggregate_by<'a, K: Ord>(
    records: impl IntoIterator<Item = &'a RecommendationRecord>,
    key: impl Fn(&RecommendationRecord) -> Option<K>,
    label: impl Fn(&K) -> String,
    stake: f64,
) -> Vec<BucketStats> {
    let mut groups: BTreeMap<K, Accumulator> = BTreeMap::new();
    for record in records {
        let Some(k) = key(record) else {
            continue;
        };
        groups.entry(k).or_default().push(record);
    }
    let mut out: Vec<BucketStats> = groups
        .iter()
        .map(|(k, acc)| acc.finish(label(k), stake))
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

pub fn overall<'a>(
    records: impl IntoIterator<Item = &'a RecommendationRecord>,
    stake: f64,
) -> BucketStats {
    let mut acc = Accumulator::default();
    for record in records {
        acc.push(record);
    }
    acc.finish("all", stake)
}
