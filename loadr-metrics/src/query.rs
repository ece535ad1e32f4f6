use std::collections::HashMap;

use smallvec::SmallVec;

use crate::key::KeyId;
use crate::metrics::{SeriesStorage, counter_totals, gauge_values, rate_totals};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;
use crate::trend::TrendSnapshot;

#[derive(Debug, Clone, Copy)]
enum TagFilter {
    Eq(KeyId, KeyId),
    Has(KeyId),
    Missing(KeyId),
    /// A filter on a string that was never interned; no series can match.
    Never,
}

impl TagFilter {
    fn matches(&self, tags: &TagSet) -> bool {
        match *self {
            TagFilter::Eq(k, v) => tags.get(k) == Some(v),
            TagFilter::Has(k) => tags.get(k).is_some(),
            TagFilter::Missing(k) => tags.get(k).is_none(),
            TagFilter::Never => false,
        }
    }
}

/// Aggregated view over the matching series of one metric.
#[derive(Debug, Clone)]
pub enum MetricSnapshot {
    Counter { sum: u64, samples: u64 },
    /// `value` sums the current value of every series; `max` is the highest any series reached.
    Gauge { value: f64, max: f64 },
    Rate { total: u64, hits: u64 },
    Trend(TrendSnapshot),
}

impl MetricSnapshot {
    /// Fraction of hits for rates.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Rate { total, hits } if *total > 0 => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
enum Acc {
    #[default]
    Empty,
    Counter {
        sum: u64,
        samples: u64,
    },
    Gauge {
        value: f64,
        max: f64,
    },
    Rate {
        total: u64,
        hits: u64,
    },
    Trend(Vec<TrendSnapshot>),
}

impl Acc {
    fn push(&mut self, storage: &SeriesStorage) {
        match storage {
            SeriesStorage::Counter(c) => {
                let (sum, samples) = counter_totals(c);
                if samples == 0 {
                    return;
                }
                match self {
                    Acc::Counter {
                        sum: s,
                        samples: n,
                    } => {
                        *s = s.saturating_add(sum);
                        *n = n.saturating_add(samples);
                    }
                    _ => *self = Acc::Counter { sum, samples },
                }
            }
            SeriesStorage::Gauge(g) => {
                let Some((value, max)) = gauge_values(g) else {
                    return;
                };
                match self {
                    Acc::Gauge { value: v, max: m } => {
                        *v += value;
                        *m = m.max(max);
                    }
                    _ => *self = Acc::Gauge { value, max },
                }
            }
            SeriesStorage::Rate(r) => {
                let (total, hits) = rate_totals(r);
                if total == 0 {
                    return;
                }
                match self {
                    Acc::Rate { total: t, hits: h } => {
                        *t = t.saturating_add(total);
                        *h = h.saturating_add(hits);
                    }
                    _ => *self = Acc::Rate { total, hits },
                }
            }
            SeriesStorage::Trend(t) => {
                // Sorting happens in `finish`, after the lock is released.
                let snap = t.lock().copy();
                if snap.count() == 0 {
                    return;
                }
                match self {
                    Acc::Trend(parts) => parts.push(snap),
                    _ => *self = Acc::Trend(vec![snap]),
                }
            }
        }
    }

    fn finish(self) -> Option<MetricSnapshot> {
        match self {
            Acc::Empty => None,
            Acc::Counter { sum, samples } => Some(MetricSnapshot::Counter { sum, samples }),
            Acc::Gauge { value, max } => Some(MetricSnapshot::Gauge { value, max }),
            Acc::Rate { total, hits } => Some(MetricSnapshot::Rate { total, hits }),
            Acc::Trend(parts) => TrendSnapshot::merge(parts).map(MetricSnapshot::Trend),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    filters: SmallVec<[TagFilter; 4]>,
    group_keys: SmallVec<[KeyId; 4]>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            filters: SmallVec::new(),
            group_keys: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn where_has(mut self, key: KeyId) -> Self {
        self.filters.push(TagFilter::Has(key));
        self
    }

    #[must_use]
    pub fn where_missing(mut self, key: KeyId) -> Self {
        self.filters.push(TagFilter::Missing(key));
        self
    }

    /// Keeps series tagged `key:value`. Unseen strings are not interned and match nothing.
    #[must_use]
    pub fn where_tag(mut self, key: &str, value: &str) -> Self {
        let filter = match (self.registry.find_key(key), self.registry.find_key(value)) {
            (Some(k), Some(v)) => TagFilter::Eq(k, v),
            _ => TagFilter::Never,
        };
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn group_by(mut self, keys: impl IntoIterator<Item = KeyId>) -> Self {
        self.group_keys = keys.into_iter().collect();
        self.group_keys.sort_unstable();
        self.group_keys.dedup();
        self
    }

    fn matches(&self, tags: &TagSet) -> bool {
        self.filters.iter().all(|f| f.matches(tags))
    }

    /// Aggregates every matching series. `None` when they hold no samples.
    pub fn snapshot(self) -> Option<MetricSnapshot> {
        let mut acc = Acc::default();
        self.registry.visit_series(self.metric, |tags, storage| {
            if self.matches(tags) {
                acc.push(storage);
            }
        });
        acc.finish()
    }

    /// Aggregates matching series per distinct projection onto the `group_by` keys.
    pub fn snapshot_grouped(self) -> HashMap<TagSet, MetricSnapshot> {
        let mut groups: HashMap<TagSet, Acc> = HashMap::new();
        self.registry.visit_series(self.metric, |tags, storage| {
            if !self.matches(tags) {
                return;
            }
            groups
                .entry(tags.project(&self.group_keys))
                .or_default()
                .push(storage);
        });

        groups
            .into_iter()
            .filter_map(|(k, acc)| acc.finish().map(|snap| (k, snap)))
            .collect()
    }
}
