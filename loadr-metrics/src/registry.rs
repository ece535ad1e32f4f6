use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{Counter, Gauge, MetricHandle, MetricKind, MetricUnit, Rate, SeriesStorage, Trend};
use crate::query::Query;
use crate::sample::{Sample, SampleValue};
use crate::tags::TagSet;
use crate::trend::DEFAULT_MAX_TREND_SAMPLES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

#[derive(Debug, Clone)]
pub struct MetricDef {
    pub name: Arc<str>,
    pub kind: MetricKind,
    pub unit: MetricUnit,
}

#[derive(Debug, Default)]
struct Defs {
    list: Vec<MetricDef>,
    by_name: AHashMap<Arc<str>, MetricId>,
}

/// The metric sink shared by every virtual user of a run.
///
/// Each metric owns a map of series keyed by tag set; both levels are sharded `DashMap`s, so
/// writers to different metrics (or different series of one metric) do not contend.
#[derive(Debug)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Defs>,
    storage: DashMap<MetricId, DashMap<TagSet, SeriesStorage>>,
    max_trend_samples: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TREND_SAMPLES)
    }
}

pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 128
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Registry {
    #[must_use]
    pub fn new(max_trend_samples: usize) -> Self {
        Self {
            interner: Interner::default(),
            defs: RwLock::new(Defs::default()),
            storage: DashMap::new(),
            max_trend_samples,
        }
    }

    /// Registers a metric, or returns the existing id when `name` is already known with the same kind.
    pub fn register(&self, name: &str, kind: MetricKind, unit: MetricUnit) -> Result<MetricId> {
        if !is_valid_metric_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }

        let mut defs = self.defs.write();
        if let Some(&id) = defs.by_name.get(name) {
            let existing = defs.list[id.0 as usize].kind;
            if existing != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing,
                    requested: kind,
                });
            }
            return Ok(id);
        }

        let id = MetricId(defs.list.len() as u32);
        let name: Arc<str> = Arc::from(name);
        defs.list.push(MetricDef {
            name: name.clone(),
            kind,
            unit,
        });
        defs.by_name.insert(name, id);
        self.storage.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricDef)> {
        let defs = self.defs.read();
        let id = *defs.by_name.get(name)?;
        Some((id, defs.list[id.0 as usize].clone()))
    }

    pub fn definition(&self, id: MetricId) -> Option<MetricDef> {
        self.defs.read().list.get(id.0 as usize).cloned()
    }

    /// All registered metrics in registration order.
    pub fn definitions(&self) -> Vec<(MetricId, MetricDef)> {
        self.defs
            .read()
            .list
            .iter()
            .enumerate()
            .map(|(idx, def)| (MetricId(idx as u32), def.clone()))
            .collect()
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    /// Looks up an interned string without interning it.
    pub fn find_key(&self, key: &str) -> Option<KeyId> {
        self.interner.get(key)
    }

    pub fn key_str(&self, key: KeyId) -> Option<Arc<str>> {
        self.interner.resolve(key)
    }

    /// Interns and sorts tags. A repeated key keeps its last value.
    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        let mut resolved: Vec<(KeyId, KeyId)> = Vec::with_capacity(tags.len());
        for (k, v) in tags {
            let k = self.resolve_key(k);
            let v = self.resolve_key(v);
            match resolved.iter_mut().find(|(ek, _)| *ek == k) {
                Some(slot) => slot.1 = v,
                None => resolved.push((k, v)),
            }
        }
        resolved.sort_unstable();
        TagSet::from_sorted_iter(resolved)
    }

    pub fn tags_to_strings(&self, tags: &TagSet) -> Vec<(String, String)> {
        tags.iter()
            .map(|(k, v)| {
                (
                    self.key_str(k).map(|s| s.to_string()).unwrap_or_default(),
                    self.key_str(v).map(|s| s.to_string()).unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Returns (creating on first use) the series of `metric` identified by `tags`.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let def = self.definition(metric)?;
        let series_map = self.storage.get(&metric)?;

        // `entry` keeps creation atomic: two first writers never get distinct storages.
        let storage = series_map
            .entry(tags)
            .or_insert_with(|| SeriesStorage::new(def.kind, self.max_trend_samples));
        Some(storage.handle(&def.name))
    }

    pub fn counter(&self, metric: MetricId, tags: TagSet) -> Option<Counter> {
        match self.handle(metric, tags)? {
            MetricHandle::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn gauge(&self, metric: MetricId, tags: TagSet) -> Option<Gauge> {
        match self.handle(metric, tags)? {
            MetricHandle::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn rate(&self, metric: MetricId, tags: TagSet) -> Option<Rate> {
        match self.handle(metric, tags)? {
            MetricHandle::Rate(r) => Some(r),
            _ => None,
        }
    }

    pub fn trend(&self, metric: MetricId, tags: TagSet) -> Option<Trend> {
        match self.handle(metric, tags)? {
            MetricHandle::Trend(t) => Some(t),
            _ => None,
        }
    }

    /// Applies a batch of samples. The batch is validated up front, so a bad sample rejects the
    /// whole batch and nothing is recorded.
    pub fn commit(&self, samples: &[Sample]) -> Result<()> {
        {
            let defs = self.defs.read();
            for s in samples {
                let id: u32 = s.metric.0;
                let def = defs
                    .list
                    .get(id as usize)
                    .ok_or(Error::UnknownMetric(id))?;
                if def.kind != s.value.kind() {
                    return Err(Error::SampleKind {
                        name: def.name.to_string(),
                        metric: def.kind,
                        sample: s.value.kind(),
                    });
                }
            }
        }

        for s in samples {
            let Some(handle) = self.handle(s.metric, s.tags.clone()) else {
                continue;
            };
            match (handle, s.value) {
                (MetricHandle::Counter(c), SampleValue::Counter(n)) => c.add(n),
                (MetricHandle::Gauge(g), SampleValue::Gauge(v)) => g.set(v),
                (MetricHandle::Rate(r), SampleValue::Rate(hit)) => r.add(hit),
                (MetricHandle::Trend(t), SampleValue::Trend(v)) => t.add(v),
                _ => {}
            }
        }

        Ok(())
    }

    pub(crate) fn visit_series(&self, metric: MetricId, mut f: impl FnMut(&TagSet, &SeriesStorage)) {
        let Some(series_map) = self.storage.get(&metric) else {
            return;
        };
        for series in series_map.iter() {
            f(series.key(), series.value());
        }
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_is_idempotent_per_kind() {
        let reg = Registry::default();
        let a = reg
            .register("http_reqs", MetricKind::Counter, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = reg
            .register("http_reqs", MetricKind::Counter, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);

        let err = reg
            .register("http_reqs", MetricKind::Trend, MetricUnit::Time)
            .err()
            .unwrap_or_else(|| panic!("expected kind mismatch"));
        assert!(matches!(err, Error::KindMismatch { .. }));
    }

    #[test]
    fn register_rejects_invalid_names() {
        let reg = Registry::default();
        for bad in ["", "1abc", "has space", "dash-name"] {
            assert!(
                reg.register(bad, MetricKind::Counter, MetricUnit::Default)
                    .is_err(),
                "{bad:?} should be rejected"
            );
        }
        assert!(
            reg.register("_ok_name2", MetricKind::Counter, MetricUnit::Default)
                .is_ok()
        );
    }

    #[test]
    fn resolve_tags_sorts_and_keeps_last_duplicate() {
        let reg = Registry::default();
        let tags = reg.resolve_tags(&[("scenario", "a"), ("group", "g"), ("scenario", "b")]);
        assert_eq!(tags.len(), 2);
        let mut strings = reg.tags_to_strings(&tags);
        strings.sort();
        assert_eq!(
            strings,
            vec![
                ("group".to_string(), "g".to_string()),
                ("scenario".to_string(), "b".to_string())
            ]
        );
    }

    #[test]
    fn commit_rejects_whole_batch_on_kind_mismatch() {
        let reg = Registry::default();
        let c = reg
            .register("c", MetricKind::Counter, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));
        let tags = reg.resolve_tags(&[("scenario", "s")]);

        let batch = vec![
            Sample {
                metric: c,
                tags: tags.clone(),
                value: SampleValue::Counter(1),
                at: Duration::ZERO,
            },
            Sample {
                metric: c,
                tags: tags.clone(),
                value: SampleValue::Trend(1.0),
                at: Duration::ZERO,
            },
        ];
        assert!(reg.commit(&batch).is_err());

        let counter = reg
            .counter(c, tags)
            .unwrap_or_else(|| panic!("expected counter"));
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        const N: u64 = 64;

        let reg = Registry::default();
        let id = reg
            .register("hits", MetricKind::Counter, MetricUnit::Default)
            .unwrap_or_else(|e| panic!("{e}"));

        std::thread::scope(|scope| {
            for _ in 0..N {
                scope.spawn(|| {
                    for _ in 0..N {
                        // Every writer resolves the series itself to race on its creation too.
                        let tags = reg.resolve_tags(&[("scenario", "s")]);
                        if let Some(c) = reg.counter(id, tags) {
                            c.add(1);
                        }
                    }
                });
            }
        });

        let total = reg.query(id).snapshot();
        match total {
            Some(crate::MetricSnapshot::Counter { sum, samples }) => {
                assert_eq!(sum, N * N);
                assert_eq!(samples, N * N);
            }
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }

    #[test]
    fn trend_snapshots_during_writes_stay_sorted_and_complete() {
        const WRITERS: u64 = 4;
        const PER_WRITER: u64 = 20_000;

        let reg = Registry::default();
        let id = reg
            .register("latency", MetricKind::Trend, MetricUnit::Time)
            .unwrap_or_else(|e| panic!("{e}"));
        let tags = reg.resolve_tags(&[("scenario", "s")]);
        let trend = reg
            .trend(id, tags)
            .unwrap_or_else(|| panic!("expected trend"));

        let check = |t: &crate::TrendSnapshot| {
            let mut prev = f64::NEG_INFINITY;
            for p in 1..=100 {
                let v = t
                    .percentile(p as f64)
                    .unwrap_or_else(|| panic!("expected p({p})"));
                assert!(v >= prev, "p({p})={v} below {prev}");
                prev = v;
            }
            assert_eq!(t.percentile(100.0), t.max());
            assert_eq!(t.percentile(0.0), t.min());
        };

        std::thread::scope(|scope| {
            for w in 0..WRITERS {
                let trend = trend.clone();
                scope.spawn(move || {
                    // Descending values so insertion order is never sorted.
                    for i in (0..PER_WRITER).rev() {
                        trend.add((i * WRITERS + w) as f64);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    if let Some(crate::MetricSnapshot::Trend(t)) = reg.query(id).snapshot() {
                        assert!(t.count() <= WRITERS * PER_WRITER);
                        check(&t);
                    }
                }
            });
        });

        match reg.query(id).snapshot() {
            Some(crate::MetricSnapshot::Trend(t)) => {
                assert_eq!(t.count(), WRITERS * PER_WRITER);
                assert!(t.is_exact());
                check(&t);
                assert_eq!(t.min(), Some(0.0));
                assert_eq!(t.max(), Some((WRITERS * PER_WRITER - 1) as f64));
                assert_eq!(t.med(), Some((WRITERS * PER_WRITER / 2 - 1) as f64));
            }
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }
}
