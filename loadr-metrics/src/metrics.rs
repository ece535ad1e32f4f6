use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::trend::{Recorded, TrendSeries};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonic sum.
    Counter,
    /// Last written value.
    Gauge,
    /// Fraction of non-zero samples.
    Rate,
    /// Distribution of samples.
    Trend,
}

/// Optional unit tag of a metric (affects formatting only).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    #[default]
    Default,
    /// Milliseconds.
    Time,
    /// Bytes.
    Data,
}

#[derive(Debug, Default)]
pub(crate) struct CounterCells {
    sum: AtomicU64,
    samples: AtomicU64,
}

#[derive(Debug, Default)]
pub(crate) struct GaugeCells {
    value: AtomicU64,
    max: AtomicU64,
    touched: AtomicBool,
}

#[derive(Debug, Default)]
pub(crate) struct RateCells {
    total: AtomicU64,
    hits: AtomicU64,
}

#[derive(Debug)]
pub(crate) enum SeriesStorage {
    Counter(Arc<CounterCells>),
    Gauge(Arc<GaugeCells>),
    Rate(Arc<RateCells>),
    Trend(Arc<Mutex<TrendSeries>>),
}

impl SeriesStorage {
    pub(crate) fn new(kind: MetricKind, max_trend_samples: usize) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::default()),
            MetricKind::Gauge => Self::Gauge(Arc::new(GaugeCells {
                value: AtomicU64::new(0f64.to_bits()),
                max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
                touched: AtomicBool::new(false),
            })),
            MetricKind::Rate => Self::Rate(Arc::default()),
            MetricKind::Trend => {
                Self::Trend(Arc::new(Mutex::new(TrendSeries::new(max_trend_samples))))
            }
        }
    }

    pub(crate) fn handle(&self, name: &Arc<str>) -> MetricHandle {
        match self {
            Self::Counter(c) => MetricHandle::Counter(Counter(c.clone())),
            Self::Gauge(g) => MetricHandle::Gauge(Gauge(g.clone())),
            Self::Rate(r) => MetricHandle::Rate(Rate(r.clone())),
            Self::Trend(t) => MetricHandle::Trend(Trend {
                name: name.clone(),
                series: t.clone(),
            }),
        }
    }
}

/// Handle to one counter series.
#[derive(Debug, Clone)]
pub struct Counter(Arc<CounterCells>);

impl Counter {
    #[inline]
    pub fn add(&self, n: u64) {
        self.0.sum.fetch_add(n, Ordering::Relaxed);
        self.0.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.sum.load(Ordering::Relaxed)
    }

    /// Number of `add` calls.
    pub fn samples(&self) -> u64 {
        self.0.samples.load(Ordering::Relaxed)
    }
}

/// Handle to one gauge series.
#[derive(Debug, Clone)]
pub struct Gauge(Arc<GaugeCells>);

impl Gauge {
    pub fn set(&self, value: f64) {
        self.0.value.store(value.to_bits(), Ordering::Relaxed);
        self.bump_max(value);
        self.0.touched.store(true, Ordering::Relaxed);
    }

    /// Adds `delta` to the current value and returns the new value.
    pub fn add(&self, delta: f64) -> f64 {
        let mut cur = self.0.value.load(Ordering::Relaxed);
        let new = loop {
            let new = f64::from_bits(cur) + delta;
            match self.0.value.compare_exchange_weak(
                cur,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break new,
                Err(observed) => cur = observed,
            }
        };
        self.bump_max(new);
        self.0.touched.store(true, Ordering::Relaxed);
        new
    }

    fn bump_max(&self, candidate: f64) {
        let mut cur = self.0.max.load(Ordering::Relaxed);
        while candidate > f64::from_bits(cur) {
            match self.0.max.compare_exchange_weak(
                cur,
                candidate.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn get(&self) -> Option<f64> {
        self.0
            .touched
            .load(Ordering::Relaxed)
            .then(|| f64::from_bits(self.0.value.load(Ordering::Relaxed)))
    }
}

/// Handle to one rate series.
#[derive(Debug, Clone)]
pub struct Rate(Arc<RateCells>);

impl Rate {
    #[inline]
    pub fn add(&self, hit: bool) {
        self.add_many(u64::from(hit), 1);
    }

    #[inline]
    pub fn add_many(&self, hits: u64, total: u64) {
        self.0.hits.fetch_add(hits, Ordering::Relaxed);
        self.0.total.fetch_add(total, Ordering::Relaxed);
    }

    /// `(total, hits)`.
    pub fn get(&self) -> (u64, u64) {
        (
            self.0.total.load(Ordering::Relaxed),
            self.0.hits.load(Ordering::Relaxed),
        )
    }
}

/// Handle to one trend series.
#[derive(Debug, Clone)]
pub struct Trend {
    name: Arc<str>,
    series: Arc<Mutex<TrendSeries>>,
}

impl Trend {
    pub fn add(&self, value: f64) {
        let outcome = self.series.lock().record(value);
        match outcome {
            Recorded::Stored => {}
            Recorded::Overflowed => tracing::warn!(
                metric = %self.name,
                "trend sample cap reached; switching series to histogram (percentiles now approximate)"
            ),
            Recorded::Dropped => {
                tracing::debug!(metric = %self.name, "trend sample dropped from percentile set")
            }
            Recorded::Rejected => {
                tracing::debug!(metric = %self.name, value, "non-finite trend sample ignored")
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.series.lock().count()
    }
}

/// Typed handle to a single series.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Counter),
    Gauge(Gauge),
    Rate(Rate),
    Trend(Trend),
}

impl MetricHandle {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}

pub(crate) fn counter_totals(c: &CounterCells) -> (u64, u64) {
    (
        c.sum.load(Ordering::Relaxed),
        c.samples.load(Ordering::Relaxed),
    )
}

pub(crate) fn gauge_values(g: &GaugeCells) -> Option<(f64, f64)> {
    g.touched.load(Ordering::Relaxed).then(|| {
        (
            f64::from_bits(g.value.load(Ordering::Relaxed)),
            f64::from_bits(g.max.load(Ordering::Relaxed)),
        )
    })
}

pub(crate) fn rate_totals(r: &RateCells) -> (u64, u64) {
    (
        r.total.load(Ordering::Relaxed),
        r.hits.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_new_initializes_defaults() {
        match SeriesStorage::new(MetricKind::Counter, 10) {
            SeriesStorage::Counter(c) => assert_eq!(counter_totals(&c), (0, 0)),
            _ => panic!("expected counter"),
        }

        match SeriesStorage::new(MetricKind::Gauge, 10) {
            SeriesStorage::Gauge(g) => assert!(gauge_values(&g).is_none()),
            _ => panic!("expected gauge"),
        }

        match SeriesStorage::new(MetricKind::Rate, 10) {
            SeriesStorage::Rate(r) => assert_eq!(rate_totals(&r), (0, 0)),
            _ => panic!("expected rate"),
        }

        match SeriesStorage::new(MetricKind::Trend, 10) {
            SeriesStorage::Trend(t) => assert_eq!(t.lock().count(), 0),
            _ => panic!("expected trend"),
        }
    }

    #[test]
    fn handles_update_series() {
        let name: Arc<str> = Arc::from("m");

        let MetricHandle::Counter(c) = SeriesStorage::new(MetricKind::Counter, 10).handle(&name)
        else {
            panic!("expected counter handle");
        };
        c.add(2);
        c.add(3);
        assert_eq!(c.get(), 5);
        assert_eq!(c.samples(), 2);

        let MetricHandle::Gauge(g) = SeriesStorage::new(MetricKind::Gauge, 10).handle(&name) else {
            panic!("expected gauge handle");
        };
        assert_eq!(g.get(), None);
        g.set(10.0);
        assert_eq!(g.add(5.0), 15.0);
        assert_eq!(g.add(-12.0), 3.0);
        assert_eq!(g.get(), Some(3.0));
        assert_eq!(gauge_values(&g.0), Some((3.0, 15.0)));

        let MetricHandle::Rate(r) = SeriesStorage::new(MetricKind::Rate, 10).handle(&name) else {
            panic!("expected rate handle");
        };
        r.add(true);
        r.add(false);
        r.add_many(3, 8);
        assert_eq!(r.get(), (10, 4));

        let MetricHandle::Trend(t) = SeriesStorage::new(MetricKind::Trend, 10).handle(&name) else {
            panic!("expected trend handle");
        };
        t.add(1.5);
        t.add(f64::NAN);
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn kind_and_unit_parse_from_strings() {
        assert_eq!("trend".parse::<MetricKind>().ok(), Some(MetricKind::Trend));
        assert_eq!("time".parse::<MetricUnit>().ok(), Some(MetricUnit::Time));
        assert_eq!(MetricKind::Counter.to_string(), "counter");
    }
}
