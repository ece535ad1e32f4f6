//! Trend series storage.
//!
//! A trend keeps every sample until it holds `max_trend_samples` values. Past that the series
//! moves all samples into an HDR histogram (3 significant digits) and keeps recording there, so
//! memory stays bounded for long runs. Count, sum, min and max are tracked exactly in both modes;
//! only percentiles become approximate (relative error below 0.1%).

use hdrhistogram::Histogram;

use crate::stats::nearest_rank;

/// Default per-series cap on exact samples.
pub const DEFAULT_MAX_TREND_SAMPLES: usize = 1_000_000;

/// Fixed-point scale applied before recording into a histogram, so fractional milliseconds survive.
pub const HISTOGRAM_SCALE: f64 = 1000.0;

const HISTOGRAM_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    Stored,
    /// This sample moved the series from exact storage into the histogram.
    Overflowed,
    /// The value was counted but could not be kept for percentiles.
    Dropped,
    /// NaN or infinite.
    Rejected,
}

#[derive(Debug)]
pub(crate) struct TrendSeries {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    samples: Vec<f64>,
    overflow: Option<Histogram<u64>>,
    dropped: u64,
    cap: usize,
}

impl TrendSeries {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: Vec::new(),
            overflow: None,
            dropped: 0,
            cap,
        }
    }

    pub(crate) fn record(&mut self, value: f64) -> Recorded {
        if !value.is_finite() {
            return Recorded::Rejected;
        }

        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if let Some(h) = self.overflow.as_mut() {
            if record_scaled(h, value) {
                return Recorded::Stored;
            }
            self.dropped = self.dropped.saturating_add(1);
            return Recorded::Dropped;
        }

        if self.samples.len() < self.cap {
            self.samples.push(value);
            return Recorded::Stored;
        }

        let Ok(mut h) = Histogram::<u64>::new(HISTOGRAM_SIGFIG) else {
            self.dropped = self.dropped.saturating_add(1);
            return Recorded::Dropped;
        };

        for v in self.samples.drain(..) {
            if !record_scaled(&mut h, v) {
                self.dropped = self.dropped.saturating_add(1);
            }
        }
        if !record_scaled(&mut h, value) {
            self.dropped = self.dropped.saturating_add(1);
        }
        self.samples = Vec::new();
        self.overflow = Some(h);
        Recorded::Overflowed
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Plain copy for use under the series lock. Exact samples keep insertion order until
    /// [`TrendSnapshot::merge`] sorts them.
    pub(crate) fn copy(&self) -> TrendSnapshot {
        let dist = match &self.overflow {
            Some(h) => Distribution::Approx(h.clone()),
            None => Distribution::Exact(self.samples.clone()),
        };

        TrendSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            dropped: self.dropped,
            dist,
        }
    }
}

fn record_scaled(h: &mut Histogram<u64>, value: f64) -> bool {
    // Histograms only hold non-negative integers; negative samples clamp to zero.
    let scaled = (value * HISTOGRAM_SCALE).round().max(0.0);
    h.record(scaled as u64).is_ok()
}

#[derive(Debug, Clone)]
enum Distribution {
    /// Every sample. Sorted ascending once the snapshot leaves `merge`.
    Exact(Vec<f64>),
    Approx(Histogram<u64>),
}

/// Point-in-time copy of one or more trend series.
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    dropped: u64,
    dist: Distribution,
}

impl TrendSnapshot {
    /// Merges series copies into one sorted distribution. Returns `None` when no samples were
    /// recorded.
    pub(crate) fn merge(parts: Vec<TrendSnapshot>) -> Option<TrendSnapshot> {
        let mut parts: Vec<TrendSnapshot> = parts.into_iter().filter(|p| p.count > 0).collect();
        if parts.len() <= 1 {
            return parts.pop().map(TrendSnapshot::sorted);
        }

        let count = parts.iter().map(|p| p.count).sum();
        let sum = parts.iter().map(|p| p.sum).sum();
        let min = parts.iter().map(|p| p.min).fold(f64::INFINITY, f64::min);
        let max = parts.iter().map(|p| p.max).fold(f64::NEG_INFINITY, f64::max);
        let mut dropped: u64 = parts.iter().map(|p| p.dropped).sum();

        let any_approx = parts
            .iter()
            .any(|p| matches!(p.dist, Distribution::Approx(_)));

        let dist = if any_approx {
            let mut merged = match Histogram::<u64>::new(HISTOGRAM_SIGFIG) {
                Ok(h) => h,
                Err(_) => return parts.pop().map(TrendSnapshot::sorted),
            };
            for part in parts {
                match part.dist {
                    Distribution::Approx(h) => {
                        if merged.add(&h).is_err() {
                            dropped = dropped.saturating_add(h.len());
                        }
                    }
                    Distribution::Exact(samples) => {
                        for v in samples {
                            if !record_scaled(&mut merged, v) {
                                dropped = dropped.saturating_add(1);
                            }
                        }
                    }
                }
            }
            Distribution::Approx(merged)
        } else {
            let mut all: Vec<f64> = Vec::with_capacity(count as usize);
            for part in parts {
                if let Distribution::Exact(samples) = part.dist {
                    all.extend(samples);
                }
            }
            all.sort_unstable_by(f64::total_cmp);
            Distribution::Exact(all)
        };

        Some(TrendSnapshot {
            count,
            sum,
            min,
            max,
            dropped,
            dist,
        })
    }

    fn sorted(mut self) -> Self {
        if let Distribution::Exact(samples) = &mut self.dist {
            samples.sort_unstable_by(f64::total_cmp);
        }
        self
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Whether percentiles are computed from every sample.
    pub fn is_exact(&self) -> bool {
        matches!(self.dist, Distribution::Exact(_))
    }

    /// Samples counted but not available for percentile estimation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Nearest-rank percentile (`p` in percent).
    pub fn percentile(&self, p: f64) -> Option<f64> {
        match &self.dist {
            Distribution::Exact(sorted) => nearest_rank(sorted, p),
            Distribution::Approx(h) => {
                if h.is_empty() {
                    return None;
                }
                let q = (p / 100.0).clamp(0.0, 1.0);
                let v = h.value_at_quantile(q) as f64 / HISTOGRAM_SCALE;
                Some(v.clamp(self.min, self.max))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(t: &TrendSeries) -> TrendSnapshot {
        TrendSnapshot::merge(vec![t.copy()]).unwrap_or_else(|| panic!("expected samples"))
    }

    #[test]
    fn exact_mode_tracks_all_samples() {
        let mut t = TrendSeries::new(10);
        for v in [30.0, 10.0, 20.0] {
            assert_eq!(t.record(v), Recorded::Stored);
        }
        assert_eq!(t.record(f64::NAN), Recorded::Rejected);

        let s = snapshot(&t);
        assert!(s.is_exact());
        assert_eq!(s.count(), 3);
        assert_eq!(s.min(), Some(10.0));
        assert_eq!(s.max(), Some(30.0));
        assert_eq!(s.avg(), Some(20.0));
        assert_eq!(s.med(), Some(20.0));
    }

    #[test]
    fn overflow_switches_to_histogram_and_keeps_exact_extrema() {
        let mut t = TrendSeries::new(4);
        for v in 1..=4 {
            assert_eq!(t.record(v as f64), Recorded::Stored);
        }
        assert_eq!(t.record(5.0), Recorded::Overflowed);
        for v in 6..=1000 {
            assert_eq!(t.record(v as f64), Recorded::Stored);
        }

        let s = snapshot(&t);
        assert!(!s.is_exact());
        assert_eq!(s.count(), 1000);
        assert_eq!(s.min(), Some(1.0));
        assert_eq!(s.max(), Some(1000.0));

        let p95 = s.percentile(95.0).unwrap_or_else(|| panic!("expected p95"));
        assert!((p95 - 950.0).abs() <= 2.0, "p95={p95}");
    }

    #[test]
    fn merge_combines_exact_series() {
        let mut a = TrendSeries::new(100);
        let mut b = TrendSeries::new(100);
        for v in [1.0, 3.0, 5.0] {
            a.record(v);
        }
        for v in [2.0, 4.0] {
            b.record(v);
        }

        let merged = TrendSnapshot::merge(vec![a.copy(), b.copy()])
            .unwrap_or_else(|| panic!("expected merged snapshot"));
        assert_eq!(merged.count(), 5);
        assert_eq!(merged.med(), Some(3.0));
        assert_eq!(merged.percentile(100.0), Some(5.0));
    }

    #[test]
    fn merge_of_empty_series_is_none() {
        let a = TrendSeries::new(10);
        assert!(TrendSnapshot::merge(vec![a.copy()]).is_none());
        assert!(TrendSnapshot::merge(Vec::new()).is_none());
    }
}
