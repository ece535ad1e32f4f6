use std::fmt;
use std::time::Duration;

use loadr_metrics::{MetricKind, is_valid_metric_name};

/// All thresholds declared for one metric selector.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    /// Metric name, optionally followed by a tag filter: `http_req_duration{endpoint:list}`.
    pub selector: String,
    pub thresholds: Vec<ThresholdSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub expression: String,
    /// Cancel the run as soon as this threshold fails.
    pub abort_on_fail: bool,
    /// Grace period after run start before `abort_on_fail` is evaluated.
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdSpec {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ThresholdError {
    #[error("invalid threshold `{expression}` for `{selector}`: {reason}")]
    InvalidExpression {
        selector: String,
        expression: String,
        reason: String,
    },

    #[error("invalid threshold selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("threshold `{selector}` references unknown metric `{metric}`")]
    UnknownMetric { selector: String, metric: String },

    #[error("threshold `{expression}` on `{selector}`: `{stat}` is not available for {kind} metrics")]
    UnsupportedStat {
        selector: String,
        expression: String,
        stat: String,
        kind: MetricKind,
    },

    #[error("invalid trend statistic `{0}`")]
    InvalidTrendStat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Lte => observed <= bound,
            Self::Gt => observed > bound,
            Self::Gte => observed >= bound,
            Self::Eq => observed == bound,
            Self::Ne => observed != bound,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

impl fmt::Display for ThresholdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistic a threshold (or a summary column) reads from a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stat {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl Stat {
    /// Whether a metric of `kind` can produce this statistic.
    pub fn supports(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Self::Count),
            MetricKind::Gauge => matches!(self, Self::Value | Self::Max),
            MetricKind::Rate => matches!(self, Self::Rate | Self::Count),
            MetricKind::Trend => matches!(
                self,
                Self::Avg | Self::Min | Self::Max | Self::Med | Self::Count | Self::P(_)
            ),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::Value => f.write_str("value"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

impl std::str::FromStr for Stat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let lower = s.to_ascii_lowercase();
        let stat = match lower.as_str() {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "med" => Self::Med,
            "count" => Self::Count,
            "rate" => Self::Rate,
            "value" => Self::Value,
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|v| v.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown statistic `{s}`"))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| format!("invalid percentile `{s}`"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(format!("percentile out of range (0, 100]: `{s}`"));
                }
                Self::P(p)
            }
        };
        Ok(stat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub stat: Stat,
    pub op: ThresholdOp,
    pub bound: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.stat, self.op, self.bound)
    }
}

/// Parses `<stat> <op> <number>`, e.g. `p(99.9) < 1800`. Whitespace is ignored.
pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() {
        return Err("missing statistic".to_string());
    }
    if right.is_empty() {
        return Err("missing bound".to_string());
    }

    let stat: Stat = left.parse()?;
    let bound: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric bound `{right}`"))?;
    if !bound.is_finite() {
        return Err(format!("bound must be finite, got `{right}`"));
    }

    Ok(ThresholdExpr { stat, op, bound })
}

/// Metric name plus the tag filter of a threshold key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub metric: String,
    pub tags: Vec<(String, String)>,
}

/// Parses `name` or `name{key:value,key2=value2}`.
pub fn parse_selector(raw: &str) -> Result<MetricSelector, ThresholdError> {
    let invalid = |reason: &str| ThresholdError::InvalidSelector {
        selector: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    let (metric, filter) = match trimmed.find('{') {
        Some(open) => {
            let inner = trimmed[open..]
                .strip_prefix('{')
                .and_then(|v| v.strip_suffix('}'))
                .ok_or_else(|| invalid("unterminated tag filter"))?;
            (trimmed[..open].trim(), Some(inner))
        }
        None => (trimmed, None),
    };

    if !is_valid_metric_name(metric) {
        return Err(invalid("invalid metric name"));
    }

    let mut tags = Vec::new();
    if let Some(filter) = filter {
        for pair in filter.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair
                .split_once(':')
                .or_else(|| pair.split_once('='))
                .ok_or_else(|| invalid("tag filters must be `key:value`"))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() {
                return Err(invalid("empty tag key"));
            }
            tags.push((k.to_string(), v.to_string()));
        }
        if tags.is_empty() {
            return Err(invalid("empty tag filter"));
        }
    }

    Ok(MetricSelector {
        metric: metric.to_string(),
        tags,
    })
}

/// Parses the trend columns shown in the summary, e.g. `["avg", "p(95)"]`.
pub fn parse_trend_stats(raw: &[String]) -> Result<Vec<Stat>, ThresholdError> {
    raw.iter()
        .map(|s| {
            s.parse::<Stat>()
                .ok()
                .filter(|stat| stat.supports(MetricKind::Trend))
                .ok_or_else(|| ThresholdError::InvalidTrendStat(s.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.stat, Stat::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.bound, 123.0);
    }

    #[test]
    fn parse_threshold_expr_accepts_fractional_percentiles() {
        let expr = parse_threshold_expr("p(99.9)<1800").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.stat, Stat::P(99.9));
        assert_eq!(expr.op, ThresholdOp::Lt);
        assert_eq!(expr.to_string(), "p(99.9)<1800");

        let expr = parse_threshold_expr("rate!=0").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.op, ThresholdOp::Ne);
    }

    #[test]
    fn parse_threshold_expr_rejects_garbage() {
        for bad in ["", "p(101)<1", "p(0)<1", "avg 5", "foo<1", "avg<", "<5", "avg<abc", "avg<inf"] {
            assert!(parse_threshold_expr(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn parse_selector_with_tags() {
        let sel = parse_selector("http_req_duration{endpoint:categories, method=GET}")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sel.metric, "http_req_duration");
        assert_eq!(
            sel.tags,
            vec![
                ("endpoint".to_string(), "categories".to_string()),
                ("method".to_string(), "GET".to_string()),
            ]
        );

        let plain = parse_selector("checks").unwrap_or_else(|e| panic!("{e}"));
        assert!(plain.tags.is_empty());

        assert!(parse_selector("http_reqs{").is_err());
        assert!(parse_selector("http_reqs{}").is_err());
        assert!(parse_selector("bad name").is_err());
    }

    #[test]
    fn stat_kind_compatibility() {
        assert!(Stat::P(95.0).supports(MetricKind::Trend));
        assert!(!Stat::P(95.0).supports(MetricKind::Counter));
        assert!(Stat::Rate.supports(MetricKind::Rate));
        assert!(!Stat::Rate.supports(MetricKind::Trend));
        assert!(Stat::Count.supports(MetricKind::Counter));
        assert!(Stat::Value.supports(MetricKind::Gauge));
    }

    #[test]
    fn trend_stats_parse() {
        let stats = parse_trend_stats(&["avg".to_string(), "p(99.9)".to_string()])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(stats, vec![Stat::Avg, Stat::P(99.9)]);
        assert!(parse_trend_stats(&["rate".to_string()]).is_err());
    }
}
