use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use loadr_core::metrics::{MetricKind, MetricUnit};
use serde::Deserialize;
use serde::de::{self, MapAccess, Visitor};

/// Top-level script document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScriptYaml {
    #[serde(default)]
    pub base_url: Option<String>,

    /// Defaults for `${NAME}` placeholders.
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub vars: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub metrics: Vec<(String, MetricYaml)>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub scenarios: Vec<(String, ScenarioYaml)>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub thresholds: Vec<(String, ThresholdsYaml)>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub execs: Vec<(String, ExecYaml)>,

    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub max_trend_samples: Option<usize>,

    #[serde(default)]
    pub summary_trend_stats: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct MetricYaml {
    pub kind: MetricKind,
    #[serde(default)]
    pub unit: MetricUnit,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    /// `constant-vus` or `per-vu-iterations`.
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub exec: Option<String>,
    #[serde(default)]
    pub vus: Option<u64>,
    #[serde(default)]
    pub duration: Option<YamlDuration>,
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub max_duration: Option<YamlDuration>,
    #[serde(default)]
    pub start_time: Option<YamlDuration>,
    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdsYaml {
    One(ThresholdItemYaml),
    Many(Vec<ThresholdItemYaml>),
}

impl ThresholdsYaml {
    pub(crate) fn into_items(self) -> Vec<ThresholdItemYaml> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdItemYaml {
    Expr(String),
    Full(ThresholdObjectYaml),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ThresholdObjectYaml {
    pub threshold: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    #[serde(default)]
    pub delay_abort_eval: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ExecYaml {
    #[serde(default)]
    pub group: Option<String>,
    pub request: RequestYaml,
    #[serde(default)]
    pub think_time: Option<YamlDuration>,
    /// Custom trend receiving the request duration.
    #[serde(default)]
    pub trend: Option<String>,
    /// Counters incremented once per iteration.
    #[serde(default)]
    pub counters: Vec<String>,
    /// Counters incremented when every check passed.
    #[serde(default)]
    pub on_pass: Vec<String>,
    /// Counters incremented when at least one check failed.
    #[serde(default)]
    pub on_fail: Vec<String>,
    #[serde(default)]
    pub checks: Vec<CheckYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RequestYaml {
    #[serde(default)]
    pub method: Option<String>,
    /// Joined onto the base URL.
    #[serde(default)]
    pub path: Option<String>,
    /// Absolute URL, used as is.
    #[serde(default)]
    pub url: Option<String>,
    /// `name` tag of the request metrics.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalars")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout: Option<YamlDuration>,
}

/// One named check. Exactly one rule field is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CheckYaml {
    pub name: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub status_range: Option<[u16; 2]>,
    #[serde(default)]
    pub max_duration: Option<YamlDuration>,
    #[serde(default)]
    pub body_is_json: Option<bool>,
    #[serde(default)]
    pub json_type: Option<JsonTypeYaml>,
    /// JSON pointer of an array, object or string that must not be empty.
    #[serde(default)]
    pub json_non_empty: Option<String>,
    #[serde(default)]
    pub json_every: Option<JsonEveryYaml>,
    #[serde(default)]
    pub body_contains: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct JsonTypeYaml {
    #[serde(default)]
    pub pointer: String,
    #[serde(rename = "type")]
    pub ty: JsonKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct JsonEveryYaml {
    #[serde(default)]
    pub pointer: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    pub ty: Option<JsonKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonKind {
    pub fn matches(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Array, Value::Array(_))
                | (Self::Object, Value::Object(_))
                | (Self::Null, Value::Null)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s, 250ms), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// A mapping kept in document order. Duplicate keys are rejected.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct V<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for V<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out: Vec<(String, T)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                if out.iter().any(|(k, _)| *k == key) {
                    return Err(de::Error::custom(format!("duplicate key `{key}`")));
                }
                out.push((key, value));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(V(PhantomData))
}

/// String map whose values may be any YAML scalar. Nulls and nested values are skipped.
fn deserialize_scalars<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw.unwrap_or_default() {
        let s = match v {
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}
