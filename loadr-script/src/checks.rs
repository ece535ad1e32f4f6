use std::time::Duration;

use loadr_core::HttpResponse;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::vars::Vars;
use crate::yaml::{CheckYaml, JsonKind, YamlDuration};

/// A predicate over one response.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckRule {
    Status(u16),
    /// Inclusive.
    StatusRange(u16, u16),
    /// Response took strictly less than this.
    MaxDuration(Duration),
    BodyIsJson,
    JsonType {
        pointer: String,
        kind: JsonKind,
    },
    /// Array, object or string at `pointer` with at least one element.
    JsonNonEmpty(String),
    /// Array at `pointer` whose every element satisfies the constraints. With no `fields` the
    /// constraints apply to the element itself.
    JsonEvery {
        pointer: String,
        fields: Vec<String>,
        equals: Option<Value>,
        kind: Option<JsonKind>,
    },
    BodyContains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: String,
    pub rule: CheckRule,
}

impl CheckRule {
    pub fn needs_json(&self) -> bool {
        matches!(
            self,
            Self::BodyIsJson | Self::JsonType { .. } | Self::JsonNonEmpty(_) | Self::JsonEvery { .. }
        )
    }

    /// `json` is the parsed body, `None` when it is not valid JSON.
    pub fn evaluate(&self, res: &HttpResponse, json: Option<&Value>) -> bool {
        match self {
            Self::Status(status) => res.status == *status,
            Self::StatusRange(lo, hi) => (*lo..=*hi).contains(&res.status),
            Self::MaxDuration(max) => res.duration < *max,
            Self::BodyIsJson => json.is_some(),
            Self::JsonType { pointer, kind } => json
                .and_then(|v| v.pointer(pointer))
                .is_some_and(|v| kind.matches(v)),
            Self::JsonNonEmpty(pointer) => match json.and_then(|v| v.pointer(pointer)) {
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Object(map)) => !map.is_empty(),
                Some(Value::String(s)) => !s.is_empty(),
                _ => false,
            },
            Self::JsonEvery {
                pointer,
                fields,
                equals,
                kind,
            } => {
                let Some(Value::Array(items)) = json.and_then(|v| v.pointer(pointer)) else {
                    return false;
                };
                let satisfies = |v: &Value| {
                    kind.is_none_or(|k| k.matches(v)) && equals.as_ref().is_none_or(|e| e == v)
                };
                items.iter().all(|item| {
                    if fields.is_empty() {
                        satisfies(item)
                    } else {
                        fields
                            .iter()
                            .all(|f| item.get(f.as_str()).is_some_and(satisfies))
                    }
                })
            }
            Self::BodyContains(needle) => res.body_utf8().is_some_and(|b| b.contains(needle.as_str())),
        }
    }
}

fn validate_pointer(pointer: &str) -> std::result::Result<(), String> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(format!(
            "JSON pointer `{pointer}` must be empty or start with `/`"
        ))
    }
}

pub(crate) fn compile_check(exec: &str, check: CheckYaml, vars: &Vars) -> Result<Check> {
    let CheckYaml {
        name,
        status,
        status_range,
        max_duration,
        body_is_json,
        json_type,
        json_non_empty,
        json_every,
        body_contains,
    } = check;

    let invalid = |reason: String| Error::InvalidCheck {
        exec: exec.to_string(),
        check: name.clone(),
        reason,
    };
    let context = format!("exec `{exec}`, check `{name}`");

    let mut rules: Vec<CheckRule> = Vec::with_capacity(1);
    if let Some(s) = status {
        rules.push(CheckRule::Status(s));
    }
    if let Some([lo, hi]) = status_range {
        if lo > hi {
            return Err(invalid(format!("statusRange [{lo}, {hi}] is empty")));
        }
        rules.push(CheckRule::StatusRange(lo, hi));
    }
    if let Some(d) = max_duration.map(YamlDuration::into_inner) {
        rules.push(CheckRule::MaxDuration(d));
    }
    match body_is_json {
        Some(true) => rules.push(CheckRule::BodyIsJson),
        Some(false) => return Err(invalid("bodyIsJson only accepts `true`".to_string())),
        None => {}
    }
    if let Some(t) = json_type {
        validate_pointer(&t.pointer).map_err(&invalid)?;
        rules.push(CheckRule::JsonType {
            pointer: t.pointer,
            kind: t.ty,
        });
    }
    if let Some(pointer) = json_non_empty {
        validate_pointer(&pointer).map_err(&invalid)?;
        rules.push(CheckRule::JsonNonEmpty(pointer));
    }
    if let Some(every) = json_every {
        validate_pointer(&every.pointer).map_err(&invalid)?;
        if every.equals.is_none() && every.ty.is_none() {
            return Err(invalid("jsonEvery needs `equals` or `type`".to_string()));
        }
        let mut fields = every.fields;
        if let Some(field) = every.field {
            fields.insert(0, field);
        }
        let equals = every
            .equals
            .map(|v| vars.substitute_json(&v, &context))
            .transpose()?;
        rules.push(CheckRule::JsonEvery {
            pointer: every.pointer,
            fields,
            equals,
            kind: every.ty,
        });
    }
    if let Some(needle) = body_contains {
        rules.push(CheckRule::BodyContains(vars.substitute(&needle, &context)?));
    }

    if rules.len() != 1 {
        return Err(invalid(format!(
            "expected exactly one rule, found {}",
            rules.len()
        )));
    }
    let rule = rules.remove(0);
    Ok(Check { name, rule })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(status: u16, body: &str, ms: u64) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
            duration: Duration::from_millis(ms),
            bytes_sent: 0,
            bytes_received: body.len() as u64,
        }
    }

    fn eval(rule: &CheckRule, res: &HttpResponse) -> bool {
        let json: Option<Value> = serde_json::from_slice(&res.body).ok();
        rule.evaluate(res, json.as_ref())
    }

    fn compile(src: &str) -> Result<Check> {
        let check: CheckYaml = serde_yaml::from_str(src).unwrap_or_else(|e| panic!("yaml: {e}"));
        compile_check("list", check, &Vars::default())
    }

    #[test]
    fn status_and_duration_rules() {
        let ok = response(204, "", 120);
        let err = response(503, "", 1600);
        let range = CheckRule::StatusRange(200, 299);
        assert!(eval(&range, &ok));
        assert!(!eval(&range, &err));
        assert!(eval(&CheckRule::Status(503), &err));

        let fast = CheckRule::MaxDuration(Duration::from_millis(1500));
        assert!(eval(&fast, &ok));
        assert!(!eval(&fast, &err));
        assert!(!eval(&fast, &response(200, "", 1500)));
    }

    #[test]
    fn category_details_checks() {
        let res = response(
            200,
            r#"[{"slug":"beauty","name":"Beauty","url":"https://x/beauty"},{"slug":"laptops","name":"Laptops","url":"https://x/laptops"}]"#,
            80,
        );
        assert!(eval(&CheckRule::BodyIsJson, &res));
        assert!(eval(
            &CheckRule::JsonType {
                pointer: String::new(),
                kind: JsonKind::Array
            },
            &res
        ));
        assert!(eval(&CheckRule::JsonNonEmpty(String::new()), &res));
        let every = CheckRule::JsonEvery {
            pointer: String::new(),
            fields: vec!["slug".to_string(), "name".to_string(), "url".to_string()],
            equals: None,
            kind: Some(JsonKind::String),
        };
        assert!(eval(&every, &res));

        let broken = response(200, r#"[{"slug":"beauty","name":"Beauty"}]"#, 80);
        assert!(!eval(&every, &broken));
    }

    #[test]
    fn json_rules_fail_on_non_json_bodies() {
        let res = response(500, "injected failure", 5);
        assert!(!eval(&CheckRule::BodyIsJson, &res));
        assert!(!eval(&CheckRule::JsonNonEmpty("/products".to_string()), &res));
        assert!(eval(&CheckRule::BodyContains("injected".to_string()), &res));
    }

    #[test]
    fn json_every_compares_fields_and_elements() {
        let res = response(
            200,
            r#"{"products":[{"category":"smartphones"},{"category":"smartphones"}],"names":["a","b"]}"#,
            10,
        );
        let same_category = |category: &str| CheckRule::JsonEvery {
            pointer: "/products".to_string(),
            fields: vec!["category".to_string()],
            equals: Some(Value::String(category.to_string())),
            kind: None,
        };
        assert!(eval(&same_category("smartphones"), &res));
        assert!(!eval(&same_category("laptops"), &res));

        let strings_only = CheckRule::JsonEvery {
            pointer: "/names".to_string(),
            fields: Vec::new(),
            equals: None,
            kind: Some(JsonKind::String),
        };
        assert!(eval(&strings_only, &res));
        // Pointer to a non-array never matches.
        assert!(!eval(
            &CheckRule::JsonEvery {
                pointer: "/missing".to_string(),
                fields: Vec::new(),
                equals: None,
                kind: Some(JsonKind::String),
            },
            &res
        ));
    }

    #[test]
    fn compiles_single_rule_and_substitutes_literals() {
        let check: CheckYaml = serde_yaml::from_str(
            "name: all match\njsonEvery: { pointer: /products, field: category, equals: \"${CATEGORY}\" }\n",
        )
        .unwrap_or_else(|e| panic!("yaml: {e}"));
        let (vars, _) = Vars::resolve(
            std::collections::BTreeMap::from([(
                "CATEGORY".to_string(),
                "smartphones".to_string(),
            )]),
            None,
            &crate::vars::LoadOptions::default(),
        );
        let compiled = compile_check("byCategory", check, &vars).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            compiled.rule,
            CheckRule::JsonEvery {
                pointer: "/products".to_string(),
                fields: vec!["category".to_string()],
                equals: Some(Value::String("smartphones".to_string())),
                kind: None,
            }
        );
    }

    #[test]
    fn rejects_invalid_checks() {
        assert!(matches!(compile("name: empty\n"), Err(Error::InvalidCheck { .. })));
        assert!(matches!(
            compile("name: two\nstatus: 200\nbodyIsJson: true\n"),
            Err(Error::InvalidCheck { .. })
        ));
        assert!(matches!(
            compile("name: ptr\njsonNonEmpty: products\n"),
            Err(Error::InvalidCheck { .. })
        ));
        assert!(matches!(
            compile("name: range\nstatusRange: [299, 200]\n"),
            Err(Error::InvalidCheck { .. })
        ));
        assert!(matches!(
            compile("name: every\njsonEvery: { pointer: /products }\n"),
            Err(Error::InvalidCheck { .. })
        ));
    }
}
