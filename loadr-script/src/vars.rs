use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const BASE_URL_VAR: &str = "BASE_URL";

/// Overrides applied on top of a script's own `vars`.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// `--env KEY=VALUE` pairs. Highest precedence.
    pub env_overrides: Vec<(String, String)>,
    /// Snapshot of the process environment.
    pub process_env: BTreeMap<String, String>,
    /// `--base-url`. Wins over `BASE_URL` and `baseUrl`.
    pub base_url: Option<String>,
}

impl LoadOptions {
    /// Options seeded with the current process environment.
    pub fn from_process_env() -> Self {
        Self {
            process_env: std::env::vars().collect(),
            ..Self::default()
        }
    }

    fn env_value(&self, name: &str) -> Option<&str> {
        self.env_overrides
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.process_env.get(name).map(String::as_str))
    }
}

/// Values available to `${NAME}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    /// Merges script defaults, process env and `--env` overrides, in increasing precedence.
    /// `BASE_URL` is set to the resolved base URL when there is one.
    pub(crate) fn resolve(
        script: BTreeMap<String, String>,
        base_url: Option<&str>,
        opts: &LoadOptions,
    ) -> (Self, Option<String>) {
        let mut values = script;
        values.extend(opts.process_env.clone());
        values.extend(opts.env_overrides.iter().cloned());

        let base_url = opts
            .base_url
            .clone()
            .or_else(|| opts.env_value(BASE_URL_VAR).map(str::to_string))
            .or_else(|| base_url.map(str::to_string))
            .or_else(|| values.get(BASE_URL_VAR).cloned())
            .filter(|url| !url.trim().is_empty());

        if let Some(url) = &base_url {
            values.insert(BASE_URL_VAR.to_string(), url.clone());
        }
        (Self { values }, base_url)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replaces every `${NAME}` in `raw`. `$$` is a literal `$`.
    pub fn substitute(&self, raw: &str, context: &str) -> Result<String> {
        if !raw.contains('$') {
            return Ok(raw.to_string());
        }

        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos + 1..];
            if let Some(after) = tail.strip_prefix('$') {
                out.push('$');
                rest = after;
            } else if let Some(after) = tail.strip_prefix('{') {
                let end = after
                    .find('}')
                    .ok_or_else(|| Error::UnterminatedPlaceholder {
                        context: context.to_string(),
                    })?;
                let name = after[..end].trim();
                let value = self.get(name).ok_or_else(|| Error::UndefinedVar {
                    name: name.to_string(),
                    context: context.to_string(),
                })?;
                out.push_str(value);
                rest = &after[end + 1..];
            } else {
                out.push('$');
                rest = tail;
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Substitutes every string inside a JSON value.
    pub fn substitute_json(
        &self,
        value: &serde_json::Value,
        context: &str,
    ) -> Result<serde_json::Value> {
        use serde_json::Value;
        Ok(match value {
            Value::String(s) => Value::String(self.substitute(s, context)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.substitute_json(v, context))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.substitute_json(v, context)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("CATEGORY".to_string(), "smartphones".to_string()),
            ("LIMIT".to_string(), "30".to_string()),
            ("REGION".to_string(), "eu".to_string()),
        ])
    }

    #[test]
    fn cli_env_beats_process_env_beats_script_vars() {
        let opts = LoadOptions {
            env_overrides: vec![("CATEGORY".to_string(), "laptops".to_string())],
            process_env: BTreeMap::from([
                ("CATEGORY".to_string(), "beauty".to_string()),
                ("LIMIT".to_string(), "10".to_string()),
            ]),
            base_url: None,
        };
        let (vars, _) = Vars::resolve(script_vars(), None, &opts);
        assert_eq!(vars.get("CATEGORY"), Some("laptops"));
        assert_eq!(vars.get("LIMIT"), Some("10"));
        assert_eq!(vars.get("REGION"), Some("eu"));
    }

    #[test]
    fn base_url_precedence() {
        let doc_url = Some("https://doc.test");

        let (_, url) = Vars::resolve(BTreeMap::new(), doc_url, &LoadOptions::default());
        assert_eq!(url.as_deref(), Some("https://doc.test"));

        let env = LoadOptions {
            process_env: BTreeMap::from([(BASE_URL_VAR.to_string(), "https://env.test".to_string())]),
            ..LoadOptions::default()
        };
        let (vars, url) = Vars::resolve(BTreeMap::new(), doc_url, &env);
        assert_eq!(url.as_deref(), Some("https://env.test"));
        assert_eq!(vars.get(BASE_URL_VAR), Some("https://env.test"));

        let flag = LoadOptions {
            base_url: Some("https://flag.test".to_string()),
            ..env
        };
        let (vars, url) = Vars::resolve(BTreeMap::new(), doc_url, &flag);
        assert_eq!(url.as_deref(), Some("https://flag.test"));
        assert_eq!(vars.get(BASE_URL_VAR), Some("https://flag.test"));

        let (_, url) = Vars::resolve(BTreeMap::new(), None, &LoadOptions::default());
        assert_eq!(url, None);
    }

    #[test]
    fn substitutes_placeholders() {
        let (vars, _) = Vars::resolve(script_vars(), None, &LoadOptions::default());
        assert_eq!(
            vars.substitute("/products/category/${CATEGORY}?limit=${ LIMIT }", "path")
                .unwrap_or_else(|e| panic!("{e}")),
            "/products/category/smartphones?limit=30"
        );
        assert_eq!(
            vars.substitute("cost: $$5, $x", "body")
                .unwrap_or_else(|e| panic!("{e}")),
            "cost: $5, $x"
        );
    }

    #[test]
    fn rejects_undefined_and_unterminated_placeholders() {
        let vars = Vars::default();
        assert!(matches!(
            vars.substitute("/x/${MISSING}", "path"),
            Err(Error::UndefinedVar { name, .. }) if name == "MISSING"
        ));
        assert!(matches!(
            vars.substitute("/x/${OPEN", "path"),
            Err(Error::UnterminatedPlaceholder { .. })
        ));
    }

    #[test]
    fn substitutes_inside_json() {
        let (vars, _) = Vars::resolve(script_vars(), None, &LoadOptions::default());
        let value = serde_json::json!({"category": "${CATEGORY}", "tags": ["${REGION}", 1]});
        let out = vars
            .substitute_json(&value, "json")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            out,
            serde_json::json!({"category": "smartphones", "tags": ["eu", 1]})
        );
    }
}
