use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

fn pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)")
                .map_err(|e| tracing::error!("❌ Invalid interpolation pattern: {}", e))
                .ok()
        })
        .as_ref()
}

/// 程序層級的環境變數快照，用於 `${VAR:-default}` 展開
#[derive(Debug, Clone, Default)]
pub struct Ambient {
    vars: HashMap<String, String>,
}

impl Ambient {
    /// 擷取目前程序的環境變數
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// 展開字串中的變數參照
    ///
    /// - `${VAR:-default}`：未設定或為空時使用 default
    /// - `${VAR-default}`：僅在未設定時使用 default
    /// - `${VAR}` / `$VAR`：未設定時展開為空字串
    /// - `$$`：字面 `$`
    pub fn substitute(&self, input: &str) -> String {
        let Some(pattern) = pattern() else {
            return input.to_string();
        };
        pattern
            .replace_all(input, |caps: &Captures| {
                if &caps[0] == "$$" {
                    return "$".to_string();
                }

                let name = caps
                    .get(1)
                    .or_else(|| caps.get(4))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let value = self.get(name);

                match (caps.get(2).map(|m| m.as_str()), caps.get(3)) {
                    (Some(":-"), Some(default)) => match value {
                        Some(v) if !v.is_empty() => v.to_string(),
                        _ => default.as_str().to_string(),
                    },
                    (Some("-"), Some(default)) => value
                        .map(str::to_string)
                        .unwrap_or_else(|| default.as_str().to_string()),
                    _ => match value {
                        Some(v) => v.to_string(),
                        None => {
                            tracing::warn!("⚠️ Variable '{}' is not set, using empty string", name);
                            String::new()
                        }
                    },
                }
            })
            .into_owned()
    }

    pub fn substitute_all(&self, values: &[String]) -> Vec<String> {
        values.iter().map(|v| self.substitute(v)).collect()
    }

    pub fn substitute_map(&self, values: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        values
            .iter()
            .map(|(k, v)| (k.clone(), self.substitute(v)))
            .collect()
    }
}
