//! Environment variables forwarded to launched processes.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ConfigError, ConfigResult};

static KEY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.as_ref().is_some_and(|re| re.is_match(key))
}

/// Ordered set of environment variables.
///
/// Insertion order is kept so the rendered `env K=V ...` prefix matches
/// what the operator wrote; re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars {
    vars: Vec<(String, String)>,
}

impl EnvVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace-separated `KEY=value KEY2=value2` string.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let mut env = Self::new();
        for entry in raw.split_whitespace() {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidEnv(entry.to_string()))?;
            env.set(key, value)?;
        }
        Ok(env)
    }

    /// Build from a TOML-style string map.
    pub fn from_map(map: &HashMap<String, String>) -> ConfigResult<Self> {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        let mut env = Self::new();
        for key in keys {
            env.set(key, &map[key])?;
        }
        Ok(env)
    }

    /// Set a variable, replacing any earlier value for the same key.
    pub fn set(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        if !is_valid_key(key) {
            return Err(ConfigError::InvalidEnv(format!("{key}={value}")));
        }
        self.upsert(key, value);
        Ok(())
    }

    /// Variables the launcher itself injects; keys are compile-time
    /// constants, so no validation is needed.
    pub(crate) fn injected(vars: &[(&'static str, String)]) -> Self {
        let mut env = Self::new();
        for (key, value) in vars {
            env.upsert(key, value);
        }
        env
    }

    fn upsert(&mut self, key: &str, value: &str) {
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.vars.push((key.to_string(), value.to_string())),
        }
    }

    /// Overlay `overrides` onto a copy of `self`; overrides win on collision.
    pub fn merged(&self, overrides: &EnvVars) -> EnvVars {
        let mut out = self.clone();
        for (key, value) in &overrides.vars {
            match out.vars.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => out.vars.push((key.clone(), value.clone())),
            }
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_glog_style_string() {
        let env = EnvVars::parse(
            "GLOG_logtostderr=true GLOG_v=-1 GLOG_minloglevel=0 \
             LIBHDFS3_CONF=/data/opt/hadoop/etc/hadoop/hdfs-site.xml",
        )
        .unwrap();
        assert_eq!(env.len(), 4);
        assert_eq!(env.get("GLOG_v"), Some("-1"));
        assert_eq!(
            env.get("LIBHDFS3_CONF"),
            Some("/data/opt/hadoop/etc/hadoop/hdfs-site.xml")
        );
    }

    #[test]
    fn empty_string_is_empty_env() {
        assert!(EnvVars::parse("   ").unwrap().is_empty());
    }

    #[test]
    fn rejects_entries_without_equals() {
        assert!(matches!(
            EnvVars::parse("GLOG_v=1 oops"),
            Err(ConfigError::InvalidEnv(e)) if e == "oops"
        ));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(EnvVars::parse("1BAD=x").is_err());
        assert!(EnvVars::parse("=x").is_err());
    }

    #[test]
    fn overrides_win_and_keep_position() {
        let base = EnvVars::parse("A=1 B=2").unwrap();
        let overrides = EnvVars::parse("B=3 C=4").unwrap();
        let merged = base.merged(&overrides);
        assert_eq!(
            merged.iter().collect::<Vec<_>>(),
            vec![("A", "1"), ("B", "3"), ("C", "4")]
        );
    }

    #[test]
    fn value_may_contain_equals() {
        let env = EnvVars::parse("JAVA_OPTS=-Dx=y").unwrap();
        assert_eq!(env.get("JAVA_OPTS"), Some("-Dx=y"));
    }

    #[test]
    fn key_validation_is_stable_across_calls() {
        let mut env = EnvVars::new();
        for i in 0..100 {
            env.set(&format!("K_{i}"), "v").unwrap();
            assert!(env.set(&format!("{i}K"), "v").is_err());
        }
        assert_eq!(env.len(), 100);
    }
}
