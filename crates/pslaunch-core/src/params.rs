//! Typed parameter set forwarded to the training binary.
//!
//! Parameters are a flat map of scalar values. Recognized keys are
//! declared in [`SCHEMA`] with a kind and the binary's own default, so a
//! misspelled key or a string where a number belongs is caught before
//! anything is launched.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// Keys the binary cannot bootstrap without.
pub const REQUIRED_KEYS: &[&str] = &["input", "cardinality", "num_dims"];

/// Flags the launcher injects per process; users may not set them.
pub const RESERVED_KEYS: &[&str] = &[
    "role",
    "rank",
    "num_workers",
    "num_servers",
    "hosts",
    "my_id",
    "config_file",
];

/// A single scalar parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Convert a TOML scalar. Arrays, tables, and datetimes are rejected.
    pub fn from_toml(key: &str, value: &toml::Value) -> ConfigResult<Self> {
        match value {
            toml::Value::String(s) => Ok(ParamValue::Str(s.clone())),
            toml::Value::Integer(i) => Ok(ParamValue::Int(*i)),
            toml::Value::Float(f) => Ok(ParamValue::Float(*f)),
            toml::Value::Boolean(b) => Ok(ParamValue::Bool(*b)),
            other => Err(ConfigError::ParamType {
                key: key.to_string(),
                expected: "a scalar",
                found: other.type_str(),
            }),
        }
    }

    /// Parse a `--set key=value` override. `true`/`false` become booleans,
    /// integers and floats are recognized, anything else is a string.
    pub fn parse_loose(raw: &str) -> Self {
        match raw {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::Str(raw.to_string())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ParamValue::Str(_) => "string",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Bool(_) => "boolean",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Renders the value as it appears after `--key=`.
///
/// Floats use Rust's shortest round-trip formatting, which never switches
/// to exponent notation and parses back to the identical `f64`.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Declared type of a recognized parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
}

impl ParamKind {
    fn name(&self) -> &'static str {
        match self {
            ParamKind::Str => "string",
            ParamKind::Int => "integer",
            ParamKind::Float => "float",
            ParamKind::Bool => "boolean",
        }
    }

    /// Integers are accepted where floats are declared.
    fn accepts(&self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamKind::Str, ParamValue::Str(_))
                | (ParamKind::Int, ParamValue::Int(_))
                | (ParamKind::Float, ParamValue::Float(_))
                | (ParamKind::Float, ParamValue::Int(_))
                | (ParamKind::Bool, ParamValue::Bool(_))
        )
    }
}

/// One recognized parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub key: &'static str,
    pub kind: ParamKind,
    /// The binary's default, as it would be written on the command line.
    pub default: Option<&'static str>,
    pub help: &'static str,
}

impl ParamDef {
    const fn new(
        key: &'static str,
        kind: ParamKind,
        default: Option<&'static str>,
        help: &'static str,
    ) -> Self {
        Self {
            key,
            kind,
            default,
            help,
        }
    }

    /// Typed default value, if the binary declares one.
    pub fn default_value(&self) -> Option<ParamValue> {
        let raw = self.default?;
        Some(match self.kind {
            ParamKind::Str => ParamValue::Str(raw.to_string()),
            ParamKind::Int => ParamValue::Int(raw.parse().ok()?),
            ParamKind::Float => ParamValue::Float(raw.parse().ok()?),
            ParamKind::Bool => ParamValue::Bool(raw == "true"),
        })
    }
}

use ParamKind::{Bool, Float, Int, Str};

/// Parameters understood by `LinearClassifier` and `LRLossReport`.
pub const SCHEMA: &[ParamDef] = &[
    ParamDef::new("input", Str, None, "distributed filesystem input url"),
    ParamDef::new("cardinality", Int, None, "number of samples"),
    ParamDef::new("num_dims", Int, None, "number of feature dimensions"),
    ParamDef::new("hdfs_namenode", Str, Some(""), "namenode hostname"),
    ParamDef::new("hdfs_namenode_port", Int, Some("-1"), "namenode port"),
    ParamDef::new("num_workers_per_node", Int, Some("1"), "worker slots per host"),
    ParamDef::new("num_servers_per_node", Int, Some("1"), "server slots per host"),
    ParamDef::new("report_interval", Int, Some("0"), "model dump interval"),
    ParamDef::new("kStorageType", Str, Some(""), "Map|Vector"),
    ParamDef::new("kModelType", Str, Some("ASP"), "ASP|SSP|BSP|SparseSSP"),
    ParamDef::new("kStaleness", Int, Some("0"), "staleness bound"),
    ParamDef::new("trainer", Str, Some("logistic"), "logistic|linear"),
    ParamDef::new("optimizer", Str, Some("sgd"), "sgd|svrg"),
    ParamDef::new("async", Bool, Some("true"), "asynchronous svrg"),
    ParamDef::new("batch_size", Int, Some("100"), "batch size per iteration"),
    ParamDef::new("num_iters", Int, Some("10"), "number of iterations"),
    ParamDef::new("num_epoches", Int, Some("5"), "number of svrg epochs"),
    ParamDef::new("alpha", Float, Some("0.1"), "learning rate"),
    ParamDef::new("regularizer", Str, Some("none"), "none|l1|l2|elastic_net"),
    ParamDef::new("eta1", Float, Some("0.001"), "l1 regularization factor"),
    ParamDef::new("eta2", Float, Some("0.001"), "l2 regularization factor"),
    ParamDef::new("model_input", Str, Some(""), "model directory for loss reports"),
    ParamDef::new("max_version", Int, Some("0"), "inclusive max model version"),
];

/// Look up a recognized parameter by key.
pub fn lookup(key: &str) -> Option<&'static ParamDef> {
    SCHEMA.iter().find(|def| def.key == key)
}

/// Flat, ordered parameter map.
///
/// Keys are kept sorted so rendered command lines are reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a TOML table such as `[params]`.
    pub fn from_toml_table(table: &toml::Table) -> ConfigResult<Self> {
        let mut set = Self::new();
        for (key, value) in table {
            set.insert(key.clone(), ParamValue::from_toml(key, value)?);
        }
        Ok(set)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.values.insert(key.into(), value.into())
    }

    /// Overlay `other` onto `self`; keys in `other` win.
    pub fn merge(&mut self, other: &ParameterSet) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Value of `key`, falling back to the schema default.
    pub fn get_or_default(&self, key: &str) -> Option<ParamValue> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| lookup(key).and_then(ParamDef::default_value))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check that the set can be rendered into a command line: required
    /// keys present, no reserved keys, and every float finite.
    pub fn check_renderable(&self) -> ConfigResult<()> {
        for key in REQUIRED_KEYS {
            if !self.values.contains_key(*key) {
                return Err(ConfigError::MissingParam((*key).to_string()));
            }
        }
        for (key, value) in &self.values {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::ReservedParam(key.clone()));
            }
            if let ParamValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(ConfigError::NonFiniteParam {
                        key: key.clone(),
                        value: *f,
                    });
                }
            }
        }
        Ok(())
    }

    /// Check every key against [`SCHEMA`].
    ///
    /// Type mismatches are always errors. Unknown keys are errors when
    /// `strict` is set and warnings otherwise.
    pub fn check_schema(&self, strict: bool) -> ConfigResult<()> {
        for (key, value) in &self.values {
            match lookup(key) {
                Some(def) if !def.kind.accepts(value) => {
                    return Err(ConfigError::ParamType {
                        key: key.clone(),
                        expected: def.kind.name(),
                        found: value.kind_name(),
                    });
                }
                Some(_) => {}
                None if strict => return Err(ConfigError::UnknownParam(key.clone())),
                None => warn!(%key, "unrecognized parameter, forwarding as-is"),
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut set = ParameterSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("input", "hdfs:///datasets/classification/a9");
        params.insert("cardinality", 32561_i64);
        params.insert("num_dims", 123_i64);
        params
    }

    #[test]
    fn learning_rate_round_trips_exactly() {
        for v in [0.00001_f64, 0.001, 0.1, 1e-12, 123456.789, 1.0 / 3.0] {
            let rendered = ParamValue::Float(v).to_string();
            assert!(!rendered.contains('e'), "exponent in {rendered}");
            assert_eq!(rendered.parse::<f64>().unwrap(), v);
        }
        assert_eq!(ParamValue::Float(0.00001).to_string(), "0.00001");
    }

    #[test]
    fn booleans_render_lowercase() {
        assert_eq!(ParamValue::Bool(true).to_string(), "true");
        assert_eq!(ParamValue::Bool(false).to_string(), "false");
    }

    #[test]
    fn each_required_key_is_enforced() {
        assert!(minimal().check_renderable().is_ok());
        for key in REQUIRED_KEYS {
            let mut params = minimal();
            params.values.remove(*key);
            match params.check_renderable() {
                Err(ConfigError::MissingParam(k)) => assert_eq!(k, *key),
                other => panic!("expected MissingParam({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn non_finite_floats_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut params = minimal();
            params.insert("alpha", bad);
            assert!(matches!(
                params.check_renderable(),
                Err(ConfigError::NonFiniteParam { .. })
            ));
        }
    }

    #[test]
    fn reserved_keys_rejected() {
        let mut params = minimal();
        params.insert("rank", 3_i64);
        assert!(matches!(
            params.check_renderable(),
            Err(ConfigError::ReservedParam(k)) if k == "rank"
        ));
    }

    #[test]
    fn schema_type_mismatch_is_error() {
        let mut params = minimal();
        params.insert("num_iters", "many");
        assert!(matches!(
            params.check_schema(false),
            Err(ConfigError::ParamType { expected: "integer", found: "string", .. })
        ));
    }

    #[test]
    fn integers_accepted_for_float_keys() {
        let mut params = minimal();
        params.insert("alpha", 1_i64);
        assert!(params.check_schema(true).is_ok());
    }

    #[test]
    fn unknown_keys_warn_or_reject() {
        let mut params = minimal();
        params.insert("learning_rate", 0.1);
        assert!(params.check_schema(false).is_ok());
        assert!(matches!(
            params.check_schema(true),
            Err(ConfigError::UnknownParam(k)) if k == "learning_rate"
        ));
    }

    #[test]
    fn defaults_come_from_schema() {
        let params = minimal();
        assert_eq!(params.get_or_default("num_servers_per_node"), Some(ParamValue::Int(1)));
        assert_eq!(params.get_or_default("async"), Some(ParamValue::Bool(true)));
        assert_eq!(params.get_or_default("nope"), None);
    }

    #[test]
    fn loose_parsing_of_overrides() {
        assert_eq!(ParamValue::parse_loose("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::parse_loose("42"), ParamValue::Int(42));
        assert_eq!(ParamValue::parse_loose("0.00001"), ParamValue::Float(0.00001));
        assert_eq!(ParamValue::parse_loose("SSP"), ParamValue::Str("SSP".into()));
    }

    #[test]
    fn from_toml_rejects_arrays() {
        let table: toml::Table = toml::from_str("input = [1, 2]").unwrap();
        assert!(matches!(
            ParameterSet::from_toml_table(&table),
            Err(ConfigError::ParamType { .. })
        ));
    }

    #[test]
    fn merge_overrides_existing_keys() {
        let mut base = minimal();
        let overlay: ParameterSet = [("num_dims", 47236_i64)].into_iter().collect();
        base.merge(&overlay);
        assert_eq!(base.get("num_dims"), Some(&ParamValue::Int(47236)));
    }
}
