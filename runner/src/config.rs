use crate::grid::{expand, Distribution, GridError};
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file: {0}")]
    FileNotFound(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    InvalidConfig(#[from] serde_yaml::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    // parameter ranges in declaration order, the order fixes the Cartesian nesting order
    pub parameters: ParameterSet,

    #[serde(default, alias = "db")]
    pub database: DatabaseConfig,

    // settings for the external job submission command
    #[serde(default)]
    pub submit: SubmitConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SubmitConfig {
    // arguments placed before the per-parameter flags
    #[serde(default)]
    pub args: Vec<String>,

    // seconds to wait for the submit command, unset waits forever
    pub timeout: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ParamRange {
    #[serde(alias = "dist")]
    pub distribution: Distribution,
    pub min: f64,
    pub max: f64,
    pub num: usize,
}

#[derive(Clone, Debug, Default)]
/// Parameter name to range mapping that preserves declaration order.
/// A plain map type would reorder keys and silently change the grid layout.
pub struct ParameterSet(Vec<(String, ParamRange)>);

impl ParameterSet {
    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamRange)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;

        for (name, range) in &self.0 {
            map.serialize_entry(name, range)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = ParameterSet;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a mapping of parameter name to range")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, ParamRange)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));

                while let Some((name, range)) = map.next_entry::<String, ParamRange>()? {
                    if entries.iter().any(|(existing, _)| *existing == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate parameter: {name}"
                        )));
                    }

                    entries.push((name, range));
                }

                Ok(ParameterSet(entries))
            }
        }

        deserializer.deserialize_map(SetVisitor)
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let raw = fs::read_to_string(path)?;

        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Resolve the store path: CLI flag > config key > config path with a `.db` extension.
    pub fn database_path(&self, config_path: &Path, explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| self.database.path.clone())
            .unwrap_or_else(|| config_path.with_extension("db"))
    }

    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.parameters.is_empty() {
            error!("No parameters were defined, unable to build a grid");
            contains_error = true;
        }

        for (name, range) in self.parameters.iter() {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|character| character.is_ascii_alphanumeric() || character == '_')
            {
                error!(
                    "Parameter name '{name}' must be non-empty and limited to [A-Za-z0-9_] \
                     to be usable as a column name and a submit flag"
                );
                contains_error = true;
            }

            if let Err(error) = expand(range.distribution, range.min, range.max, range.num) {
                match error {
                    GridError::InvalidRange(reason) => {
                        error!("parameters.{name} is invalid: {reason}")
                    }
                    error => error!("parameters.{name} is invalid: {error}"),
                }
                contains_error = true;
            }
        }

        contains_error
    }
}
