//! Configuration for spatial index groups.
use crate::query::{DEFAULT_LIMIT, QueryArgs};
use serde::de::Error;

/// Index server configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Row limit for queries that don't set one
    #[serde(default = "Config::default_limit")]
    pub default_limit: u64,

    /// Tree parameters applied to every freshly created index
    #[serde(default)]
    pub tree: TreeDefaults,
}

/// Chunking and fill parameters of newly created spatial trees.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeDefaults {
    /// Inner node size in bytes before a split
    #[serde(default = "TreeDefaults::default_chunk_threshold")]
    pub kp_chunk_threshold: usize,

    /// Leaf node size in bytes before a split
    #[serde(default = "TreeDefaults::default_chunk_threshold")]
    pub kv_chunk_threshold: usize,

    #[serde(default = "TreeDefaults::default_min_fill_rate")]
    pub min_fill_rate: f64,
}

impl TreeDefaults {
    const fn default_chunk_threshold() -> usize {
        7168
    }

    const fn default_min_fill_rate() -> f64 {
        0.4
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.kp_chunk_threshold == 0 || self.kv_chunk_threshold == 0 {
            return Err("Chunk thresholds must be greater than zero".to_string());
        }
        if !(self.min_fill_rate > 0.0 && self.min_fill_rate <= 0.5) {
            return Err(format!(
                "Minimum fill rate must be in (0, 0.5], got {}",
                self.min_fill_rate
            ));
        }
        Ok(())
    }
}

impl Default for TreeDefaults {
    fn default() -> Self {
        Self {
            kp_chunk_threshold: Self::default_chunk_threshold(),
            kv_chunk_threshold: Self::default_chunk_threshold(),
            min_fill_rate: Self::default_min_fill_rate(),
        }
    }
}

impl Config {
    const fn default_limit() -> u64 {
        DEFAULT_LIMIT
    }

    pub fn with_tree(mut self, tree: TreeDefaults) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_chunk_thresholds(mut self, kp: usize, kv: usize) -> Self {
        assert!(kp > 0 && kv > 0, "Chunk thresholds must be greater than zero");
        self.tree.kp_chunk_threshold = kp;
        self.tree.kv_chunk_threshold = kv;
        self
    }

    pub fn with_min_fill_rate(mut self, rate: f64) -> Self {
        assert!(
            rate > 0.0 && rate <= 0.5,
            "Minimum fill rate must be in (0, 0.5]"
        );
        self.tree.min_fill_rate = rate;
        self
    }

    pub fn with_default_limit(mut self, limit: u64) -> Self {
        assert!(limit > 0, "Default limit must be greater than zero");
        self.default_limit = limit;
        self
    }

    /// Query arguments carrying this configuration's defaults.
    pub fn query_args(&self) -> QueryArgs {
        QueryArgs::default().with_limit(self.default_limit)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.tree.validate()?;

        if self.default_limit == 0 {
            return Err("Default limit must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_limit: Self::default_limit(),
            tree: TreeDefaults::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.tree.kp_chunk_threshold, 7168);
        assert_eq!(config.tree.kv_chunk_threshold, 7168);
        assert_eq!(config.tree.min_fill_rate, 0.4);
        assert_eq!(config.default_limit, DEFAULT_LIMIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default()
            .with_chunk_thresholds(1024, 2048)
            .with_min_fill_rate(0.3)
            .with_default_limit(50);

        let json = config.to_json().unwrap();
        let deserialized = Config::from_json(&json).unwrap();
        assert_eq!(deserialized, config);
        assert_eq!(deserialized.query_args().limit, 50);
    }

    #[test]
    fn test_config_partial_json() {
        let config = Config::from_json(r#"{"tree": {"min_fill_rate": 0.25}}"#).unwrap();
        assert_eq!(config.tree.min_fill_rate, 0.25);
        assert_eq!(config.tree.kp_chunk_threshold, 7168);
        assert_eq!(config.default_limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::from_json(r#"{"default_limit": 0}"#).is_err());
        assert!(Config::from_json(r#"{"tree": {"min_fill_rate": 0.9}}"#).is_err());
        assert!(Config::from_json(r#"{"tree": {"kv_chunk_threshold": 0}}"#).is_err());
        assert!(Config::from_json(r#"{"unknown": 1}"#).is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_config_toml() {
        let config = Config::from_toml("default_limit = 10\n[tree]\nkp_chunk_threshold = 512\n")
            .unwrap();
        assert_eq!(config.default_limit, 10);
        assert_eq!(config.tree.kp_chunk_threshold, 512);

        let rendered = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&rendered).unwrap(), config);
    }
}
