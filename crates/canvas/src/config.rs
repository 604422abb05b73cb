use std::env;
use std::path::Path;

use compose::ComposerConfig;
use foundation::{Viewport, ViewportLimits};
use serde::{Deserialize, Serialize};
use streaming::{LoaderConfig, PreloadConfig, StoreConfig};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// A value that would leave the canvas unusable.
    Invalid { field: &'static str, reason: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read config: {err}"),
            ConfigError::Parse(err) => write!(f, "invalid config: {err}"),
            ConfigError::Invalid { field, reason } => write!(f, "config field {field} {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Everything a `CanvasMap` needs. Every field has a default, so a config
/// file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub limits: ViewportLimits,
    pub initial_viewport: Viewport,
    pub store: StoreConfig,
    pub loader: LoaderConfig,
    pub preload: PreloadConfig,
    pub composer: ComposerConfig,
    pub sweep_interval_ms: f64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            limits: ViewportLimits::default(),
            initial_viewport: Viewport::default(),
            store: StoreConfig::default(),
            loader: LoaderConfig::default(),
            preload: PreloadConfig::default(),
            composer: ComposerConfig::default(),
            sweep_interval_ms: 30_000.0,
        }
    }
}

impl CanvasConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: CanvasConfig = serde_json::from_str(text)?;
        config.sync_map_size();
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the store, camera or composer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason })
            }
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        let limits = &self.limits;
        check(positive(limits.map_width), "limits.map_width", "must be positive")?;
        check(positive(limits.map_height), "limits.map_height", "must be positive")?;
        check(positive(limits.min_zoom), "limits.min_zoom", "must be positive")?;
        check(positive(limits.max_zoom), "limits.max_zoom", "must be positive")?;
        check(
            limits.min_zoom <= limits.max_zoom,
            "limits.min_zoom",
            "must not exceed max_zoom",
        )?;
        check(
            non_negative(limits.zoom_sensitivity),
            "limits.zoom_sensitivity",
            "must be non-negative",
        )?;

        let vp = &self.initial_viewport;
        check(
            vp.x.is_finite() && vp.y.is_finite() && vp.zoom.is_finite(),
            "initial_viewport",
            "must be finite",
        )?;
        check(
            positive(vp.width) && positive(vp.height),
            "initial_viewport",
            "must have a positive size",
        )?;

        let store = &self.store;
        check(
            (1..=4096).contains(&store.chunk_size),
            "store.chunk_size",
            "must be within 1..=4096",
        )?;
        check(store.cache_limit > 0, "store.cache_limit", "must be positive")?;
        check(
            (0..=64).contains(&store.preload_distance),
            "store.preload_distance",
            "must be within 0..=64",
        )?;
        check(
            non_negative(store.stale_after_ms),
            "store.stale_after_ms",
            "must be non-negative",
        )?;

        check(self.loader.max_concurrent > 0, "loader.max_concurrent", "must be positive")?;
        check(self.loader.max_batch > 0, "loader.max_batch", "must be positive")?;
        check(
            non_negative(self.preload.debounce_ms),
            "preload.debounce_ms",
            "must be non-negative",
        )?;

        let composer = &self.composer;
        check(
            non_negative(composer.throttle_ms),
            "composer.throttle_ms",
            "must be non-negative",
        )?;
        check(composer.min_buffer > 0, "composer.min_buffer", "must be positive")?;
        check(
            composer.min_buffer <= composer.max_buffer,
            "composer.min_buffer",
            "must not exceed max_buffer",
        )?;
        check(
            positive(self.sweep_interval_ms),
            "sweep_interval_ms",
            "must be positive",
        )
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Applies `CANVAS_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies overrides from `lookup`; unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = &lookup;
        self.limits.map_width = env_var_f64(lookup, "CANVAS_MAP_WIDTH", self.limits.map_width);
        self.limits.map_height = env_var_f64(lookup, "CANVAS_MAP_HEIGHT", self.limits.map_height);
        self.limits.min_zoom = env_var_f64(lookup, "CANVAS_MIN_ZOOM", self.limits.min_zoom);
        self.limits.max_zoom = env_var_f64(lookup, "CANVAS_MAX_ZOOM", self.limits.max_zoom);
        self.store.cache_limit =
            env_var_usize(lookup, "CANVAS_CACHE_LIMIT", self.store.cache_limit);
        self.store.preload_distance = env_var_usize(
            lookup,
            "CANVAS_PRELOAD_DISTANCE",
            self.store.preload_distance as usize,
        ) as i64;
        self.store.chunk_size = env_var_u32(lookup, "CANVAS_CHUNK_SIZE", self.store.chunk_size);
        self.loader.max_concurrent =
            env_var_usize(lookup, "CANVAS_MAX_CONCURRENT", self.loader.max_concurrent);
        self.composer.throttle_ms =
            env_var_f64(lookup, "CANVAS_THROTTLE_MS", self.composer.throttle_ms);
        self.preload.debounce_ms =
            env_var_f64(lookup, "CANVAS_DEBOUNCE_MS", self.preload.debounce_ms);
        self.composer.chunk_borders =
            env_var_bool(lookup, "CANVAS_CHUNK_BORDERS", self.composer.chunk_borders);
        self.sync_map_size();
    }

    /// The store and the camera must agree on the map size.
    fn sync_map_size(&mut self) {
        self.store.map_width = self.limits.map_width;
        self.store.map_height = self.limits.map_height;
    }
}

fn env_var_u32(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_var_bool(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).as_deref() {
        Some("1" | "true" | "yes") => true,
        Some("0" | "false" | "no") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::{CanvasConfig, ConfigError};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn defaults_match_canvas_constants() {
        let c = CanvasConfig::default();
        assert_eq!(c.limits.map_width, 16384.0);
        assert_eq!(c.limits.min_zoom, 0.125);
        assert_eq!(c.store.cache_limit, 200);
        assert_eq!(c.store.chunk_size, 256);
        assert_eq!(c.loader.max_batch, 20);
        assert_eq!(c.preload.debounce_ms, 100.0);
        assert_eq!(c.sweep_interval_ms, 30_000.0);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CanvasConfig::default().validate().is_ok());
    }

    #[test]
    fn unusable_values_are_rejected() {
        let cases = [
            (r#"{"store":{"chunk_size":0}}"#, "store.chunk_size"),
            (r#"{"limits":{"map_width":0}}"#, "limits.map_width"),
            (r#"{"limits":{"min_zoom":8,"max_zoom":2}}"#, "limits.min_zoom"),
            (r#"{"loader":{"max_concurrent":0}}"#, "loader.max_concurrent"),
            (r#"{"composer":{"min_buffer":500,"max_buffer":100}}"#, "composer.min_buffer"),
            (r#"{"initial_viewport":{"width":0}}"#, "initial_viewport"),
        ];
        for (json, expected) in cases {
            match CanvasConfig::from_json_str(json) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected, "{json}"),
                other => panic!("{json}: expected invalid config, got {other:?}"),
            }
        }
    }

    #[test]
    fn env_overrides_are_validated_after_applying() {
        let mut c = CanvasConfig::default();
        c.apply_overrides(|key| (key == "CANVAS_CHUNK_SIZE").then(|| "0".to_string()));
        assert_eq!(c.store.chunk_size, 0);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { field: "store.chunk_size", .. })
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = CanvasConfig::from_json_str(
            r#"{ "limits": { "map_width": 4096, "map_height": 2048 }, "store": { "cache_limit": 50 } }"#,
        )
        .unwrap();
        assert_eq!(c.limits.map_width, 4096.0);
        assert_eq!(c.limits.max_zoom, 16.0);
        assert_eq!(c.store.cache_limit, 50);
        assert_eq!(c.store.map_height, 2048.0);
        assert_eq!(c.loader, CanvasConfig::default().loader);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(
            CanvasConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CanvasConfig::load("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let vars: BTreeMap<&str, &str> = [
            ("CANVAS_CACHE_LIMIT", "64"),
            ("CANVAS_MAP_WIDTH", "8192"),
            ("CANVAS_THROTTLE_MS", "abc"),
            ("CANVAS_CHUNK_BORDERS", "true"),
        ]
        .into_iter()
        .collect();

        let mut c = CanvasConfig::default();
        c.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.store.cache_limit, 64);
        assert_eq!(c.limits.map_width, 8192.0);
        assert_eq!(c.store.map_width, 8192.0);
        assert_eq!(c.composer.throttle_ms, CanvasConfig::default().composer.throttle_ms);
        assert!(c.composer.chunk_borders);
    }
}
