//! Layer configuration.
//!
//! Configuration reaches the layer as a key/value set; where those pairs come
//! from (files, environment, a companion UI) is the loader shim's business.
//! Unrecognized keys are ignored so configs can be shared across layer
//! versions; malformed values keep the default and log what was wrong.

use std::collections::HashMap;

use tracing::{info, warn};

pub const DEFAULT_SCALING: f32 = 0.7;
pub const DEFAULT_SHARPNESS: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Target/source resolution ratio in [0, 1]; 1.0 means sharpen-only.
    pub scaling: f32,
    /// Sharpening strength in [0, 1].
    pub sharpness: f32,
    /// Skip creating the bilinear comparison scaler.
    pub disable_bilinear_scaler: bool,
    /// Format used for runtime-level aliasing and the conversion intermediate.
    pub intermediate_format: wgpu::TextureFormat,
    /// Record the conversion pass on the frame's shared encoder instead of a
    /// separately submitted one.
    pub fast_context_switch: bool,
    /// Accumulate and periodically log per-pass GPU timings.
    pub enable_stats: bool,
    /// Move formats the scaler can handle to the front of the advertised list.
    pub prioritize_capable_formats: bool,
    /// Drop formats the scaler cannot handle from the advertised list.
    pub only_advertise_capable_formats: bool,
    /// Which identity (application or engine name) the values were loaded for.
    pub loaded_for: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scaling: DEFAULT_SCALING,
            sharpness: DEFAULT_SHARPNESS,
            disable_bilinear_scaler: false,
            intermediate_format: wgpu::TextureFormat::Rgba8Unorm,
            fast_context_switch: false,
            enable_stats: false,
            prioritize_capable_formats: true,
            only_advertise_capable_formats: false,
            loaded_for: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn parse_unit_f32(value: &str) -> Option<f32> {
    value.trim().parse::<f32>().ok().map(|v| v.clamp(0.0, 1.0))
}

fn parse_intermediate_format(value: &str) -> Option<wgpu::TextureFormat> {
    match value.trim() {
        "rgba8_unorm" => Some(wgpu::TextureFormat::Rgba8Unorm),
        "rgba8_snorm" => Some(wgpu::TextureFormat::Rgba8Snorm),
        _ => None,
    }
}

impl Config {
    /// Apply one key/value pair. Returns whether the key was recognized.
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        macro_rules! set {
            ($field:ident, $parse:expr) => {
                match $parse(value) {
                    Some(v) => self.$field = v,
                    None => warn!(key, value, "malformed config value, keeping default"),
                }
            };
        }

        match key.trim() {
            "scaling" => set!(scaling, parse_unit_f32),
            "sharpness" => set!(sharpness, parse_unit_f32),
            "disable_bilinear_scaler" => set!(disable_bilinear_scaler, parse_bool),
            "intermediate_format" => set!(intermediate_format, parse_intermediate_format),
            "fast_context_switch" => set!(fast_context_switch, parse_bool),
            "enable_stats" => set!(enable_stats, parse_bool),
            "prioritize_capable_formats" => set!(prioritize_capable_formats, parse_bool),
            "only_advertise_capable_formats" => set!(only_advertise_capable_formats, parse_bool),
            _ => return false,
        }
        true
    }

    pub fn apply_pairs<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (key, value) in pairs {
            if !self.apply(key, value) {
                tracing::debug!(key, "ignoring unrecognized config key");
            }
        }
    }

    /// Log the effective configuration once at activation.
    pub fn dump(&self) {
        match &self.loaded_for {
            Some(name) => info!(name, "loaded configuration"),
            None => info!("no configuration found, using defaults"),
        }
        info!(
            scaling = self.scaling,
            sharpness = self.sharpness,
            disable_bilinear_scaler = self.disable_bilinear_scaler,
            intermediate_format = ?self.intermediate_format,
            fast_context_switch = self.fast_context_switch,
            enable_stats = self.enable_stats,
            prioritize_capable_formats = self.prioritize_capable_formats,
            only_advertise_capable_formats = self.only_advertise_capable_formats,
            "effective configuration"
        );
    }
}

/// Named configuration sets, looked up by application identity.
///
/// The lookup order mirrors the session handshake: the application name is
/// tried first, then the engine name, so per-title overrides win over
/// per-engine ones.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    sets: HashMap<String, Vec<(String, String)>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) {
        self.sets.insert(
            name.into(),
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
    }

    /// Resolve the configuration for `application_name`, falling back to
    /// `engine_name`.
    pub fn resolve(&self, application_name: &str, engine_name: &str) -> Config {
        let mut config = Config::default();
        for name in [application_name, engine_name] {
            if name.is_empty() {
                continue;
            }
            if let Some(pairs) = self.sets.get(name) {
                config.apply_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                config.loaded_for = Some(name.to_owned());
                return config;
            }
        }
        config
    }
}
