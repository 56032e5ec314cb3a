//! Threshold profiles
//!
//! A profile is a named vector of per-detector thresholds. Three ship
//! built in (strict / normal / loose); `profiles.yaml` can override or add
//! named profiles on top. Resolution order for one detector call:
//! caller's `custom_thresholds` > profile > nothing (missing key is a
//! config error surfaced by the detector).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{QualscanError, Result};
use crate::types::DetectionLevel;

pub const PROFILE_STRICT: &str = "strict";
pub const PROFILE_NORMAL: &str = "normal";
pub const PROFILE_LOOSE: &str = "loose";

/// Named threshold vector: detector name -> threshold key -> value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub thresholds: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Profile {
    pub fn get(&self, detector: &str, key: &str) -> Option<f64> {
        self.thresholds.get(detector).and_then(|m| m.get(key)).copied()
    }
}

/// All named profiles known to the process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSet {
    pub profiles: BTreeMap<String, Profile>,
}

fn table(entries: &[(&str, &[(&str, f64)])]) -> BTreeMap<String, BTreeMap<String, f64>> {
    entries
        .iter()
        .map(|(det, kvs)| {
            (
                det.to_string(),
                kvs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            )
        })
        .collect()
}

impl ProfileSet {
    /// The built-in strict/normal/loose vectors.
    ///
    /// Directions per detector: blur/contrast fire below their minimum,
    /// brightness outside [min, max], the rest above their maximum.
    pub fn builtin() -> Self {
        let strict = table(&[
            ("blur", &[("min_sharpness", 150.0)]),
            ("brightness", &[("min_mean", 90.0), ("max_mean", 170.0)]),
            ("contrast", &[("min_stddev", 45.0), ("min_dynamic_range", 80.0)]),
            (
                "color",
                &[
                    ("max_cast_ratio", 1.30),
                    ("min_saturation", 0.08),
                    ("max_channel_dominance", 0.50),
                ],
            ),
            ("noise", &[("max_residual", 4.0)]),
            ("stripe", &[("max_peak_ratio", 6.0)]),
            (
                "occlusion",
                &[("max_dark_tile_ratio", 0.25), ("min_tile_variance", 35.0)],
            ),
            ("signal_loss", &[("min_uniformity", 0.97)]),
            (
                "freeze",
                &[("min_ssim", 0.990), ("max_mad", 1.2), ("min_freeze_duration", 0.5)],
            ),
            (
                "scene_change",
                &[("min_hist_diff", 0.35), ("min_edge_jump", 0.20), ("min_gap", 1.0)],
            ),
            (
                "shake",
                &[("max_flow", 3.0), ("window", 5.0), ("min_hits", 2.0)],
            ),
            ("video", &[("min_event_duration", 0.3)]),
        ]);
        let normal = table(&[
            ("blur", &[("min_sharpness", 100.0)]),
            ("brightness", &[("min_mean", 70.0), ("max_mean", 190.0)]),
            ("contrast", &[("min_stddev", 30.0), ("min_dynamic_range", 60.0)]),
            (
                "color",
                &[
                    ("max_cast_ratio", 1.45),
                    ("min_saturation", 0.06),
                    ("max_channel_dominance", 0.55),
                ],
            ),
            ("noise", &[("max_residual", 6.0)]),
            ("stripe", &[("max_peak_ratio", 8.0)]),
            (
                "occlusion",
                &[("max_dark_tile_ratio", 0.35), ("min_tile_variance", 25.0)],
            ),
            ("signal_loss", &[("min_uniformity", 0.985)]),
            (
                "freeze",
                &[("min_ssim", 0.995), ("max_mad", 0.8), ("min_freeze_duration", 1.0)],
            ),
            (
                "scene_change",
                &[("min_hist_diff", 0.45), ("min_edge_jump", 0.25), ("min_gap", 1.0)],
            ),
            (
                "shake",
                &[("max_flow", 4.0), ("window", 5.0), ("min_hits", 3.0)],
            ),
            ("video", &[("min_event_duration", 0.5)]),
        ]);
        let loose = table(&[
            ("blur", &[("min_sharpness", 60.0)]),
            ("brightness", &[("min_mean", 50.0), ("max_mean", 215.0)]),
            ("contrast", &[("min_stddev", 20.0), ("min_dynamic_range", 50.0)]),
            (
                "color",
                &[
                    ("max_cast_ratio", 1.65),
                    ("min_saturation", 0.04),
                    ("max_channel_dominance", 0.62),
                ],
            ),
            ("noise", &[("max_residual", 9.0)]),
            ("stripe", &[("max_peak_ratio", 11.0)]),
            (
                "occlusion",
                &[("max_dark_tile_ratio", 0.50), ("min_tile_variance", 18.0)],
            ),
            ("signal_loss", &[("min_uniformity", 0.995)]),
            (
                "freeze",
                &[("min_ssim", 0.997), ("max_mad", 0.5), ("min_freeze_duration", 2.0)],
            ),
            (
                "scene_change",
                &[("min_hist_diff", 0.55), ("min_edge_jump", 0.35), ("min_gap", 2.0)],
            ),
            (
                "shake",
                &[("max_flow", 6.0), ("window", 5.0), ("min_hits", 4.0)],
            ),
            ("video", &[("min_event_duration", 1.0)]),
        ]);

        let mut profiles = BTreeMap::new();
        for (name, thresholds) in [
            (PROFILE_STRICT, strict),
            (PROFILE_NORMAL, normal),
            (PROFILE_LOOSE, loose),
        ] {
            profiles.insert(
                name.to_string(),
                Profile {
                    name: name.to_string(),
                    thresholds,
                },
            );
        }
        Self { profiles }
    }

    /// Parse a YAML profile document and merge it over the built-ins.
    ///
    /// The document maps profile name -> detector -> key -> value; partial
    /// overrides are fine, unknown detectors/keys are carried through for
    /// custom detectors.
    pub fn from_yaml_str(doc: &str) -> Result<Self> {
        let parsed: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>> =
            serde_yaml::from_str(doc)?;
        let mut set = Self::builtin();
        for (name, detectors) in parsed {
            let profile = set.profiles.entry(name.clone()).or_insert_with(|| Profile {
                name: name.clone(),
                thresholds: BTreeMap::new(),
            });
            for (detector, keys) in detectors {
                let slot = profile.thresholds.entry(detector).or_default();
                for (key, value) in keys {
                    slot.insert(key, value);
                }
            }
        }
        Ok(set)
    }

    /// Load `profiles.yaml` from disk, merged over the built-ins
    pub fn load(path: &Path) -> Result<Self> {
        let doc = std::fs::read_to_string(path).map_err(|source| QualscanError::IoAt {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&doc)
    }

    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| QualscanError::Config(format!("unknown profile: {}", name)))
    }
}

/// Resolved configuration handed to one detector call
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub level: DetectionLevel,
    thresholds: BTreeMap<String, f64>,
}

impl DetectorConfig {
    /// Merge the profile's vector for `detector` with the caller's
    /// `custom_thresholds` (keys either `key` scoped to this detector via
    /// a `detector.key` prefix, or bare for convenience).
    pub fn resolve(
        profile: &Profile,
        detector: &str,
        custom: &BTreeMap<String, f64>,
        level: DetectionLevel,
    ) -> Self {
        let mut thresholds = profile
            .thresholds
            .get(detector)
            .cloned()
            .unwrap_or_default();
        let prefix = format!("{}.", detector);
        for (key, value) in custom {
            if let Some(stripped) = key.strip_prefix(&prefix) {
                thresholds.insert(stripped.to_string(), *value);
            } else if !key.contains('.') {
                thresholds.insert(key.clone(), *value);
            }
        }
        Self { level, thresholds }
    }

    /// For tests and synthetic callers
    pub fn from_map(level: DetectionLevel, thresholds: BTreeMap<String, f64>) -> Self {
        Self { level, thresholds }
    }

    pub fn threshold(&self, key: &str) -> Result<f64> {
        self.thresholds
            .get(key)
            .copied()
            .ok_or_else(|| QualscanError::Config(format!("missing threshold: {}", key)))
    }

    pub fn threshold_or(&self, key: &str, default: f64) -> f64 {
        self.thresholds.get(key).copied().unwrap_or(default)
    }
}

/// Read-mostly holder for the active profile set
///
/// Updates replace the snapshot atomically; in-flight readers keep the old
/// `Arc` and never observe a torn state.
#[derive(Debug)]
pub struct ProfileStore {
    inner: RwLock<Arc<ProfileSet>>,
}

impl ProfileStore {
    pub fn new(set: ProfileSet) -> Self {
        Self {
            inner: RwLock::new(Arc::new(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<ProfileSet> {
        self.inner.read().clone()
    }

    pub fn replace(&self, set: ProfileSet) {
        *self.inner.write() = Arc::new(set);
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(ProfileSet::builtin())
    }
}
