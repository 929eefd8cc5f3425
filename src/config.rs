// ============================================================================
// SELECTION CONFIG - tunables for snapping, handle geometry and resampling
// ============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ops::outline::OutlineMode;
use crate::ops::resample::Interpolation;

/// Every tunable constant used by the selection controller.
///
/// Handle sizes are in view (screen) pixels, everything else is in document
/// units. Missing keys in a config file fall back to [`Default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Outline algorithm used when a mask changes shape.
    pub outline_mode: OutlineMode,
    /// Resampling used for the floating preview and for baking.
    pub interpolation: Interpolation,
    /// Rotation snap step in degrees.
    pub rotate_step_deg: f32,
    /// Rotation snap step while Ctrl is held.
    pub rotate_coarse_step_deg: f32,
    /// Scale snap step (0.01 = 1%).
    pub scale_step: f32,
    /// Lower clamp for every scale factor.
    pub min_scale: f32,
    /// Side length of the square pivot hit box.
    pub pivot_hit_size: f32,
    /// Distance a rotation handle sits outside its vertex.
    pub rotate_handle_offset: f32,
    /// Radius of the circular rotation handle hit test.
    pub rotate_handle_radius: f32,
    /// Side length of the square scale handle hit box.
    pub scale_handle_size: f32,
    /// Added to the ray-cast edge denominator.
    pub hit_epsilon: f32,
    /// Triangle area below which a traced vertex is dropped.
    pub simplify_epsilon: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            outline_mode: OutlineMode::Trace,
            interpolation: Interpolation::Nearest,
            rotate_step_deg: 1.0,
            rotate_coarse_step_deg: 15.0,
            scale_step: 0.01,
            min_scale: crate::ops::transform::MIN_SCALE,
            pivot_hit_size: 10.0,
            rotate_handle_offset: 18.0,
            rotate_handle_radius: 7.0,
            scale_handle_size: 9.0,
            hit_epsilon: 1e-6,
            simplify_epsilon: 0.001,
        }
    }
}

impl SelectionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: SelectionConfig = serde_json::from_str(json)?;
        Ok(cfg.sanitized())
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_json_str(&text)?;
        log::info!("Loaded selection config from {}", path.display());
        Ok(cfg)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp values a hand-edited file could set to something unusable.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.rotate_step_deg > 0.0) {
            self.rotate_step_deg = defaults.rotate_step_deg;
        }
        if !(self.rotate_coarse_step_deg > 0.0) {
            self.rotate_coarse_step_deg = defaults.rotate_coarse_step_deg;
        }
        if !(self.scale_step > 0.0) {
            self.scale_step = defaults.scale_step;
        }
        if !(self.min_scale > 0.0) {
            self.min_scale = defaults.min_scale;
        }
        self.hit_epsilon = self.hit_epsilon.abs();
        self.simplify_epsilon = self.simplify_epsilon.abs();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = SelectionConfig::from_json_str(r#"{ "rotate_step_deg": 5.0 }"#).unwrap();
        assert_eq!(cfg.rotate_step_deg, 5.0);
        assert_eq!(cfg.rotate_coarse_step_deg, 15.0);
        assert_eq!(cfg.outline_mode, OutlineMode::Trace);
    }

    #[test]
    fn test_enum_names() {
        let cfg = SelectionConfig::from_json_str(
            r#"{ "outline_mode": "convex_hull", "interpolation": "rot_sprite" }"#,
        )
        .unwrap();
        assert_eq!(cfg.outline_mode, OutlineMode::ConvexHull);
        assert_eq!(cfg.interpolation, Interpolation::RotSprite);
    }

    #[test]
    fn test_nonpositive_steps_are_reset() {
        let cfg = SelectionConfig::from_json_str(r#"{ "scale_step": 0.0, "min_scale": -1.0 }"#)
            .unwrap();
        assert_eq!(cfg.scale_step, 0.01);
        assert_eq!(cfg.min_scale, 0.01);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = SelectionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::error::SelectionError::Config(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = SelectionConfig::default();
        let text = cfg.to_json_string().unwrap();
        assert_eq!(SelectionConfig::from_json_str(&text).unwrap(), cfg);
    }
}
