use std::path::{Path, PathBuf};

use crate::history::DEFAULT_MAX_DEPTH;
use crate::ops::{Operator, OperatorId, Palette};
use crate::params::{ACE_STRENGTH, CLAHE_CLIP, GAMMA, ParamSpec, SATURATION};

const SETTINGS_FILE: &str = "chromafe_settings.cfg";

/// Persisted preferences, stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Maximum number of retained history entries (at least 1)
    pub max_history_depth: usize,

    // AI / ONNX Runtime settings
    /// Path to onnxruntime.dll / libonnxruntime.so (empty = colorization model disabled)
    pub onnx_runtime_path: String,
    /// Directory holding the colorization topology, weights and anchor table
    pub model_dir: String,

    /// Palette used by a bare `pseudocolor` step on the command line
    pub default_palette: Palette,

    // Slider defaults, taken by operator steps given without a value
    pub ace_strength: f32,
    pub clahe_clip: f32,
    pub gamma: f32,
    pub saturation: f32,

    pub jpeg_quality: u8,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_history_depth: DEFAULT_MAX_DEPTH,
            onnx_runtime_path: String::new(),
            model_dir: String::new(),
            default_palette: Palette::default(),
            ace_strength: ACE_STRENGTH.default,
            clahe_clip: CLAHE_CLIP.default,
            gamma: GAMMA.default,
            saturation: SATURATION.default,
            jpeg_quality: 90,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/chromafe/chromafe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\ChromaFE\chromafe_settings.cfg
    /// On macOS:   ~/Library/Application Support/ChromaFE/chromafe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("chromafe");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("ChromaFE").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("ChromaFE")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Load settings from the platform path (returns default if file missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the platform path. Failures are logged, not returned.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            log::warn!("could not write settings to {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_history_depth={}\n\
             onnx_runtime_path={}\n\
             model_dir={}\n\
             default_palette={}\n\
             ace_strength={}\n\
             clahe_clip={}\n\
             gamma={}\n\
             saturation={}\n\
             jpeg_quality={}\n",
            self.max_history_depth,
            self.onnx_runtime_path,
            self.model_dir,
            self.default_palette.name(),
            self.ace_strength,
            self.clahe_clip,
            self.gamma,
            self.saturation,
            self.jpeg_quality,
        )
    }

    /// Parse `key=value` lines. Unknown keys and unparsable values are ignored.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_history_depth" => {
                    s.max_history_depth = val.parse::<usize>().unwrap_or(DEFAULT_MAX_DEPTH).max(1);
                }
                "onnx_runtime_path" => {
                    s.onnx_runtime_path = val.to_string();
                }
                "model_dir" => {
                    s.model_dir = val.to_string();
                }
                "default_palette" => {
                    if let Ok(p) = val.parse() {
                        s.default_palette = p;
                    }
                }
                "ace_strength" => s.ace_strength = slider(&ACE_STRENGTH, val),
                "clahe_clip" => s.clahe_clip = slider(&CLAHE_CLIP, val),
                "gamma" => s.gamma = slider(&GAMMA, val),
                "saturation" => s.saturation = slider(&SATURATION, val),
                "jpeg_quality" => {
                    s.jpeg_quality = val.parse::<u8>().unwrap_or(90).clamp(1, 100);
                }
                _ => {}
            }
        }
        s
    }

    /// Saved slider value for an operator's numeric parameter.
    pub fn slider_default(&self, id: OperatorId) -> Option<f32> {
        match id {
            OperatorId::Ace => Some(self.ace_strength),
            OperatorId::Clahe => Some(self.clahe_clip),
            OperatorId::Gamma => Some(self.gamma),
            OperatorId::Saturation => Some(self.saturation),
            OperatorId::Sharpen | OperatorId::Pseudocolor | OperatorId::Colorize => None,
        }
    }

    /// `id` parameterised with the saved slider value or palette.
    pub fn default_operator(&self, id: OperatorId) -> Operator {
        match id {
            OperatorId::Pseudocolor => Operator::Pseudocolor {
                palette: self.default_palette,
            },
            _ => Operator::with_value(id, self.slider_default(id)),
        }
    }

    pub fn runtime_path(&self) -> Option<String> {
        non_empty(&self.onnx_runtime_path).map(str::to_string)
    }

    pub fn model_dir(&self) -> Option<PathBuf> {
        non_empty(&self.model_dir).map(PathBuf::from)
    }
}

fn slider(spec: &ParamSpec, val: &str) -> f32 {
    val.parse::<f32>()
        .ok()
        .and_then(|v| spec.clamp(v).ok())
        .unwrap_or(spec.default)
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = AppSettings::load_from(&dir.path().join("nope.cfg"));
        assert_eq!(s, AppSettings::default());
        assert_eq!(s.max_history_depth, 20);
        assert!(s.runtime_path().is_none());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join(SETTINGS_FILE);
        let s = AppSettings {
            max_history_depth: 7,
            onnx_runtime_path: "/opt/ort/libonnxruntime.so".to_string(),
            model_dir: "/opt/models".to_string(),
            default_palette: Palette::Viridis,
            gamma: 2.0,
            jpeg_quality: 75,
            ..AppSettings::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), s);
    }

    #[test]
    fn corrupt_values_fall_back_and_sliders_clamp() {
        let s = AppSettings::parse(
            "garbage line\n\
             max_history_depth=0\n\
             gamma=9.5\n\
             saturation=abc\n\
             default_palette=nonsense\n\
             unknown_key=1\n\
             jpeg_quality=300\n",
        );
        assert_eq!(s.max_history_depth, 1);
        assert_eq!(s.gamma, GAMMA.max);
        assert_eq!(s.saturation, SATURATION.default);
        assert_eq!(s.default_palette, Palette::Jet);
        assert_eq!(s.jpeg_quality, 90);
    }

    #[test]
    fn saved_sliders_parameterise_default_operators() {
        let s = AppSettings::parse("gamma=2.0\nace_strength=3.5\ndefault_palette=plasma\n");
        assert_eq!(s.default_operator(OperatorId::Gamma), Operator::Gamma { gamma: 2.0 });
        assert_eq!(s.default_operator(OperatorId::Ace), Operator::Ace { strength: 3.5 });
        assert_eq!(
            s.default_operator(OperatorId::Clahe),
            Operator::Clahe { clip_limit: CLAHE_CLIP.default }
        );
        assert_eq!(
            s.default_operator(OperatorId::Pseudocolor),
            Operator::Pseudocolor { palette: Palette::Plasma }
        );
        assert_eq!(s.default_operator(OperatorId::Sharpen), Operator::Sharpen);
    }

    #[test]
    fn blank_paths_mean_unset() {
        let s = AppSettings::parse("onnx_runtime_path=   \nmodel_dir=/m\n");
        assert!(s.runtime_path().is_none());
        assert_eq!(s.model_dir(), Some(PathBuf::from("/m")));
    }
}
