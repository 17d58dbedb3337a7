use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::InstanceError;
use crate::hardware::{BootRomKind, BorderMode, Model};
use crate::input::DEFAULT_RAPID_SWITCH_FRAMES;
use crate::pixels::PixelBufferMode;

/// Custom boot ROM files, one per boot ROM family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BootRomPaths {
    pub dmg: Option<PathBuf>,
    pub mgb: Option<PathBuf>,
    pub sgb: Option<PathBuf>,
    pub sgb2: Option<PathBuf>,
    pub cgb: Option<PathBuf>,
    pub agb: Option<PathBuf>,
}

impl BootRomPaths {
    pub fn get(&self, kind: BootRomKind) -> Option<&PathBuf> {
        match kind {
            BootRomKind::Dmg => self.dmg.as_ref(),
            BootRomKind::Mgb => self.mgb.as_ref(),
            BootRomKind::Sgb => self.sgb.as_ref(),
            BootRomKind::Sgb2 => self.sgb2.as_ref(),
            BootRomKind::Cgb => self.cgb.as_ref(),
            BootRomKind::Agb => self.agb.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InstanceConfig {
    pub model: Model,
    pub border_mode: BorderMode,
    pub boot_roms: BootRomPaths,
    pub fast_boot: bool,
    pub pixel_buffer_mode: PixelBufferMode,
    pub volume: i32,
    pub mono: bool,
    pub sample_rate: u32,
    /// Device buffer size in stereo frames.
    pub audio_buffer_size: u32,
    pub rewind_seconds: f64,
    pub turbo_ratio: f64,
    pub rapid_button_switch_frames: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            model: Model::default(),
            border_mode: BorderMode::default(),
            boot_roms: BootRomPaths::default(),
            fast_boot: false,
            pixel_buffer_mode: PixelBufferMode::default(),
            volume: 100,
            mono: false,
            sample_rate: 48_000,
            audio_buffer_size: 1024,
            rewind_seconds: 10.0,
            turbo_ratio: 2.0,
            rapid_button_switch_frames: DEFAULT_RAPID_SWITCH_FRAMES,
        }
    }
}

impl InstanceConfig {
    pub fn from_toml(text: &str) -> Result<Self, InstanceError> {
        Ok(toml::from_str(text)?)
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("vibeemu").join("instance.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("vibeemu").join("instance.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("vibeemu")
            .join("instance.toml");
    }

    PathBuf::from("instance.toml")
}

/// Missing or unreadable files yield the defaults.
pub fn load_from_file(path: &Path) -> InstanceConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return InstanceConfig::default(),
    };

    match InstanceConfig::from_toml(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse instance config {}: {e}; using defaults",
                path.display()
            );
            InstanceConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &InstanceConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::DmgRevision;

    #[test]
    fn save_then_load_keeps_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("instance.toml");

        let cfg = InstanceConfig {
            model: Model::Dmg(DmgRevision::RevB),
            border_mode: BorderMode::SgbOnly,
            boot_roms: BootRomPaths {
                cgb: Some(PathBuf::from("/roms/cgb_boot.bin")),
                ..BootRomPaths::default()
            },
            fast_boot: true,
            pixel_buffer_mode: PixelBufferMode::DoubleBlend,
            volume: 40,
            mono: true,
            sample_rate: 44_100,
            audio_buffer_size: 512,
            rewind_seconds: 30.0,
            turbo_ratio: 3.5,
            rapid_button_switch_frames: 4,
        };
        save_to_file(&path, &cfg).unwrap();
        assert_eq!(load_from_file(&path), cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg = InstanceConfig::from_toml("volume = 25\npixel-buffer-mode = \"single\"\n").unwrap();
        assert_eq!(cfg.volume, 25);
        assert_eq!(cfg.pixel_buffer_mode, PixelBufferMode::Single);
        assert_eq!(cfg.sample_rate, InstanceConfig::default().sample_rate);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.toml");
        std::fs::write(&path, "volume = \"loud\"").unwrap();
        assert_eq!(load_from_file(&path), InstanceConfig::default());
        assert!(InstanceConfig::from_toml("volume = \"loud\"").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_from_file(&dir.path().join("absent.toml")),
            InstanceConfig::default()
        );
    }
}
