use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ReadalongConfig;
use crate::synth::MAX_SYNTHESIS_CHARS;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub extraction: Option<ExtractionSection>,
    pub detection: Option<DetectionSection>,
    pub chunking: Option<ChunkingSection>,
    pub library: Option<LibrarySection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSection {
    pub max_source_mb: Option<usize>,
    pub max_characters: Option<usize>,
    pub page_budget_secs: Option<u64>,
    pub open_budget_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSection {
    pub header_fraction: Option<f32>,
    pub footer_fraction: Option<f32>,
    pub min_page_fraction: Option<f32>,
    pub min_pages: Option<usize>,
    pub corner_fraction: Option<f32>,
    pub max_page_number_digits: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkingSection {
    pub chunk_size: Option<usize>,
    pub lookahead: Option<usize>,
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub max_concurrent_indexing: Option<usize>,
    pub default_voice: Option<String>,
    pub progress_db: Option<String>,
    pub filtering_enabled_by_default: Option<bool>,
}

/// Platform config directory path: `<config_dir>/readalong/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("readalong").join("config.toml"))
}

/// Load config by cascading CWD `.readalong.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".readalong.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config");
            None
        }
    }
}

/// Overlay field if set, else base field.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bx, ox) = (&base.extraction, &overlay.extraction);
    let (bd, od) = (&base.detection, &overlay.detection);
    let (bc, oc) = (&base.chunking, &overlay.chunking);
    let (bl, ol) = (&base.library, &overlay.library);

    ConfigFile {
        extraction: Some(ExtractionSection {
            max_source_mb: pick(ox, bx, |s| s.max_source_mb),
            max_characters: pick(ox, bx, |s| s.max_characters),
            page_budget_secs: pick(ox, bx, |s| s.page_budget_secs),
            open_budget_secs: pick(ox, bx, |s| s.open_budget_secs),
        }),
        detection: Some(DetectionSection {
            header_fraction: pick(od, bd, |s| s.header_fraction),
            footer_fraction: pick(od, bd, |s| s.footer_fraction),
            min_page_fraction: pick(od, bd, |s| s.min_page_fraction),
            min_pages: pick(od, bd, |s| s.min_pages),
            corner_fraction: pick(od, bd, |s| s.corner_fraction),
            max_page_number_digits: pick(od, bd, |s| s.max_page_number_digits),
        }),
        chunking: Some(ChunkingSection {
            chunk_size: pick(oc, bc, |s| s.chunk_size),
            lookahead: pick(oc, bc, |s| s.lookahead),
            max_chars: pick(oc, bc, |s| s.max_chars),
        }),
        library: Some(LibrarySection {
            max_concurrent_indexing: pick(ol, bl, |s| s.max_concurrent_indexing),
            default_voice: pick(ol, bl, |s| s.default_voice.clone()),
            progress_db: pick(ol, bl, |s| s.progress_db.clone()),
            filtering_enabled_by_default: pick(ol, bl, |s| s.filtering_enabled_by_default),
        }),
    }
}

/// Write every set field onto `config`. Unset fields keep their value.
pub fn apply(file: &ConfigFile, config: &mut ReadalongConfig) {
    if let Some(x) = &file.extraction {
        let limits = &mut config.extraction;
        if let Some(mb) = x.max_source_mb {
            limits.max_source_bytes = mb.saturating_mul(1024 * 1024);
        }
        if let Some(v) = x.max_characters {
            limits.max_characters = v;
        }
        if let Some(secs) = x.page_budget_secs {
            limits.page_budget = Duration::from_secs(secs);
        }
        if let Some(secs) = x.open_budget_secs {
            limits.open_budget = Duration::from_secs(secs);
        }
    }
    if let Some(d) = &file.detection {
        let detection = &mut config.detection;
        if let Some(v) = d.header_fraction {
            detection.header_fraction = v.clamp(0.0, 0.5);
        }
        if let Some(v) = d.footer_fraction {
            detection.footer_fraction = v.clamp(0.0, 0.5);
        }
        if let Some(v) = d.min_page_fraction {
            detection.min_page_fraction = v.clamp(0.0, 1.0);
        }
        if let Some(v) = d.min_pages {
            detection.min_pages = v;
        }
        if let Some(v) = d.corner_fraction {
            detection.corner_fraction = v.clamp(0.0, 0.5);
        }
        if let Some(v) = d.max_page_number_digits {
            detection.max_page_number_digits = v;
        }
    }
    if let Some(c) = &file.chunking {
        if let Some(v) = c.chunk_size {
            config.chunking.chunk_size = v.max(1);
        }
        if let Some(v) = c.lookahead {
            config.chunking.lookahead = v;
        }
        if let Some(v) = c.max_chars {
            config.chunking.max_chars = v.clamp(1, MAX_SYNTHESIS_CHARS);
        }
    }
    if let Some(l) = &file.library {
        if let Some(v) = l.max_concurrent_indexing {
            config.library.max_concurrent_indexing = v.max(1);
        }
        if let Some(v) = &l.default_voice {
            config.library.default_voice = v.clone();
        }
        if let Some(v) = &l.progress_db {
            config.library.progress_db = Some(PathBuf::from(v));
        }
        if let Some(v) = l.filtering_enabled_by_default {
            config.library.filtering_enabled_by_default = v;
        }
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
}
