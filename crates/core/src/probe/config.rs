//! Prober configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for host capability probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProberConfig {
    /// How long `<tool> --version` may run before the version is left unknown.
    #[serde(default = "default_version_timeout")]
    pub tool_version_timeout_ms: u64,

    /// Directories searched for `<name>.traineddata` language packs.
    #[serde(default = "default_lang_pack_dirs")]
    pub lang_pack_dirs: Vec<PathBuf>,

    /// Directories searched (recursively) for font files.
    #[serde(default = "default_font_dirs")]
    pub font_dirs: Vec<PathBuf>,

    /// Memory budget of the host in MB. Capabilities declaring a larger
    /// `max_mem_mb` are marked unavailable. Unset means no limit.
    #[serde(default)]
    pub host_memory_mb: Option<u32>,

    /// Licenses that may not be used on this host (case-insensitive).
    #[serde(default)]
    pub denied_licenses: Vec<String>,
}

fn default_version_timeout() -> u64 {
    5000
}

fn default_lang_pack_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/share/tesseract-ocr/5/tessdata"),
        PathBuf::from("/usr/share/tesseract-ocr/4.00/tessdata"),
        PathBuf::from("/usr/share/tessdata"),
    ]
}

fn default_font_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
    ]
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            tool_version_timeout_ms: default_version_timeout(),
            lang_pack_dirs: default_lang_pack_dirs(),
            font_dirs: default_font_dirs(),
            host_memory_mb: None,
            denied_licenses: Vec::new(),
        }
    }
}
