//! Host lookups for tools, language packs and fonts.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::config::ProberConfig;
use super::types::ToolHealth;

/// Resolves capability requirements against the host.
///
/// Lookups never fail: problems are reported inside the returned value.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    /// Locates an executable and reads its version.
    async fn resolve_tool(&self, name: &str) -> ToolHealth;

    /// Whether an OCR language pack is installed.
    async fn has_lang_pack(&self, name: &str) -> bool;

    /// Whether a font is installed.
    async fn has_font(&self, name: &str) -> bool;
}

/// Resolver that inspects the real host: `PATH`, tessdata and font directories.
#[derive(Debug, Clone)]
pub struct SystemToolResolver {
    version_timeout: Duration,
    lang_pack_dirs: Vec<PathBuf>,
    font_dirs: Vec<PathBuf>,
}

impl SystemToolResolver {
    pub fn new(config: &ProberConfig) -> Self {
        let mut lang_pack_dirs = config.lang_pack_dirs.clone();
        if let Some(prefix) = std::env::var_os("TESSDATA_PREFIX") {
            lang_pack_dirs.insert(0, PathBuf::from(prefix));
        }

        Self {
            version_timeout: Duration::from_millis(config.tool_version_timeout_ms),
            lang_pack_dirs,
            font_dirs: config.font_dirs.clone(),
        }
    }

    fn find_executable(name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.components().count() > 1 {
            return is_executable(direct).then(|| direct.to_path_buf());
        }

        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
            if cfg!(windows) {
                let exe = dir.join(format!("{}.exe", name));
                if is_executable(&exe) {
                    return Some(exe);
                }
            }
            None
        })
    }

    async fn read_version(&self, path: &Path) -> Option<String> {
        let output = Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match timeout(self.version_timeout, output).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                first_line(&stdout).or_else(|| first_line(&stderr))
            }
            Ok(Err(e)) => {
                debug!(path = ?path, error = %e, "Version query failed");
                None
            }
            Err(_) => {
                debug!(path = ?path, "Version query timed out");
                None
            }
        }
    }
}

#[async_trait]
impl ToolResolver for SystemToolResolver {
    async fn resolve_tool(&self, name: &str) -> ToolHealth {
        match Self::find_executable(name) {
            Some(path) => {
                let version = self.read_version(&path).await;
                ToolHealth::found(name, path, version)
            }
            None => ToolHealth::missing(name, format!("'{}' not found in PATH", name)),
        }
    }

    async fn has_lang_pack(&self, name: &str) -> bool {
        let file = format!("{}.traineddata", name);
        self.lang_pack_dirs
            .iter()
            .any(|dir| dir.join(&file).is_file())
    }

    async fn has_font(&self, name: &str) -> bool {
        let dirs = self.font_dirs.clone();
        let wanted = font_key(name);
        tokio::task::spawn_blocking(move || dirs.iter().any(|dir| find_font(dir, &wanted, 0)))
            .await
            .unwrap_or(false)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Lowercase font name without separators, so "Noto Sans" matches
/// `NotoSans-Regular.ttf`.
fn font_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc", "woff", "woff2", "pfb"];
const MAX_FONT_DEPTH: usize = 4;

fn find_font(dir: &Path, wanted: &str, depth: usize) -> bool {
    if depth > MAX_FONT_DEPTH || wanted.is_empty() {
        return false;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if find_font(&path, wanted, depth + 1) {
                return true;
            }
            continue;
        }

        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        let stem_matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| font_key(s).contains(wanted))
            .unwrap_or(false);
        if is_font && stem_matches {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(lang_dir: &Path, font_dir: &Path) -> SystemToolResolver {
        SystemToolResolver {
            version_timeout: Duration::from_millis(500),
            lang_pack_dirs: vec![lang_dir.to_path_buf()],
            font_dirs: vec![font_dir.to_path_buf()],
        }
    }

    #[test]
    fn test_font_key() {
        assert_eq!(font_key("Noto Sans"), "notosans");
        assert_eq!(font_key("DejaVu_Serif-Bold"), "dejavuserifbold");
    }

    #[test]
    fn test_first_line_skips_blank() {
        assert_eq!(
            first_line("\n  pandoc 3.1.9\nFeatures: +server"),
            Some("pandoc 3.1.9".to_string())
        );
        assert_eq!(first_line("   \n"), None);
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let resolver = SystemToolResolver::new(&ProberConfig::default());
        let health = resolver
            .resolve_tool("definitely-not-a-real-converter-tool")
            .await;
        assert!(!health.available);
        assert!(health.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_lang_pack_and_font_lookup() {
        let lang = tempfile::tempdir().unwrap();
        let fonts = tempfile::tempdir().unwrap();
        std::fs::write(lang.path().join("eng.traineddata"), b"").unwrap();
        let nested = fonts.path().join("truetype").join("noto");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("NotoSans-Regular.ttf"), b"").unwrap();
        std::fs::write(fonts.path().join("Readme-Arial.txt"), b"").unwrap();

        let resolver = resolver_with(lang.path(), fonts.path());
        assert!(resolver.has_lang_pack("eng").await);
        assert!(!resolver.has_lang_pack("deu").await);
        assert!(resolver.has_font("Noto Sans").await);
        assert!(!resolver.has_font("Arial").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_tool_by_path_reads_version() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tool");
        std::fs::write(&script, "#!/bin/sh\necho 'fake-tool 1.2.3'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let resolver = resolver_with(dir.path(), dir.path());
        let health = resolver.resolve_tool(script.to_str().unwrap()).await;
        assert!(health.available);
        assert_eq!(health.version.as_deref(), Some("fake-tool 1.2.3"));
        assert_eq!(health.path.as_deref(), Some(script.as_path()));
    }
}
