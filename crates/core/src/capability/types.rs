//! Declarative capability descriptors.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

/// `progress=42` or `42%` on a stderr line.
const DEFAULT_PROGRESS_PATTERN: &str = r"^progress=(\d{1,3}(?:\.\d+)?)$|(\d{1,3}(?:\.\d+)?)\s*%";

/// Normalizes a format token: trims whitespace and a leading dot, lowercases.
pub fn normalize_format(format: &str) -> String {
    format.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// A file format as a mime type plus its known extensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatSpec {
    pub mime: String,
    pub extensions: Vec<String>,
}

impl FormatSpec {
    pub fn new(mime: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            mime: mime.into(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// The canonical format token (first extension).
    pub fn canonical(&self) -> String {
        self.extensions
            .first()
            .map(|e| normalize_format(e))
            .unwrap_or_else(|| self.mime.to_ascii_lowercase())
    }

    /// Whether `format` names this spec by mime type or by any extension.
    pub fn matches(&self, format: &str) -> bool {
        let format = normalize_format(format);
        if format.is_empty() {
            return false;
        }
        self.mime.eq_ignore_ascii_case(&format)
            || self.extensions.iter().any(|e| normalize_format(e) == format)
    }

    fn is_well_formed(&self) -> bool {
        !self.mime.trim().is_empty()
            && !self.extensions.is_empty()
            && self.extensions.iter().all(|e| !normalize_format(e).is_empty())
    }
}

/// Relative resource weights of a capability, each in [0, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceCost {
    #[serde(default)]
    pub cpu: f32,
    #[serde(default)]
    pub memory: f32,
    #[serde(default)]
    pub gpu: f32,
}

impl ResourceCost {
    pub fn new(cpu: f32, memory: f32, gpu: f32) -> Self {
        Self { cpu, memory, gpu }
    }

    /// Mean of the three weights.
    pub fn weight(&self) -> f32 {
        (self.cpu + self.memory + self.gpu) / 3.0
    }
}

/// External dependencies a capability needs on the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirements {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub lang_packs: Vec<String>,
    #[serde(default)]
    pub fonts: Vec<String>,
}

/// How faithfully a feature survives a conversion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PreserveLevel {
    #[serde(alias = "true")]
    Full,
    Partial,
    #[default]
    #[serde(alias = "false")]
    None,
}

/// Per-feature fidelity of a capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreserveFeatures {
    pub styles: PreserveLevel,
    pub links: PreserveLevel,
    pub footnotes: PreserveLevel,
    pub headers: PreserveLevel,
    pub lists: PreserveLevel,
    pub tables: PreserveLevel,
    pub images: PreserveLevel,
    pub formulas: PreserveLevel,
}

impl PreserveFeatures {
    /// Every feature at the same level.
    pub fn uniform(level: PreserveLevel) -> Self {
        Self {
            styles: level,
            links: level,
            footnotes: level,
            headers: level,
            lists: level,
            tables: level,
            images: level,
            formulas: level,
        }
    }
}

/// How to invoke the backing tool.
///
/// `args` may contain `{input}`, `{inputs}`, `{output}`, `{output_dir}` and
/// `{format}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Regex over stderr lines whose first matching group is a percentage.
    /// Only read for streaming capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_pattern: Option<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            progress_pattern: None,
        }
    }

    pub fn with_progress_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.progress_pattern = Some(pattern.into());
        self
    }
}

fn default_parallelism() -> u32 {
    1
}

fn compile_progress(id: &str, pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern).map_err(|e| {
        AppError::validation(format!(
            "capability '{}' has an invalid progress pattern: {}",
            id, e
        ))
    })?;
    if regex.captures_len() < 2 {
        return Err(AppError::validation(format!(
            "capability '{}' progress pattern needs a capture group",
            id
        )));
    }
    Ok(regex)
}

/// A single declared format-to-format transform backed by an external tool.
///
/// Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capability {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub license: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    pub inputs: Vec<FormatSpec>,
    pub outputs: Vec<FormatSpec>,
    pub quality: f32,
    pub speed: f32,
    #[serde(default)]
    pub cost: ResourceCost,
    #[serde(default)]
    pub requires: Requirements,
    #[serde(default)]
    pub preserve: PreserveFeatures,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mem_mb: Option<u32>,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandTemplate>,
}

impl Capability {
    /// Creates a capability with neutral metadata; refine with the `with_*` methods.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: FormatSpec,
        output: FormatSpec,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: String::new(),
            vendor: String::new(),
            license: String::new(),
            binary_path: None,
            inputs: vec![input],
            outputs: vec![output],
            quality: 1.0,
            speed: 1.0,
            cost: ResourceCost::default(),
            requires: Requirements::default(),
            preserve: PreserveFeatures::default(),
            risks: Vec::new(),
            timeout_s: None,
            max_mem_mb: None,
            parallelism: 1,
            streaming: false,
            retryable: false,
            command: None,
        }
    }

    pub fn with_vendor(
        mut self,
        vendor: impl Into<String>,
        version: impl Into<String>,
        license: impl Into<String>,
    ) -> Self {
        self.vendor = vendor.into();
        self.version = version.into();
        self.license = license.into();
        self
    }

    pub fn with_scores(mut self, quality: f32, speed: f32) -> Self {
        self.quality = quality;
        self.speed = speed;
        self
    }

    pub fn with_cost(mut self, cost: ResourceCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.requires.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_lang_packs(mut self, packs: &[&str]) -> Self {
        self.requires.lang_packs = packs.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_fonts(mut self, fonts: &[&str]) -> Self {
        self.requires.fonts = fonts.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_preserve(mut self, preserve: PreserveFeatures) -> Self {
        self.preserve = preserve;
        self
    }

    pub fn with_risks(mut self, risks: &[&str]) -> Self {
        self.risks = risks.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_limits(mut self, timeout_s: Option<u32>, max_mem_mb: Option<u32>) -> Self {
        self.timeout_s = timeout_s;
        self.max_mem_mb = max_mem_mb;
        self
    }

    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_command(mut self, command: CommandTemplate) -> Self {
        self.command = Some(command);
        self
    }

    /// Checks the descriptor is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::validation("capability id must not be empty"));
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(AppError::validation(format!(
                "capability '{}' must declare at least one input and one output format",
                self.id
            )));
        }
        if let Some(bad) = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|spec| !spec.is_well_formed())
        {
            return Err(AppError::validation(format!(
                "capability '{}' has a malformed format spec (mime '{}', extensions {:?})",
                self.id, bad.mime, bad.extensions
            )));
        }
        if !(0.0..=1.0).contains(&self.quality) || !(0.0..=1.0).contains(&self.speed) {
            return Err(AppError::validation(format!(
                "capability '{}' quality and speed must lie in [0, 1]",
                self.id
            )));
        }
        if self.parallelism == 0 {
            return Err(AppError::validation(format!(
                "capability '{}' parallelism must be at least 1",
                self.id
            )));
        }
        if let Some(pattern) = self.command.as_ref().and_then(|c| c.progress_pattern.as_deref()) {
            compile_progress(&self.id, pattern)?;
        }
        Ok(())
    }

    /// Stderr progress matcher; `None` unless the capability streams progress.
    pub fn progress_regex(&self) -> Result<Option<Regex>> {
        if !self.streaming {
            return Ok(None);
        }
        let pattern = self
            .command
            .as_ref()
            .and_then(|c| c.progress_pattern.as_deref())
            .unwrap_or(DEFAULT_PROGRESS_PATTERN);
        compile_progress(&self.id, pattern).map(Some)
    }

    /// Whether this capability accepts `format` as input.
    pub fn accepts(&self, format: &str) -> bool {
        self.inputs.iter().any(|spec| spec.matches(format))
    }

    /// Whether this capability can produce `format`.
    pub fn produces(&self, format: &str) -> bool {
        self.outputs.iter().any(|spec| spec.matches(format))
    }

    /// Canonical input format tokens.
    pub fn input_formats(&self) -> Vec<String> {
        self.inputs.iter().map(FormatSpec::canonical).collect()
    }

    /// Canonical output format tokens.
    pub fn output_formats(&self) -> Vec<String> {
        self.outputs.iter().map(FormatSpec::canonical).collect()
    }

    /// Output spec matching a canonical token.
    pub fn output_spec(&self, format: &str) -> Option<&FormatSpec> {
        self.outputs.iter().find(|spec| spec.matches(format))
    }

    /// Every requirement name, tools first.
    pub fn requirement_names(&self) -> impl Iterator<Item = &String> {
        self.requires
            .tools
            .iter()
            .chain(self.requires.lang_packs.iter())
            .chain(self.requires.fonts.iter())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_s.map(|s| Duration::from_secs(u64::from(s)))
    }
}
