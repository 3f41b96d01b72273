//! Running capabilities as external processes.

use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::QualityMetrics;
use crate::capability::Capability;
use crate::error::{AppError, Result};

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// One capability run within a job step.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub job_id: String,
    pub step_index: usize,
    pub capability: Arc<Capability>,
    pub inputs: Vec<PathBuf>,
    /// Where the step's result must be written.
    pub output: PathBuf,
    /// Scratch directory for this step.
    pub output_dir: PathBuf,
    /// Canonical output format.
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub output: PathBuf,
    pub metrics: Option<QualityMetrics>,
}

/// Executes a capability on concrete files.
///
/// Implementations report intra-step progress in [0, 1] on `progress` and
/// must stop promptly with [`AppError::Canceled`] once `cancel` fires.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        invocation: Invocation,
        progress: mpsc::Sender<f32>,
        cancel: CancellationToken,
    ) -> Result<InvocationOutcome>;
}

/// Invoker that spawns the capability's command template.
#[derive(Debug, Default, Clone)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Expands `{input}`, `{inputs}`, `{output}`, `{output_dir}`,
    /// `{output_stem}` and `{format}` in the template arguments.
    pub fn expand_args(invocation: &Invocation) -> Vec<String> {
        let Some(template) = &invocation.capability.command else {
            return Vec::new();
        };
        let input = invocation
            .inputs
            .first()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = invocation.output.to_string_lossy().into_owned();
        let output_stem = invocation
            .output
            .with_extension("")
            .to_string_lossy()
            .into_owned();
        let output_dir = invocation.output_dir.to_string_lossy().into_owned();

        let mut args = Vec::with_capacity(template.args.len());
        for arg in &template.args {
            if arg == "{inputs}" {
                args.extend(
                    invocation
                        .inputs
                        .iter()
                        .map(|p| p.to_string_lossy().into_owned()),
                );
                continue;
            }
            args.push(
                arg.replace("{input}", &input)
                    .replace("{output_stem}", &output_stem)
                    .replace("{output_dir}", &output_dir)
                    .replace("{output}", &output)
                    .replace("{format}", &invocation.format),
            );
        }
        args
    }

    fn program(capability: &Capability) -> Option<PathBuf> {
        if let Some(path) = &capability.binary_path {
            return Some(path.clone());
        }
        capability
            .command
            .as_ref()
            .map(|c| PathBuf::from(&c.program))
    }

    /// Tools like `soffice` name their output after the input; move it to
    /// where the step expects it.
    async fn collect_output(invocation: &Invocation) -> Result<()> {
        if tokio::fs::metadata(&invocation.output).await.is_ok() {
            return Ok(());
        }
        let stem = invocation
            .inputs
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let candidate = invocation
            .output_dir
            .join(format!("{}.{}", stem, invocation.format));
        if tokio::fs::metadata(&candidate).await.is_ok() {
            tokio::fs::rename(&candidate, &invocation.output)
                .await
                .map_err(|e| AppError::io(&candidate, e))?;
            return Ok(());
        }
        Err(AppError::tool(
            &invocation.capability.id,
            format!("no output produced at {}", invocation.output.display()),
        ))
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        invocation: Invocation,
        progress: mpsc::Sender<f32>,
        cancel: CancellationToken,
    ) -> Result<InvocationOutcome> {
        let capability = invocation.capability.clone();
        let program = Self::program(&capability).ok_or_else(|| {
            AppError::tool(&capability.id, "capability has no command to run")
        })?;
        let args = Self::expand_args(&invocation);

        tokio::fs::create_dir_all(&invocation.output_dir)
            .await
            .map_err(|e| AppError::io(&invocation.output_dir, e))?;

        debug!(
            job_id = %invocation.job_id,
            step = invocation.step_index,
            program = %program.display(),
            ?args,
            "Spawning capability"
        );

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&invocation.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AppError::tool(
                        &capability.id,
                        format!("{} not found", program.display()),
                    )
                } else {
                    AppError::tool(&capability.id, format!("failed to spawn: {}", e))
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("stderr was not captured".to_string()))?;
        let mut reader = BufReader::new(stderr).lines();
        let percent = capability.progress_regex()?;
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        let run = async {
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(value) = percent.as_ref().and_then(|re| parse_progress(re, &line)) {
                    let _ = progress.try_send(value);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            child.wait().await
        };

        let time_limit = capability.timeout();
        let deadline = async {
            match time_limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = run => status.map_err(|e| AppError::tool(&capability.id, e.to_string()))?,
            _ = cancel.cancelled() => {
                // Dropping the child on return kills it.
                debug!(job_id = %invocation.job_id, step = invocation.step_index, "Capability canceled");
                return Err(AppError::Canceled);
            }
            _ = deadline => {
                let limit_s = time_limit.map(|d| d.as_secs()).unwrap_or_default();
                warn!(
                    job_id = %invocation.job_id,
                    capability = %capability.id,
                    timeout_s = limit_s,
                    "Capability timed out"
                );
                return Err(AppError::ResourceLimit(format!(
                    "{} exceeded its {}s time limit",
                    capability.id, limit_s
                )));
            }
        };

        let stderr_tail = tail.into_iter().collect::<Vec<_>>().join("\n");
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(AppError::tool_with_stderr(
                &capability.id,
                format!("exited with status {}", code),
                Some(stderr_tail).filter(|s| !s.is_empty()),
            ));
        }

        Self::collect_output(&invocation).await?;
        let _ = progress.try_send(1.0);

        Ok(InvocationOutcome {
            output: invocation.output,
            metrics: None,
        })
    }
}

/// Reads a progress fraction from a tool's stderr line.
fn parse_progress(percent: &Regex, line: &str) -> Option<f32> {
    if line.trim() == "progress=end" {
        return Some(1.0);
    }
    let caps = percent.captures(line.trim())?;
    let value: f32 = caps.iter().skip(1).flatten().next()?.as_str().parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value / 100.0)
}

/// Scratch file name for a step's output.
pub fn step_output_path(dir: &Path, step_index: usize, format: &str) -> PathBuf {
    dir.join(format!("step-{:02}.{}", step_index, format))
}
