pub mod apply;
pub mod hunk;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{PatchConfig, PatchToolKind};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Malformed patch: {0}")]
    Malformed(String),

    #[error("Hunk +{new_start},{new_count} does not match the current content")]
    ContextMismatch { new_start: usize, new_count: usize },

    #[error("patch tool exited with {status}: {stderr}")]
    Tool { status: String, stderr: String },

    #[error("Patch I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Patch worker failed: {0}")]
    Worker(String),
}

/// How the reverse application is carried out.
#[derive(Debug, Clone)]
pub enum PatchTool {
    /// In-process hunk reversal.
    Builtin,
    /// An external GNU `patch` executable.
    System { program: PathBuf },
}

impl From<&PatchConfig> for PatchTool {
    fn from(config: &PatchConfig) -> Self {
        match config.tool {
            PatchToolKind::Builtin => PatchTool::Builtin,
            PatchToolKind::System => PatchTool::System {
                program: config.program.clone(),
            },
        }
    }
}

/// Recovers pre-change content by reverse-applying a patch to a working file.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    tool: PatchTool,
}

impl Reconstructor {
    pub fn new(tool: PatchTool) -> Self {
        Self { tool }
    }

    /// Reverse `patch_file` into `working_file` in place.
    ///
    /// Runs on the blocking pool so in-flight fetches keep progressing.
    #[instrument(skip(self, working_file, patch_file), fields(tool = ?self.tool))]
    pub async fn reverse(
        &self,
        working_file: PathBuf,
        patch_file: PathBuf,
        label: &str,
    ) -> Result<(), PatchError> {
        let tool = self.tool.clone();
        let label = label.to_string();
        tokio::task::spawn_blocking(move || reverse_in_place(&tool, &working_file, &patch_file, &label))
            .await
            .map_err(|e| PatchError::Worker(e.to_string()))?
    }
}

fn reverse_in_place(tool: &PatchTool, working_file: &Path, patch_file: &Path, label: &str) -> Result<(), PatchError> {
    match tool {
        PatchTool::Builtin => {
            let current = std::fs::read_to_string(working_file)?;
            let patch = std::fs::read_to_string(patch_file)?;
            let hunks = hunk::parse_hunks(&patch)?;
            let original = apply::reverse_apply(&current, &hunks)?;
            std::fs::write(working_file, original)?;
            debug!(file = label, hunks = hunks.len(), "reversed patch");
            Ok(())
        }
        PatchTool::System { program } => run_system_patch(program, working_file, patch_file, label),
    }
}

/// Pipe the patch into `patch -R` against the working file. GitHub patches
/// lack file headers, so synthetic ones are prepended.
fn run_system_patch(program: &Path, working_file: &Path, patch_file: &Path, label: &str) -> Result<(), PatchError> {
    let body = std::fs::read_to_string(patch_file)?;
    let mut input = String::with_capacity(body.len() + 2 * label.len() + 16);
    if !body.starts_with("--- ") && !body.starts_with("diff ") {
        input.push_str(&format!("--- a/{label}\n+++ b/{label}\n"));
    }
    input.push_str(&body);

    let mut child = Command::new(program)
        .args(["-R", "-f", "-s", "--no-backup-if-mismatch", "-r", "-"])
        .arg(working_file)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    let output = child.wait_with_output()?;

    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        return Err(PatchError::Tool {
            status: output.status.to_string(),
            stderr,
        });
    }
    debug!(file = label, "reversed patch with external tool");
    Ok(())
}
