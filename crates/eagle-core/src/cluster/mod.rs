//! Cluster control-plane access.
//!
//! Every interaction with a region's cluster goes through [`ClusterClient`]:
//! a single `run(context, args, stdin)` call shaped like a `kubectl`
//! invocation. Argument construction lives in [`args`] as pure functions so
//! the orchestrator's behaviour can be asserted against a recording fake.

pub mod args;
pub mod kubectl;

#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;

use crate::error::{EagleError, Result};

pub use kubectl::Kubectl;

/// Captured result of one control-plane command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Combined output, trimmed and capped to the last 2KB.
    pub fn summary(&self) -> String {
        const MAX: usize = 2 * 1024;
        let combined = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        if combined.len() > MAX {
            let mut start = combined.len() - MAX;
            while !combined.is_char_boundary(start) {
                start += 1;
            }
            combined[start..].to_string()
        } else {
            combined
        }
    }
}

pub trait ClusterClient: Send + Sync {
    /// Verify the control-plane tool is installed and every context exists.
    /// Fails with `PrerequisiteMissing`.
    fn preflight(&self, contexts: &[String]) -> impl Future<Output = Result<()>> + Send;

    /// Run one command against `context`. A non-zero exit is reported through
    /// `CommandOutput::success`, not as an `Err`.
    fn run(
        &self,
        context: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Like [`ClusterClient::run`] but a non-zero exit becomes `CommandFailed`.
pub async fn run_checked<C: ClusterClient>(
    cluster: &C,
    context: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<CommandOutput> {
    let out = cluster.run(context, args, stdin).await?;
    if !out.success {
        return Err(EagleError::CommandFailed(format!(
            "{} ({})",
            args.first().map(String::as_str).unwrap_or("command"),
            out.summary()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_stderr() {
        let out = CommandOutput {
            success: false,
            stdout: "ignored".into(),
            stderr: "  error: not found \n".into(),
        };
        assert_eq!(out.summary(), "error: not found");
    }

    #[test]
    fn summary_caps_length() {
        let out = CommandOutput {
            success: true,
            stdout: "x".repeat(5000),
            stderr: String::new(),
        };
        assert_eq!(out.summary().len(), 2048);
    }
}
