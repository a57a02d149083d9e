use std::collections::HashSet;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ClusterClient, CommandOutput};
use crate::error::{EagleError, Result};

/// [`ClusterClient`] backed by the `kubectl` binary, one `--context` per region.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
        }
    }
}

impl Kubectl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ClusterClient for Kubectl {
    async fn preflight(&self, contexts: &[String]) -> Result<()> {
        let path = which::which(&self.binary).map_err(|_| {
            EagleError::PrerequisiteMissing(format!("'{}' not found on PATH", self.binary))
        })?;
        tracing::debug!(binary = %path.display(), "found control-plane tool");

        let output = Command::new(&path)
            .args(["config", "get-contexts", "-o", "name"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                EagleError::PrerequisiteMissing(format!("failed to run {}: {e}", self.binary))
            })?;
        if !output.status.success() {
            return Err(EagleError::PrerequisiteMissing(format!(
                "unable to list kubectl contexts: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let listed = String::from_utf8_lossy(&output.stdout);
        let known: HashSet<&str> = listed.lines().map(str::trim).collect();
        for ctx in contexts {
            if !known.contains(ctx.as_str()) {
                return Err(EagleError::PrerequisiteMissing(format!(
                    "kubectl context '{ctx}' is not configured"
                )));
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        context: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--context").arg(context).args(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.kill_on_drop(true);

        tracing::debug!(context, args = %args.join(" "), "kubectl");

        let mut child = cmd.spawn().map_err(|e| {
            EagleError::CommandFailed(format!("failed to spawn {}: {e}", self.binary))
        })?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preflight_reports_missing_binary() {
        let kubectl = Kubectl::with_binary("eagle-definitely-not-installed-kubectl");
        let err = kubectl
            .preflight(&["eagle-us-east-1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EagleError::PrerequisiteMissing(_)));
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[tokio::test]
    async fn run_reports_spawn_failure() {
        let kubectl = Kubectl::with_binary("eagle-definitely-not-installed-kubectl");
        let err = kubectl
            .run("ctx", &["version".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EagleError::CommandFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_reports_exit_status() {
        let ok = Kubectl::with_binary("true");
        assert!(ok.run("ctx", &[], None).await.unwrap().success);

        let failing = Kubectl::with_binary("false");
        assert!(!failing.run("ctx", &[], None).await.unwrap().success);
    }
}
