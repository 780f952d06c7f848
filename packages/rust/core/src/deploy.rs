//! Post-run deploy hook: an external command invoked with the output directory.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, instrument, warn};

use nodeharvest_shared::{NodeHarvestError, Result};

/// Run `command` with `output_dir` appended as its last argument.
///
/// Returns whether the command exited successfully. Failing to start the
/// program at all is an error; a non-zero exit is not.
#[instrument(skip_all, fields(program = command.first().map(String::as_str).unwrap_or("")))]
pub async fn deploy(command: &[String], output_dir: &Path) -> Result<bool> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| NodeHarvestError::Deploy("deploy command is empty".into()))?;

    info!(dir = %output_dir.display(), "running deploy command");
    let status = Command::new(program)
        .args(args)
        .arg(output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| {
            NodeHarvestError::Deploy(format!("failed to start `{program}`: {e}. Is it installed?"))
        })?;

    if status.success() {
        info!("deploy finished");
    } else {
        warn!(?status, "deploy command failed");
    }
    Ok(status.success())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reports_exit_status() {
        let dir = std::env::temp_dir();
        assert!(deploy(&cmd(&["true"]), &dir).await.unwrap());
        assert!(!deploy(&cmd(&["false"]), &dir).await.unwrap());
    }

    #[tokio::test]
    async fn output_dir_is_last_argument() {
        let dir = std::env::temp_dir().join(format!("nh-deploy-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        // `test -d <dir>` succeeds only if the directory was passed through.
        assert!(deploy(&cmd(&["test", "-d"]), &dir).await.unwrap());
        let _ = std::fs::remove_dir_all(&dir);
        assert!(!deploy(&cmd(&["test", "-d"]), &dir).await.unwrap());
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let err = deploy(&cmd(&["nh-no-such-program-xyz"]), Path::new("."))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
        assert!(deploy(&[], Path::new(".")).await.is_err());
    }
}
