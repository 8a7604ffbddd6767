//! Short-lived engine calls whose stdout is the answer: `version` and
//! `config file`. Used at startup to confirm the configured binary runs.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use csync_core::{CommandBuilder, EngineCommand};

use crate::error::EngineError;

const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the engine binary reported about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub program: PathBuf,
    pub version: String,
    /// Config file the engine resolves on its own, if it said so.
    pub config_file: Option<PathBuf>,
}

/// Run `command` to completion and return its stdout.
pub async fn run_one_shot(command: &EngineCommand) -> Result<String, EngineError> {
    let failed = |message: String| EngineError::OneShot {
        program: command.program.clone(),
        args: command.args.join(" "),
        message,
    };

    let output = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(ONE_SHOT_TIMEOUT, output)
        .await
        .map_err(|_| failed(format!("no answer within {}s", ONE_SHOT_TIMEOUT.as_secs())))?
        .map_err(|source| EngineError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| output.status.to_string());
        return Err(failed(reason));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Ask the engine for its version and its config file location.
///
/// A failing `version` call is an error; a failing `config file` call only
/// leaves [`EngineInfo::config_file`] empty.
pub async fn probe(commands: &CommandBuilder) -> Result<EngineInfo, EngineError> {
    let version = parse_version(&run_one_shot(&commands.one_shot(["version"])).await?);
    let config_file = match run_one_shot(&commands.one_shot(["config", "file"])).await {
        Ok(stdout) => parse_config_file(&stdout),
        Err(err) => {
            tracing::warn!(error = %err, "engine did not report its config file");
            None
        }
    };
    tracing::info!(
        program = %commands.program().display(),
        version = %version,
        config = ?config_file,
        "engine found",
    );
    Ok(EngineInfo {
        program: commands.program().to_path_buf(),
        version,
        config_file,
    })
}

/// `rclone v1.66.0` on the first line → `v1.66.0`.
fn parse_version(stdout: &str) -> String {
    stdout
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().last())
        .unwrap_or("unknown")
        .to_string()
}

/// The path is the last line, after the `Configuration file is stored at:`
/// banner.
fn parse_config_file(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_last_word_of_first_line() {
        assert_eq!(
            parse_version("rclone v1.66.0\n- os/version: debian 12\n- go/version: go1.22\n"),
            "v1.66.0"
        );
        assert_eq!(parse_version(""), "unknown");
    }

    #[test]
    fn config_file_is_last_non_empty_line() {
        assert_eq!(
            parse_config_file("Configuration file is stored at:\n/home/u/.config/rclone/rclone.conf\n\n"),
            Some(PathBuf::from("/home/u/.config/rclone/rclone.conf"))
        );
        assert_eq!(parse_config_file("\n"), None);
    }
}
