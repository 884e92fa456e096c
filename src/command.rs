//! Running external tools (git, rclone, the documentation build).

use std::ffi::OsStr;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::CommandError;

/// Run `program args...` (optionally inside `cwd`, with extra environment
/// variables) and return its stdout. A non-zero exit is an error carrying
/// stderr.
pub async fn run_command<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    envs: &[(&str, &OsStr)],
) -> Result<String, CommandError> {
    let command_line = display_command(program, args);
    match cwd {
        Some(dir) => info!("Running (cwd = '{}'): {}", dir.display(), command_line),
        None => info!("Running: {}", command_line),
    }

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = cmd.output().await.map_err(|e| {
        error!("{} failed to start: {}", command_line, e);
        CommandError::Spawn {
            command: command_line.clone(),
            source: e,
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        error!("{} failed: {}", command_line, stderr);
        return Err(CommandError::Failed {
            command: command_line,
            status: output.status.to_string(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    debug!("{} output:\n{}", command_line, stdout);
    Ok(stdout)
}

/// Run a whitespace-separated command line such as `tox -e docs`.
pub async fn run_command_line(line: &str, cwd: Option<&Path>) -> Result<String, CommandError> {
    let mut parts = line.split_whitespace();
    let program = parts.next().ok_or_else(|| CommandError::Failed {
        command: line.to_string(),
        status: "not run".to_string(),
        stderr: "command line is empty".to_string(),
    })?;
    let args: Vec<&str> = parts.collect();
    run_command(program, &args, cwd, &[]).await
}

fn display_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut cmd = String::from(program);
    for arg in args {
        cmd.push(' ');
        cmd.push_str(&arg.as_ref().to_string_lossy());
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        assert_eq!(
            display_command("git", &["push", "origin", "main"]),
            "git push origin main"
        );
        assert_eq!(display_command::<&str>("ls", &[]), "ls");
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let out = run_command("echo", &["hello"], None, &[]).await.unwrap();
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let err = run_command::<&str>("false", &[], None, &[]).await.unwrap_err();
        assert!(matches!(err, CommandError::Failed { .. }));
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let err = run_command::<&str>("definitely-not-a-real-binary-xyz", &[], None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn empty_command_line_is_rejected() {
        assert!(run_command_line("   ", None).await.is_err());
    }
}
