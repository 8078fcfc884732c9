//! Running backend CLIs (`kubectl`, `terraform`) as child processes.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};

/// Run `program args...` and return its stdout. A non-zero exit is a
/// backend error carrying the exit code and stderr.
pub async fn run(
    backend: &'static str,
    program: &str,
    args: &[&str],
    workdir: Option<&Path>,
) -> AdapterResult<String> {
    debug!(%program, ?args, "running backend command");
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| {
        AdapterError::backend(backend, format!("failed to execute '{program}': {e}"))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        return Err(AdapterError::backend(
            backend,
            format!(
                "'{program} {}' failed (exit code {exit_code}): {}",
                args.join(" "),
                stderr.trim()
            ),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let out = run("test", "sh", &["-c", "echo hello"], None).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run("test", "sh", &["-c", "echo oops >&2; exit 3"], None)
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exit code 3"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let err = run("test", "scaleward-no-such-binary", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Backend { backend: "test", .. }));
    }
}
