//! Bounded external-command executor.
//!
//! Synchronous actions (power status/on/off/reboot, run) execute an argument
//! vector produced by template resolution. The child never sees a shell.
//! Output is captured and embedded in the result either way; a wall-clock
//! ceiling is enforced and a breach is reported as a timeout, distinct from
//! an ordinary nonzero exit.

use std::process::Stdio;
use std::time::Duration;

use lc_core::error::{LcError, LcResult};
use tokio::process::Command;

/// Run an argv to completion under a wall-clock ceiling, capturing combined
/// output.
///
/// On ceiling breach the child is forcibly killed (the process handle is
/// dropped with kill-on-drop set) and `LcError::Timeout` is returned within
/// the ceiling plus scheduler slack. A nonzero exit is `LcError::Execution`
/// with the captured output embedded in the message.
pub async fn run(argv: &[String], ceiling: Duration) -> LcResult<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| LcError::Validation("empty command".into()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| LcError::Execution(format!("failed to spawn '{}': {}", program, e)))?;

    let output = match tokio::time::timeout(ceiling, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(LcError::Execution(format!(
                "failed waiting for '{}': {}",
                program, e
            )));
        }
        // Dropping the elapsed future drops the child handle, which kills
        // the process (kill_on_drop).
        Err(_) => {
            tracing::warn!(command = %program, ceiling_secs = ceiling.as_secs(), "command exceeded ceiling, killed");
            return Err(LcError::Timeout(format!(
                "command '{}' exceeded {}s ceiling and was killed",
                program,
                ceiling.as_secs()
            )));
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        Err(LcError::Execution(format!(
            "command '{}' failed ({}): {}",
            program,
            output.status,
            combined.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_output_on_success() {
        let out = run(&argv(&["echo", "hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_embeds_output() {
        let err = run(
            &argv(&["sh", "-c", "echo broken >&2; exit 3"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            LcError::Execution(msg) => assert!(msg.contains("broken")),
            other => panic!("expected Execution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_execution_error() {
        let err = run(
            &argv(&["/nonexistent/definitely-not-a-binary"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LcError::Execution(_)));
    }

    #[tokio::test]
    async fn over_ceiling_command_is_killed_and_reported_as_timeout() {
        let started = std::time::Instant::now();
        let err = run(&argv(&["sleep", "30"]), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, LcError::Timeout(_)));
        // ceiling plus a small bounded slack, never the full sleep
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn empty_argv_is_a_validation_error() {
        let err = run(&[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LcError::Validation(_)));
    }
}
