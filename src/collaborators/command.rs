//! Subprocess plumbing shared by the engine adapters
//!
//! Children are killed when the future driving them is dropped, so a call
//! abandoned on timeout or barge-in never leaves an engine running.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Why an engine invocation failed
#[derive(Debug)]
pub(crate) enum CommandFailure {
    /// The executable could not be started
    Spawn(String),
    /// It ran but exited unsuccessfully
    Exit(String),
}

/// Run `program`, optionally feeding `stdin`, and return its stdout
pub(crate) async fn run<I, S>(
    program: &str,
    args: I,
    stdin: Option<&str>,
) -> Result<String, CommandFailure>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, "starting engine");
    let mut child = command
        .spawn()
        .map_err(|e| CommandFailure::Spawn(format!("{program}: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| CommandFailure::Exit(format!("{program}: writing stdin: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CommandFailure::Exit(format!("{program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().last().unwrap_or("").trim();
        return Err(CommandFailure::Exit(format!(
            "{program} exited with {}: {detail}",
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Collapse engine output into one line of text
pub(crate) fn flatten(output: &str) -> String {
    output.split_whitespace().collect::<Vec<_>>().join(" ")
}
