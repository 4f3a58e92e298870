//! Thin subprocess execution wrapper shared by the media tool adapter.
//!
//! Stdout/stderr are always captured as UTF-8 (lossily, since ffmpeg's
//! diagnostic stream is not guaranteed clean); stderr is only surfaced to
//! the caller when the process exits non-zero, per the subprocess tool
//! contract.

use std::process::Command;

use crate::error::PipelineError;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

pub fn run(program: &str, args: &[&str]) -> Result<CommandOutput, PipelineError> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::ToolNotFound(format!("{program}: {e}"))
        } else {
            PipelineError::InvalidInput(format!("failed to spawn {program}: {e}"))
        }
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_maps_to_tool_not_found() {
        let err = run("ams-definitely-not-a-real-binary", &[]).unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotFound(_)));
    }

    #[test]
    fn captures_stdout_of_a_real_process() {
        let out = run("echo", &["hello"]).unwrap();
        assert!(out.success);
        assert!(out.stdout.contains("hello"));
    }
}
