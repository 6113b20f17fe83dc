//! Loading a generated script with the `nft` binary.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to pipe the ruleset to {program}: {source}")]
    Write {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("nft rejected the ruleset (exit {}): {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Rejected { code: Option<i32>, stderr: String },
}

/// Runs scripts through an `nft` executable (`nft` on `PATH` by default).
#[derive(Debug, Clone)]
pub struct Nft {
    program: String,
}

impl Default for Nft {
    fn default() -> Self {
        Self {
            program: "nft".to_string(),
        }
    }
}

impl Nft {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Validate the script without committing it (`nft -c -f -`).
    pub fn check(&self, script: &str) -> Result<(), ApplyError> {
        info!(program = %self.program, "checking ruleset");
        self.run(&["-c", "-f", "-"], script)
    }

    /// Load the script; the kernel commits the whole batch or nothing.
    pub fn apply(&self, script: &str) -> Result<(), ApplyError> {
        info!(program = %self.program, "applying ruleset");
        self.run(&["-f", "-"], script)?;
        info!("ruleset applied");
        Ok(())
    }

    fn run(&self, args: &[&str], script: &str) -> Result<(), ApplyError> {
        debug!(bytes = script.len(), ?args, "piping script to nft");
        let spawn_error = |source| ApplyError::Spawn {
            program: self.program.clone(),
            source,
        };
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;
        // Dropping stdin closes the pipe, so the child is always reaped.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(script.as_bytes()),
            None => Ok(()),
        };
        let output = child.wait_with_output().map_err(spawn_error)?;
        if let Err(err) = written {
            // nft may exit before reading everything; its status says why.
            if err.kind() != ErrorKind::BrokenPipe {
                return Err(ApplyError::Write {
                    program: self.program.clone(),
                    source: err,
                });
            }
        }
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(code = ?output.status.code(), "nft failed: {stderr}");
        Err(ApplyError::Rejected {
            code: output.status.code(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplyError, Nft};

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let nft = Nft::with_program("/nonexistent/patronus-nft");
        let err = nft.check("table inet t {\n}\n").expect_err("must fail");
        assert!(matches!(err, ApplyError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_carries_stderr() {
        // `false` ignores its input and exits 1.
        let nft = Nft::with_program("false");
        match nft.apply("table inet t {\n}\n") {
            Err(ApplyError::Rejected { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn child_that_stops_reading_is_reaped_and_reported() {
        // Larger than a pipe buffer, so the write fails once `false` exits.
        let script = "# padding\n".repeat(64 * 1024);
        let nft = Nft::with_program("false");
        match nft.check(&script) {
            Err(ApplyError::Rejected { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
