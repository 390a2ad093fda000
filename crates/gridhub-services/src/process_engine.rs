//! External estimation engine — a long-lived child process.
//!
//! The child is started once and kept for the server's lifetime, the way a
//! numerical session (Octave, MATLAB, a Python kernel) is normally driven.
//! Protocol, one exchange per estimate:
//!
//!   stdin:  one line of JSON (`EstimateParams`)
//!   stdout: one line holding a single decimal number
//!
//! A child that has exited or closed its pipes makes the engine
//! unavailable; it is not restarted.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::engine::{EngineError, EstimateParams, EstimationEngine};

pub struct ProcessEngine {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl ProcessEngine {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, EngineError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdout not captured".into()))?;

        tracing::info!(program, pid = child.id(), "estimation engine process started");

        Ok(Self {
            program: program.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn exchange(&mut self, request: &str) -> Result<String, EngineError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::Unavailable("engine stdin closed".into()))?;

        stdin
            .write_all(request.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .map_err(|e| EngineError::Unavailable(format!("write to engine failed: {e}")))?;

        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| EngineError::Unavailable(format!("read from engine failed: {e}")))?;
        if n == 0 {
            return Err(EngineError::Unavailable(format!(
                "engine '{}' closed its output",
                self.program
            )));
        }
        Ok(line)
    }
}

impl EstimationEngine for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    fn estimate(&mut self, params: &EstimateParams) -> Result<f64, EngineError> {
        let request = serde_json::to_string(params)
            .map_err(|e| EngineError::Failed(format!("failed to encode request: {e}")))?;
        let reply = self.exchange(&request)?;
        let reply = reply.trim();
        reply
            .parse::<f64>()
            .map_err(|_| EngineError::Failed(format!("engine replied {reply:?}")))
    }

    fn shutdown(&mut self) {
        // Closing stdin lets a well-behaved engine exit on its own.
        self.stdin.take();
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::info!(program = %self.program, ?status, "estimation engine exited");
            return;
        }
        if let Err(e) = self.child.kill() {
            tracing::warn!(program = %self.program, error = %e, "failed to kill estimation engine");
        }
        let _ = self.child.wait();
        tracing::info!(program = %self.program, "estimation engine stopped");
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            self.shutdown();
        }
    }
}
