//! Test doubles for the command-execution seam.
//!
//! Provisioning and teardown are exercised in tests against a recording
//! executor instead of a live shell, so the full lifecycle can be driven
//! without docker, tmux, or root.

use crate::utils::shell::{Cmd, ExecOutput, Executor};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::sync::Mutex;

/// Records every command instead of running it.
///
/// Responses are matched by substring against the rendered command line;
/// unmatched commands succeed with empty output. A failure pattern makes
/// matching commands error as if the binary could not be spawned.
#[derive(Default)]
pub struct RecordingExecutor {
    log: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, ExecOutput)>>,
    fail_pattern: Mutex<Option<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose rendered line contains `pattern` with `output`.
    pub fn respond(&self, pattern: &str, output: ExecOutput) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), output));
    }

    /// Make commands whose rendered line contains `pattern` fail to run.
    pub fn fail_matching(&self, pattern: &str) {
        *self.fail_pattern.lock().unwrap() = Some(pattern.to_string());
    }

    /// All rendered command lines, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, cmd: &Cmd) -> Result<ExecOutput> {
        let line = cmd.to_string();
        self.log.lock().unwrap().push(line.clone());

        if let Some(pattern) = self.fail_pattern.lock().unwrap().as_ref() {
            if line.contains(pattern.as_str()) {
                return Err(eyre!("refusing to run '{line}'"));
            }
        }
        for (pattern, output) in self.responses.lock().unwrap().iter() {
            if line.contains(pattern.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(ExecOutput::ok(""))
    }
}
