//! Shared utilities: structured shell commands and the execution seam.

pub mod shell;

pub use shell::{run_best_effort, run_checked, shell_quote, Cmd, ExecOutput, Executor, ShellExecutor};
