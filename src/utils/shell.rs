//! Structured external-command execution.
//!
//! Every external action in the launcher (docker, tmux, ip, iptables, ssh,
//! rsync) is expressed as a [`Cmd`], a program plus discrete argument
//! tokens, and handed to an [`Executor`]. Quoting happens only when a
//! command has to cross a shell boundary (ssh, tmux send-keys), never by
//! concatenating strings at the call site.

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::debug;
use std::fmt;
use std::process::Command;

/// One external command as discrete argument tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// A command run through `sudo`.
    pub fn sudo(program: impl Into<String>) -> Self {
        Cmd::new("sudo").arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Rewrap this command to run on a remote host over ssh.
    ///
    /// The remote shell re-splits its command line, so every token is
    /// quoted before joining.
    pub fn via_ssh(self, user: Option<&str>, host: &str) -> Cmd {
        let target = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        let mut line = shell_quote(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        Cmd::new("ssh").arg(target).arg(line)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Quote one token for a POSIX shell.
pub fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// A successful result carrying the given stdout.
    pub fn ok(stdout: &str) -> Self {
        Self {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit status.
    pub fn failed(status: i32) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// The command-execution seam.
///
/// `Err` means the command could not be run at all; a command that ran and
/// exited non-zero is `Ok` with a non-zero [`ExecOutput::status`], so
/// callers choose between [`run_checked`] and [`run_best_effort`]
/// semantics.
pub trait Executor {
    fn run(&self, cmd: &Cmd) -> Result<ExecOutput>;
}

impl<E: Executor> Executor for std::sync::Arc<E> {
    fn run(&self, cmd: &Cmd) -> Result<ExecOutput> {
        (**self).run(cmd)
    }
}

/// Executes commands on the local host, capturing output.
pub struct ShellExecutor;

impl Executor for ShellExecutor {
    fn run(&self, cmd: &Cmd) -> Result<ExecOutput> {
        debug!("Running command: {cmd}");
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .wrap_err_with(|| format!("failed to spawn '{cmd}'"))?;
        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command, failing with its stderr when it exits non-zero.
pub fn run_checked(executor: &dyn Executor, cmd: &Cmd) -> Result<ExecOutput> {
    let output = executor.run(cmd)?;
    if !output.success() {
        return Err(eyre!(
            "command failed with status {}: {cmd}\n{}",
            output.status,
            output.stderr.trim()
        ));
    }
    Ok(output)
}

/// Run a command, absorbing any failure.
///
/// Used for stale-resource cleanup where an absent target is expected.
pub fn run_best_effort(executor: &dyn Executor, cmd: &Cmd) {
    match executor.run(cmd) {
        Ok(output) if !output.success() => {
            debug!("Ignoring failure (status {}): {cmd}", output.status);
        }
        Err(error) => debug!("Ignoring spawn failure for '{cmd}': {error}"),
        Ok(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_tokens_stay_unquoted() {
        assert_eq!(shell_quote("tcp/10.0.1.1:7447"), "tcp/10.0.1.1:7447");
        assert_eq!(shell_quote("-l"), "-l");
        assert_eq!(shell_quote("zenohd_r0"), "zenohd_r0");
    }

    #[test]
    fn test_special_tokens_are_single_quoted() {
        assert_eq!(
            shell_quote(r#"--cfg=peer_caps:{"a":1}"#),
            r#"'--cfg=peer_caps:{"a":1}'"#
        );
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_via_ssh_wraps_and_quotes() {
        let cmd = Cmd::new("tmux")
            .args(["kill-session", "-t", "zenohd_r0"])
            .via_ssh(Some("alice"), "host1");
        assert_eq!(cmd.program, "ssh");
        assert_eq!(cmd.args[0], "alice@host1");
        assert_eq!(cmd.args[1], "tmux kill-session -t zenohd_r0");
    }

    #[test]
    fn test_sudo_prefixes_program() {
        let cmd = Cmd::sudo("ip").args(["link", "del", "br_r0_0"]);
        assert_eq!(cmd.program, "sudo");
        assert_eq!(cmd.args, vec!["ip", "link", "del", "br_r0_0"]);
        assert_eq!(cmd.to_string(), "sudo ip link del br_r0_0");
    }
}
