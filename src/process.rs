//! Centralized command execution with consistent error handling.
//!
//! Every external tool this crate drives goes through [`Cmd`]. Children never
//! inherit the host environment wholesale: each invocation is handed an
//! explicit [`ToolEnv`] built for that request, and both output pipes are
//! drained by `Command::output` before the exit status is looked at.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{Error, Result};

/// Host variables a child may see when they are set.
pub const PASSTHROUGH_VARS: &[&str] = &[
    "HOME", "USER", "LOGNAME", "TMPDIR", "TEMP", "TMP", "TERM", "PATH",
];

/// Variables pinned for reproducible tool output.
pub const DETERMINISM_PINS: &[(&str, &str)] = &[
    ("LC_ALL", "C"),
    ("LANG", "C"),
    ("SOURCE_DATE_EPOCH", "315576000"),
    ("CCACHE_DISABLE", "1"),
    ("RUSTC_WRAPPER", ""),
    ("CARGO_BUILD_RUSTC_WRAPPER", ""),
];

/// Environment handed to one child process.
///
/// Built from a snapshot of the host variables; the process environment
/// itself is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEnv {
    vars: BTreeMap<String, String>,
}

impl ToolEnv {
    /// Whitelisted host variables plus the determinism pins.
    pub fn from_host() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    /// Same as [`ToolEnv::from_host`] but from an explicit variable list.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in vars {
            let key = key.into();
            if PASSTHROUGH_VARS.contains(&key.as_str()) {
                map.insert(key, value.into());
            }
        }
        for (key, value) in DETERMINISM_PINS {
            map.insert(key.to_string(), value.to_string());
        }
        Self { vars: map }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string (empty when redirected to a file).
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    env: Option<ToolEnv>,
    stdout_file: Option<File>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: None,
            stdout_file: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    /// Replace the inherited environment with `env`.
    pub fn env(mut self, env: &ToolEnv) -> Self {
        self.env = Some(env.clone());
        self
    }

    /// Send stdout straight into `file` instead of capturing it.
    pub fn stdout_to(mut self, file: File) -> Self {
        self.stdout_file = Some(file);
        self
    }

    fn display_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Run the command to completion.
    ///
    /// A non-zero exit becomes [`Error::ToolFailed`] carrying the captured
    /// stderr.
    pub fn run(self) -> Result<CommandResult> {
        let name = self.display_name();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());

        if let Some(ref env) = self.env {
            cmd.env_clear();
            cmd.envs(env.iter());
        }

        if let Some(file) = self.stdout_file {
            cmd.stdout(Stdio::from(file));
        }

        log::debug!("+ {} {:?}", name, self.args);

        let output = cmd.output().map_err(|e| Error::ToolFailed {
            tool: name.clone(),
            code: -1,
            stderr: format!("could not execute ({}). Is it installed?", e),
        })?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            return Err(Error::ToolFailed {
                tool: name,
                code: result.code(),
                stderr: result.stderr,
            });
        }

        Ok(result)
    }
}

/// Resolve a tool given either as a bare name (looked up on `PATH`) or as
/// an explicit path, which must exist.
pub fn resolve_tool(tool: &str) -> Result<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(Error::not_found("tool", candidate));
    }
    which::which(tool).map_err(|_| Error::not_found("tool", candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn test_env() -> ToolEnv {
        ToolEnv::from_vars([("PATH", "/usr/bin:/bin")])
    }

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").env(&test_env()).run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_failure_is_tool_failed() {
        let err = Cmd::new("ls").arg("/nonexistent_path_12345").run().unwrap_err();
        match err {
            Error::ToolFailed { tool, stderr, .. } => {
                assert_eq!(tool, "ls");
                assert!(stderr.contains("No such file") || stderr.contains("cannot access"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let err = Cmd::new("definitely_not_a_real_command_12345").run().unwrap_err();
        assert!(err.to_string().contains("Is it installed?"));
    }

    #[test]
    fn test_env_is_replaced() {
        let env = ToolEnv::from_vars([("PATH", "/usr/bin:/bin"), ("HOME", "/home/builder")]);
        let result = Cmd::new("/usr/bin/env").env(&env).run().unwrap();

        assert!(result.stdout.contains("HOME=/home/builder"));
        assert!(result.stdout.contains("LC_ALL=C"));
        assert!(!result.stdout.contains("CARGO_PKG_NAME="));
    }

    #[test]
    fn test_stdout_to_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("out.txt");
        let file = File::create(&out).unwrap();

        let result = Cmd::new("echo").arg("redirected").stdout_to(file).run().unwrap();

        assert!(result.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "redirected\n");
    }

    #[test]
    fn test_tool_env_whitelist() {
        let env = ToolEnv::from_vars([
            ("PATH", "/bin"),
            ("HOME", "/home/builder"),
            ("LD_PRELOAD", "/evil.so"),
            ("LANG", "de_DE.UTF-8"),
        ]);
        let vars: BTreeMap<&str, &str> = env.iter().collect();

        assert_eq!(vars.get("PATH"), Some(&"/bin"));
        assert_eq!(vars.get("HOME"), Some(&"/home/builder"));
        assert_eq!(vars.get("LD_PRELOAD"), None);
        // pins win over host values
        assert_eq!(vars.get("LANG"), Some(&"C"));
        assert_eq!(vars.get("SOURCE_DATE_EPOCH"), Some(&"315576000"));
        assert_eq!(vars.get("RUSTC_WRAPPER"), Some(&""));
    }

    #[test]
    #[serial]
    fn test_host_env_skips_non_utf8_values() {
        use std::os::unix::ffi::OsStrExt;

        let saved = std::env::var_os("HOME");
        std::env::set_var("HOME", std::ffi::OsStr::from_bytes(b"/home/\xff"));
        let env = ToolEnv::from_host();
        match saved {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }

        let vars: BTreeMap<&str, &str> = env.iter().collect();
        assert_eq!(vars.get("HOME"), None);
        assert_eq!(vars.get("LC_ALL"), Some(&"C"));
    }

    #[test]
    fn test_resolve_tool() {
        assert!(resolve_tool("sh").is_ok());
        assert!(matches!(
            resolve_tool("nonexistent_program_12345"),
            Err(Error::InputNotFound { .. })
        ));
        assert!(matches!(
            resolve_tool("/nonexistent/dir/bpftool"),
            Err(Error::InputNotFound { .. })
        ));
    }
}
