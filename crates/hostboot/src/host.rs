//! Host abstraction for the bootstrap sequence.
//!
//! The [`Host`] trait is everything the state machine does to the machine it
//! runs on: run commands, read and write files, change ownership. This allows:
//! - Real execution via [`SystemHost`]
//! - Scripted hosts for testing ([`ScriptedHost`])

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A command to run on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Run as this user instead of root
    pub user: Option<String>,
    pub env: Vec<(String, String)>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            user: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn as_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(status: i32, stderr: &str) -> Self {
        Self {
            status: Some(status),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Operations the bootstrap sequence performs on its host
pub trait Host {
    /// Run a command to completion; a non-zero exit is not an error here
    fn run(&self, command: &HostCommand) -> Result<CommandOutput>;

    /// Read a file, `None` if it does not exist
    fn read_file(&self, path: &Path) -> Result<Option<String>>;

    /// Replace a file atomically with the given permission bits
    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    /// Create a directory and its parents
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Change owner and group of a path (not recursive)
    fn chown(&self, path: &Path, user: &str, group: &str) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// The machine this process runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, command: &HostCommand) -> Result<CommandOutput> {
        log::debug!("Running: {command}");

        let mut cmd = match &command.user {
            Some(user) => {
                let mut cmd = Command::new("runuser");
                cmd.args(["-u", user, "--", &command.program]);
                cmd
            }
            None => Command::new(&command.program),
        };
        cmd.args(&command.args);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let output = cmd.output().map_err(|e| Error::CommandFailed {
            command: command.to_string(),
            status: None,
            stderr: e.to_string(),
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let tmp = path.with_extension("tmp");
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(mode);
            }
            let mut file = options.open(&tmp).map_err(|e| Error::io(&tmp, e))?;
            std::io::Write::write_all(&mut file, contents.as_bytes())
                .map_err(|e| Error::io(&tmp, e))?;
        }

        // The mode passed to open() is filtered by the umask
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))
                .map_err(|e| Error::io(&tmp, e))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| Error::io(path, e))
    }

    fn chown(&self, path: &Path, user: &str, group: &str) -> Result<()> {
        let command = HostCommand::new("chown")
            .arg(format!("{user}:{group}"))
            .arg(path);
        let output = self.run(&command)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Debug, Default)]
struct ScriptedInner {
    commands: Vec<String>,
    files: BTreeMap<PathBuf, (String, u32)>,
    dirs: Vec<PathBuf>,
    owners: BTreeMap<PathBuf, String>,
}

/// In-memory host that records what the state machine does
///
/// Commands succeed unless a response was scripted for a matching command
/// line. Files live in memory.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    responses: Vec<(String, CommandOutput)>,
    unspawnable: Vec<String>,
    inner: Mutex<ScriptedInner>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `output` to any command line containing `pattern`
    pub fn respond(mut self, pattern: &str, output: CommandOutput) -> Self {
        self.responses.push((pattern.to_string(), output));
        self
    }

    /// Fail to start any command line containing `pattern`
    pub fn unspawnable(mut self, pattern: &str) -> Self {
        self.unspawnable.push(pattern.to_string());
        self
    }

    /// Pre-populate a file
    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.lock()
            .files
            .insert(path.into(), (contents.to_string(), 0o644));
        self
    }

    /// Command lines in execution order
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Whether a command line containing `pattern` was run
    pub fn ran(&self, pattern: &str) -> bool {
        self.lock().commands.iter().any(|c| c.contains(pattern))
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.lock().files.get(path).map(|(c, _)| c.clone())
    }

    pub fn file_mode(&self, path: &Path) -> Option<u32> {
        self.lock().files.get(path).map(|(_, m)| *m)
    }

    /// `user:group` of a path, if chowned
    pub fn owner(&self, path: &Path) -> Option<String> {
        self.lock().owners.get(path).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Host for ScriptedHost {
    fn run(&self, command: &HostCommand) -> Result<CommandOutput> {
        let line = command.to_string();
        self.lock().commands.push(line.clone());
        if self.unspawnable.iter().any(|p| line.contains(p.as_str())) {
            return Err(Error::CommandFailed {
                command: line,
                status: None,
                stderr: "No such file or directory (os error 2)".to_string(),
            });
        }
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map_or_else(CommandOutput::success, |(_, output)| output.clone()))
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.file(path))
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        self.lock()
            .files
            .insert(path.to_path_buf(), (contents.to_string(), mode));
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        self.lock().dirs.push(path.to_path_buf());
        Ok(())
    }

    fn chown(&self, path: &Path, user: &str, group: &str) -> Result<()> {
        self.lock()
            .owners
            .insert(path.to_path_buf(), format!("{user}:{group}"));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let inner = self.lock();
        inner.files.contains_key(path) || inner.dirs.iter().any(|d| d == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_display() {
        let cmd = HostCommand::new("git")
            .args(["clone", "https://example.com/app.git"])
            .arg(Path::new("/opt/app"))
            .as_user("ubuntu");
        assert_eq!(cmd.to_string(), "git clone https://example.com/app.git /opt/app");
        assert_eq!(cmd.user.as_deref(), Some("ubuntu"));
    }

    #[test]
    fn test_scripted_responses() {
        let host = ScriptedHost::new().respond("migrate", CommandOutput::failure(1, "boom"));
        let ok = host.run(&HostCommand::new("apt-get").arg("update")).unwrap();
        let failed = host
            .run(&HostCommand::new("python").args(["manage.py", "migrate"]))
            .unwrap();

        assert!(ok.is_success());
        assert_eq!(failed.stderr, "boom");
        assert!(host.ran("apt-get update"));
        assert_eq!(host.commands().len(), 2);
    }

    #[test]
    fn test_system_host_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/.env");
        let host = SystemHost;

        assert_eq!(host.read_file(&path).unwrap(), None);
        host.write_file(&path, "A=1\n", 0o600).unwrap();
        assert_eq!(host.read_file(&path).unwrap().as_deref(), Some("A=1\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_system_host_run() {
        let output = SystemHost
            .run(&HostCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
