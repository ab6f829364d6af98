//! External command execution for hardware probes
//!
//! Every command a probe spawns goes through [`CommandRunner`], so each one is
//! bounded by a deadline and, on Windows, never opens a console window.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
#[cfg(target_os = "windows")]
use windows_sys::Win32::System::Threading::CREATE_NO_WINDOW;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Why a probe command produced no usable output
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{program} not found")]
    NotFound { program: String },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}")]
    Failed { program: String, code: Option<i32> },

    #[error("{program} timed out after {}ms", timeout.as_millis())]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} produced no output")]
    EmptyOutput { program: String },
}

/// Runs a program and returns its trimmed stdout.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError>;
}

/// Runs real OS processes with a per-command deadline.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        debug!(program, ?args, "running probe command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(target_os = "windows")]
        command.creation_flags(CREATE_NO_WINDOW);

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CommandError::NotFound {
                    program: program.to_string(),
                }
            } else {
                CommandError::Spawn {
                    program: program.to_string(),
                    source,
                }
            }
        })?;

        // Drain pipes on their own threads so a chatty child cannot block on a full pipe.
        let stdout_handle = child.stdout.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_handle = child.stderr.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf);
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CommandError::Spawn {
                        program: program.to_string(),
                        source,
                    });
                }
            }

            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                // Reader threads are left to finish on their own: a grandchild may still
                // hold the pipe open after the direct child is killed.
                return Err(CommandError::TimedOut {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }

            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if let Some(handle) = stderr_handle {
            let _ = handle.join();
        }

        if !status.success() {
            return Err(CommandError::Failed {
                program: program.to_string(),
                code: status.code(),
            });
        }

        let text = String::from_utf8_lossy(&stdout).trim().to_string();
        if text.is_empty() {
            return Err(CommandError::EmptyOutput {
                program: program.to_string(),
            });
        }

        Ok(text)
    }
}

/// Run a PowerShell script non-interactively.
pub fn run_powershell(runner: &dyn CommandRunner, script: &str) -> Result<String, CommandError> {
    runner.run(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{CommandError, CommandRunner};
    use std::sync::Mutex;

    struct Script {
        program: String,
        needle: Option<String>,
        stdout: String,
    }

    /// Replays canned stdout keyed by program (and optionally an argument
    /// substring); anything unscripted is "not found".
    #[derive(Default)]
    pub struct ScriptedRunner {
        scripts: Vec<Script>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, program: &str, stdout: &str) -> Self {
            self.scripts.push(Script {
                program: program.to_string(),
                needle: None,
                stdout: stdout.to_string(),
            });
            self
        }

        pub fn with_args(mut self, program: &str, needle: &str, stdout: &str) -> Self {
            self.scripts.push(Script {
                program: program.to_string(),
                needle: Some(needle.to_string()),
                stdout: stdout.to_string(),
            });
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
            let joined = args.join(" ");
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", program, joined));

            let script = self.scripts.iter().find(|s| {
                s.program == program
                    && s.needle.as_deref().map_or(true, |needle| joined.contains(needle))
            });
            match script {
                Some(s) if s.stdout.trim().is_empty() => Err(CommandError::EmptyOutput {
                    program: program.to_string(),
                }),
                Some(s) => Ok(s.stdout.trim().to_string()),
                None => Err(CommandError::NotFound {
                    program: program.to_string(),
                }),
            }
        }
    }
}
