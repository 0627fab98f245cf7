//! Transformer that shells out to an external command.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use kura_cache::{TransformConfig, TransformOutput, TransformedOutput, Transformer, TransformerIdentity};
use thiserror::Error;

/// Environment variable carrying the file name to the command.
pub const FILENAME_VAR: &str = "KURA_FILENAME";

/// Errors from running the transform command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{program}' produced output that is not valid UTF-8")]
    InvalidUtf8 { program: String },
}

/// Pipes the source to a command's stdin and takes its stdout as the code.
///
/// The transformer identity is the program name, versioned by its arguments,
/// so changing the command line changes the default cache identifier.
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
    dependencies: Vec<PathBuf>,
}

impl CommandTransformer {
    /// Creates a transformer from a command line. Returns `None` if it is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            dependencies: Vec::new(),
        })
    }

    /// Declares files every output depends on.
    pub fn with_dependencies(mut self, dependencies: Vec<PathBuf>) -> Self {
        self.dependencies = dependencies;
        self
    }

    fn io_error(&self, source: std::io::Error) -> CommandError {
        CommandError::Io {
            program: self.program.clone(),
            source,
        }
    }
}

impl Transformer for CommandTransformer {
    type Error = CommandError;

    fn identity(&self) -> TransformerIdentity {
        TransformerIdentity::new(&self.program, self.args.join(" "))
    }

    fn transform(
        &self,
        source: &str,
        config: &TransformConfig,
    ) -> Result<TransformOutput, CommandError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(filename) = &config.filename {
            command.env(FILENAME_VAR, filename);
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.io_error(std::io::Error::other("stdin not captured")))?;
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(source.as_bytes()));
            let output = child.wait_with_output();
            match writer.join() {
                // A command that exits without reading its input closes the pipe early.
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => output,
            }
        })
        .map_err(|e| self.io_error(e))?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let code = String::from_utf8(output.stdout).map_err(|_| CommandError::InvalidUtf8 {
            program: self.program.clone(),
        })?;

        Ok(TransformOutput::new(TransformedOutput::new(code))
            .with_dependencies(self.dependencies.clone()))
    }
}
