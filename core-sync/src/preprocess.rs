//! External-command preprocessor.
//!
//! Delegates to an external program (e.g. a Python script) invoked with two
//! positional arguments:
//!
//! ```text
//! <command...> <input_path> <output_path>
//! ```
//!
//! The program must write its result to `output_path` and exit with code 0
//! within the configured timeout. Stdout and stderr are captured and logged
//! on failure. The output temp file is deleted on every failure path; on
//! success the caller takes ownership of it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sync_traits::{PreprocessError, Preprocessor};
use tokio::process::Command;
use tracing::{debug, info};

pub struct ExternalPreprocessor {
    command: Vec<String>,
    timeout: Duration,
}

impl ExternalPreprocessor {
    /// `command` holds the program and its fixed arguments; the input and
    /// output paths are appended per call. Must not be empty.
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        assert!(!command.is_empty(), "preprocessor command must not be empty");
        info!(
            command = %command.join(" "),
            timeout_secs = timeout.as_secs(),
            "external preprocessor configured"
        );
        Self { command, timeout }
    }

    /// Builds the preprocessor from a whitespace-separated command line.
    pub fn from_command_line(command_line: &str, timeout: Duration) -> Self {
        let parts: Vec<String> = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Self::new(parts, timeout)
    }
}

#[async_trait]
impl Preprocessor for ExternalPreprocessor {
    async fn process(
        &self,
        input: &Path,
        original_name: &str,
    ) -> Result<PathBuf, PreprocessError> {
        let output = tempfile::Builder::new()
            .prefix("docsink-pre-")
            .suffix(&format!("-{original_name}"))
            .tempfile()?
            .into_temp_path()
            .keep()
            .map_err(|e| PreprocessError::Io(e.error))?;

        match self.run_command(input, &output, original_name).await {
            Ok(()) => Ok(output),
            Err(e) => {
                let _ = tokio::fs::remove_file(&output).await;
                Err(e)
            }
        }
    }
}

impl ExternalPreprocessor {
    async fn run_command(
        &self,
        input: &Path,
        output: &Path,
        original_name: &str,
    ) -> Result<(), PreprocessError> {
        debug!(
            file = %original_name,
            command = %self.command.join(" "),
            "preprocessing"
        );

        let mut command = Command::new(&self.command[0]);
        command
            .args(&self.command[1..])
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must also stop the child.
            .kill_on_drop(true);

        let result = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(PreprocessError::Timeout {
                    file: original_name.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        };
        let captured = result?;

        let mut combined = String::from_utf8_lossy(&captured.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&captured.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(stderr);
        }

        if !captured.status.success() {
            let code = captured
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = if combined.is_empty() {
                format!("exit code {code}")
            } else {
                format!("exit code {code}: {combined}")
            };
            return Err(PreprocessError::Failed {
                file: original_name.to_string(),
                detail,
            });
        }

        if !combined.is_empty() {
            debug!(file = %original_name, output = %combined, "preprocessor output");
        }
        info!(file = %original_name, "preprocessed");
        Ok(())
    }
}

#[cfg(unix)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_input(dir: &Path) -> PathBuf {
        let input = dir.join("input.pdf");
        std::fs::write(&input, b"raw content").unwrap();
        input
    }

    #[tokio::test]
    async fn successful_command_produces_an_owned_output_file() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path());

        let preprocessor =
            ExternalPreprocessor::from_command_line("cp", Duration::from_secs(10));
        let output = preprocessor.process(&input, "input.pdf").await.unwrap();

        assert_ne!(output, input);
        assert_eq!(std::fs::read(&output).unwrap(), b"raw content");
        std::fs::remove_file(output).unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_captured_output() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path());

        let preprocessor = ExternalPreprocessor::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo conversion refused >&2; exit 3".to_string(),
            ],
            Duration::from_secs(10),
        );
        let error = preprocessor.process(&input, "input.pdf").await.unwrap_err();

        match error {
            PreprocessError::Failed { file, detail } => {
                assert_eq!(file, "input.pdf");
                assert!(detail.contains("exit code 3"));
                assert!(detail.contains("conversion refused"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path());

        let preprocessor = ExternalPreprocessor::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 30".to_string()],
            Duration::from_millis(100),
        );
        let error = preprocessor.process(&input, "input.pdf").await.unwrap_err();

        assert!(matches!(error, PreprocessError::Timeout { .. }));
    }
}
