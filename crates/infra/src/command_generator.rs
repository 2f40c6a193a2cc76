// Command book generator
// Runs a local generator program: request JSON on stdin, artifact JSON on stdout
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use quill_core::domain::{BookArtifact, BookRequest};
use quill_core::port::{BookGenerator, GenerationError};

/// Max stderr bytes carried into a rejection message
const STDERR_EXCERPT_LEN: usize = 512;

/// Spawns an isolated child process per request with environment allowlisting
pub struct CommandBookGenerator {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env_allowlist: Vec<String>,
    timeout: Duration,
}

impl CommandBookGenerator {
    /// Create a new command generator
    ///
    /// # Arguments
    /// * `program` - Generator executable
    /// * `args` - Fixed arguments
    /// * `env_allowlist` - Environment variables passed through to the child
    /// * `timeout` - Per-request deadline; the child is killed when it expires
    ///
    /// # Example
    /// ```ignore
    /// let generator = CommandBookGenerator::new(
    ///     "python3",
    ///     vec!["generate_book.py".to_string()],
    ///     vec!["PATH".to_string(), "OPENAI_API_KEY".to_string()],
    ///     Duration::from_secs(600),
    /// );
    /// ```
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        env_allowlist: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env_allowlist,
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Keep allowlisted variables only
    fn filter_env(&self, env: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
        env.filter(|(k, _)| self.env_allowlist.contains(k)).collect()
    }

    async fn run(&self, input: Vec<u8>) -> Result<std::process::Output, GenerationError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| GenerationError::Unavailable(format!("spawn {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&input).await {
                Ok(()) => {}
                // Child exited without reading its input; its status decides
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(program = %self.program, "Generator closed stdin early");
                }
                Err(e) => return Err(GenerationError::Unavailable(format!("write stdin: {}", e))),
            }
            // Dropping stdin closes the pipe so the child sees EOF
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(GenerationError::Unavailable(e.to_string())),
            Err(_) => {
                // kill_on_drop reaps the child
                warn!(program = %self.program, timeout_ms, "Generator process timed out");
                Err(GenerationError::Timeout(timeout_ms))
            }
        }
    }
}

#[async_trait]
impl BookGenerator for CommandBookGenerator {
    async fn generate(&self, request: &BookRequest) -> Result<BookArtifact, GenerationError> {
        let input = serde_json::to_vec(request)
            .map_err(|e| GenerationError::Rejected(format!("encode request: {}", e)))?;

        let started = Instant::now();
        info!(
            program = %self.program,
            args = ?self.args,
            title = %request.title,
            "Starting generator process"
        );

        let output = self.run(input).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            program = %self.program,
            duration_ms,
            exit_code = ?output.status.code(),
            "Generator process completed"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_LEN).collect();
            return Err(GenerationError::Rejected(format!(
                "exit code {:?}: {}",
                output.status.code(),
                excerpt
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| GenerationError::InvalidArtifact(e.to_string()))?;
        Ok(BookArtifact::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandBookGenerator {
        CommandBookGenerator::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            vec!["PATH".to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_generate_echoes_request() {
        let generator = sh("cat", Duration::from_secs(5));

        let artifact = generator.generate(&BookRequest::sample("Ferris")).await.unwrap();

        assert_eq!(artifact.as_value()["title"], "Ferris");
        assert_eq!(artifact.as_value()["numChapters"], 3);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_rejected() {
        let generator = sh("echo quota exceeded >&2; exit 3", Duration::from_secs(5));

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();

        match err {
            GenerationError::Rejected(msg) => {
                assert!(msg.contains("Some(3)"));
                assert!(msg.contains("quota exceeded"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_stdout_is_invalid_artifact() {
        let generator = sh("echo not-json", Duration::from_secs(5));

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidArtifact(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let generator = sh("sleep 10", Duration::from_millis(100));

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();
        assert_eq!(err, GenerationError::Timeout(100));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let generator = CommandBookGenerator::new(
            "/nonexistent/quill-generator",
            vec![],
            vec![],
            Duration::from_secs(1),
        );

        let err = generator.generate(&BookRequest::sample("t")).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }

    #[test]
    fn test_env_filtering() {
        let generator = CommandBookGenerator::new(
            "true",
            vec![],
            vec!["ALLOWED_VAR".to_string()],
            Duration::from_secs(1),
        );

        let env = vec![
            ("ALLOWED_VAR".to_string(), "value1".to_string()),
            ("BLOCKED_VAR".to_string(), "value2".to_string()),
        ];
        let filtered = generator.filter_env(env.into_iter());

        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("ALLOWED_VAR"));
        assert!(!filtered.contains_key("BLOCKED_VAR"));
    }
}
