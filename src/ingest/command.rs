//! Ingestion through an external fetcher executable.
//!
//! The run configuration is passed in the child's environment. Every stdout
//! line becomes the self-reported status; every stderr line is surfaced through
//! the run's error callback. A non-zero exit fails the run.
//!
//! Output is decoded lossily: archive subjects are often latin-1, and both
//! pipes are drained to EOF whatever they carry.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Ingestor, RunConfig};
use crate::report::Incident;

pub struct CommandIngestor {
    program: String,
    args: Vec<String>,
    status: Arc<Mutex<String>>,
}

impl CommandIngestor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            status: Arc::new(Mutex::new("waiting for first run".to_string())),
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().context("ingest command is empty")?;
        Ok(Self::new(program, parts.collect()))
    }
}

fn set_status(status: &Mutex<String>, value: String) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

#[async_trait::async_trait]
impl Ingestor for CommandIngestor {
    async fn run(&self, config: RunConfig) -> Result<()> {
        set_status(&self.status, "starting".to_string());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PIPERMAIL_SOURCE", &config.source)
            .env("PIPERMAIL_DATABASE", config.sink.location())
            .env("PIPERMAIL_MONTHS", config.months_to_fetch.to_string())
            .env("PIPERMAIL_PARALLEL", config.parallelism.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start ingest command {}", self.program))?;

        info!(program = %self.program, pid = ?child.id(), "ingest command started");

        let stdout = child.stdout.take().context("ingest stdout not captured")?;
        let stderr = child.stderr.take().context("ingest stderr not captured")?;

        let status = self.status.clone();
        let progress = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).split(b'\n');
            while let Ok(Some(raw)) = lines.next_segment().await {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if !line.is_empty() {
                    debug!(progress = %line, "ingest progress");
                    set_status(&status, line.to_string());
                }
            }
        });

        let on_error = config.on_error.clone();
        let program = self.program.clone();
        let complaints = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).split(b'\n');
            while let Ok(Some(raw)) = lines.next_segment().await {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if !line.is_empty() {
                    on_error(Incident::Message(format!("{program}: {line}")));
                }
            }
        });

        let exit = child
            .wait()
            .await
            .context("failed to wait for ingest command")?;
        // Drain both pipes before judging the run.
        let _ = progress.await;
        let _ = complaints.await;

        if exit.success() {
            set_status(&self.status, "idle (last run ok)".to_string());
            Ok(())
        } else {
            set_status(&self.status, format!("idle (last run failed: {exit})"));
            anyhow::bail!("ingest command {} exited with {}", self.program, exit)
        }
    }

    fn status(&self) -> String {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sh(script: &str) -> CommandIngestor {
        CommandIngestor::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn config(dir: &tempfile::TempDir, errors: Arc<AtomicUsize>) -> RunConfig {
        let db = dir.path().join("archive.db");
        RunConfig {
            source: "https://lists.example.org/pipermail/dev/".to_string(),
            sink: Store::open(db.to_str().unwrap()).unwrap(),
            months_to_fetch: NonZeroU32::new(2).unwrap(),
            parallelism: NonZeroU32::new(3).unwrap(),
            on_error: Arc::new(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn test_from_command_line() {
        let ingestor = CommandIngestor::from_command_line("fetch --verbose  --retries 3").unwrap();
        assert_eq!(ingestor.program, "fetch");
        assert_eq!(ingestor.args, vec!["--verbose", "--retries", "3"]);
        assert!(CommandIngestor::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn test_success_passes_environment_and_tracks_progress() {
        let dir = tempfile::tempdir().unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let ingestor = sh(
            r#"test "$PIPERMAIL_MONTHS" = 2 || exit 7
test "$PIPERMAIL_PARALLEL" = 3 || exit 8
test -n "$PIPERMAIL_DATABASE" || exit 9
echo "fetched 2024-May"
echo "page 4 unavailable" >&2"#,
        );

        ingestor.run(config(&dir, errors.clone())).await.unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(ingestor.status(), "idle (last run ok)");
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let ingestor = sh("echo halfway; exit 3");

        let err = ingestor.run(config(&dir, errors.clone())).await.unwrap_err();

        assert!(err.to_string().contains("exited with"));
        assert!(ingestor.status().starts_with("idle (last run failed"));
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_utf8_output_keeps_pipes_drained() {
        let dir = tempfile::tempdir().unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let ingestor = sh(
            r#"printf 'subject: caf\351\n'
printf 'bad header: \377\n' >&2
sleep 0.2
i=0
while [ $i -lt 20000 ]; do echo "message $i"; i=$((i + 1)); done
echo "fetched 2024-May""#,
        );

        ingestor.run(config(&dir, errors.clone())).await.unwrap();

        assert_eq!(ingestor.status(), "idle (last run ok)");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_program_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = CommandIngestor::new("/nonexistent/pipermail-fetch", Vec::new());
        let errors = Arc::new(AtomicUsize::new(0));
        assert!(ingestor.run(config(&dir, errors)).await.is_err());
    }
}
