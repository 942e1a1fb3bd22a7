//! User notification contract plus console and unattended implementations.
//!
//! The manager talks to whoever supervises the run through a [`Notifier`]:
//! informational banners, failure reports, and the yes/no calibration prompt.
//! Implementations must be callable from the background run task, never from
//! a UI thread only.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Channel to the supervising observer.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Informational message.
    async fn info(&self, caption: &str, message: &str);

    /// Failure report.
    async fn error(&self, caption: &str, message: &str);

    /// Ask a yes/no question and wait for the decision.
    async fn yes_no(&self, caption: &str, message: &str) -> bool;
}

/// Notifier that prints to the terminal and reads decisions from stdin.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn info(&self, caption: &str, message: &str) {
        println!("[{caption}] {message}");
    }

    async fn error(&self, caption: &str, message: &str) {
        eprintln!("[{caption}] ERROR: {message}");
    }

    async fn yes_no(&self, caption: &str, message: &str) -> bool {
        println!("[{caption}] {message} [y/N] ");
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(err) => {
                // Unattended runs have no stdin; decline rather than hang.
                warn!(error = %err, "could not read decision from stdin, declining");
                false
            }
        }
    }
}

/// Notifier for unattended runs and tests: logs every message and answers
/// every question with a fixed decision, counting what it saw.
#[derive(Debug)]
pub struct AutoNotifier {
    answer: bool,
    infos: AtomicU32,
    errors: AtomicU32,
    questions: AtomicU32,
}

impl AutoNotifier {
    /// Answer every question with `answer`.
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            infos: AtomicU32::new(0),
            errors: AtomicU32::new(0),
            questions: AtomicU32::new(0),
        }
    }

    /// How many informational messages were delivered.
    pub fn info_count(&self) -> u32 {
        self.infos.load(Ordering::SeqCst)
    }

    /// How many failure reports were delivered.
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    /// How many yes/no questions were asked.
    pub fn question_count(&self) -> u32 {
        self.questions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for AutoNotifier {
    async fn info(&self, caption: &str, message: &str) {
        self.infos.fetch_add(1, Ordering::SeqCst);
        info!(caption, "{message}");
    }

    async fn error(&self, caption: &str, message: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        error!(caption, "{message}");
    }

    async fn yes_no(&self, caption: &str, message: &str) -> bool {
        self.questions.fetch_add(1, Ordering::SeqCst);
        info!(caption, answer = self.answer, "{message}");
        self.answer
    }
}
