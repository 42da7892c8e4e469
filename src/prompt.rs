//! Line-oriented operator prompts for the terminal front end.
//!
//! One [`LinePrompt`] serves as both the post-window confirmation gate and
//! the share-handoff destination picker. Questions go to the output stream
//! (stderr for the CLI, so stdout stays clean for reports).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

use crate::artifact::SharePrompt;
use crate::sampler::{ConfirmationGate, WindowSummary};

// ---

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Question and answer share one lock so concurrent prompts never interleave.
struct Terminal<R> {
    input: Lines<R>,
    output: Output,
}

pub struct LinePrompt<R> {
    terminal: Arc<Mutex<Terminal<R>>>,
}

impl<R> Clone for LinePrompt<R> {
    fn clone(&self) -> Self {
        Self {
            terminal: Arc::clone(&self.terminal),
        }
    }
}

impl LinePrompt<BufReader<io::Stdin>> {
    /// Read answers from stdin, ask on stderr.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: AsyncBufRead + Unpin + Send> LinePrompt<R> {
    // ---
    pub fn new(input: R, output: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            terminal: Arc::new(Mutex::new(Terminal {
                input: input.lines(),
                output: Box::new(output),
            })),
        }
    }

    /// Ask one question. `None` on end of input or a broken terminal.
    async fn ask(&self, question: &str) -> Option<String> {
        // ---
        let mut terminal = self.terminal.lock().await;
        if let Err(e) = terminal.output.write_all(question.as_bytes()).await {
            tracing::warn!("failed to write prompt: {}", e);
        }
        let _ = terminal.output.flush().await;

        match terminal.input.next_line().await {
            Ok(line) => line.map(|l| l.trim().to_string()),
            Err(e) => {
                tracing::warn!("failed to read answer: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ConfirmationGate for LinePrompt<R> {
    async fn confirm(&self, summary: &WindowSummary) -> bool {
        // ---
        let question = format!(
            "Window closed with {} fix(es) and {} provider error(s). Save? [Y/n] ",
            summary.fixes_collected, summary.provider_errors
        );
        match self.ask(&question).await {
            Some(answer) => is_yes(&answer),
            None => false,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> SharePrompt for LinePrompt<R> {
    async fn choose_destination(&self, filename: &str, size: usize) -> Option<PathBuf> {
        // ---
        let question = format!("Save {filename} ({size} bytes) to directory (empty to skip): ");
        self.ask(&question)
            .await
            .filter(|answer| !answer.is_empty())
            .map(PathBuf::from)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "" | "y" | "yes")
}
