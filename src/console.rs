//! Console front ends: the interactive chat loop and the question batch
//!
//! Both are generic over their reader and writer so they can be driven from
//! byte buffers in tests.

use crate::agent::{Agent, RunResult, Runner};
use crate::config::ChatSection;
use crate::error::{AgentError, AgentResult};
use crate::presets::truncate_answer;
use futures::future::join_all;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const GREETING: &str = "¡Hola! Soy tu asistente. Escribe 'salir' para terminar.\n¿En qué puedo ayudarte hoy?\n";
const PROMPT: &str = "\nTú: ";
const FAREWELL: &str = "¡Hasta luego! Ha sido un placer ayudarte.\n";

/// Characters of each answer shown by the question batch
pub const ANSWER_PREVIEW_CHARS: usize = 50;

/// Counters from one chat session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChatSummary {
    pub turns: usize,
    pub errors: usize,
}

/// Line-oriented conversation with a single agent
pub struct ChatLoop<'a> {
    runner: &'a Runner,
    agent: &'a Agent,
    exit_keywords: Vec<String>,
}

impl<'a> ChatLoop<'a> {
    pub fn new(runner: &'a Runner, agent: &'a Agent, chat: &ChatSection) -> Self {
        Self {
            runner,
            agent,
            exit_keywords: chat
                .exit_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn is_exit(&self, input: &str) -> bool {
        let input = input.trim().to_lowercase();
        self.exit_keywords.iter().any(|k| *k == input)
    }

    /// Read lines until an exit keyword or end of input
    ///
    /// Run errors are printed and the loop continues; only I/O errors end it early.
    pub async fn run<R, W>(&self, mut input: R, output: &mut W) -> io::Result<ChatSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut summary = ChatSummary::default();
        let mut line = String::new();

        output.write_all(GREETING.as_bytes()).await?;

        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            line.clear();
            if input.read_line(&mut line).await? == 0 {
                output.write_all(format!("\n{FAREWELL}").as_bytes()).await?;
                break;
            }

            let text = line.trim();
            if self.is_exit(text) {
                output.write_all(FAREWELL.as_bytes()).await?;
                break;
            }
            if text.is_empty() {
                continue;
            }

            summary.turns += 1;
            let reply = match self.runner.run(self.agent, text).await {
                Ok(result) => format!("\nAsistente: {}\n", result.final_output),
                Err(e) => {
                    summary.errors += 1;
                    format!("\nLo siento, ocurrió un error: {}\n", e.user_message())
                }
            };
            output.write_all(reply.as_bytes()).await?;
        }

        output.flush().await?;
        debug!(turns = summary.turns, errors = summary.errors, "Chat ended");
        Ok(summary)
    }
}

/// Counters from one question batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub answered: usize,
    pub rejected: usize,
}

/// Why a question batch stopped
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Console output failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Run(#[from] AgentError),
}

/// Run each question through `router` and print one block per question, in input order
///
/// Guard rejections print `rejection_message` and the batch moves on. Any other
/// failure is printed and then returned. Sequential batches stop at that question;
/// with `parallel` every run has already finished, so all blocks are printed first
/// and the first failure in input order is returned.
pub async fn run_questions<W>(
    runner: &Runner,
    router: &Agent,
    questions: &[String],
    parallel: bool,
    rejection_message: &str,
    output: &mut W,
) -> Result<BatchSummary, BatchError>
where
    W: AsyncWrite + Unpin,
{
    let mut summary = BatchSummary::default();
    let mut failure = None;

    if parallel {
        let results = join_all(questions.iter().map(|q| runner.run(router, q))).await;
        for (question, result) in questions.iter().zip(results) {
            if let Err(e) = print_outcome(question, result, rejection_message, &mut summary, output).await? {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    } else {
        for question in questions {
            let result = runner.run(router, question).await;
            if let Err(e) = print_outcome(question, result, rejection_message, &mut summary, output).await? {
                failure = Some(e);
                break;
            }
        }
    }

    output.flush().await?;
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(summary),
    }
}

/// Print one question block; hands back the error when it is not a guard rejection
async fn print_outcome<W>(
    question: &str,
    result: AgentResult<RunResult>,
    rejection_message: &str,
    summary: &mut BatchSummary,
    output: &mut W,
) -> io::Result<AgentResult<()>>
where
    W: AsyncWrite + Unpin,
{
    let (line, outcome) = match result {
        Ok(run) => {
            summary.answered += 1;
            let line = format!(
                "Respuesta: {}",
                truncate_answer(&run.final_output, ANSWER_PREVIEW_CHARS)
            );
            (line, Ok(()))
        }
        Err(e) if e.is_guard_rejection() => {
            summary.rejected += 1;
            (rejection_message.to_string(), Ok(()))
        }
        Err(e) => (format!("Error: {}", e.user_message()), Err(e)),
    };

    output
        .write_all(format!("\n=== Pregunta: {question} ===\n{line}\n").as_bytes())
        .await?;
    Ok(outcome)
}
