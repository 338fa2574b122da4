//! src/services/process_service.rs
//!
//! Runs the configured converter as a child process. The command line is
//! built from an [`ArgumentTemplate`] that is parsed once at startup, so a
//! malformed template stops the service from starting rather than failing
//! every request.

use std::{
    ffi::OsString,
    io,
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    io::{self as tokio_io, AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    time::timeout,
};
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unbalanced `{{` at byte {0}")]
    UnclosedBrace(usize),
    #[error("unexpected `}}` at byte {0}")]
    StrayClosingBrace(usize),
    #[error("unsupported placeholder `{{{0}}}`; only {{0}} and {{1}} are allowed")]
    UnknownPlaceholder(String),
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("template must reference {{0}} (input path) and {{1}} (output path)")]
    MissingPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Input,
    Output,
}

/// A pre-tokenized argument line with `{0}` / `{1}` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentTemplate {
    tokens: Vec<Vec<Segment>>,
}

impl ArgumentTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut tokens = Vec::new();
        let mut current: Vec<Segment> = Vec::new();
        let mut literal = String::new();
        let mut in_token = false;
        let mut in_quotes = false;
        let mut chars = source.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    in_token = true;
                }
                c if c.is_whitespace() && !in_quotes => {
                    if in_token {
                        flush_literal(&mut literal, &mut current);
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '{' => {
                    in_token = true;
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    let mut index = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) => index.push(c),
                            None => return Err(TemplateError::UnclosedBrace(pos)),
                        }
                    }
                    let segment = match index.trim() {
                        "0" => Segment::Input,
                        "1" => Segment::Output,
                        _ => return Err(TemplateError::UnknownPlaceholder(index)),
                    };
                    flush_literal(&mut literal, &mut current);
                    current.push(segment);
                }
                '}' => {
                    in_token = true;
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(TemplateError::StrayClosingBrace(pos));
                    }
                }
                c => {
                    in_token = true;
                    literal.push(c);
                }
            }
        }

        if in_quotes {
            return Err(TemplateError::UnterminatedQuote);
        }
        if in_token {
            flush_literal(&mut literal, &mut current);
            tokens.push(current);
        }

        let mentions = |wanted: &Segment| tokens.iter().flatten().any(|s| s == wanted);
        if !mentions(&Segment::Input) || !mentions(&Segment::Output) {
            return Err(TemplateError::MissingPlaceholder);
        }

        Ok(Self { tokens })
    }

    /// Substitute the artifact paths, one OS argument per token.
    pub fn render(&self, input: &Path, output: &Path) -> Vec<OsString> {
        self.tokens
            .iter()
            .map(|token| {
                let mut arg = OsString::new();
                for segment in token {
                    match segment {
                        Segment::Literal(text) => arg.push(text),
                        Segment::Input => arg.push(input),
                        Segment::Output => arg.push(output),
                    }
                }
                arg
            })
            .collect()
    }
}

fn flush_literal(literal: &mut String, current: &mut Vec<Segment>) {
    if !literal.is_empty() {
        current.push(Segment::Literal(std::mem::take(literal)));
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`: {source}")]
    Start {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` did not exit within {timeout_ms}ms")]
    TimedOut { command: String, timeout_ms: u64 },
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOutcome {
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub elapsed: Duration,
}

/// Launch `command` with the rendered template and wait at most `limit`.
///
/// On timeout the child is killed and reaped before returning, so no
/// converter outlives the request that started it.
pub async fn run(
    command: &str,
    template: &ArgumentTemplate,
    input: &Path,
    output: &Path,
    limit: Duration,
) -> Result<ProcessOutcome, ProcessError> {
    let args = template.render(input, output);
    let rendered = display_args(&args);
    info!(command, arguments = %rendered, "executing converter");

    let started = Instant::now();
    let mut child = Command::new(command)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Start {
            command: command.to_string(),
            source,
        })?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, command.to_string(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, command.to_string(), "stderr"));
    }

    let waited = timeout(limit, child.wait()).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(source)) => {
            return Err(ProcessError::Wait {
                command: command.to_string(),
                source,
            });
        }
        Err(_) => {
            if let Err(err) = child.kill().await {
                warn!(command, error = %err, "failed to kill timed out converter");
            }
            let timeout_ms = limit.as_millis() as u64;
            warn!(
                command,
                arguments = %rendered,
                timeout_ms,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "converter timed out and was killed"
            );
            return Err(ProcessError::TimedOut {
                command: command.to_string(),
                timeout_ms,
            });
        }
    };

    let elapsed = started.elapsed();
    let exit_code = status.code().unwrap_or(-1);
    info!(
        command,
        arguments = %rendered,
        exit_code,
        elapsed_ms = elapsed.as_millis() as u64,
        "executed converter"
    );

    Ok(ProcessOutcome { exit_code, elapsed })
}

/// Relay a child pipe into the log, one line at a time.
///
/// Lines are read as raw bytes. The pipe is drained to EOF even when a read
/// fails, so the child never writes into a closed pipe.
async fn forward_lines<R>(pipe: R, command: String, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                debug!(command = %command, stream, "{}", text.trim_end());
            }
            Err(err) => {
                debug!(
                    command = %command,
                    stream,
                    error = %err,
                    "failed reading converter output"
                );
                // Keep the read end open until the child closes its side.
                let _ = tokio_io::copy(&mut reader, &mut tokio_io::sink()).await;
                break;
            }
        }
    }
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{}\"", arg)
            } else {
                arg.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
