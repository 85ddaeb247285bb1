use std::io::IsTerminal;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use super::{InputProvider, IoContext};
use crate::hotkey;
use crate::ui;

type LineReader = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

/// Console line input.
///
/// Reads stdin when it is a terminal. When stdin was piped (and already
/// consumed as part of the first question) it reads the controlling terminal.
pub struct TextInput {
    lines: Option<LineReader>,
}

impl TextInput {
    pub fn new() -> Self {
        Self { lines: None }
    }

    pub fn from_reader(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        let boxed: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        Self { lines: Some(BufReader::new(boxed).lines()) }
    }

    async fn open() -> LineReader {
        let reader: Box<dyn AsyncRead + Unpin + Send> = if std::io::stdin().is_terminal() {
            Box::new(tokio::io::stdin())
        } else {
            match tokio::fs::File::open("/dev/tty").await {
                Ok(tty) => Box::new(tty),
                Err(e) => {
                    tracing::debug!(error = %e, "no controlling terminal, reading stdin");
                    Box::new(tokio::io::stdin())
                }
            }
        };
        BufReader::new(reader).lines()
    }
}

impl Default for TextInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputProvider for TextInput {
    async fn get_text(&mut self, ctx: &IoContext) -> Result<Option<String>> {
        if self.lines.is_none() {
            self.lines = Some(Self::open().await);
        }
        if !ctx.quiet {
            ui::prompt(&ctx.user_name);
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        Ok(lines.next_line().await?)
    }
}

/// Speech-to-text (or any other) program whose stdout is the utterance.
pub struct CommandInput {
    argv: Vec<String>,
}

impl CommandInput {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl InputProvider for CommandInput {
    async fn get_text(&mut self, ctx: &IoContext) -> Result<Option<String>> {
        let Some((program, args)) = self.argv.split_first() else {
            bail!("input command is empty");
        };

        if ctx.hotkey_enabled && std::io::stdin().is_terminal() {
            ui::status(ctx.quiet, &format!("Tap Esc {}x to talk", ctx.hotkey_presses));
            hotkey::wait_for_hotkey(ctx.hotkey_presses).await?;
        }
        ui::status(ctx.quiet, "Listening...");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {program}"))?;
        if !output.status.success() {
            bail!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(program = %program, chars = text.len(), "heard utterance");
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> IoContext {
        IoContext {
            quiet: true,
            hotkey_enabled: false,
            hotkey_presses: 2,
            user_name: "Ann".into(),
        }
    }

    #[tokio::test]
    async fn test_text_input_reads_lines_then_eof() {
        let mut input = TextInput::from_reader(&b"hello\nquiet groq hi\n"[..]);
        assert_eq!(input.get_text(&ctx()).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(input.get_text(&ctx()).await.unwrap().as_deref(), Some("quiet groq hi"));
        assert_eq!(input.get_text(&ctx()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_command_input_returns_trimmed_stdout() {
        let mut input = CommandInput::new(vec!["echo".into(), "what time is it".into()]);
        let text = input.get_text(&ctx()).await.unwrap();
        assert_eq!(text.as_deref(), Some("what time is it"));
    }

    #[tokio::test]
    async fn test_command_input_failure_is_an_error() {
        let mut input = CommandInput::new(vec!["sh".into(), "-c".into(), "echo nope >&2; exit 3".into()]);
        let err = input.get_text(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let mut input = CommandInput::new(Vec::new());
        assert!(input.get_text(&ctx()).await.is_err());
    }
}
