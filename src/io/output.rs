use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;

use super::{IoContext, OutputProvider};
use crate::hotkey::{HotkeyFlags, HotkeyListener};
use crate::ui;

/// Console output. The conversation loop already printed the answer.
pub struct TextOutput;

#[async_trait]
impl OutputProvider for TextOutput {
    async fn emit(&mut self, _text: &str, _ctx: &IoContext) -> Result<()> {
        Ok(())
    }
}

/// Text-to-speech (or any other) program fed the answer on stdin.
///
/// With the hotkey enabled, tapping it (or Ctrl-C) during playback kills
/// the program.
pub struct CommandOutput {
    argv: Vec<String>,
}

impl CommandOutput {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl OutputProvider for CommandOutput {
    async fn emit(&mut self, text: &str, ctx: &IoContext) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            bail!("output command is empty");
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {program}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let listener = if ctx.hotkey_enabled {
            match HotkeyListener::start(ctx.hotkey_presses) {
                Ok(l) => Some(l),
                Err(e) => {
                    tracing::debug!(error = %e, "hotkey unavailable during playback");
                    None
                }
            }
        } else {
            None
        };

        let flags = listener.as_ref().map(HotkeyListener::flags);
        let playback = watch_playback(&mut child, program, flags).await?;
        drop(listener);
        if playback == Playback::Stopped {
            ui::status(ctx.quiet, "Playback stopped");
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Playback {
    Finished,
    Stopped,
}

/// Wait for the program to exit, killing it early on a hotkey tap or Ctrl-C.
async fn watch_playback(child: &mut Child, program: &str, flags: Option<&HotkeyFlags>) -> Result<Playback> {
    loop {
        if let Some(status) = child.try_wait()? {
            if !status.success() {
                tracing::warn!(program = %program, %status, "output command failed");
            }
            return Ok(Playback::Finished);
        }
        if flags.is_some_and(HotkeyFlags::stop_requested) {
            child.kill().await?;
            return Ok(Playback::Stopped);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
