/// Conversation memory and the on-disk transcript.
///
/// Memory is what the model sees on the next turn. The transcript is an
/// append-only, human-readable log of every turn; it is never read back.
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use unicode_width::UnicodeWidthStr;

use crate::client::{Message, MessageContent};

// ── Memory ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    /// "user" or "assistant"
    pub role: String,
    pub speaker: String,
    pub text: String,
}

impl MemoryEntry {
    /// Textual form used both for the model and for deduplication.
    pub fn render(&self) -> String {
        format!("{}: {}", self.speaker, self.text)
    }
}

#[derive(Debug, Default)]
pub struct ChatMemory {
    entries: Vec<MemoryEntry>,
}

impl ChatMemory {
    pub fn push(&mut self, role: &str, speaker: &str, text: &str) {
        self.entries.push(MemoryEntry {
            role: role.to_string(),
            speaker: speaker.to_string(),
            text: text.to_string(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// Drop repeated entries (by rendered text), keeping the most recent
    /// occurrence of each and the relative order of the survivors.
    pub fn dedup(&mut self) {
        let rendered: Vec<String> = self.entries.iter().map(MemoryEntry::render).collect();
        let mut keep = vec![true; self.entries.len()];
        for (i, r) in rendered.iter().enumerate() {
            if rendered[i + 1..].contains(r) {
                keep[i] = false;
            }
        }
        let before = self.entries.len();
        let mut flags = keep.into_iter();
        self.entries.retain(|_| flags.next().unwrap_or(true));
        if self.entries.len() != before {
            tracing::debug!(removed = before - self.entries.len(), "deduplicated memory");
        }
    }

    /// Chat messages for the model, oldest first.
    pub fn to_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|e| Message {
                role: e.role.clone(),
                content: MessageContent::from(e.render()),
            })
            .collect()
    }
}

// ── Transcript ────────────────────────────────────────────────────────────────

pub struct Transcript {
    path: Option<PathBuf>,
    width: usize,
}

impl Transcript {
    pub fn new(path: Option<PathBuf>, width: usize) -> Self {
        Self { path, width }
    }

    /// Append one timestamped entry. No-op when the transcript is disabled.
    pub fn append(&self, speaker: &str, text: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let entry = format_text(&format!("{stamp} {speaker}: {text}"), self.width);
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transcript {}", path.display()))?;
        writeln!(f, "{entry}")?;
        Ok(())
    }
}

/// Re-flow `text` so no line is wider than `width` display columns.
/// Existing line breaks are kept; a single word wider than `width` stays whole.
pub fn format_text(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }
    let mut out = Vec::new();
    for line in text.lines() {
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.width() + 1 + word.width() > width {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        out.push(current);
    }
    out.join("\n")
}
