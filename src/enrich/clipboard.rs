use anyhow::Result;

use super::Enricher;

type ClipboardSource = Box<dyn Fn() -> Result<String> + Send + Sync>;

/// Appends the clipboard text in a fenced block.
pub struct ClipboardEnricher {
    source: ClipboardSource,
}

impl ClipboardEnricher {
    /// Reads the system clipboard on every call.
    pub fn system() -> Self {
        Self::with_source(|| {
            let mut clipboard = arboard::Clipboard::new()?;
            Ok(clipboard.get_text()?)
        })
    }

    pub fn with_source(source: impl Fn() -> Result<String> + Send + Sync + 'static) -> Self {
        Self { source: Box::new(source) }
    }
}

impl Enricher for ClipboardEnricher {
    fn name(&self) -> &'static str {
        "clipboard"
    }

    fn description(&self) -> &'static str {
        "Adds clipboard content to the question."
    }

    fn phrases(&self) -> &[&'static str] {
        &["clipboard", "content", "copy"]
    }

    fn transform(&self, text: &str) -> Option<String> {
        let content = match (self.source)() {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(error = %e, "clipboard unavailable");
                return None;
            }
        };
        let content = content.trim_end_matches('\n');
        if content.is_empty() {
            return None;
        }
        Some(format!("{text}\n# Clipboard Content:\n```\n{content}\n```\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_clipboard_block() {
        let enricher = ClipboardEnricher::with_source(|| Ok("fn main() {}\n".into()));
        assert_eq!(
            enricher.transform("explain my clipboard").unwrap(),
            "explain my clipboard\n# Clipboard Content:\n```\nfn main() {}\n```\n"
        );
    }

    #[test]
    fn test_empty_clipboard_does_not_fire() {
        let enricher = ClipboardEnricher::with_source(|| Ok("\n".into()));
        assert!(enricher.transform("copy").is_none());
    }

    #[test]
    fn test_clipboard_error_does_not_fire() {
        let enricher = ClipboardEnricher::with_source(|| Err(anyhow::anyhow!("no display")));
        assert!(enricher.transform("copy").is_none());
    }
}
