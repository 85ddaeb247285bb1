/// Question enrichers: keyword-triggered text transforms that add context
/// (clock, clipboard, file contents) before the question reaches the model.
pub mod clipboard;
pub mod file;
pub mod time;

use anyhow::Result;

use crate::config::Config;
use crate::phrases::contains_any;

pub use clipboard::ClipboardEnricher;
pub use file::FileEnricher;
pub use time::TimeEnricher;

pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn phrases(&self) -> &[&'static str];

    fn is_triggered(&self, text: &str) -> bool {
        contains_any(text, self.phrases())
    }

    /// New text, or `None` when there was nothing to add.
    fn transform(&self, text: &str) -> Option<String>;
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Enrichment {
    enrichers: Vec<Box<dyn Enricher>>,
}

impl Enrichment {
    pub fn new(enrichers: Vec<Box<dyn Enricher>>) -> Self {
        Self { enrichers }
    }

    /// Enrichers enabled in `[enrichers]`, in a fixed order.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut enrichers: Vec<Box<dyn Enricher>> = Vec::new();
        if config.enrichers.clipboard {
            enrichers.push(Box::new(ClipboardEnricher::system()));
        }
        if config.enrichers.time {
            enrichers.push(Box::new(TimeEnricher::new(config.timezone_label())));
        }
        if config.enrichers.file {
            enrichers.push(Box::new(FileEnricher::new()?));
        }
        Ok(Self::new(enrichers))
    }

    pub fn enrichers(&self) -> &[Box<dyn Enricher>] {
        &self.enrichers
    }

    /// Run every triggered enricher over the progressively enriched text.
    ///
    /// Triggers are checked against the incoming text, so text added by one
    /// enricher never fires another.
    pub fn enrich(&self, text: &str) -> (bool, String) {
        let mut changed = false;
        let mut current = text.to_string();
        for enricher in &self.enrichers {
            if !enricher.is_triggered(text) {
                continue;
            }
            match enricher.transform(&current) {
                Some(next) => {
                    tracing::debug!(enricher = enricher.name(), "question enriched");
                    current = next;
                    changed = true;
                }
                None => tracing::debug!(enricher = enricher.name(), "enricher had nothing to add"),
            }
        }
        (changed, current)
    }
}
