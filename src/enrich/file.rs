use anyhow::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

use super::Enricher;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "svg"];

/// Inlines the contents of absolute file paths mentioned in the question.
pub struct FileEnricher {
    path_pattern: Regex,
}

impl FileEnricher {
    pub fn new() -> Result<Self> {
        Ok(Self { path_pattern: Regex::new(r"[\w./\\-]+")? })
    }

    fn mentions_readable_path(&self, text: &str) -> bool {
        self.path_pattern.find_iter(text).any(|m| is_readable(Path::new(m.as_str())))
    }
}

fn is_readable(path: &Path) -> bool {
    path.is_absolute() && path.is_file() && !is_image(path)
}

/// The inlined block for `candidate`, if it names a readable text file.
fn file_block(candidate: &str) -> Option<String> {
    let path = Path::new(candidate);
    if !is_readable(path) {
        return None;
    }
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(path = candidate, error = %e, "skipping unreadable file");
            return None;
        }
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| candidate.to_string());
    Some(format!("\n# File: {name}\n```\n{content}\n```\n"))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

impl Enricher for FileEnricher {
    fn name(&self) -> &'static str {
        "file"
    }

    fn description(&self) -> &'static str {
        "Adds local file content to the question."
    }

    fn phrases(&self) -> &[&'static str] {
        &["file"]
    }

    fn is_triggered(&self, text: &str) -> bool {
        crate::phrases::contains_any(text, self.phrases()) || self.mentions_readable_path(text)
    }

    fn transform(&self, text: &str) -> Option<String> {
        // Splice by match span so a path that prefixes another is left alone.
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut found = false;
        for m in self.path_pattern.find_iter(text) {
            let Some(block) = file_block(m.as_str()) else {
                continue;
            };
            out.push_str(&text[last..m.start()]);
            out.push_str(&block);
            last = m.end();
            found = true;
        }
        out.push_str(&text[last..]);
        found.then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inlines_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "buy milk").unwrap();
        let question = format!("summarize {}", path.display());

        let enricher = FileEnricher::new().unwrap();
        assert!(enricher.is_triggered(&question));
        assert_eq!(
            enricher.transform(&question).unwrap(),
            "summarize \n# File: notes.txt\n```\nbuy milk\n```\n"
        );
    }

    #[test]
    fn test_path_prefixing_another_path_is_inlined_separately() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("a");
        let long = dir.path().join("a.txt");
        fs::write(&short, "first").unwrap();
        fs::write(&long, "second").unwrap();
        let question = format!("compare {} and {}", short.display(), long.display());

        let enricher = FileEnricher::new().unwrap();
        assert_eq!(
            enricher.transform(&question).unwrap(),
            "compare \n# File: a\n```\nfirst\n```\n and \n# File: a.txt\n```\nsecond\n```\n"
        );
    }

    #[test]
    fn test_missing_and_relative_paths_are_skipped() {
        let enricher = FileEnricher::new().unwrap();
        assert!(enricher.transform("read /definitely/not/here.txt").is_none());
        assert!(enricher.transform("read Cargo.toml").is_none());
        assert!(!enricher.is_triggered("read /definitely/not/here.txt"));
    }

    #[test]
    fn test_binary_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let enricher = FileEnricher::new().unwrap();
        assert!(enricher.transform(&format!("file {}", path.display())).is_none());
    }

    #[test]
    fn test_file_word_triggers_without_path() {
        let enricher = FileEnricher::new().unwrap();
        assert!(enricher.is_triggered("which file is it"));
        assert!(enricher.transform("which file is it").is_none());
    }
}
