/// Phrase matching over whitespace-separated, lowercased utterances.
///
/// `contains = false` is prefix-command semantics: only the first token can
/// match. `contains = true` matches any token anywhere in the text.
pub fn find_phrase<'a, S: AsRef<str>>(utterance: &str, phrases: &'a [S], contains: bool) -> Option<&'a str> {
    let lowered = utterance.to_lowercase();
    let mut tokens = lowered.split_whitespace();

    if !contains {
        let first = tokens.next()?;
        return phrases.iter().map(AsRef::as_ref).find(|p| *p == first);
    }

    let tokens: Vec<&str> = tokens.collect();
    phrases
        .iter()
        .map(AsRef::as_ref)
        .find(|p| tokens.contains(p))
}

/// True when any phrase occurs as a token of `text`.
pub fn contains_any<S: AsRef<str>>(text: &str, phrases: &[S]) -> bool {
    find_phrase(text, phrases, true).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_token_only_without_containment() {
        let phrases = ["exit", "quit"];
        assert_eq!(find_phrase("Exit now", &phrases, false), Some("exit"));
        assert_eq!(find_phrase("what does exit mean", &phrases, false), None);
    }

    #[test]
    fn test_containment_matches_anywhere() {
        let phrases = ["clipboard", "copy"];
        assert_eq!(find_phrase("summarize my CLIPBOARD please", &phrases, true), Some("clipboard"));
        assert_eq!(find_phrase("nothing here", &phrases, true), None);
    }

    #[test]
    fn test_phrase_order_breaks_ties() {
        let phrases = ["copy", "clipboard"];
        assert_eq!(find_phrase("clipboard copy", &phrases, true), Some("copy"));
    }

    #[test]
    fn test_empty_input_never_matches() {
        let phrases = ["exit"];
        assert_eq!(find_phrase("", &phrases, false), None);
        assert_eq!(find_phrase("   ", &phrases, true), None);
    }

    #[test]
    fn test_whole_token_only() {
        let phrases = ["time"];
        assert!(!contains_any("sometimes", &phrases));
        assert!(contains_any("what time is it", &phrases));
    }
}
