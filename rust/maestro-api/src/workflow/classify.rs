//! Deterministic step classification.
//!
//! A step whose description mentions any configured tool verb is a tool
//! step; everything else is generic. Keyword matching is cheap and
//! deterministic, which keeps the primary split out of the LLM's hands;
//! actual tool resolution happens at most once per confirmed tool step.

use std::collections::HashSet;

use super::StepKind;

/// Default tool-verb set used when none is configured.
pub fn default_tool_keywords() -> Vec<String> {
    [
        "search", "fetch", "download", "upload", "read", "write", "save", "load", "query",
        "insert", "update", "delete", "send", "notify", "deploy", "install", "parse", "extract",
        "convert", "analyze", "transform", "generate", "build", "test", "validate", "monitor",
        "backup", "sync", "copy", "scan", "index", "calculate", "compute", "schedule", "publish",
        "render",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Pure keyword classifier mapping step descriptions to a [`StepKind`].
#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: HashSet<String>,
}

impl Classifier {
    /// Create a classifier with the given tool-verb set.
    #[must_use]
    pub fn new(keywords: impl IntoIterator<Item = String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|word| word.to_lowercase()).collect(),
        }
    }

    /// Classify a step description.
    ///
    /// Lower-cases and tokenizes the text, then checks membership of any
    /// token in the tool-verb set. Ties break toward `Tool`.
    #[must_use]
    pub fn classify(&self, description: &str) -> StepKind {
        let lowered = description.to_lowercase();
        let is_tool = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .any(|token| self.keywords.contains(token));

        if is_tool {
            StepKind::Tool
        } else {
            StepKind::Generic
        }
    }

    /// Number of tool keywords that appear in the text.
    ///
    /// Used as a complexity signal by the multi-agent flow.
    #[must_use]
    pub fn keyword_hits(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        let mut seen = HashSet::new();
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .filter(|token| self.keywords.contains(*token))
            .filter(|token| seen.insert((*token).to_string()))
            .count()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_tool_keywords())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_verbs_classify_as_tool() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify("Search for the top Python web frameworks"),
            StepKind::Tool
        );
        assert_eq!(
            classifier.classify("Download the latest release archive"),
            StepKind::Tool
        );
    }

    #[test]
    fn prose_classifies_as_generic() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify("Summarize the key differences between REST and gRPC."),
            StepKind::Generic
        );
        assert_eq!(
            classifier.classify("Compare the frameworks on ergonomics"),
            StepKind::Generic
        );
    }

    #[test]
    fn matching_is_case_insensitive_and_token_based() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("SEARCH the archives"), StepKind::Tool);
        // "research" contains "search" as a substring but is a different token
        assert_eq!(classifier.classify("Research the topic"), StepKind::Generic);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::default();
        let description = "Fetch the data and reflect on it";
        let first = classifier.classify(description);
        for _ in 0..10 {
            assert_eq!(classifier.classify(description), first);
        }
    }

    #[test]
    fn keyword_hits_counts_distinct_verbs() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.keyword_hits("search the web, search again, then parse results"),
            2
        );
        assert_eq!(classifier.keyword_hits("ponder quietly"), 0);
    }
}
