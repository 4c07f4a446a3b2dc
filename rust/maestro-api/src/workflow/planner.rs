//! Task decomposition.
//!
//! The planner asks the LLM for an ordered list of atomic steps and parses
//! the reply tolerantly: numbered, bulleted, and plain-line formats all
//! work, blank lines are ignored, and prose after a recognized list is
//! treated as commentary and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient};

use super::error::{StepError, StepErrorKind};

/// Decomposes a free-form task into an ordered list of step descriptions.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    call_timeout: Duration,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl Planner {
    /// Create a planner over the given LLM client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, call_timeout: Duration) -> Self {
        Self { llm, call_timeout }
    }

    /// Decompose a task into `1..=max_steps` step descriptions.
    ///
    /// Both failure modes are fatal to the workflow: `llm_failed` when the
    /// call errors or times out, `empty_plan` when nothing parseable comes
    /// back.
    pub async fn decompose(
        &self,
        initial_task: &str,
        max_steps: usize,
        hints: Option<&HashMap<String, String>>,
    ) -> Result<Vec<String>, StepError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are a task planner. Decompose the user's task into an ordered list of \
                 atomic steps. Reply with a numbered list only, one declarative sentence per \
                 step, in execution order. No commentary.",
            ),
            ChatMessage::user(build_prompt(initial_task, max_steps, hints)),
        ]);

        let completion = tokio::time::timeout(self.call_timeout, self.llm.complete(request))
            .await
            .map_err(|_| StepError::llm_failed("planning call timed out"))?
            .map_err(|error| StepError::llm_failed(format!("planning call failed: {error}")))?;

        let text = match completion {
            Completion::Text(text) => text,
            Completion::ToolCall { name, .. } => {
                return Err(StepError::llm_failed(format!(
                    "planner expected a textual plan, got a `{name}` tool call"
                )));
            }
        };

        let mut steps = parse_steps(&text);
        if steps.is_empty() {
            return Err(StepError::new(
                StepErrorKind::EmptyPlan,
                "planner returned zero steps",
            ));
        }
        if steps.len() > max_steps {
            tracing::warn!(
                returned = steps.len(),
                max_steps,
                "plan exceeded the step limit; truncating"
            );
            steps.truncate(max_steps);
        }
        Ok(steps)
    }
}

fn build_prompt(
    initial_task: &str,
    max_steps: usize,
    hints: Option<&HashMap<String, String>>,
) -> String {
    let mut prompt = format!("Task: {initial_task}\n\nProduce at most {max_steps} steps.");
    if let Some(hints) = hints {
        if !hints.is_empty() {
            prompt.push_str("\n\nPlanning hints:");
            let mut keys: Vec<&String> = hints.keys().collect();
            keys.sort();
            for key in keys {
                prompt.push_str(&format!("\n- {key}: {}", hints[key]));
            }
        }
    }
    prompt
}

/// Extract step descriptions from an LLM reply.
pub(crate) fn parse_steps(text: &str) -> Vec<String> {
    let mut listed = Vec::new();
    let mut plain = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(item) = strip_list_marker(trimmed) {
            if !item.is_empty() {
                listed.push(item.to_string());
            }
        } else if listed.is_empty() {
            plain.push(trimmed.to_string());
        } else {
            // prose after a recognized list is trailing commentary
            break;
        }
    }

    if listed.is_empty() {
        plain
    } else {
        listed
    }
}

/// Strip a leading bullet or number marker, if present.
fn strip_list_marker(line: &str) -> Option<&str> {
    for prefix in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits < line.len() {
        let rest = &line[digits..];
        for separator in ['.', ')', ':'] {
            if let Some(item) = rest.strip_prefix(separator) {
                return Some(item.trim());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_lists() {
        let text = "1. Gather requirements\n2. Draft the document\n3. Review with the team";
        assert_eq!(
            parse_steps(text),
            vec![
                "Gather requirements".to_string(),
                "Draft the document".to_string(),
                "Review with the team".to_string(),
            ]
        );
    }

    #[test]
    fn parses_bulleted_lists_and_skips_blanks() {
        let text = "- First thing\n\n- Second thing\n* Third thing";
        assert_eq!(parse_steps(text).len(), 3);
    }

    #[test]
    fn parses_plain_lines() {
        let text = "Collect the data\nClean the data\nPlot the data";
        assert_eq!(parse_steps(text).len(), 3);
    }

    #[test]
    fn preamble_is_ignored_when_a_list_follows() {
        let text = "Here is the plan:\n1. Only step";
        assert_eq!(parse_steps(text), vec!["Only step".to_string()]);
    }

    #[test]
    fn trailing_commentary_is_truncated() {
        let text = "1. Do a thing\n2. Do another thing\nThat plan should cover the request.";
        assert_eq!(parse_steps(text).len(), 2);
    }

    #[test]
    fn numbered_variants_are_accepted() {
        assert_eq!(parse_steps("1) Alpha"), vec!["Alpha".to_string()]);
        assert_eq!(parse_steps("1: Beta"), vec!["Beta".to_string()]);
        assert_eq!(parse_steps("12. Gamma"), vec!["Gamma".to_string()]);
    }

    #[test]
    fn empty_reply_parses_to_nothing() {
        assert!(parse_steps("").is_empty());
        assert!(parse_steps("\n\n  \n").is_empty());
    }
}
