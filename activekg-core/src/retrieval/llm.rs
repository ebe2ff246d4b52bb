//! LLM client abstraction for answer generation.
//!
//! The language model is an external collaborator: prompt in, token stream
//! out. The default backend is a deterministic extractive generator that
//! quotes retrieved contexts with `[i]` citation markers; a reqwest-backed
//! remote client is available behind the `remote-llm` feature.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One retrieved passage handed to the model. `index` is the 1-based
/// citation number the answer refers to as `[index]`.
#[derive(Debug, Clone)]
pub struct ContextPassage {
    pub index: usize,
    pub title: Option<String>,
    pub text: String,
}

/// Streaming answer model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream answer tokens for a question over retrieved contexts.
    ///
    /// The returned channel yields tokens in order and closes when the
    /// answer is complete. Dropping the receiver cancels generation.
    async fn stream_answer(
        &self,
        question: &str,
        contexts: &[ContextPassage],
    ) -> anyhow::Result<mpsc::Receiver<String>>;

    /// Model identifier carried in response metadata.
    fn model_name(&self) -> &str;
}

/// Deterministic extractive answer generator.
///
/// Quotes the leading sentence of each of the top contexts, each followed by
/// its `[i]` marker, so the citation property (answers over non-empty
/// context always cite) holds by construction.
pub struct ExtractiveLlm {
    model: String,
    /// How many contexts to quote
    max_quotes: usize,
}

impl Default for ExtractiveLlm {
    fn default() -> Self {
        Self {
            model: "extractive-v1".to_string(),
            max_quotes: 3,
        }
    }
}

impl ExtractiveLlm {
    /// Create with a model label.
    #[must_use]
    pub fn new(model: String) -> Self {
        Self { model, max_quotes: 3 }
    }

    fn compose(&self, question: &str, contexts: &[ContextPassage]) -> String {
        if contexts.is_empty() {
            return "No information available in the knowledge base for this question."
                .to_string();
        }

        let mut answer = format!("Regarding \"{}\": ", question.trim());
        for ctx in contexts.iter().take(self.max_quotes) {
            let sentence = leading_sentence(&ctx.text);
            answer.push_str(sentence.trim());
            if !sentence.trim_end().ends_with('.') {
                answer.push('.');
            }
            answer.push_str(&format!(" [{}] ", ctx.index));
        }
        answer.trim_end().to_string()
    }
}

fn leading_sentence(text: &str) -> &str {
    match text.find(['.', '!', '?']) {
        Some(idx) => &text[..=idx],
        None => {
            // No sentence boundary: cap the quote length
            let cap = text
                .char_indices()
                .nth(200)
                .map_or(text.len(), |(idx, _)| idx);
            &text[..cap]
        }
    }
}

#[async_trait]
impl LlmClient for ExtractiveLlm {
    async fn stream_answer(
        &self,
        question: &str,
        contexts: &[ContextPassage],
    ) -> anyhow::Result<mpsc::Receiver<String>> {
        let answer = self.compose(question, contexts);
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for word in answer.split_inclusive(' ') {
                if tx.send(word.to_string()).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<String>) -> String {
        let mut out = String::new();
        while let Some(tok) = rx.recv().await {
            out.push_str(&tok);
        }
        out
    }

    fn passage(index: usize, text: &str) -> ContextPassage {
        ContextPassage {
            index,
            title: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn answers_with_contexts_carry_citation_markers() {
        let llm = ExtractiveLlm::default();
        let rx = llm
            .stream_answer(
                "what is rust",
                &[
                    passage(1, "Rust is a systems language. It is fast."),
                    passage(2, "Rust has a borrow checker."),
                ],
            )
            .await
            .unwrap();
        let answer = collect(rx).await;
        assert!(answer.contains("[1]"));
        assert!(answer.contains("[2]"));
        assert!(answer.contains("Rust is a systems language."));
    }

    #[tokio::test]
    async fn empty_contexts_yield_no_information_answer() {
        let llm = ExtractiveLlm::default();
        let rx = llm.stream_answer("anything", &[]).await.unwrap();
        let answer = collect(rx).await;
        assert!(answer.to_lowercase().contains("no information"));
        assert!(!answer.contains('['));
    }

    #[tokio::test]
    async fn generation_is_deterministic() {
        let llm = ExtractiveLlm::default();
        let contexts = vec![passage(1, "Alpha beta gamma.")];
        let a = collect(llm.stream_answer("q", &contexts).await.unwrap()).await;
        let b = collect(llm.stream_answer("q", &contexts).await.unwrap()).await;
        assert_eq!(a, b);
    }
}
