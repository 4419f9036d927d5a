//! Text analysis tool: basic statistics and frequency-based keywords.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "and", "in", "that",
    "it", "for", "on", "with", "as", "at", "by", "this", "from", "or", "but", "not", "they",
];

pub struct TextAnalysisTool;

impl TextAnalysisTool {
    fn stats(text: &str) -> ToolResult {
        let char_count = text.chars().count();
        let char_no_space = text.chars().filter(|c| !c.is_whitespace()).count();
        let cjk_chars = text
            .chars()
            .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
            .count();

        let word_re = Regex::new(r"[A-Za-z]+").expect("static regex");
        let words = word_re.find_iter(text).count();

        let sentence_re = Regex::new(r"[.!?。！？]+").expect("static regex");
        let sentences = sentence_re.find_iter(text).count().max(1);

        let paragraphs = text.lines().filter(|l| !l.trim().is_empty()).count();
        let avg_sentence_len = char_no_space as f64 / sentences as f64;

        let output = format!(
            "Text statistics:\n\
             - characters: {char_count}\n\
             - characters (no whitespace): {char_no_space}\n\
             - CJK characters: {cjk_chars}\n\
             - words: {words}\n\
             - sentences: {sentences}\n\
             - paragraphs: {paragraphs}\n\
             - avg sentence length: {avg_sentence_len:.1} characters"
        );

        ToolResult::ok_with_data(
            output,
            serde_json::json!({
                "char_count": char_count,
                "char_no_space": char_no_space,
                "cjk_chars": cjk_chars,
                "words": words,
                "sentences": sentences,
                "paragraphs": paragraphs,
            }),
        )
    }

    fn keywords(text: &str) -> ToolResult {
        let token_re = Regex::new(r"\p{Han}+|[A-Za-z]+").expect("static regex");
        let mut freq: HashMap<String, usize> = HashMap::new();
        for token in token_re.find_iter(&text.to_lowercase()) {
            let word = token.as_str();
            if word.chars().count() < 2 || STOPWORDS.contains(&word) {
                continue;
            }
            *freq.entry(word.to_string()).or_default() += 1;
        }

        let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(10);

        let mut output = String::from("Top keywords by frequency:\n");
        for (word, count) in &ranked {
            output.push_str(&format!("- {word}: {count}\n"));
        }

        let data: serde_json::Map<String, Value> = ranked
            .iter()
            .map(|(w, c)| (w.clone(), Value::from(*c)))
            .collect();
        ToolResult::ok_with_data(output, serde_json::json!({"keywords": data}))
    }
}

#[async_trait::async_trait]
impl Tool for TextAnalysisTool {
    fn name(&self) -> &str {
        "text_analysis"
    }

    fn description(&self) -> &str {
        "Analyze text: character/word/sentence statistics, or extract the \
         most frequent keywords."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "the text to analyze"},
                "analysis_type": {
                    "type": "string",
                    "description": "'stats' or 'keywords'",
                    "enum": ["stats", "keywords"],
                    "default": "stats",
                },
            },
            "required": ["text"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(text) = args.get("text").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'text' argument", error_kind::INVALID_INPUT);
        };
        match args
            .get("analysis_type")
            .and_then(Value::as_str)
            .unwrap_or("stats")
        {
            "stats" => Self::stats(text),
            "keywords" => Self::keywords(text),
            other => ToolResult::fail(
                format!("Unsupported analysis type: {other}"),
                error_kind::INVALID_INPUT,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stats_counts_words_and_sentences() {
        let r = TextAnalysisTool
            .execute(serde_json::json!({
                "text": "Hello world. This is a test!\n\nSecond paragraph here."
            }))
            .await;
        assert!(r.success);
        let data = r.data.unwrap();
        assert_eq!(data["words"], 9);
        assert_eq!(data["sentences"], 3);
        assert_eq!(data["paragraphs"], 2);
    }

    #[tokio::test]
    async fn keywords_skip_stopwords_and_rank_by_count() {
        let r = TextAnalysisTool
            .execute(serde_json::json!({
                "text": "the kernel executes code. kernel state is shared. code runs in the kernel.",
                "analysis_type": "keywords"
            }))
            .await;
        assert!(r.success);
        let data = r.data.unwrap();
        assert_eq!(data["keywords"]["kernel"], 3);
        assert_eq!(data["keywords"]["code"], 2);
        assert!(data["keywords"].get("the").is_none());
    }

    #[tokio::test]
    async fn sentences_never_zero() {
        let r = TextAnalysisTool
            .execute(serde_json::json!({"text": "no punctuation here"}))
            .await;
        assert_eq!(r.data.unwrap()["sentences"], 1);
    }
}
