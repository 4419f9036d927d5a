//! Incremental parser for the tag-delimited agent wire format.
//!
//! The LLM streams `<think>…</think>`, `<action>{json}</action>` and
//! `<answer>…</answer>` regions. The parser runs over a rolling buffer
//! with a single mode variable; inside think/answer it streams partial
//! content but always retains a trailing lookahead window so a closing
//! tag split across chunks is never flushed to the client. Action
//! content is accumulated, never streamed, and JSON-parsed on close.
//!
//! The LLM is not reliable about tag emission, so the recovery paths
//! (bare JSON extraction, tag-stripped answers) are part of the
//! contract, not fallbacks.

use regex::Regex;
use serde_json::Value;

/// Trailing bytes held back inside think/answer so a split closing tag
/// (longest: `</answer>`) is never flushed early.
const LOOKAHEAD: usize = 15;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const ACTION_OPEN: &str = "<action>";
const ACTION_CLOSE: &str = "</action>";
const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Partial thought text (streamed).
    Thinking(String),
    /// Finalized thought.
    Thought(String),
    /// A parsed tool call.
    Action { tool: String, input: Value },
    /// Partial answer text (streamed).
    Content(String),
    /// Finalized answer.
    Answer(String),
    /// Action content that was not valid JSON (recoverable).
    FormatError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Scan,
    Think,
    Action,
    Answer,
}

pub struct TagParser {
    buffer: String,
    mode: Mode,
    think: String,
    action: String,
    answer: String,
}

impl Default for TagParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TagParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            mode: Mode::Scan,
            think: String::new(),
            action: String::new(),
            answer: String::new(),
        }
    }

    /// Feed a chunk of streamed text; returns the events it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            match self.mode {
                Mode::Scan => {
                    // Earliest opening tag wins; bytes before it are noise.
                    let candidates = [
                        (THINK_OPEN, Mode::Think),
                        (ACTION_OPEN, Mode::Action),
                        (ANSWER_OPEN, Mode::Answer),
                    ];
                    let mut earliest: Option<(usize, &str, Mode)> = None;
                    for (tag, mode) in candidates {
                        if let Some(idx) = self.buffer.find(tag) {
                            if earliest.is_none() || idx < earliest.unwrap().0 {
                                earliest = Some((idx, tag, mode));
                            }
                        }
                    }
                    match earliest {
                        Some((idx, tag, mode)) => {
                            self.buffer.drain(..idx + tag.len());
                            self.mode = mode;
                        }
                        None => break,
                    }
                }
                Mode::Think => {
                    if let Some(idx) = self.buffer.find(THINK_CLOSE) {
                        self.think.push_str(&self.buffer[..idx]);
                        self.buffer.drain(..idx + THINK_CLOSE.len());
                        self.mode = Mode::Scan;
                        let thought = std::mem::take(&mut self.think);
                        events.push(ParseEvent::Thought(thought.trim().to_string()));
                    } else {
                        self.flush_partial(&mut events, Mode::Think);
                        break;
                    }
                }
                Mode::Action => {
                    if let Some(idx) = self.buffer.find(ACTION_CLOSE) {
                        self.action.push_str(&self.buffer[..idx]);
                        self.buffer.drain(..idx + ACTION_CLOSE.len());
                        self.mode = Mode::Scan;
                        let raw = std::mem::take(&mut self.action);
                        events.push(parse_action(raw.trim()));
                    } else {
                        self.flush_partial(&mut events, Mode::Action);
                        break;
                    }
                }
                Mode::Answer => {
                    if let Some(idx) = self.buffer.find(ANSWER_CLOSE) {
                        self.answer.push_str(&self.buffer[..idx]);
                        self.buffer.drain(..idx + ANSWER_CLOSE.len());
                        self.mode = Mode::Scan;
                        let answer = std::mem::take(&mut self.answer);
                        events.push(ParseEvent::Answer(answer.trim().to_string()));
                    } else {
                        self.flush_partial(&mut events, Mode::Answer);
                        break;
                    }
                }
            }
        }

        events
    }

    /// Stream out everything except the trailing lookahead window; the
    /// window may still hold the head of a split closing tag.
    fn flush_partial(&mut self, events: &mut Vec<ParseEvent>, mode: Mode) {
        if self.buffer.len() <= LOOKAHEAD {
            return;
        }
        let cut = char_boundary_before(&self.buffer, self.buffer.len() - LOOKAHEAD);
        if cut == 0 {
            return;
        }
        let chunk: String = self.buffer.drain(..cut).collect();
        match mode {
            Mode::Think => {
                self.think.push_str(&chunk);
                events.push(ParseEvent::Thinking(chunk));
            }
            Mode::Answer => {
                self.answer.push_str(&chunk);
                events.push(ParseEvent::Content(chunk));
            }
            // Action content is accumulated silently.
            Mode::Action => self.action.push_str(&chunk),
            Mode::Scan => {}
        }
    }

    /// The stream ended: salvage whatever is still in flight.
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        let residue = std::mem::take(&mut self.buffer);

        match self.mode {
            Mode::Scan => {}
            Mode::Think => {
                self.think.push_str(&residue);
                let mut thought = std::mem::take(&mut self.think);
                if let Some(idx) = thought.find(THINK_CLOSE) {
                    thought.truncate(idx);
                }
                let thought = thought.trim();
                if !thought.is_empty() {
                    events.push(ParseEvent::Thought(thought.to_string()));
                }
            }
            Mode::Answer => {
                self.answer.push_str(&residue);
                let mut answer = std::mem::take(&mut self.answer);
                if let Some(idx) = answer.find(ANSWER_CLOSE) {
                    answer.truncate(idx);
                }
                let answer = answer.trim();
                if !answer.is_empty() {
                    events.push(ParseEvent::Answer(answer.to_string()));
                }
            }
            Mode::Action => {
                self.action.push_str(&residue);
                let raw = std::mem::take(&mut self.action);
                // The close tag never arrived; try the whole content,
                // then a bare JSON object embedded in it.
                let event = match parse_action(raw.trim()) {
                    ParseEvent::FormatError(_) => recover_bare_action(&raw)
                        .map(|(tool, input)| ParseEvent::Action { tool, input }),
                    ok => Some(ok),
                };
                if let Some(event) = event {
                    events.push(event);
                }
            }
        }

        self.mode = Mode::Scan;
        events
    }
}

fn char_boundary_before(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Parse accumulated action content. Tries strict JSON first, then the
/// common single-quote mistake.
fn parse_action(raw: &str) -> ParseEvent {
    let parsed: Result<Value, _> = serde_json::from_str(raw)
        .or_else(|_| serde_json::from_str(&raw.replace('\'', "\"")));
    match parsed.ok().and_then(|v| action_fields(&v)) {
        Some((tool, input)) => ParseEvent::Action { tool, input },
        None => ParseEvent::FormatError(raw.to_string()),
    }
}

fn action_fields(v: &Value) -> Option<(String, Value)> {
    let tool = v.get("tool")?.as_str()?.to_string();
    let input = v
        .get("input")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some((tool, input))
}

/// Find a bare `{"tool": ..., "input": {...}}` object in free text
/// (one nesting level, which is what the wire format produces).
pub fn recover_bare_action(text: &str) -> Option<(String, Value)> {
    let re = Regex::new(
        r#"\{[^{}]*"tool"\s*:\s*"[^"]+"\s*(?:,\s*"input"\s*:\s*\{[^{}]*\})?[^{}]*\}"#,
    )
    .expect("static regex");
    let candidate = re.find(text)?.as_str();
    let value: Value = serde_json::from_str(candidate).ok()?;
    action_fields(&value)
}

/// Strip tag artefacts and embedded tool-call JSON; what remains is the
/// best-effort answer.
pub fn clean_response(text: &str) -> String {
    let tag_re = Regex::new(r"</?(?:think|action|answer|observation)>").expect("static regex");
    let json_re = Regex::new(r#"\{[^{}]*"tool"[^{}]*(?:\{[^{}]*\})?[^{}]*\}"#).expect("static regex");
    let without_tags = tag_re.replace_all(text, "");
    json_re.replace_all(&without_tags, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&str]) -> Vec<ParseEvent> {
        let mut parser = TagParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk));
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn think_then_answer_in_one_chunk() {
        let events = feed_all(&["<think>need math</think><answer>42</answer>"]);
        assert_eq!(
            events,
            vec![
                ParseEvent::Thought("need math".into()),
                ParseEvent::Answer("42".into()),
            ]
        );
    }

    #[test]
    fn action_json_is_parsed_on_close() {
        let events =
            feed_all(&[r#"<action>{"tool": "calculator", "input": {"expression": "1+1"}}</action>"#]);
        match &events[..] {
            [ParseEvent::Action { tool, input }] => {
                assert_eq!(tool, "calculator");
                assert_eq!(input["expression"], "1+1");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn split_closing_tag_is_never_flushed() {
        let events = feed_all(&["<think>hi</thi", "nk><answer>ok</answer>"]);
        assert_eq!(
            events,
            vec![
                ParseEvent::Thought("hi".into()),
                ParseEvent::Answer("ok".into()),
            ]
        );
    }

    #[test]
    fn long_think_streams_partials_with_lookahead() {
        let mut parser = TagParser::new();
        let body = "a".repeat(40);
        let events = parser.feed(&format!("<think>{body}"));
        // All but the trailing lookahead window streams out.
        assert_eq!(
            events,
            vec![ParseEvent::Thinking("a".repeat(40 - LOOKAHEAD))]
        );
        let events = parser.feed("</think>");
        assert_eq!(events, vec![ParseEvent::Thought(body)]);
    }

    #[test]
    fn text_before_first_tag_is_discarded() {
        let events = feed_all(&["Sure, let me think.<think>plan</think>"]);
        assert_eq!(events, vec![ParseEvent::Thought("plan".into())]);
    }

    #[test]
    fn action_content_is_not_streamed() {
        let mut parser = TagParser::new();
        let events = parser.feed(&format!("<action>{}", "x".repeat(60)));
        assert!(events.is_empty());
    }

    #[test]
    fn invalid_action_json_degrades_to_format_error() {
        let events = feed_all(&["<action>not json at all</action>"]);
        assert!(matches!(&events[..], [ParseEvent::FormatError(_)]));
    }

    #[test]
    fn single_quoted_action_json_is_repaired() {
        let events = feed_all(&["<action>{'tool': 'datetime', 'input': {'action': 'now'}}</action>"]);
        match &events[..] {
            [ParseEvent::Action { tool, .. }] => assert_eq!(tool, "datetime"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn unterminated_answer_is_salvaged_at_finish() {
        let events = feed_all(&["<answer>the end is near"]);
        assert_eq!(events, vec![ParseEvent::Answer("the end is near".into())]);
    }

    #[test]
    fn unterminated_action_recovers_embedded_json() {
        let events = feed_all(&[r#"<action>{"tool": "calculator", "input": {"expression": "2"}} trailing"#]);
        match &events[..] {
            [ParseEvent::Action { tool, .. }] => assert_eq!(tool, "calculator"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn multiple_regions_parse_sequentially() {
        let events = feed_all(&[
            "<think>first</think>",
            "<think>second</think>",
            "<answer>done</answer>",
        ]);
        assert_eq!(
            events,
            vec![
                ParseEvent::Thought("first".into()),
                ParseEvent::Thought("second".into()),
                ParseEvent::Answer("done".into()),
            ]
        );
    }

    #[test]
    fn recover_bare_action_with_input_object() {
        let (tool, input) = recover_bare_action(
            r#"I will call {"tool": "web_search", "input": {"query": "rust"}} now"#,
        )
        .unwrap();
        assert_eq!(tool, "web_search");
        assert_eq!(input["query"], "rust");
    }

    #[test]
    fn recover_bare_action_without_input() {
        let (tool, input) = recover_bare_action(r#"{"tool": "datetime"}"#).unwrap();
        assert_eq!(tool, "datetime");
        assert!(input.as_object().unwrap().is_empty());
    }

    #[test]
    fn clean_response_strips_tags_and_tool_json() {
        let cleaned = clean_response(
            "<think>hm</think> The result {\"tool\": \"x\"} is fine <answer>really</answer>",
        );
        assert!(!cleaned.contains("<answer>"));
        assert!(!cleaned.contains("tool"));
        assert!(cleaned.contains("really"));
    }

    #[test]
    fn multibyte_content_never_splits_mid_char() {
        let mut parser = TagParser::new();
        let body = "é".repeat(30);
        let mut collected = String::new();
        for ev in parser.feed(&format!("<think>{body}")) {
            if let ParseEvent::Thinking(t) = ev {
                collected.push_str(&t);
            }
        }
        for ev in parser.feed("</think>") {
            if let ParseEvent::Thought(t) = ev {
                assert_eq!(t, body);
            }
        }
        assert!(body.starts_with(&collected));
    }
}
