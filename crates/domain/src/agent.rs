use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the agent currently is in its Thought/Action/Observation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Thinking,
    Acting,
    Observing,
    Answering,
    Done,
    Error,
}

/// One recorded step of an agent turn, persisted with the assistant
/// message so the full trace can be replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub step_type: StepType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Thought,
    Action,
    Observation,
    Answer,
}

impl AgentStep {
    pub fn thought(content: impl Into<String>) -> Self {
        Self {
            step_type: StepType::Thought,
            content: content.into(),
            timestamp: Utc::now(),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            success: None,
        }
    }

    pub fn action(
        content: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: Value,
        tool_output: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            step_type: StepType::Action,
            content: content.into(),
            timestamp: Utc::now(),
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            tool_output: Some(tool_output.into()),
            success: Some(success),
        }
    }

    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            step_type: StepType::Answer,
            content: content.into(),
            timestamp: Utc::now(),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            success: None,
        }
    }
}

/// Events emitted during a single agent turn, in program order.
///
/// The SSE bridge maps each variant to one `data:` frame; `Observation`
/// additionally carries the tool's structured payload so the bridge can
/// surface authorization prompts without re-running the tool.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "start")]
    Start { provider: String, model: String },

    #[serde(rename = "thinking_start")]
    ThinkingStart { iteration: u32 },

    /// Partial thought text, streamed as it arrives.
    #[serde(rename = "thinking")]
    Thinking { text: String },

    /// Finalized thought for one iteration.
    #[serde(rename = "thought")]
    Thought { text: String },

    #[serde(rename = "action")]
    Action { tool: String, input: Value },

    #[serde(rename = "observation")]
    Observation {
        tool: String,
        success: bool,
        /// Truncated for the UI; the untruncated output goes into the
        /// conversation as the observation turn.
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Partial answer text.
    #[serde(rename = "content")]
    Content { text: String },

    /// Finalized answer; terminates the loop.
    #[serde(rename = "answer")]
    Answer { text: String },

    #[serde(rename = "done")]
    Done {
        iterations: u32,
        steps: Vec<AgentStep>,
        thought: String,
        answer: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_round_trips() {
        let step = AgentStep::thought("need math");
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"step_type\":\"thought\""));
        let back: AgentStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step_type, StepType::Thought);
        assert_eq!(back.content, "need math");
    }

    #[test]
    fn action_step_carries_tool_fields() {
        let step = AgentStep::action(
            r#"{"tool":"calculator"}"#,
            "calculator",
            serde_json::json!({"expression": "1+1"}),
            "2",
            true,
        );
        assert_eq!(step.tool_name.as_deref(), Some("calculator"));
        assert_eq!(step.success, Some(true));
    }
}
