//! The ReAct orchestrator: drive the LLM through a bounded
//! Thought/Action/Observation loop and emit a fine-grained event stream.
//!
//! Entry point: [`ReActAgent::run`] spawns the loop and returns a
//! channel of [`AgentEvent`]s for the SSE bridge to forward.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use cl_domain::agent::{AgentEvent, AgentState, AgentStep};
use cl_domain::chat::ChatMessage;
use cl_domain::stream::StreamEvent;
use cl_providers::{ChatRequest, LlmProvider};
use cl_tools::ToolRegistry;

use crate::cancel::CancelToken;
use crate::parser::{clean_response, recover_bare_action, ParseEvent, TagParser};
use crate::prompt::{observation_message, render_system_prompt, FORCE_ANSWER_DIRECTIVE};

/// Observation text is capped for the UI; the untruncated output still
/// goes into the conversation.
const OBSERVATION_PREVIEW_CHARS: usize = 2000;

pub struct ReActAgent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    extra_context: Option<String>,
}

/// What one streamed LLM round concluded.
enum Round {
    /// An action ran and an observation was appended; iterate again.
    ToolCalled,
    /// A final answer was produced.
    Answered(String),
    /// The stream produced nothing actionable; iterate again.
    NoProgress,
    /// Cancellation was observed.
    Cancelled,
    /// The LLM stream failed; the turn is over.
    Failed(String),
}

impl ReActAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        max_iterations: u32,
    ) -> Self {
        Self {
            provider,
            tools,
            max_iterations: max_iterations.max(1),
            extra_context: None,
        }
    }

    /// Attach extra system-prompt context (notebook variables, cells).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.extra_context = Some(context.into());
        self
    }

    /// Run one agent turn. Events arrive strictly ordered; the receiver
    /// closing does not stop the turn; cancel the token for that.
    pub fn run(
        self,
        messages: Vec<ChatMessage>,
        cancel: CancelToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            self.run_inner(messages, cancel, tx).await;
        });
        rx
    }

    async fn run_inner(
        self,
        mut messages: Vec<ChatMessage>,
        cancel: CancelToken,
        tx: mpsc::Sender<AgentEvent>,
    ) {
        let system_prompt =
            render_system_prompt(&self.tools.describe(), self.extra_context.as_deref());

        let _ = tx
            .send(AgentEvent::Start {
                provider: self.provider.provider_id().to_string(),
                model: self.provider.model().to_string(),
            })
            .await;

        let mut steps: Vec<AgentStep> = Vec::new();
        let mut state = AgentState::Idle;
        let mut final_answer = String::new();
        let mut iteration = 0u32;
        tracing::debug!(?state, "agent turn starting");

        while iteration < self.max_iterations {
            iteration += 1;
            state = AgentState::Thinking;
            tracing::info!(iteration, max = self.max_iterations, ?state, "agent iteration");

            let _ = tx.send(AgentEvent::ThinkingStart { iteration }).await;

            match self
                .stream_round(&system_prompt, &mut messages, &mut steps, &mut state, &tx, &cancel)
                .await
            {
                Round::ToolCalled | Round::NoProgress => continue,
                Round::Answered(answer) => {
                    state = AgentState::Done;
                    final_answer = answer;
                    break;
                }
                Round::Cancelled => {
                    tracing::info!("agent turn cancelled");
                    return;
                }
                Round::Failed(message) => {
                    state = AgentState::Error;
                    tracing::warn!(error = %message, ?state, "agent turn failed");
                    let _ = tx.send(AgentEvent::Error { message }).await;
                    return;
                }
            }
        }

        // Out of iterations without an answer: one directed final call.
        if final_answer.is_empty() {
            let _ = tx
                .send(AgentEvent::Thought {
                    text: "Iteration limit reached; answering from the information \
                           gathered so far."
                        .into(),
                })
                .await;

            match self.force_answer(&system_prompt, &messages).await {
                Ok(answer) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    state = AgentState::Done;
                    steps.push(AgentStep::answer(&answer));
                    let _ = tx.send(AgentEvent::Answer {
                        text: answer.clone(),
                    })
                    .await;
                    final_answer = answer;
                }
                Err(message) => {
                    let _ = tx.send(AgentEvent::Error { message }).await;
                    return;
                }
            }
        }

        let last_thought = steps
            .iter()
            .rev()
            .find(|s| s.step_type == cl_domain::agent::StepType::Thought)
            .map(|s| s.content.clone())
            .unwrap_or_default();

        tracing::info!(
            iterations = iteration,
            steps = steps.len(),
            answer_len = final_answer.len(),
            ?state,
            "agent turn complete"
        );

        let _ = tx
            .send(AgentEvent::Done {
                iterations: iteration,
                steps,
                thought: last_thought,
                answer: final_answer,
            })
            .await;
    }

    /// One streamed LLM round: feed deltas to the tag parser, act on
    /// what it completes. An action ends the round immediately; the
    /// rest of the stream is dropped because the observation changes
    /// the context for whatever the model would have said next.
    async fn stream_round(
        &self,
        system_prompt: &str,
        messages: &mut Vec<ChatMessage>,
        steps: &mut Vec<AgentStep>,
        state: &mut AgentState,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancelToken,
    ) -> Round {
        let req = ChatRequest {
            messages: messages.clone(),
            system: Some(system_prompt.to_string()),
            temperature: None,
            max_tokens: None,
        };

        let mut stream = match self.provider.chat_stream(&req).await {
            Ok(s) => s,
            Err(e) => return Round::Failed(e.to_string()),
        };

        let mut parser = TagParser::new();
        let mut full_response = String::new();
        let mut answered: Option<String> = None;

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Round::Cancelled;
            }
            let event = match item {
                Ok(ev) => ev,
                Err(e) => return Round::Failed(e.to_string()),
            };
            let text = match event {
                StreamEvent::Token { text } => text,
                StreamEvent::Done { .. } => continue,
            };
            full_response.push_str(&text);

            for parse_event in parser.feed(&text) {
                match parse_event {
                    ParseEvent::Thinking(text) => {
                        let _ = tx.send(AgentEvent::Thinking { text }).await;
                    }
                    ParseEvent::Thought(text) => {
                        steps.push(AgentStep::thought(&text));
                        let _ = tx.send(AgentEvent::Thought { text }).await;
                    }
                    ParseEvent::Content(text) => {
                        let _ = tx.send(AgentEvent::Content { text }).await;
                    }
                    ParseEvent::Answer(text) => {
                        answered = Some(text);
                    }
                    ParseEvent::Action { tool, input } => {
                        drop(stream);
                        return self
                            .run_action(
                                tool, input, &full_response, messages, steps, state, tx, cancel,
                            )
                            .await;
                    }
                    ParseEvent::FormatError(raw) => {
                        tracing::warn!(content = %raw, "malformed tool call");
                        let _ = tx
                            .send(AgentEvent::Thought {
                                text: "The tool call was malformed; answering directly \
                                       instead."
                                    .into(),
                            })
                            .await;
                    }
                }
            }

            if let Some(answer) = answered.take() {
                *state = AgentState::Answering;
                steps.push(AgentStep::answer(&answer));
                let _ = tx.send(AgentEvent::Answer {
                    text: answer.clone(),
                })
                .await;
                return Round::Answered(answer);
            }
        }

        // Stream closed without a tag closure; salvage what's in flight.
        for parse_event in parser.finish() {
            match parse_event {
                ParseEvent::Thought(text) => {
                    steps.push(AgentStep::thought(&text));
                    let _ = tx.send(AgentEvent::Thought { text }).await;
                }
                ParseEvent::Answer(text) => {
                    steps.push(AgentStep::answer(&text));
                    let _ = tx.send(AgentEvent::Answer { text: text.clone() }).await;
                    return Round::Answered(text);
                }
                ParseEvent::Action { tool, input } => {
                    return self
                        .run_action(
                            tool, input, &full_response, messages, steps, state, tx, cancel,
                        )
                        .await;
                }
                _ => {}
            }
        }

        // Last resorts: a bare JSON action anywhere in the response,
        // else the tag-stripped text as the answer.
        if let Some((tool, input)) = recover_bare_action(&full_response) {
            tracing::warn!(tool = %tool, "recovered bare JSON action");
            return self
                .run_action(
                    tool, input, &full_response, messages, steps, state, tx, cancel,
                )
                .await;
        }

        let cleaned = clean_response(&full_response);
        if !cleaned.is_empty() {
            tracing::warn!("no tags in response, using cleaned text as answer");
            steps.push(AgentStep::answer(&cleaned));
            let _ = tx.send(AgentEvent::Answer {
                text: cleaned.clone(),
            })
            .await;
            return Round::Answered(cleaned);
        }

        Round::NoProgress
    }

    /// Execute a tool call, emit action/observation, append the
    /// observation turn to the conversation.
    #[allow(clippy::too_many_arguments)]
    async fn run_action(
        &self,
        tool: String,
        input: Value,
        full_response: &str,
        messages: &mut Vec<ChatMessage>,
        steps: &mut Vec<AgentStep>,
        state: &mut AgentState,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancelToken,
    ) -> Round {
        *state = AgentState::Acting;
        let _ = tx
            .send(AgentEvent::Action {
                tool: tool.clone(),
                input: input.clone(),
            })
            .await;

        if cancel.is_cancelled() {
            return Round::Cancelled;
        }

        tracing::info!(tool = %tool, ?state, "agent invoking tool");
        let result = self.tools.execute(&tool, input.clone()).await;

        let raw_call = serde_json::json!({"tool": &tool, "input": &input}).to_string();
        steps.push(AgentStep::action(
            raw_call,
            &tool,
            input,
            &result.output,
            result.success,
        ));

        let preview: String = result.output.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        let _ = tx
            .send(AgentEvent::Observation {
                tool,
                success: result.success,
                output: preview,
                data: result.data.clone(),
            })
            .await;

        if cancel.is_cancelled() {
            return Round::Cancelled;
        }

        *state = AgentState::Observing;
        messages.push(ChatMessage::assistant(full_response));
        messages.push(ChatMessage::user(observation_message(&result.output)));

        Round::ToolCalled
    }

    /// The post-loop "give an answer now" call.
    async fn force_answer(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<String, String> {
        let mut summary_messages = messages.to_vec();
        summary_messages.push(ChatMessage::user(FORCE_ANSWER_DIRECTIVE));

        let req = ChatRequest {
            messages: summary_messages,
            system: Some(system_prompt.to_string()),
            temperature: None,
            max_tokens: None,
        };

        let resp = self.provider.chat(&req).await.map_err(|e| e.to_string())?;

        let mut parser = TagParser::new();
        let mut events = parser.feed(&resp.content);
        events.extend(parser.finish());

        for event in events {
            if let ParseEvent::Answer(answer) = event {
                return Ok(answer);
            }
        }
        Ok(clean_response(&resp.content))
    }
}
