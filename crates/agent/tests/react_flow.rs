//! End-to-end agent-loop tests against a scripted LLM provider.
//!
//! The provider replays canned responses, chunked to exercise the
//! incremental parser exactly as a real stream would.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cl_agent::{CancelToken, ReActAgent};
use cl_domain::agent::{AgentEvent, StepType};
use cl_domain::chat::ChatMessage;
use cl_domain::error::Result;
use cl_domain::stream::{BoxStream, StreamEvent, Usage};
use cl_kernel::Kernel;
use cl_notebook::NotebookStore;
use cl_providers::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider,
};
use cl_tools::{
    CalculatorTool, NotebookExecuteTool, NotebookToolContext, ToolRegistry,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays one scripted response (as a chunk sequence) per LLM call.
struct ScriptedProvider {
    responses: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|chunks| chunks.into_iter().map(String::from).collect())
                    .collect(),
            ),
        })
    }

    fn next_response(&self) -> Vec<String> {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            vec!["<answer>out of script</answer>".to_string()]
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse {
            content: self.next_response().concat(),
            usage: Some(Usage::default()),
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        _req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let chunks = self.next_response();
        let stream = async_stream::stream! {
            for text in chunks {
                yield Ok(StreamEvent::Token { text });
            }
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Ok(EmbeddingsResponse { embeddings: vec![] })
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

fn base_registry() -> Arc<ToolRegistry> {
    let mut reg = ToolRegistry::new();
    reg.register(Arc::new(CalculatorTool));
    Arc::new(reg)
}

async fn collect_events(
    provider: Arc<ScriptedProvider>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
) -> Vec<AgentEvent> {
    let agent = ReActAgent::new(provider, tools, max_iterations);
    let mut rx = agent.run(
        vec![ChatMessage::user("question")],
        CancelToken::new(),
    );
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn event_names(events: &[AgentEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            AgentEvent::Start { .. } => "start",
            AgentEvent::ThinkingStart { .. } => "thinking_start",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Thought { .. } => "thought",
            AgentEvent::Action { .. } => "action",
            AgentEvent::Observation { .. } => "observation",
            AgentEvent::Content { .. } => "content",
            AgentEvent::Answer { .. } => "answer",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Error { .. } => "error",
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn direct_answer_without_tools() {
    let provider = ScriptedProvider::new(vec![vec![
        "<think>simple question</think><answer>four</answer>",
    ]]);
    let events = collect_events(provider, base_registry(), 5).await;

    assert_eq!(
        event_names(&events),
        vec!["start", "thinking_start", "thought", "answer", "done"]
    );
    match events.last().unwrap() {
        AgentEvent::Done {
            answer, thought, ..
        } => {
            assert_eq!(answer, "four");
            assert_eq!(thought, "simple question");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn calculator_round_trip() {
    let provider = ScriptedProvider::new(vec![
        vec![
            "<think>need math</think>",
            r#"<action>{"tool": "calculator", "input": {"expression": "sqrt(144)+3"}}</action>"#,
        ],
        vec!["<think>done</think><answer>15</answer>"],
    ]);
    let events = collect_events(provider, base_registry(), 5).await;

    assert_eq!(
        event_names(&events),
        vec![
            "start",
            "thinking_start",
            "thought",
            "action",
            "observation",
            "thinking_start",
            "thought",
            "answer",
            "done"
        ]
    );

    match &events[3] {
        AgentEvent::Action { tool, input } => {
            assert_eq!(tool, "calculator");
            assert_eq!(input["expression"], "sqrt(144)+3");
        }
        other => panic!("unexpected: {other:?}"),
    }
    match &events[4] {
        AgentEvent::Observation {
            tool,
            success,
            output,
            ..
        } => {
            assert_eq!(tool, "calculator");
            assert!(success);
            assert!(output.contains("15"), "{output}");
        }
        other => panic!("unexpected: {other:?}"),
    }
    match events.last().unwrap() {
        AgentEvent::Done { answer, steps, .. } => {
            assert_eq!(answer, "15");
            let types: Vec<StepType> = steps.iter().map(|s| s.step_type).collect();
            assert_eq!(
                types,
                vec![
                    StepType::Thought,
                    StepType::Action,
                    StepType::Thought,
                    StepType::Answer
                ]
            );
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn split_closing_tag_across_chunks() {
    let provider = ScriptedProvider::new(vec![vec![
        "<think>hi</thi",
        "nk><answer>ok</answer>",
    ]]);
    let events = collect_events(provider, base_registry(), 5).await;

    let names = event_names(&events);
    assert_eq!(
        names,
        vec!["start", "thinking_start", "thought", "answer", "done"]
    );
    match &events[2] {
        AgentEvent::Thought { text } => assert_eq!(text, "hi"),
        other => panic!("unexpected: {other:?}"),
    }
    match &events[3] {
        AgentEvent::Answer { text } => assert_eq!(text, "ok"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_notebook_execute_mutates_nothing() {
    let store = Arc::new(NotebookStore::new());
    let nb = store.create(1, "t", None, vec![]);
    let kernel = Arc::new(Kernel::new(nb.id.to_string(), "python3"));
    let ctx = Arc::new(NotebookToolContext {
        kernel: kernel.clone(),
        store: store.clone(),
        notebook_id: nb.id,
        authorized: false,
        exec_timeout: Duration::from_secs(60),
    });
    let mut reg = ToolRegistry::new();
    reg.register(Arc::new(NotebookExecuteTool::new(ctx)));

    let provider = ScriptedProvider::new(vec![
        vec![
            "<think>run it</think>",
            r#"<action>{"tool": "notebook_execute", "input": {"code": "print(1)"}}</action>"#,
        ],
        vec!["<answer>I need authorization for that.</answer>"],
    ]);
    let events = collect_events(provider, Arc::new(reg), 5).await;

    let observation = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::Observation {
                success,
                output,
                data,
                ..
            } => Some((*success, output.clone(), data.clone())),
            _ => None,
        })
        .expect("observation emitted");

    assert!(!observation.0);
    assert!(observation.1.contains("authorization"));
    assert_eq!(
        observation.2.unwrap()["requires_authorization"],
        true
    );
    // No mutation happened anywhere.
    assert_eq!(store.get(&nb.id).unwrap().cells.len(), 1);
    assert_eq!(kernel.execution_count(), 0);
    assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
}

#[tokio::test]
async fn bare_json_action_is_recovered() {
    let provider = ScriptedProvider::new(vec![
        vec![r#"I should use {"tool": "calculator", "input": {"expression": "2+2"}} here"#],
        vec!["<answer>4</answer>"],
    ]);
    let events = collect_events(provider, base_registry(), 5).await;

    let names = event_names(&events);
    assert!(names.contains(&"action"));
    assert!(names.contains(&"observation"));
    match events.last().unwrap() {
        AgentEvent::Done { answer, .. } => assert_eq!(answer, "4"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn tagless_response_becomes_the_answer() {
    let provider =
        ScriptedProvider::new(vec![vec!["Just a plain reply with no tags at all."]]);
    let events = collect_events(provider, base_registry(), 5).await;

    match events.last().unwrap() {
        AgentEvent::Done { answer, .. } => {
            assert_eq!(answer, "Just a plain reply with no tags at all.");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_keeps_the_loop_alive() {
    let provider = ScriptedProvider::new(vec![
        vec![r#"<think>try</think><action>{"tool": "no_such_tool", "input": {}}</action>"#],
        vec!["<answer>never mind</answer>"],
    ]);
    let events = collect_events(provider, base_registry(), 5).await;

    let observation = events.iter().find_map(|e| match e {
        AgentEvent::Observation {
            success, output, ..
        } => Some((*success, output.clone())),
        _ => None,
    });
    let (success, output) = observation.expect("observation for missing tool");
    assert!(!success);
    assert!(output.contains("calculator"), "lists available tools");
    assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
}

#[tokio::test]
async fn iteration_limit_forces_an_answer() {
    // Every round calls a tool, never answers.
    let tool_round = vec![
        r#"<think>more</think><action>{"tool": "calculator", "input": {"expression": "1+1"}}</action>"#,
    ];
    let provider = ScriptedProvider::new(vec![
        tool_round.clone(),
        tool_round.clone(),
        // Forced-answer call (non-streaming) consumes the next script.
        vec!["<answer>best effort</answer>"],
    ]);
    let events = collect_events(provider, base_registry(), 2).await;

    let names = event_names(&events);
    assert_eq!(names.iter().filter(|n| **n == "thinking_start").count(), 2);
    match events.last().unwrap() {
        AgentEvent::Done {
            answer, iterations, ..
        } => {
            assert_eq!(answer, "best effort");
            assert_eq!(*iterations, 2);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_turn_emits_no_done() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let provider = ScriptedProvider::new(vec![vec!["<answer>too late</answer>"]]);
    let agent = ReActAgent::new(provider, base_registry(), 5);
    let mut rx = agent.run(vec![ChatMessage::user("q")], cancel);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(!event_names(&events).contains(&"done"));
}

#[tokio::test]
async fn malformed_action_degrades_to_thought() {
    let provider = ScriptedProvider::new(vec![vec![
        "<action>this is not json</action><answer>fine</answer>",
    ]]);
    let events = collect_events(provider, base_registry(), 5).await;

    let names = event_names(&events);
    assert!(!names.contains(&"action"));
    assert!(names.contains(&"thought"));
    match events.last().unwrap() {
        AgentEvent::Done { answer, .. } => assert_eq!(answer, "fine"),
        other => panic!("unexpected: {other:?}"),
    }
}
