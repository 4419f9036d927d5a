//! SSE bridge: translate the agent's event stream into `data:` frames,
//! persist the assistant message on completion, and cancel the agent
//! when the client disconnects.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use cl_agent::CancelToken;
use cl_domain::agent::{AgentEvent, AgentStep};

/// What a completed turn leaves behind for persistence.
pub struct TurnRecord {
    pub answer: String,
    pub thought: String,
    pub steps: Vec<AgentStep>,
}

/// Sink invoked exactly once, on `done`. Returns the persisted message
/// id surfaced in the terminal SSE frame.
pub type PersistFn = Box<dyn FnOnce(TurnRecord) -> Option<i64> + Send>;

/// One SSE frame: `data: {"event": ..., "data": ...}\n\n`.
pub fn frame(event: &str, data: Value) -> String {
    format!("data: {}\n\n", json!({"event": event, "data": data}))
}

/// Forward agent events as SSE frames.
///
/// If the frame receiver goes away (client disconnect) the agent is
/// cancelled, but events keep draining: a turn whose `answer` already
/// fired still reaches `done` and is persisted, matching the
/// cancellation contract.
pub fn spawn_bridge(
    mut agent_rx: mpsc::Receiver<AgentEvent>,
    cancel: CancelToken,
    persist: PersistFn,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(64);

    tokio::spawn(async move {
        let mut persist = Some(persist);
        let mut last_thought = String::new();
        let mut final_answer = String::new();
        let mut client_gone = false;

        while let Some(event) = agent_rx.recv().await {
            let terminal = matches!(event, AgentEvent::Done { .. } | AgentEvent::Error { .. });

            let frames = match event {
                AgentEvent::Start { provider, model } => vec![frame(
                    "model_info",
                    json!({"provider": provider, "model": model}),
                )],
                AgentEvent::ThinkingStart { iteration } => {
                    vec![frame("thinking_start", json!({"iteration": iteration}))]
                }
                AgentEvent::Thinking { text } => vec![frame("thinking", json!(text))],
                AgentEvent::Thought { text } => {
                    last_thought = text.clone();
                    vec![frame("thought", json!(text))]
                }
                AgentEvent::Action { tool, input } => {
                    vec![frame("action", json!({"tool": tool, "input": input}))]
                }
                AgentEvent::Observation {
                    tool,
                    success,
                    output,
                    data,
                } => {
                    let mut frames = vec![frame(
                        "observation",
                        json!({"tool": tool, "success": success, "output": output}),
                    )];
                    let needs_auth = data
                        .as_ref()
                        .and_then(|d| d.get("requires_authorization"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if needs_auth {
                        frames.push(frame(
                            "authorization_required",
                            json!({"action": tool}),
                        ));
                    }
                    frames
                }
                AgentEvent::Content { text } => vec![frame("content", json!(text))],
                AgentEvent::Answer { text } => {
                    final_answer = text.clone();
                    vec![frame("answer", json!(text))]
                }
                AgentEvent::Error { message } => vec![frame("error", json!(message))],
                AgentEvent::Done {
                    steps,
                    thought,
                    answer,
                    ..
                } => {
                    if !thought.is_empty() {
                        last_thought = thought;
                    }
                    if final_answer.is_empty() {
                        final_answer = answer;
                    }
                    let message_id = persist.take().and_then(|p| {
                        p(TurnRecord {
                            answer: final_answer.clone(),
                            thought: last_thought.clone(),
                            steps: steps.clone(),
                        })
                    });
                    vec![frame(
                        "done",
                        json!({
                            "message_id": message_id,
                            "thought": last_thought,
                            "answer": final_answer,
                            "react_steps": steps,
                        }),
                    )]
                }
            };

            if !client_gone {
                for f in frames {
                    if tx.send(f).await.is_err() {
                        tracing::info!("SSE client disconnected, cancelling agent turn");
                        client_gone = true;
                        cancel.cancel();
                        break;
                    }
                }
            }

            if terminal {
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_frame(raw: &str) -> Value {
        let payload = raw.strip_prefix("data: ").unwrap().trim_end();
        serde_json::from_str(payload).unwrap()
    }

    async fn run_bridge(events: Vec<AgentEvent>) -> (Vec<Value>, std::sync::Arc<parking_lot::Mutex<Option<TurnRecord>>>) {
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let persisted = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let sink = persisted.clone();

        let mut frames_rx = spawn_bridge(
            agent_rx,
            CancelToken::new(),
            Box::new(move |record| {
                *sink.lock() = Some(record);
                Some(7)
            }),
        );

        for event in events {
            agent_tx.send(event).await.unwrap();
        }
        drop(agent_tx);

        let mut frames = Vec::new();
        while let Some(f) = frames_rx.recv().await {
            frames.push(parse_frame(&f));
        }
        (frames, persisted)
    }

    #[tokio::test]
    async fn events_map_to_spec_frames() {
        let (frames, persisted) = run_bridge(vec![
            AgentEvent::Start {
                provider: "deepseek".into(),
                model: "deepseek-chat".into(),
            },
            AgentEvent::ThinkingStart { iteration: 1 },
            AgentEvent::Thought {
                text: "need math".into(),
            },
            AgentEvent::Answer { text: "15".into() },
            AgentEvent::Done {
                iterations: 1,
                steps: vec![AgentStep::thought("need math")],
                thought: "need math".into(),
                answer: "15".into(),
            },
        ])
        .await;

        let kinds: Vec<&str> = frames
            .iter()
            .map(|f| f["event"].as_str().unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec!["model_info", "thinking_start", "thought", "answer", "done"]
        );
        let done = frames.last().unwrap();
        assert_eq!(done["data"]["message_id"], 7);
        assert_eq!(done["data"]["answer"], "15");
        assert_eq!(done["data"]["react_steps"][0]["step_type"], "thought");

        let record = persisted.lock().take().unwrap();
        assert_eq!(record.answer, "15");
        assert_eq!(record.thought, "need math");
    }

    #[tokio::test]
    async fn authorization_required_follows_refused_observation() {
        let (frames, _) = run_bridge(vec![AgentEvent::Observation {
            tool: "notebook_execute".into(),
            success: false,
            output: "authorization required".into(),
            data: Some(json!({"requires_authorization": true})),
        }])
        .await;

        let kinds: Vec<&str> = frames
            .iter()
            .map(|f| f["event"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["observation", "authorization_required"]);
        assert_eq!(frames[1]["data"]["action"], "notebook_execute");
    }

    #[tokio::test]
    async fn error_is_terminal_and_skips_persistence() {
        let (frames, persisted) = run_bridge(vec![
            AgentEvent::Error {
                message: "llm unreachable".into(),
            },
            // Anything after a terminal event must be ignored.
            AgentEvent::Answer {
                text: "ghost".into(),
            },
        ])
        .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "error");
        assert!(persisted.lock().is_none());
    }

    #[tokio::test]
    async fn cancelled_turn_without_done_persists_nothing() {
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let persisted = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let sink = persisted.clone();
        let cancel = CancelToken::new();

        let frames_rx = spawn_bridge(
            agent_rx,
            cancel.clone(),
            Box::new(move |record| {
                *sink.lock() = Some(record);
                Some(1)
            }),
        );

        // Client disconnects immediately.
        drop(frames_rx);
        agent_tx
            .send(AgentEvent::ThinkingStart { iteration: 1 })
            .await
            .unwrap();
        // The bridge notices on its next send and cancels the agent.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(cancel.is_cancelled());

        // The (cancelled) agent never sends Done.
        drop(agent_tx);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(persisted.lock().is_none());
    }
}
