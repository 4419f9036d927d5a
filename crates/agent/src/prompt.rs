//! The ReAct system prompt: the tag protocol, rules, and the rendered
//! tool descriptions.

/// `{tools_description}` is substituted with the registry's description
/// block; the examples teach the model the exact tag discipline the
/// parser expects.
const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are an AI assistant with access to the following tools:

{tools_description}

## Output format (strict)

You must answer using exactly these XML-style tags and nothing outside them:

**Case 1 - a tool is needed:**
<think>briefly, why a tool is needed</think>
<action>{"tool": "TOOL_NAME", "input": {"param": "value"}}</action>

**Case 2 - answer directly (no tool needed):**
<think>brief reasoning</think>
<answer>your answer</answer>

**Case 3 - after receiving a tool result:**
<think>what the tool result means</think>
<answer>the final answer based on the tool result</answer>

## Rules

1. Always use the <think>, <action>, <answer> tags.
2. Never emit text outside the tags.
3. The action content must be valid JSON.
4. Call at most one tool per response.

## Example

User asks "what's the weather today" - you reply:
<think>The user wants current information, so I need to search the web</think>
<action>{"tool": "web_search", "input": {"query": "weather today"}}</action>

After the search result arrives - you reply:
<think>I have the weather information and can answer</think>
<answer>According to the forecast, today will be...</answer>
"#;

/// Render the system prompt. `extra_context` carries notebook state
/// (variables, recent cells) for notebook-scoped agents.
pub fn render_system_prompt(tools_description: &str, extra_context: Option<&str>) -> String {
    let mut prompt =
        SYSTEM_PROMPT_TEMPLATE.replace("{tools_description}", tools_description);
    if let Some(extra) = extra_context {
        if !extra.is_empty() {
            prompt.push_str("\n## Current context\n\n");
            prompt.push_str(extra);
            prompt.push('\n');
        }
    }
    prompt
}

/// The user turn injected after a tool runs.
pub fn observation_message(tool_output: &str) -> String {
    format!(
        "<observation>\n{tool_output}\n</observation>\n\n\
         Use the tool result to continue. If you have enough information, \
         give the final answer; otherwise you may call another tool."
    )
}

/// The directive appended when the iteration limit is exhausted.
pub const FORCE_ANSWER_DIRECTIVE: &str =
    "Based on the information above, give the final answer now, wrapped in \
     <answer></answer> tags.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_description_is_substituted() {
        let prompt = render_system_prompt("**calculator**: math", None);
        assert!(prompt.contains("**calculator**: math"));
        assert!(!prompt.contains("{tools_description}"));
    }

    #[test]
    fn extra_context_is_appended() {
        let prompt = render_system_prompt("tools", Some("x: int = 41"));
        assert!(prompt.contains("## Current context"));
        assert!(prompt.contains("x: int = 41"));
    }

    #[test]
    fn observation_message_wraps_output() {
        let msg = observation_message("result: 42");
        assert!(msg.starts_with("<observation>\nresult: 42\n</observation>"));
    }
}
