use crate::error::AgentError;
use crate::events::RawAgentResult;
use crate::sanitize::sanitize_output;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One tool call as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    #[serde(rename = "tool")]
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResponse {
    pub output: String,
    pub tool_usage: Vec<ToolUsage>,
}

/// Normalizes a raw agent result into sanitized text plus tool usage.
///
/// Steps are ordered by the sequence the agent assigned when it issued each
/// call, regardless of the order they were collected in. A result without
/// final text, with an unanswered call, an unnamed tool or a repeated
/// sequence number is rejected as malformed.
pub fn process_agent_response(raw: RawAgentResult) -> Result<ProcessedResponse, AgentError> {
    let output = raw
        .output
        .ok_or_else(|| AgentError::MalformedResponse("agent result has no output".into()))?;

    let mut steps = raw.steps;
    steps.sort_by_key(|s| s.action.sequence);

    let mut seen = HashSet::new();
    let mut tool_usage = Vec::with_capacity(steps.len());
    for step in steps {
        let action = step.action;
        if action.tool_name.trim().is_empty() {
            return Err(AgentError::MalformedResponse(format!(
                "step {} has no tool name",
                action.sequence
            )));
        }
        if !seen.insert(action.sequence) {
            return Err(AgentError::MalformedResponse(format!(
                "duplicate step sequence {}",
                action.sequence
            )));
        }
        let observation = step.observation.ok_or_else(|| {
            AgentError::MalformedResponse(format!(
                "tool call {} ({}) has no output",
                action.tool_call_id, action.tool_name
            ))
        })?;

        tool_usage.push(ToolUsage {
            tool_name: action.tool_name,
            input: action.arguments,
            output: observation.content,
        });
    }

    Ok(ProcessedResponse {
        output: sanitize_output(&output),
        tool_usage,
    })
}
