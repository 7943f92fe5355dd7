use launch_sdk_rs::mdx::{ComponentType, MdxComponent};
use launch_sdk_rs::response::ToolUsage;
use launch_sdk_rs::versions::Version;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
pub struct GenerateResponse {
    pub generated: String,
    pub prompt_type: String,
    pub model: String,
    pub provider: String,
    pub run_id: String,
    pub version: Option<Version>,
}

#[derive(Serialize, Debug)]
pub struct StreamDone {
    pub run_id: String,
    pub version: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, alias = "session_id")]
    pub thread_id: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ChatResponse {
    pub thread_id: String,
    pub message: String,
    pub tool_usage: Vec<ToolUsage>,
}

#[derive(Deserialize, Debug)]
pub struct ClearMemoryRequest {
    #[serde(alias = "session_id")]
    pub thread_id: String,
}

#[derive(Serialize, Debug)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct VersionList {
    pub versions: Vec<Version>,
}

#[derive(Serialize, Debug)]
pub struct VersionDetail {
    pub version: Version,
    pub code: String,
}

#[derive(Deserialize, Debug)]
pub struct RestoreRequest {
    #[serde(alias = "timestamp")]
    pub version_id: String,
}

#[derive(Deserialize, Debug)]
pub struct FeedbackRequest {
    pub run_id: String,
    pub score: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Inbound frame on the realtime channel.
#[derive(Deserialize, Debug)]
pub struct WsInbound {
    pub message: Option<String>,
    #[serde(default, alias = "session_id")]
    pub thread_id: Option<String>,
}

/// Outbound frames on the realtime channel.
#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutbound {
    Thinking {
        message: String,
        thread_id: String,
    },
    Token {
        token: String,
        thread_id: String,
    },
    Response {
        message: String,
        tool_usage: Vec<ToolUsage>,
        thread_id: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
}

#[derive(Deserialize, Debug)]
pub struct MdxProcessRequest {
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct MdxProcessResponse {
    pub processed_content: String,
    pub components: Vec<MdxComponent>,
}

#[derive(Deserialize, Debug)]
pub struct ComponentGenerateRequest {
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ComponentType,
}

#[derive(Serialize, Debug)]
pub struct ComponentGenerateResponse {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ComponentType,
}

#[derive(Deserialize, Debug)]
pub struct ComponentPreviewRequest {
    pub component: String,
}

#[derive(Serialize, Debug)]
pub struct ComponentPreviewResponse {
    pub preview: String,
    pub components: Vec<MdxComponent>,
}
