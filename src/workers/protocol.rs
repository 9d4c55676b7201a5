//! Worker 能力协议的结果解读
//!
//! 线上交互由 rmcp 客户端完成（initialize → tools/list → tools/call / resources/read）；
//! 这里只把它返回的模型对象收窄成控制平面关心的部分：操作描述、第一条文本内容、错误标记。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::error::WorkerError;

pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";
pub const METHOD_READ_RESOURCE: &str = "resources/read";

/// isError 结果映射成的 RPC 错误码
pub const TOOL_ERROR_CODE: i64 = -32000;

/// Worker 暴露的一个操作
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// 第一条内容的文本；isError 时转为错误
    pub fn into_text(self) -> Result<String, WorkerError> {
        let text = self
            .content
            .into_iter()
            .next()
            .and_then(|c| c.text)
            .unwrap_or_default();
        if self.is_error.unwrap_or(false) {
            return Err(WorkerError::Rpc {
                code: TOOL_ERROR_CODE,
                message: text,
            });
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
pub struct ResourceContent {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContent>,
}

impl ReadResourceResult {
    pub fn into_text(self) -> String {
        self.contents
            .into_iter()
            .next()
            .and_then(|c| c.text)
            .unwrap_or_default()
    }
}

/// 把 rmcp 模型对象按线上 JSON 形状转成本地结构
pub fn decode<S: Serialize, T: DeserializeOwned>(method: &str, value: S) -> Result<T, WorkerError> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| WorkerError::Protocol(format!("invalid {} result: {}", method, e)))
}
