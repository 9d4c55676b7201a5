//! 合规审查（Compliance Gate）
//!
//! 草稿答复经一次结构化输出调用（强制调用 `review_response` 函数，参数 schema 由 schemars 生成）
//! 得到 ComplianceVerdict，再按固定顺序判定：
//! 1. 金融话题但缺风险提示 → 拒绝（固定指令）
//! 2. 医疗话题但缺就医提示 → 拒绝（固定指令）
//! 3. verdict 为 REJECTED 且有理由 → 拒绝（该理由）
//! 4. 其余 → 通过
//!
//! 拒绝时做一次不带工具的改写调用；改写为空则在草稿后附固定免责声明。
//! 审查本身的任何失败都视为通过（fail-open）。

use std::sync::Arc;

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::llm::{ChatRequest, LlmClient, ToolChoice, ToolSpec};
use crate::memory::Message;

pub const REVIEW_FUNCTION: &str = "review_response";

pub const FINANCIAL_REJECTION: &str = "Financial topic detected but missing risk disclaimer. \
Add a warning like 'This is not financial advice. Use the provided information at your own risk'";
pub const MEDICAL_REJECTION: &str = "Medical topic detected but missing 'consult a doctor' warning.";
pub const FALLBACK_DISCLAIMER: &str = "\n\nDisclaimer: Use this answer at your own risks.";

/// 审查结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Approved,
    Rejected,
}

/// 审查模型填写的结构化结果，所有字段必填
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct ComplianceVerdict {
    /// Does the query or answer touch investments, trading, crypto or other financial decisions?
    pub is_financial_topic: bool,
    /// Does the answer contain a risk disclaimer such as 'This is not financial advice'?
    pub has_financial_disclaimer: bool,
    /// Does the query or answer touch health, symptoms, medication or treatment?
    pub is_medical_topic: bool,
    /// Does the answer tell the reader to consult a doctor or medical professional?
    pub has_medical_disclaimer: bool,
    /// Overall verdict
    pub verdict: Verdict,
    /// Short reason, required when the verdict is REJECTED
    pub reason: String,
}

/// 门禁判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    Rejected(String),
}

/// 按固定顺序判定；话题规则优先于 verdict 字段
pub fn decide(v: &ComplianceVerdict) -> GateDecision {
    if v.is_financial_topic && !v.has_financial_disclaimer {
        return GateDecision::Rejected(FINANCIAL_REJECTION.to_string());
    }
    if v.is_medical_topic && !v.has_medical_disclaimer {
        return GateDecision::Rejected(MEDICAL_REJECTION.to_string());
    }
    if v.verdict == Verdict::Rejected && !v.reason.trim().is_empty() {
        return GateDecision::Rejected(v.reason.trim().to_string());
    }
    GateDecision::Approved
}

/// 审查调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    Reviewed(ComplianceVerdict),
    /// 调用或解析失败；一律放行
    Failed(String),
}

impl ReviewOutcome {
    pub fn decision(&self) -> GateDecision {
        match self {
            ReviewOutcome::Reviewed(v) => decide(v),
            ReviewOutcome::Failed(_) => GateDecision::Approved,
        }
    }
}

/// 门禁最终输出
#[derive(Debug, Clone, PartialEq)]
pub struct GateResult {
    pub answer: String,
    pub decision: GateDecision,
    pub rewritten: bool,
}

/// `review_response` 的参数 schema（子 schema 内联，便于函数调用）
pub fn verdict_schema() -> serde_json::Value {
    let gen = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let root = gen.into_root_schema_for::<ComplianceVerdict>();
    serde_json::to_value(root).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Verdict schema serialization failed");
        serde_json::json!({ "type": "object" })
    })
}

fn review_prompt(query: &str, draft: &str) -> String {
    format!(
        "You are a compliance reviewer. Inspect the assistant answer below and fill in every field \
         of the review.\n\n\
         Rules:\n\
         - Financial topics (investments, trading, crypto, prices used for decisions) need a risk disclaimer.\n\
         - Medical topics (symptoms, medication, treatment) need a 'consult a doctor' warning.\n\
         - Reject anything else that is unsafe or clearly non-compliant, with a short reason.\n\n\
         User query: {}\n\n\
         Assistant answer: {}",
        query, draft
    )
}

pub fn rewrite_prompt(reason: &str, draft: &str) -> String {
    format!(
        "COMPLIANCE ISSUE: REJECTED: {}\n\n\
         Your previous answer was: '{}'\n\n\
         Please rewrite your answer to address the compliance issue. Do NOT use any tools, just fix the text.",
        reason, draft
    )
}

/// 合规审查器：审查用工具模型，改写由调用方传入主模型
pub struct ComplianceCritic {
    llm: Arc<dyn LlmClient>,
    schema: serde_json::Value,
}

impl ComplianceCritic {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            schema: verdict_schema(),
        }
    }

    /// 单次无状态结构化调用
    pub async fn review(&self, query: &str, draft: &str) -> ReviewOutcome {
        let tool = ToolSpec {
            name: REVIEW_FUNCTION.to_string(),
            description: "Record the compliance review of an assistant answer".to_string(),
            input_schema: self.schema.clone(),
        };
        let request = ChatRequest::new(vec![Message::user(review_prompt(query, draft))])
            .with_tools(vec![tool])
            .with_tool_choice(ToolChoice::Function(REVIEW_FUNCTION.to_string()))
            .with_temperature(0.0);

        let reply = match self.llm.chat(request).await {
            Ok(r) => r,
            Err(e) => return ReviewOutcome::Failed(e.to_string()),
        };
        let Some(call) = reply.tool_calls.iter().find(|c| c.name == REVIEW_FUNCTION) else {
            return ReviewOutcome::Failed("no review_response call in reply".into());
        };
        match serde_json::from_str::<ComplianceVerdict>(&call.arguments) {
            Ok(v) => ReviewOutcome::Reviewed(v),
            Err(e) => ReviewOutcome::Failed(format!("invalid review arguments: {}", e)),
        }
    }

    /// 审查并在拒绝时强制改写；messages 为循环结束时的完整上下文
    pub async fn gate(
        &self,
        rewriter: &dyn LlmClient,
        query: &str,
        draft: &str,
        mut messages: Vec<Message>,
    ) -> GateResult {
        let outcome = self.review(query, draft).await;
        if let ReviewOutcome::Failed(reason) = &outcome {
            tracing::warn!(%reason, "Compliance review failed, approving");
        }

        let decision = outcome.decision();
        let reason = match &decision {
            GateDecision::Approved => {
                tracing::info!("Compliance review approved");
                return GateResult {
                    answer: draft.to_string(),
                    decision,
                    rewritten: false,
                };
            }
            GateDecision::Rejected(reason) => reason.clone(),
        };

        tracing::info!(%reason, "Compliance review rejected, rewriting");
        messages.push(Message::user(rewrite_prompt(&reason, draft)));
        let rewritten = match rewriter.chat(ChatRequest::new(messages)).await {
            Ok(reply) => reply.text_or_empty().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Rewrite call failed");
                String::new()
            }
        };

        let answer = if rewritten.is_empty() {
            format!("{}{}", draft, FALLBACK_DISCLAIMER)
        } else {
            rewritten
        };
        GateResult {
            answer,
            decision,
            rewritten: true,
        }
    }
}
