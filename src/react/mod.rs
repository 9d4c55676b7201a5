//! 认知层：追问判断、ReAct 工具循环、合规审查、系统提示词

pub mod critic;
pub mod followup;
pub mod loop_;
pub mod prompt;

pub use critic::{ComplianceCritic, ComplianceVerdict, GateDecision, GateResult, ReviewOutcome, Verdict};
pub use followup::{ContextMerge, FollowUpDetector};
pub use loop_::{react_loop, ReactResult, ReactSession};
pub use prompt::{load_system_prompt, DEFAULT_SYSTEM_PROMPT};
