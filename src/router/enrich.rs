//! 路由前置改写
//!
//! 纯文本变换：识别出“一句话里的多个待办”时加上多任务前缀，让相似度检索偏向任务列表 Worker。
//! 只影响检索用的查询，不改变交给模型的用户原话。

pub const MULTI_TASK_HINT: &str = "[Multiple tasks to add to TODO list]";

/// 常见的待办动作词（整词匹配）
const ACTION_VERBS: &[&str] = &[
    "eat", "show", "phone", "call", "buy", "send", "watch", "read", "meet", "confirm", "check",
    "book",
];

const OBLIGATION_PHRASES: &[&str] = &["i need to", "i have to"];
/// 只认独立的 "and"
const CONJUNCTIONS: &[&str] = &["and"];

fn words(lower: &str) -> impl Iterator<Item = &str> {
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
}

fn has_action_verb(lower: &str) -> bool {
    words(lower).any(|w| ACTION_VERBS.contains(&w))
}

/// 逗号分隔出至少两段非空短语
fn is_comma_list(lower: &str) -> bool {
    lower.split(',').filter(|part| !part.trim().is_empty()).count() >= 2
}

fn has_conjunction(lower: &str) -> bool {
    words(lower).any(|w| CONJUNCTIONS.contains(&w))
}

/// 需要时给查询加多任务前缀，否则原样返回
pub fn enrich_for_routing(query: &str) -> String {
    let lower = query.to_lowercase();

    let listed_actions = is_comma_list(&lower) && has_action_verb(&lower);
    let obligations = OBLIGATION_PHRASES.iter().any(|p| lower.contains(p)) && has_conjunction(&lower);

    if listed_actions || obligations {
        format!("{} {}", MULTI_TASK_HINT, query)
    } else {
        query.to_string()
    }
}
