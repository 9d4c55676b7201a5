//! 编排循环的系统提示词
//!
//! 默认内置；`app.system_prompt_path` 指向的文件存在时整体替换。

use std::path::Path;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an autonomous operations agent working in a plan-act loop with the tools listed below.

AUDIENCE AND TONE
- You assist network operations engineers and internal staff, not end customers.
- Refer to the customer in the third person (\"the subscriber has been notified\", never \"your account\").
- Keep answers operational and concise. No customer-facing pleasantries.

TOOL DISCIPLINE
1. Only perform actions through the available tools.
2. Never claim an action happened unless the tool call for it returned successfully.
3. If no tool covers the request, say: 'I don't have access to that service right now'.
4. Call the tool before confirming an action.
5. If a tool call fails, report the error as it is.

MEMORY
- Lasting facts (name, chronic conditions, stable preferences): remember_fact(is_temporary=false).
- Short-lived context ('today', 'this time'): remember_fact(is_temporary=true).
- Deleting: forget_memory(topic=...). Listing everything: list_all_memories().
- Before any recommendation call recall_memories(topic=...) first, store newly stated preferences,
  then call the domain tool with both recalled and new preferences.
- When recall_memories() finds nothing relevant, continue with defaults.
";

/// 读取自定义提示词；文件缺失或为空时用默认值
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            tracing::info!(path = %path.display(), "Loaded system prompt");
            text
        }
        Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "System prompt not readable, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.txt");
        std::fs::write(&path, "custom prompt").unwrap();
        assert_eq!(load_system_prompt(Some(&path)), "custom prompt");
        assert_eq!(
            load_system_prompt(Some(&dir.path().join("missing.txt"))),
            DEFAULT_SYSTEM_PROMPT
        );
        assert_eq!(load_system_prompt(None), DEFAULT_SYSTEM_PROMPT);
    }
}
