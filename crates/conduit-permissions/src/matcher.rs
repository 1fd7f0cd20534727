//! Rule pattern matcher.
//!
//! A limited glob: `*` means "any run of any characters"; everything else is
//! literal. Patterns are compiled to full-string anchored regexes with every
//! metacharacter except `*` escaped. One special case: a pattern whose
//! suffix after the first `:` is exactly `*` is a prefix match on the text
//! before the colon (`git:*` matches `git commit -m x`).

use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Does `rule_tool` cover `tool_name`? `*` covers any tool; otherwise exact
/// string equality.
pub fn tool_matches(rule_tool: &str, tool_name: &str) -> bool {
    rule_tool == "*" || rule_tool == tool_name
}

/// The string a rule's pattern is matched against, by tool:
///
/// - `Bash` → `tool_input.command`
/// - `Read` / `Write` / `Edit` → `tool_input.file_path`
/// - anything else → the canonical JSON serialization of the whole input
///   (serde_json orders object keys, so the form is stable)
pub fn target_value(tool_name: &str, tool_input: &Value) -> String {
    let field = match tool_name {
        "Bash" => Some("command"),
        "Read" | "Write" | "Edit" => Some("file_path"),
        _ => None,
    };
    match field {
        Some(key) => tool_input
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        None => serde_json::to_string(tool_input).unwrap_or_default(),
    }
}

/// Match a rule pattern against a target string.
///
/// An empty pattern matches anything.
pub fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }

    // Prefix-colon special case: `prefix:*` succeeds iff the target starts
    // with `prefix`.
    if let Some((prefix, suffix)) = pattern.split_once(':') {
        if suffix == "*" {
            return target.starts_with(prefix);
        }
    }

    match compile_glob(pattern) {
        Ok(regex) => regex.is_match(target),
        Err(error) => {
            warn!(pattern, %error, "failed to compile rule pattern, treating as non-match");
            false
        }
    }
}

/// Does a rule (tool + content) match a tool-use request?
pub fn rule_matches(
    rule_tool: &str,
    rule_content: &str,
    tool_name: &str,
    tool_input: &Value,
) -> bool {
    if !tool_matches(rule_tool, tool_name) {
        return false;
    }
    if rule_content.is_empty() {
        return true;
    }
    pattern_matches(rule_content, &target_value(tool_name, tool_input))
}

/// Convert a limited glob to an anchored regex. `(?s)` lets `*` cross
/// newlines — command strings may contain them.
fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = pattern.split('*').map(|part| regex::escape(part)).collect();
    Regex::new(&format!("(?s)^{}$", escaped.join(".*")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
