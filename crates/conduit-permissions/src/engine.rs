//! Permission engine — ordered rule evaluation with an append-only audit log.

use std::sync::Arc;

use conduit_core::protocol::PermissionBehavior;
use conduit_store::row_types::PermissionRuleRow;
use conduit_store::{NewLogEntry, Store};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::matcher::rule_matches;

/// How a decision was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionSource {
    /// A rule matched.
    AutoRule,
    /// No rule matched; the default allow applied.
    AutoDefault,
}

impl DecisionSource {
    /// Persisted string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoRule => "auto_rule",
            Self::AutoDefault => "auto_default",
        }
    }
}

/// One tool-use request to evaluate.
#[derive(Clone, Debug)]
pub struct EvaluationRequest<'a> {
    /// Session the request arrived on.
    pub session_id: &'a str,
    /// Project scope for rule lookup; `None` evaluates global rules only.
    pub project_id: Option<&'a str>,
    /// Correlation id from the control request.
    pub request_id: &'a str,
    /// Tool the agent wants to use.
    pub tool_name: &'a str,
    /// Tool input object.
    pub tool_input: &'a Value,
    /// Deciding principal recorded in the audit log.
    pub decided_by: &'a str,
}

/// The engine's verdict.
#[derive(Clone, Debug)]
pub struct PermissionDecision {
    /// Allow or deny.
    pub behavior: PermissionBehavior,
    /// Rule-derived or default.
    pub source: DecisionSource,
    /// The matched rule, when `source` is `AutoRule`.
    pub rule_id: Option<String>,
    /// Sanitized replacement input. Forward-compat passthrough; no rule
    /// currently produces one.
    pub updated_input: Option<Value>,
}

impl PermissionDecision {
    fn default_allow() -> Self {
        Self {
            behavior: PermissionBehavior::Allow,
            source: DecisionSource::AutoDefault,
            rule_id: None,
            updated_input: None,
        }
    }

    fn from_rule(rule: &PermissionRuleRow) -> Self {
        let behavior =
            PermissionBehavior::parse(&rule.behavior).unwrap_or(PermissionBehavior::Deny);
        Self {
            behavior,
            source: DecisionSource::AutoRule,
            rule_id: Some(rule.id.clone()),
            updated_input: None,
        }
    }
}

/// Rule-based permission engine.
///
/// Evaluation is synchronous and cannot fail to return a decision: any
/// internal failure (rule-store read error) logs and falls through to the
/// default allow, preserving agent liveness.
pub struct PermissionEngine {
    store: Arc<Store>,
}

impl PermissionEngine {
    /// Create an engine over the shared store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Evaluate one tool-use request and write exactly one audit entry.
    ///
    /// Order: project deny → global deny → project allow → global allow →
    /// default allow. Within each bucket, highest priority first (the store
    /// orders ties deterministically by creation time then id).
    pub fn evaluate(&self, request: &EvaluationRequest<'_>) -> PermissionDecision {
        let decision = match self.decide(request) {
            Ok(decision) => decision,
            Err(error) => {
                warn!(
                    session_id = request.session_id,
                    tool_name = request.tool_name,
                    %error,
                    "rule evaluation failed, falling through to default allow"
                );
                PermissionDecision::default_allow()
            }
        };

        self.write_audit(request, &decision);
        counter!(
            "permission_decisions_total",
            "decision" => decision.behavior.as_str(),
            "source" => decision.source.as_str(),
        )
        .increment(1);
        debug!(
            session_id = request.session_id,
            tool_name = request.tool_name,
            decision = decision.behavior.as_str(),
            source = decision.source.as_str(),
            rule_id = decision.rule_id.as_deref().unwrap_or(""),
            "permission decision"
        );
        decision
    }

    fn decide(
        &self,
        request: &EvaluationRequest<'_>,
    ) -> Result<PermissionDecision, conduit_store::StoreError> {
        let project_rules = match request.project_id {
            Some(project_id) => self.store.list_project_rules(project_id)?,
            None => Vec::new(),
        };
        let global_rules = self.store.list_global_rules()?;

        let buckets: [(&[PermissionRuleRow], &str); 4] = [
            (&project_rules, "deny"),
            (&global_rules, "deny"),
            (&project_rules, "allow"),
            (&global_rules, "allow"),
        ];

        for (rules, behavior) in buckets {
            let matched = rules.iter().find(|rule| {
                rule.behavior == behavior
                    && rule_matches(
                        &rule.tool_name,
                        &rule.rule_content,
                        request.tool_name,
                        request.tool_input,
                    )
            });
            if let Some(rule) = matched {
                return Ok(PermissionDecision::from_rule(rule));
            }
        }
        Ok(PermissionDecision::default_allow())
    }

    /// Append the audit row. A write failure is logged but never blocks the
    /// decision from being returned.
    fn write_audit(&self, request: &EvaluationRequest<'_>, decision: &PermissionDecision) {
        let tool_input_text = serde_json::to_string(request.tool_input).unwrap_or_default();
        let entry = NewLogEntry {
            session_id: request.session_id,
            request_id: request.request_id,
            tool_name: request.tool_name,
            tool_input: &tool_input_text,
            decision: decision.behavior.as_str(),
            decision_source: decision.source.as_str(),
            rule_id: decision.rule_id.as_deref(),
            decided_by: request.decided_by,
        };
        if let Err(error) = self.store.append_permission_log(&entry) {
            warn!(
                session_id = request.session_id,
                request_id = request.request_id,
                %error,
                "failed to write permission audit entry"
            );
        }
    }

}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use conduit_store::{NewProject, NewRule, NewSession};
    use serde_json::json;

    struct Fixture {
        store: Arc<Store>,
        engine: PermissionEngine,
        project_id: String,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store
            .create_project(&NewProject {
                name: "P",
                folder_path: "/tmp/p",
                default_model: None,
                default_permission_mode: None,
                system_prompt: None,
                append_system_prompt: None,
            })
            .unwrap();
        store
            .create_session(&NewSession {
                id: "s1",
                project_id: &project.id,
                name: "session",
                model: None,
                ws_port: 9300,
            })
            .unwrap();
        let engine = PermissionEngine::new(Arc::clone(&store));
        Fixture { store, engine, project_id: project.id }
    }

    fn bash_request<'a>(fx: &'a Fixture, input: &'a Value) -> EvaluationRequest<'a> {
        EvaluationRequest {
            session_id: "s1",
            project_id: Some(&fx.project_id),
            request_id: "req-1",
            tool_name: "Bash",
            tool_input: input,
            decided_by: "conduit",
        }
    }

    fn add_rule(fx: &Fixture, project: bool, tool: &str, content: &str, behavior: &str, priority: i64) -> String {
        fx.store
            .create_rule(&NewRule {
                project_id: project.then_some(fx.project_id.as_str()),
                tool_name: tool,
                rule_content: content,
                behavior,
                priority,
            })
            .unwrap()
            .id
    }

    #[test]
    fn no_rules_defaults_to_allow() {
        let fx = fixture();
        let input = json!({"command": "ls"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &input));
        assert_eq!(decision.behavior, PermissionBehavior::Allow);
        assert_eq!(decision.source, DecisionSource::AutoDefault);
        assert!(decision.rule_id.is_none());
        assert!(decision.updated_input.is_none());
    }

    #[test]
    fn project_deny_beats_global_allow() {
        // Scenario: global blanket allow, project deny on `rm -rf *`.
        let fx = fixture();
        add_rule(&fx, false, "Bash", "", "allow", 0);
        let deny_id = add_rule(&fx, true, "Bash", "rm -rf *", "deny", 10);

        let input = json!({"command": "rm -rf /tmp/x"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &input));
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert_eq!(decision.source, DecisionSource::AutoRule);
        assert_eq!(decision.rule_id.as_deref(), Some(deny_id.as_str()));

        // Exactly one new audit row.
        assert_eq!(fx.store.count_permission_log("s1").unwrap(), 1);
        let log = fx.store.list_permission_log("s1").unwrap();
        assert_eq!(log[0].decision, "deny");
        assert_eq!(log[0].decision_source, "auto_rule");
        assert_eq!(log[0].rule_id.as_deref(), Some(deny_id.as_str()));
    }

    #[test]
    fn global_deny_beats_project_allow() {
        let fx = fixture();
        add_rule(&fx, true, "Bash", "", "allow", 100);
        let deny_id = add_rule(&fx, false, "Bash", "*curl*", "deny", 0);

        let input = json!({"command": "curl http://evil"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &input));
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert_eq!(decision.rule_id.as_deref(), Some(deny_id.as_str()));
    }

    #[test]
    fn project_allow_beats_global_allow() {
        let fx = fixture();
        let project_id = add_rule(&fx, true, "Bash", "git:*", "allow", 0);
        add_rule(&fx, false, "Bash", "", "allow", 100);

        let input = json!({"command": "git push"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &input));
        assert_eq!(decision.rule_id.as_deref(), Some(project_id.as_str()));
    }

    #[test]
    fn higher_priority_wins_within_bucket() {
        let fx = fixture();
        add_rule(&fx, true, "Bash", "git:*", "deny", 1);
        let high_id = add_rule(&fx, true, "Bash", "", "deny", 50);

        let input = json!({"command": "git push"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &input));
        assert_eq!(decision.rule_id.as_deref(), Some(high_id.as_str()));
    }

    #[test]
    fn prefix_colon_allow_and_default_fallthrough() {
        // Scenario: `git:*` allow rule; a git command matches, a non-git
        // command falls through to the default allow — distinguishable in
        // the audit log by source and null rule id.
        let fx = fixture();
        let rule_id = add_rule(&fx, true, "Bash", "git:*", "allow", 0);

        let git = json!({"command": "git commit -m hi"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &git));
        assert_eq!(decision.behavior, PermissionBehavior::Allow);
        assert_eq!(decision.source, DecisionSource::AutoRule);
        assert_eq!(decision.rule_id.as_deref(), Some(rule_id.as_str()));

        let other = json!({"command": "digits are fun"});
        let decision = fx.engine.evaluate(&bash_request(&fx, &other));
        assert_eq!(decision.behavior, PermissionBehavior::Allow);
        assert_eq!(decision.source, DecisionSource::AutoDefault);
        assert!(decision.rule_id.is_none());

        let log = fx.store.list_permission_log("s1").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].decision_source, "auto_rule");
        assert_eq!(log[1].decision_source, "auto_default");
        assert!(log[1].rule_id.is_none());
    }

    #[test]
    fn wildcard_tool_rule_applies_to_any_tool() {
        let fx = fixture();
        add_rule(&fx, true, "*", "", "deny", 0);

        let input = json!({"url": "https://example.com"});
        let request = EvaluationRequest {
            tool_name: "WebFetch",
            tool_input: &input,
            ..bash_request(&fx, &input)
        };
        let decision = fx.engine.evaluate(&request);
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
    }

    #[test]
    fn file_tool_matches_on_file_path() {
        let fx = fixture();
        add_rule(&fx, true, "Read", "/etc/*", "deny", 0);

        let secret = json!({"file_path": "/etc/shadow"});
        let request = EvaluationRequest {
            tool_name: "Read",
            tool_input: &secret,
            ..bash_request(&fx, &secret)
        };
        assert_eq!(fx.engine.evaluate(&request).behavior, PermissionBehavior::Deny);

        let safe = json!({"file_path": "/home/user/notes.txt"});
        let request = EvaluationRequest {
            tool_name: "Read",
            tool_input: &safe,
            ..bash_request(&fx, &safe)
        };
        assert_eq!(fx.engine.evaluate(&request).behavior, PermissionBehavior::Allow);
    }

    #[test]
    fn sessions_without_project_use_global_rules_only() {
        let fx = fixture();
        add_rule(&fx, true, "Bash", "", "deny", 0);
        add_rule(&fx, false, "Bash", "npm:*", "deny", 0);

        let input = json!({"command": "ls"});
        let request = EvaluationRequest { project_id: None, ..bash_request(&fx, &input) };
        // Project deny rule is out of scope; no global rule matches `ls`.
        assert_eq!(fx.engine.evaluate(&request).behavior, PermissionBehavior::Allow);

        let npm = json!({"command": "npm install"});
        let request = EvaluationRequest {
            project_id: None,
            tool_input: &npm,
            ..bash_request(&fx, &npm)
        };
        assert_eq!(fx.engine.evaluate(&request).behavior, PermissionBehavior::Deny);
    }

    #[test]
    fn every_evaluation_writes_exactly_one_audit_row() {
        let fx = fixture();
        add_rule(&fx, true, "Bash", "git:*", "allow", 0);

        let inputs = [
            json!({"command": "git status"}),
            json!({"command": "ls"}),
            json!({"command": "git push"}),
        ];
        for (i, input) in inputs.iter().enumerate() {
            fx.engine.evaluate(&bash_request(&fx, input));
            assert_eq!(fx.store.count_permission_log("s1").unwrap(), (i + 1) as i64);
        }
    }

    #[test]
    fn audit_records_tool_input_json() {
        let fx = fixture();
        let input = json!({"command": "ls -la"});
        fx.engine.evaluate(&bash_request(&fx, &input));

        let log = fx.store.list_permission_log("s1").unwrap();
        let stored: Value = serde_json::from_str(&log[0].tool_input).unwrap();
        assert_eq!(stored, input);
        assert_eq!(log[0].decided_by, "conduit");
        assert_eq!(log[0].request_id, "req-1");
    }
}
