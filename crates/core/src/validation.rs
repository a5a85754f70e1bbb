//! Request validation rules.
//!
//! Providers may attach content rules to inbound requests: a rule targets
//! the JSON body (by dot-path), the request path, or a query parameter, and
//! requires the targeted value to match a regular expression. An empty rule
//! set accepts everything.

use crate::error::{Error, Result};
use crate::{MAX_CREDENTIAL_LEN, MIN_CREDENTIAL_LEN};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What part of the request a rule inspects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// A JSON body field addressed by dot-path (`key`).
    BodyJson,
    /// The request path; `key` is ignored.
    Path,
    /// A query parameter named by `key`.
    Query,
}

/// A single provider validation rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Which request component to inspect.
    pub rule: RuleKind,
    /// Dot-path for body rules, parameter name for query rules.
    #[serde(default)]
    pub key: String,
    /// Regular expression the targeted value must match.
    pub pattern: String,
}

/// Reject credentials outside the accepted length range.
pub fn validate_length(material: &str) -> Result<()> {
    let len = material.chars().count();
    if !(MIN_CREDENTIAL_LEN..=MAX_CREDENTIAL_LEN).contains(&len) {
        return Err(Error::CredentialLength(len));
    }
    Ok(())
}

/// Length check applied to bulk-imported credentials.
pub fn validate_for_import(material: &str) -> Result<()> {
    validate_length(material)
}

/// Run every configured rule against the request.
///
/// Missing keys reject, non-matching values reject, and an invalid regex
/// rejects with the compiler's diagnostic rather than silently passing.
pub fn validate_request(
    rules: &[ValidationRule],
    body: Option<&Value>,
    path: &str,
    query: &str,
) -> Result<()> {
    for rule in rules {
        let regex = Regex::new(&rule.pattern)
            .map_err(|e| Error::InvalidRule(format!("pattern {:?}: {e}", rule.pattern)))?;

        match rule.rule {
            RuleKind::BodyJson => {
                let value = body.and_then(|b| lookup_dot_path(b, &rule.key)).ok_or_else(|| {
                    Error::Validation(format!("body field {:?} is missing", rule.key))
                })?;
                let text = json_value_text(value);
                if !regex.is_match(&text) {
                    return Err(Error::Validation(format!(
                        "body field {:?} does not match {:?}",
                        rule.key, rule.pattern
                    )));
                }
            }
            RuleKind::Path => {
                if !regex.is_match(path) {
                    return Err(Error::Validation(format!(
                        "path {path:?} does not match {:?}",
                        rule.pattern
                    )));
                }
            }
            RuleKind::Query => {
                let value = query_param(query, &rule.key).ok_or_else(|| {
                    Error::Validation(format!("query parameter {:?} is missing", rule.key))
                })?;
                if !regex.is_match(value) {
                    return Err(Error::Validation(format!(
                        "query parameter {:?} does not match {:?}",
                        rule.key, rule.pattern
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Resolve a dot-path (`a.b.0.c`) inside a JSON value.
fn lookup_dot_path<'a>(root: &'a Value, dot_path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in dot_path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form a rule matches against: strings match their contents, other
/// JSON values match their serialization.
fn json_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Find a raw query parameter value by name. Parameters without `=` match
/// as empty values.
fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then_some(v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(kind: RuleKind, key: &str, pattern: &str) -> ValidationRule {
        ValidationRule {
            rule: kind,
            key: key.to_string(),
            pattern: pattern.to_string(),
        }
    }

    #[test]
    fn length_bounds() {
        assert!(validate_length("sixteen-chars-ok").is_ok());
        assert!(validate_length("short").is_err());
        assert!(validate_length(&"x".repeat(257)).is_err());
        assert!(validate_length(&"x".repeat(256)).is_ok());
    }

    #[test]
    fn empty_rule_set_accepts() {
        assert!(validate_request(&[], None, "/v1/models", "").is_ok());
    }

    #[test]
    fn body_rule_matches_dot_path() {
        let body = json!({"model": "gpt-4", "options": {"stream": true}});
        let rules = [rule(RuleKind::BodyJson, "model", "^gpt-")];
        assert!(validate_request(&rules, Some(&body), "/", "").is_ok());

        let nested = [rule(RuleKind::BodyJson, "options.stream", "true")];
        assert!(validate_request(&nested, Some(&body), "/", "").is_ok());
    }

    #[test]
    fn body_rule_missing_key_rejects() {
        let body = json!({"model": "gpt-4"});
        let rules = [rule(RuleKind::BodyJson, "prompt", ".*")];
        let err = validate_request(&rules, Some(&body), "/", "").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn missing_body_rejects_body_rule() {
        let rules = [rule(RuleKind::BodyJson, "model", ".*")];
        assert!(validate_request(&rules, None, "/", "").is_err());
    }

    #[test]
    fn path_rule_ignores_key() {
        let rules = [rule(RuleKind::Path, "unused", "^/v1/")];
        assert!(validate_request(&rules, None, "/v1/chat", "").is_ok());
        assert!(validate_request(&rules, None, "/v2/chat", "").is_err());
    }

    #[test]
    fn query_rule_checks_named_parameter() {
        let rules = [rule(RuleKind::Query, "page", r"^\d+$")];
        assert!(validate_request(&rules, None, "/", "page=3&limit=10").is_ok());
        assert!(validate_request(&rules, None, "/", "page=abc").is_err());
        assert!(validate_request(&rules, None, "/", "limit=10").is_err());
    }

    #[test]
    fn invalid_regex_rejects_with_diagnostic() {
        let rules = [rule(RuleKind::Path, "", "([unclosed")];
        let err = validate_request(&rules, None, "/", "").unwrap_err();
        assert!(matches!(err, crate::Error::InvalidRule(_)));
    }

    #[test]
    fn array_index_in_dot_path() {
        let body = json!({"messages": [{"role": "system"}]});
        let rules = [rule(RuleKind::BodyJson, "messages.0.role", "^system$")];
        assert!(validate_request(&rules, Some(&body), "/", "").is_ok());
    }
}
