//! Per-mock request-body validation: strict/permissive/warn enforcement of
//! a JSON Schema against the incoming request body.

use jsonschema::Validator;
use serde_json::Value;

use crate::mock::ValidationMode;

/// Outcome of validating a request body against a mock's [`crate::mock::ValidationSpec`].
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// The body satisfied the schema, or the mode tolerates the failure
    Pass,
    /// The body violated the schema and the mode rejects it
    Reject {
        /// HTTP status to respond with
        status: u16,
        /// Human-readable validator error report
        errors: Vec<String>,
    },
    /// The body violated the schema but the mode only warns
    Warn {
        /// Human-readable validator error report, for logging
        errors: Vec<String>,
    },
}

/// Compile `schema` and validate `body` against it under `mode`.
///
/// - `Strict` rejects on any schema violation.
/// - `Permissive` rejects only when a required property is missing;
///   other violations (type mismatches on present fields, etc.) pass.
/// - `Warn` never rejects; violations are reported for the caller to log.
pub fn validate(
    schema: &Value,
    mode: ValidationMode,
    reject_status: Option<u16>,
    body: &str,
) -> ValidationOutcome {
    let Ok(validator) = Validator::new(schema) else {
        // A malformed schema can't meaningfully validate anything; treat
        // as pass so a config error doesn't brick every matching request.
        return ValidationOutcome::Pass;
    };
    let Ok(instance) = serde_json::from_str::<Value>(body) else {
        return reject_or_warn(mode, reject_status, vec!["request body is not valid JSON".to_string()]);
    };

    let errors: Vec<String> = validator.iter_errors(&instance).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        return ValidationOutcome::Pass;
    }

    if mode == ValidationMode::Permissive && !errors.iter().any(|e| e.contains("required")) {
        return ValidationOutcome::Pass;
    }

    reject_or_warn(mode, reject_status, errors)
}

fn reject_or_warn(mode: ValidationMode, reject_status: Option<u16>, errors: Vec<String>) -> ValidationOutcome {
    match mode {
        ValidationMode::Warn => ValidationOutcome::Warn { errors },
        ValidationMode::Strict | ValidationMode::Permissive => ValidationOutcome::Reject {
            status: reject_status.unwrap_or(400),
            errors,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        })
    }

    #[test]
    fn strict_rejects_any_violation() {
        let outcome = validate(&schema(), ValidationMode::Strict, None, r#"{"name": 5}"#);
        assert!(matches!(outcome, ValidationOutcome::Reject { .. }));
    }

    #[test]
    fn permissive_passes_type_violation_on_present_field() {
        let outcome = validate(&schema(), ValidationMode::Permissive, None, r#"{"name": 5}"#);
        assert!(matches!(outcome, ValidationOutcome::Pass));
    }

    #[test]
    fn permissive_rejects_missing_required_field() {
        let outcome = validate(&schema(), ValidationMode::Permissive, None, r#"{}"#);
        assert!(matches!(outcome, ValidationOutcome::Reject { .. }));
    }

    #[test]
    fn warn_never_rejects() {
        let outcome = validate(&schema(), ValidationMode::Warn, None, r#"{}"#);
        assert!(matches!(outcome, ValidationOutcome::Warn { .. }));
    }

    #[test]
    fn valid_body_passes_under_any_mode() {
        let outcome = validate(&schema(), ValidationMode::Strict, None, r#"{"name": "a"}"#);
        assert!(matches!(outcome, ValidationOutcome::Pass));
    }
}
