//! Step condition evaluation.
//!
//! A step's `if` clause is either one of the builtin outcome functions
//! (`always()`, `success()`, `failure()`) or a JEXL expression evaluated
//! against the job context. Wraps `jexl_eval::Evaluator` with a small set of
//! pre-registered transforms.
//!
//! **Security note:** payloads are always passed as context objects, NEVER
//! interpolated into expression strings.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during condition evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("condition evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// JEXL condition evaluator with standard transforms pre-registered.
///
/// Used for step `if` clauses, e.g. `trigger.branch == 'main'` or
/// `matrix.os|lower == 'linux'`.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Decide whether a step should run.
    ///
    /// `job_succeeding` is the job's outcome so far: true until a
    /// non-tolerated step has failed. An absent condition defaults to
    /// `success()`.
    pub fn should_run(
        &self,
        condition: Option<&str>,
        job_succeeding: bool,
        context: &Value,
    ) -> Result<bool, ConditionError> {
        let Some(condition) = condition else {
            return Ok(job_succeeding);
        };
        match condition.trim() {
            "success()" => Ok(job_succeeding),
            "always()" => Ok(true),
            "failure()" => Ok(!job_succeeding),
            expression => self.evaluate_bool(expression, context),
        }
    }

    /// Evaluate an expression to a boolean result.
    ///
    /// The `context` must be a JSON object. Results are coerced to boolean
    /// using JavaScript-like truthiness rules.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ConditionError> {
        if !context.is_object() {
            return Err(ConditionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ConditionError::EvalFailed(e.to_string()))?;

        Ok(Self::value_to_bool(&result))
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Value {
        json!({
            "trigger": { "branch": "main", "kind": "push" },
            "matrix": { "os": "Linux" },
            "job": { "success": true },
        })
    }

    // -----------------------------------------------------------------------
    // Builtin outcome functions
    // -----------------------------------------------------------------------

    #[test]
    fn test_default_condition_is_success() {
        let eval = ConditionEvaluator::new();
        assert!(eval.should_run(None, true, &ctx()).unwrap());
        assert!(!eval.should_run(None, false, &ctx()).unwrap());
    }

    #[test]
    fn test_always_runs_regardless_of_outcome() {
        let eval = ConditionEvaluator::new();
        assert!(eval.should_run(Some("always()"), true, &ctx()).unwrap());
        assert!(eval.should_run(Some("always()"), false, &ctx()).unwrap());
    }

    #[test]
    fn test_failure_runs_only_after_failure() {
        let eval = ConditionEvaluator::new();
        assert!(!eval.should_run(Some("failure()"), true, &ctx()).unwrap());
        assert!(eval.should_run(Some("failure()"), false, &ctx()).unwrap());
    }

    #[test]
    fn test_success_with_surrounding_whitespace() {
        let eval = ConditionEvaluator::new();
        assert!(eval.should_run(Some(" success() "), true, &ctx()).unwrap());
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    #[test]
    fn test_branch_expression() {
        let eval = ConditionEvaluator::new();
        assert!(
            eval.should_run(Some("trigger.branch == 'main'"), true, &ctx())
                .unwrap()
        );
        assert!(
            !eval
                .should_run(Some("trigger.branch == 'dev'"), true, &ctx())
                .unwrap()
        );
    }

    #[test]
    fn test_matrix_transform_expression() {
        let eval = ConditionEvaluator::new();
        assert!(
            eval.should_run(Some("matrix.os|lower == 'linux'"), true, &ctx())
                .unwrap()
        );
    }

    #[test]
    fn test_invalid_expression_is_error() {
        let eval = ConditionEvaluator::new();
        let result = eval.should_run(Some("trigger.branch =="), true, &ctx());
        assert!(matches!(result, Err(ConditionError::EvalFailed(_))));
    }

    #[test]
    fn test_non_object_context_rejected() {
        let eval = ConditionEvaluator::new();
        let result = eval.evaluate_bool("1 == 1", &json!([1, 2]));
        assert!(matches!(result, Err(ConditionError::InvalidContext(_))));
    }

    #[test]
    fn test_truthiness_coercion() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_bool("trigger.branch", &ctx()).unwrap());
        assert!(!eval.evaluate_bool("trigger.missing", &ctx()).unwrap());
    }
}
