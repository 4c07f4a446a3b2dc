//! Built-in tools registered at startup.
//!
//! These keep the service exercisable end-to-end without any external tool
//! host: expression evaluation, argument echo, and clock reads. All three
//! are stateless and safe under concurrent execution.

use std::sync::Arc;

use super::{Tool, ToolArguments, ToolError, ToolRegistry};

/// Register every built-in tool.
pub fn register_builtins(registry: &ToolRegistry) {
    // Registration of statically named tools cannot fail.
    for tool in [
        Arc::new(Calculator) as Arc<dyn Tool>,
        Arc::new(Echo),
        Arc::new(CurrentTime),
    ] {
        if let Err(error) = registry.register(tool) {
            tracing::error!(error = %error, "failed to register built-in tool");
        }
    }
}

/// Evaluates a mathematical expression.
struct Calculator;

#[async_trait::async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression; arguments: {\"expression\": string}"
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<serde_json::Value, ToolError> {
        let expression = arguments
            .get("expression")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ToolError::invalid_arguments("missing string field `expression`"))?;

        match meval::eval_str(expression) {
            Ok(result) => Ok(serde_json::json!({
                "expression": expression,
                "result": result,
            })),
            Err(error) => Err(ToolError::execution_failed(format!(
                "could not evaluate `{expression}`: {error}"
            ))),
        }
    }
}

/// Returns its arguments unchanged. Useful for wiring checks.
struct Echo;

#[async_trait::async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the argument map unchanged"
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::Value::Object(arguments))
    }
}

/// Reports the current UTC time.
struct CurrentTime;

#[async_trait::async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Return the current UTC time in RFC 3339 format"
    }

    async fn execute(&self, _arguments: ToolArguments) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({
            "utc": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorKind;

    fn args(pairs: &[(&str, serde_json::Value)]) -> ToolArguments {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn calculator_evaluates_expressions() {
        let result = Calculator
            .execute(args(&[("expression", serde_json::json!("2 + 2 * 10"))]))
            .await
            .unwrap();
        assert_eq!(result["result"], serde_json::json!(22.0));
    }

    #[tokio::test]
    async fn calculator_rejects_missing_expression() {
        let error = Calculator.execute(ToolArguments::new()).await.unwrap_err();
        assert_eq!(error.kind, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn calculator_reports_bad_expressions() {
        let error = Calculator
            .execute(args(&[("expression", serde_json::json!("2 +"))]))
            .await
            .unwrap_err();
        assert_eq!(error.kind, ToolErrorKind::ExecutionFailed);
    }

    #[tokio::test]
    async fn echo_round_trips_arguments() {
        let input = args(&[("key", serde_json::json!("value"))]);
        let result = Echo.execute(input.clone()).await.unwrap();
        assert_eq!(result, serde_json::Value::Object(input));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.exists("calculator"));
        assert!(registry.exists("echo"));
        assert!(registry.exists("current_time"));
    }
}
