use rand::Rng;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use tool_loop_core::tool::{Error as ToolError, Tool, ToolResult};

/// Upper bound of `count`, so a single call cannot exhaust memory.
const MAX_COUNT: i64 = 10_000;

#[derive(Deserialize, JsonSchema)]
pub struct RandomNumbersParameters {
    #[schemars(description = "Lower bound on the generated number")]
    min: i64,
    #[schemars(description = "Upper bound on the generated number")]
    max: i64,
    #[schemars(description = "How many numbers should be calculated")]
    count: i64,
}

/// Generates uniformly distributed integers in an inclusive range.
pub struct RandomNumbersTool {
    parameter_schema: Value,
}

impl RandomNumbersTool {
    /// Creates a new random numbers tool.
    #[inline]
    pub fn new() -> Self {
        RandomNumbersTool {
            parameter_schema: schema_for!(RandomNumbersParameters).to_value(),
        }
    }
}

impl Default for RandomNumbersTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for RandomNumbersTool {
    type Input = RandomNumbersParameters;

    fn name(&self) -> &str {
        "get_random_numbers"
    }

    fn description(&self) -> &str {
        "Generates a list of random numbers"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: RandomNumbersParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        // The thread-local generator is not `Send`, so draw the numbers
        // before building the future.
        let result = generate(&mut rand::thread_rng(), &input);
        async move { result }
    }
}

fn generate<R: Rng>(rng: &mut R, input: &RandomNumbersParameters) -> ToolResult {
    let RandomNumbersParameters { min, max, count } = *input;
    if min > max {
        return Err(ToolError::range()
            .with_reason(format!("`min` ({min}) is greater than `max` ({max})")));
    }
    if !(0..=MAX_COUNT).contains(&count) {
        return Err(ToolError::range()
            .with_reason(format!("`count` must be between 0 and {MAX_COUNT}")));
    }

    let numbers: Vec<i64> = (0..count).map(|_| rng.gen_range(min..=max)).collect();
    Ok(json!({ "random numbers": numbers }).to_string())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tool_loop_core::tool::ErrorKind;

    use super::*;

    fn params(min: i64, max: i64, count: i64) -> RandomNumbersParameters {
        RandomNumbersParameters { min, max, count }
    }

    fn numbers(result: &str) -> Vec<i64> {
        let value: Value = serde_json::from_str(result).unwrap();
        serde_json::from_value(value["random numbers"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_degenerate_range() {
        let result = RandomNumbersTool::new().execute(params(1, 1, 5)).await;
        assert_eq!(numbers(&result.unwrap()), [1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_numbers_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let result = generate(&mut rng, &params(-3, 3, 200)).unwrap();
        let numbers = numbers(&result);
        assert_eq!(numbers.len(), 200);
        assert!(numbers.iter().all(|n| (-3..=3).contains(n)));

        let result = generate(&mut rng, &params(0, 10, 0)).unwrap();
        assert_eq!(result, r#"{"random numbers":[]}"#);
    }

    #[test]
    fn test_range_errors() {
        let mut rng = StdRng::seed_from_u64(7);
        let err = generate(&mut rng, &params(5, 1, 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        let err = generate(&mut rng, &params(1, 5, -1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }
}
