use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Number, Value, json};
use tool_loop_core::tool::{Error as ToolError, Tool, ToolResult};

const OPERATORS: [&str; 6] = ["+", "-", "*", "/", "**", "sqrt"];

#[derive(Deserialize, JsonSchema)]
pub struct CalculatorParameters {
    #[schemars(description = "The first operand.")]
    num1: Number,
    #[schemars(description = "The second operand, ignored by `sqrt`.")]
    num2: Number,
    #[schemars(description = "The operation to perform.")]
    operator: String,
}

/// A calculator for basic arithmetic.
///
/// Integer operands keep integer results for `+`, `-`, `*` and `**`, so
/// `2 + 3` gives `5` while `/` and `sqrt` always give a float such as `3.0`.
pub struct CalculatorTool {
    parameter_schema: Value,
}

impl CalculatorTool {
    /// Creates a new calculator tool.
    pub fn new() -> Self {
        let mut parameter_schema = schema_for!(CalculatorParameters).to_value();
        parameter_schema["properties"]["operator"]["enum"] = json!(OPERATORS);
        CalculatorTool { parameter_schema }
    }
}

impl Default for CalculatorTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculatorTool {
    type Input = CalculatorParameters;

    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "A simple calculator used to perform basic arithmetic operations"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: CalculatorParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            let result = calculate(&input.num1, &input.num2, &input.operator)?;
            debug!(
                "calculated {} {} {} = {result}",
                input.num1, input.operator, input.num2
            );
            Ok(result)
        }
    }
}

fn calculate(num1: &Number, num2: &Number, operator: &str) -> ToolResult {
    let ints = num1.as_i64().zip(num2.as_i64());
    let (a, b) = (to_f64(num1)?, to_f64(num2)?);

    match operator {
        "+" | "-" | "*" => {
            let exact = ints.and_then(|(x, y)| match operator {
                "+" => x.checked_add(y),
                "-" => x.checked_sub(y),
                _ => x.checked_mul(y),
            });
            match exact {
                Some(v) => Ok(v.to_string()),
                None => float_result(match operator {
                    "+" => a + b,
                    "-" => a - b,
                    _ => a * b,
                }),
            }
        }
        "/" => {
            if b == 0.0 {
                return Err(ToolError::division_by_zero()
                    .with_reason(format!("cannot divide {num1} by zero")));
            }
            float_result(a / b)
        }
        "**" => {
            let exact = ints.and_then(|(x, y)| {
                u32::try_from(y).ok().and_then(|y| x.checked_pow(y))
            });
            match exact {
                Some(v) => Ok(v.to_string()),
                None if a == 0.0 && b < 0.0 => Err(ToolError::division_by_zero()
                    .with_reason("zero cannot be raised to a negative power")),
                None => float_result(a.powf(b)),
            }
        }
        "sqrt" => {
            if a < 0.0 {
                return Err(ToolError::range()
                    .with_reason("cannot take the square root of a negative number"));
            }
            float_result(a.sqrt())
        }
        _ => Err(ToolError::unsupported_operator().with_reason(format!(
            "`{operator}` is not one of: {}",
            OPERATORS.join(", ")
        ))),
    }
}

fn to_f64(n: &Number) -> Result<f64, ToolError> {
    n.as_f64().ok_or_else(|| {
        ToolError::invalid_input().with_reason(format!("`{n}` is not a number"))
    })
}

fn float_result(v: f64) -> ToolResult {
    if !v.is_finite() {
        return Err(ToolError::range().with_reason("result is out of range"));
    }
    Ok(format_float(v))
}

/// Formats a float the way it reads in Python, e.g. `3.0` or `0.5`.
fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v:?}")
    }
}
