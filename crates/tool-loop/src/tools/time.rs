use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tool_loop_core::tool::{Error as ToolError, Tool, ToolResult};

#[derive(Deserialize, JsonSchema)]
pub struct CurrentTimeParameters {
    #[schemars(
        description = "An IANA timezone name for the location, e.g. `Europe/Paris`."
    )]
    location: String,
}

/// Tells the current wall-clock time of a timezone.
pub struct CurrentTimeTool {
    parameter_schema: Value,
    clock: fn() -> DateTime<Utc>,
}

impl CurrentTimeTool {
    /// Creates a new current time tool.
    #[inline]
    pub fn new() -> Self {
        CurrentTimeTool {
            parameter_schema: schema_for!(CurrentTimeParameters).to_value(),
            clock: Utc::now,
        }
    }
}

impl Default for CurrentTimeTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CurrentTimeTool {
    type Input = CurrentTimeParameters;

    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current time in a given location"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: CurrentTimeParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let now = (self.clock)();
        async move { format_time(now, &input.location) }
    }
}

fn format_time(now: DateTime<Utc>, location: &str) -> ToolResult {
    let tz = location.trim().parse::<Tz>().map_err(|_| {
        ToolError::unknown_timezone()
            .with_reason(format!("`{location}` is not a known timezone"))
    })?;
    Ok(now.with_timezone(&tz).format("%I:%M:%S %p").to_string())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tool_loop_core::tool::ErrorKind;

    use super::*;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 17, 4, 5).unwrap()
    }

    #[tokio::test]
    async fn test_time_in_zone() {
        let tool = CurrentTimeTool {
            clock: fixed_clock,
            ..CurrentTimeTool::new()
        };
        let input = CurrentTimeParameters {
            location: "Asia/Tokyo".to_owned(),
        };
        assert_eq!(tool.execute(input).await.unwrap(), "02:04:05 AM");

        let input = CurrentTimeParameters {
            location: "America/New_York".to_owned(),
        };
        assert_eq!(tool.execute(input).await.unwrap(), "12:04:05 PM");
    }

    #[test]
    fn test_unknown_timezone() {
        let err = format_time(fixed_clock(), "Atlantis/Capital").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTimezone);
    }
}
