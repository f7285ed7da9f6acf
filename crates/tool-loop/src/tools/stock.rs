use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::task::spawn_blocking;
use tool_loop_core::tool::{Error as ToolError, Tool, ToolResult};

/// The market indices present in the stock dataset.
pub const AVAILABLE_INDICES: [&str; 37] = [
    "Natural_Gas_Price", "Natural_Gas_Vol.", "Crude_oil_Price", "Crude_oil_Vol.",
    "Copper_Price", "Copper_Vol.", "Bitcoin_Price", "Bitcoin_Vol.", "Platinum_Price",
    "Platinum_Vol.", "Ethereum_Price", "Ethereum_Vol.", "S&P_500_Price", "Nasdaq_100_Price",
    "Nasdaq_100_Vol.", "Apple_Price", "Apple_Vol.", "Tesla_Price", "Tesla_Vol.",
    "Microsoft_Price", "Microsoft_Vol.", "Silver_Price", "Silver_Vol.", "Google_Price",
    "Google_Vol.", "Nvidia_Price", "Nvidia_Vol.", "Berkshire_Price", "Berkshire_Vol.",
    "Netflix_Price", "Netflix_Vol.", "Amazon_Price", "Amazon_Vol.", "Meta_Price",
    "Meta_Vol.", "Gold_Price", "Gold_Vol.",
];

const DATE_COLUMN: &str = "Date";

#[derive(Deserialize, JsonSchema)]
pub struct StockMarketDataParameters {
    #[schemars(description = "The market index to read.")]
    index: String,
    #[schemars(description = "The start date for the data (in YYYY-MM-DD format). Optional.")]
    start_date: Option<String>,
    #[schemars(description = "The end date for the data (in YYYY-MM-DD format). Optional.")]
    end_date: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct CalculateDifferenceParameters {
    #[schemars(description = "The market index to compare.")]
    index: String,
    #[schemars(description = "The earlier date (in YYYY-MM-DD format).")]
    date1: String,
    #[schemars(description = "The later date (in YYYY-MM-DD format).")]
    date2: String,
}

fn schema_with_indices(mut schema: Value) -> Value {
    schema["properties"]["index"]["enum"] = json!(AVAILABLE_INDICES.as_slice());
    schema
}

/// Reads daily values of a market index from the stock dataset.
pub struct StockMarketDataTool {
    parameter_schema: Value,
    path: Arc<Path>,
}

impl StockMarketDataTool {
    /// Creates a tool reading the CSV dataset at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path: PathBuf = path.into();
        StockMarketDataTool {
            parameter_schema: schema_with_indices(
                schema_for!(StockMarketDataParameters).to_value(),
            ),
            path: path.into(),
        }
    }
}

impl Tool for StockMarketDataTool {
    type Input = StockMarketDataParameters;

    fn name(&self) -> &str {
        "get_stock_market_data"
    }

    fn description(&self) -> &str {
        "Get the stock market data for a given index and optional date range"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: StockMarketDataParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let path = Arc::clone(&self.path);
        async move {
            check_index(&input.index)?;
            let start = input
                .start_date
                .as_deref()
                .map(|d| parse_date_arg("start_date", d))
                .transpose()?;
            let end = input
                .end_date
                .as_deref()
                .map(|d| parse_date_arg("end_date", d))
                .transpose()?;

            let series = load_series(path, input.index.clone()).await?;
            let data: Map<String, Value> = series
                .into_iter()
                .filter(|(date, _)| start.is_none_or(|s| *date >= s))
                .filter(|(date, _)| end.is_none_or(|e| *date <= e))
                .map(|(date, value)| (date.format("%Y-%m-%d").to_string(), value))
                .collect();
            if data.is_empty() {
                return Err(ToolError::no_data_in_range().with_reason(format!(
                    "no data available for index `{}` in the given date range",
                    input.index
                )));
            }
            serde_json::to_string_pretty(&data).map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })
        }
    }
}

/// Computes how much a market index changed between two dates.
pub struct CalculateDifferenceTool {
    parameter_schema: Value,
    path: Arc<Path>,
}

impl CalculateDifferenceTool {
    /// Creates a tool reading the CSV dataset at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path: PathBuf = path.into();
        CalculateDifferenceTool {
            parameter_schema: schema_with_indices(
                schema_for!(CalculateDifferenceParameters).to_value(),
            ),
            path: path.into(),
        }
    }
}

impl Tool for CalculateDifferenceTool {
    type Input = CalculateDifferenceParameters;

    fn name(&self) -> &str {
        "calculate_difference"
    }

    fn description(&self) -> &str {
        "Calculates the change of a market index from `date1` to `date2`"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: CalculateDifferenceParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let path = Arc::clone(&self.path);
        async move {
            check_index(&input.index)?;
            let date1 = parse_date_arg("date1", &input.date1)?;
            let date2 = parse_date_arg("date2", &input.date2)?;

            let series = load_series(path, input.index.clone()).await?;
            let value_at = |date: NaiveDate| {
                let value = series.get(&date).ok_or_else(|| {
                    ToolError::no_data_in_range().with_reason(format!(
                        "no data for `{}` on {date}",
                        input.index
                    ))
                })?;
                value.as_f64().ok_or_else(|| {
                    ToolError::execution_error()
                        .with_reason(format!("value on {date} is not a number"))
                })
            };
            let difference = value_at(date2)? - value_at(date1)?;
            Ok(json!({ "difference": difference }).to_string())
        }
    }
}

fn check_index(index: &str) -> Result<(), ToolError> {
    if AVAILABLE_INDICES.contains(&index) {
        return Ok(());
    }
    warn!("unknown market index: {index}");
    Err(ToolError::unknown_index().with_reason(format!(
        "Invalid index. Please choose from available indices: {}",
        AVAILABLE_INDICES.join(", ")
    )))
}

fn parse_date_arg(name: &str, value: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ToolError::invalid_input()
            .with_reason(format!("Invalid date format for `{name}`. Please use YYYY-MM-DD."))
    })
}

/// Parses a date cell of the dataset, which is day-first.
fn parse_date_cell(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    ["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d"]
        .into_iter()
        .find_map(|format| NaiveDate::parse_from_str(cell, format).ok())
}

/// Parses a value cell. Numbers may use `,` as thousands separator, and
/// anything else is kept as text. Empty cells have no value.
fn parse_value_cell(cell: &str) -> Option<Value> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    match cell.replace(',', "").parse::<f64>() {
        Ok(number) if number.is_finite() => Some(json!(number)),
        _ => Some(Value::String(cell.to_owned())),
    }
}

async fn load_series(
    path: Arc<Path>,
    index: String,
) -> Result<BTreeMap<NaiveDate, Value>, ToolError> {
    spawn_blocking(move || read_series(&path, &index))
        .await
        .map_err(|_| {
            ToolError::execution_error().with_reason("Failed to read stock data")
        })?
}

fn read_series(
    path: &Path,
    index: &str,
) -> Result<BTreeMap<NaiveDate, Value>, ToolError> {
    let csv_error = |err: csv::Error| {
        warn!("failed to read {}: {err}", path.display());
        ToolError::execution_error().with_reason("Error in retrieving stock data.")
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let column = |name: &str| {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            ToolError::execution_error()
                .with_reason(format!("the stock data has no `{name}` column"))
        })
    };
    let date_column = column(DATE_COLUMN)?;
    let value_column = column(index)?;

    let mut series = BTreeMap::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let Some(date) = record.get(date_column).and_then(parse_date_cell) else {
            continue;
        };
        if let Some(value) = record.get(value_column).and_then(parse_value_cell) {
            series.insert(date, value);
        }
    }
    trace!(index, rows = series.len(), "loaded stock series");
    Ok(series)
}
