use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use tool_loop_core::tool::{Error as ToolError, Tool, ToolResult};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// The Open-Meteo endpoints used by the weather tools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeatherEndpoints {
    /// URL of the forecast API, which reports current conditions.
    pub forecast: String,
    /// URL of the historical archive API.
    pub archive: String,
}

impl WeatherEndpoints {
    /// Serves both APIs from one host, at `/v1/forecast` and `/v1/archive`.
    pub fn from_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            forecast: format!("{base_url}/v1/forecast"),
            archive: format!("{base_url}/v1/archive"),
        }
    }
}

impl Default for WeatherEndpoints {
    fn default() -> Self {
        Self {
            forecast: "https://api.open-meteo.com/v1/forecast".to_owned(),
            archive: "https://archive-api.open-meteo.com/v1/archive".to_owned(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct TemperatureParameters {
    #[schemars(description = "The latitude of the location.")]
    latitude: f64,
    #[schemars(description = "The longitude of the location.")]
    longitude: f64,
}

#[derive(Deserialize, JsonSchema)]
pub struct HistoricalTemperatureParameters {
    #[schemars(description = "The latitude of the location.")]
    latitude: f64,
    #[schemars(description = "The longitude of the location.")]
    longitude: f64,
    #[schemars(
        description = "The start date for the historical data (in YYYY-MM-DD format)."
    )]
    start_date: String,
    #[schemars(
        description = "The end date for the historical data (in YYYY-MM-DD format)."
    )]
    end_date: String,
}

/// Looks up the current temperature at a coordinate.
pub struct TemperatureTool {
    parameter_schema: Value,
    client: Client,
    endpoint: Arc<str>,
}

impl TemperatureTool {
    /// Creates a tool that queries the given endpoints.
    pub fn new(client: Client, endpoints: &WeatherEndpoints) -> Self {
        TemperatureTool {
            parameter_schema: schema_for!(TemperatureParameters).to_value(),
            client,
            endpoint: endpoints.forecast.as_str().into(),
        }
    }
}

impl Tool for TemperatureTool {
    type Input = TemperatureParameters;

    fn name(&self) -> &str {
        "get_temperature"
    }

    fn description(&self) -> &str {
        "Gives the current temperature for a given location."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: TemperatureParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let endpoint = Arc::clone(&self.endpoint);
        async move {
            check_coordinates(input.latitude, input.longitude)?;
            let url = build_url(
                &endpoint,
                &[
                    ("latitude", input.latitude.to_string()),
                    ("longitude", input.longitude.to_string()),
                    ("current_weather", "true".to_owned()),
                ],
            )?;
            let body = fetch_json(&client, url).await?;
            let temperature = body
                .pointer("/current_weather/temperature")
                .filter(|t| t.is_number())
                .ok_or_else(|| {
                    ToolError::upstream_unavailable()
                        .with_reason("the weather service reported no temperature")
                })?;
            Ok(json!({ "temperature": temperature }).to_string())
        }
    }
}

/// Looks up daily minimum and maximum temperatures over a date range.
pub struct HistoricalTemperatureTool {
    parameter_schema: Value,
    client: Client,
    endpoint: Arc<str>,
}

impl HistoricalTemperatureTool {
    /// Creates a tool that queries the given endpoints.
    pub fn new(client: Client, endpoints: &WeatherEndpoints) -> Self {
        HistoricalTemperatureTool {
            parameter_schema: schema_for!(HistoricalTemperatureParameters).to_value(),
            client,
            endpoint: endpoints.archive.as_str().into(),
        }
    }
}

impl Tool for HistoricalTemperatureTool {
    type Input = HistoricalTemperatureParameters;

    fn name(&self) -> &str {
        "get_historical_temperature"
    }

    fn description(&self) -> &str {
        "Fetches the historical temperature data for a given location and date range."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: HistoricalTemperatureParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let endpoint = Arc::clone(&self.endpoint);
        async move {
            check_coordinates(input.latitude, input.longitude)?;
            let start = parse_date("start_date", &input.start_date)?;
            let end = parse_date("end_date", &input.end_date)?;
            if start > end {
                return Err(ToolError::range()
                    .with_reason("`start_date` is after `end_date`"));
            }

            let url = build_url(
                &endpoint,
                &[
                    ("latitude", input.latitude.to_string()),
                    ("longitude", input.longitude.to_string()),
                    ("start_date", start.to_string()),
                    ("end_date", end.to_string()),
                    ("daily", "temperature_2m_max,temperature_2m_min".to_owned()),
                    ("timezone", "auto".to_owned()),
                ],
            )?;
            let mut body = fetch_json(&client, url).await?;
            let daily = body
                .get_mut("daily")
                .map(Value::take)
                .unwrap_or_else(|| json!({}));
            Ok(json!({ "temperature_data": daily }).to_string())
        }
    }
}

fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), ToolError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ToolError::range()
            .with_reason(format!("latitude {latitude} is not within [-90, 90]")));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ToolError::range().with_reason(format!(
            "longitude {longitude} is not within [-180, 180]"
        )));
    }
    Ok(())
}

fn parse_date(name: &str, value: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ToolError::invalid_input()
            .with_reason(format!("`{name}` must be a date in YYYY-MM-DD format"))
    })
}

fn build_url(endpoint: &str, params: &[(&str, String)]) -> Result<Url, ToolError> {
    Url::parse_with_params(endpoint, params).map_err(|err| {
        ToolError::upstream_unavailable()
            .with_reason(format!("invalid weather endpoint `{endpoint}`: {err}"))
    })
}

async fn fetch_json(client: &Client, url: Url) -> Result<Value, ToolError> {
    let upstream = |err: reqwest::Error| {
        warn!("weather request failed: {err}");
        ToolError::upstream_unavailable()
            .with_reason("the weather service could not be reached")
    };

    let resp = client
        .get(url)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(upstream)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ToolError::upstream_unavailable()
            .with_reason(format!("the weather service responded with {status}")));
    }
    resp.json::<Value>().await.map_err(upstream)
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use tool_loop_core::tool::ErrorKind;

    use super::*;

    fn endpoints(server: &mockito::Server) -> WeatherEndpoints {
        WeatherEndpoints::from_base_url(&server.url())
    }

    #[tokio::test]
    async fn test_current_temperature() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/forecast")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("latitude".into(), "52.37".into()),
                Matcher::UrlEncoded("longitude".into(), "4.89".into()),
                Matcher::UrlEncoded("current_weather".into(), "true".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"current_weather":{"temperature":12.5,"windspeed":9.0}}"#)
            .create_async()
            .await;

        let tool = TemperatureTool::new(Client::new(), &endpoints(&server));
        let input = TemperatureParameters {
            latitude: 52.37,
            longitude: 4.89,
        };
        assert_eq!(tool.execute(input).await.unwrap(), r#"{"temperature":12.5}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/forecast")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let tool = TemperatureTool::new(Client::new(), &endpoints(&server));
        let input = TemperatureParameters {
            latitude: 0.0,
            longitude: 0.0,
        };
        let err = tool.execute(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let endpoints = WeatherEndpoints::from_base_url("http://127.0.0.1:1");
        let tool = TemperatureTool::new(Client::new(), &endpoints);
        let input = TemperatureParameters {
            latitude: 10.0,
            longitude: 10.0,
        };
        let err = tool.execute(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_coordinates_out_of_range() {
        let tool = TemperatureTool::new(Client::new(), &WeatherEndpoints::default());
        let input = TemperatureParameters {
            latitude: 95.0,
            longitude: 0.0,
        };
        let err = tool.execute(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[tokio::test]
    async fn test_historical_temperature() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/archive")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start_date".into(), "2024-01-01".into()),
                Matcher::UrlEncoded("end_date".into(), "2024-01-02".into()),
                Matcher::UrlEncoded(
                    "daily".into(),
                    "temperature_2m_max,temperature_2m_min".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"daily":{"time":["2024-01-01","2024-01-02"],"temperature_2m_max":[5.1,6.0],"temperature_2m_min":[-1.0,0.2]}}"#,
            )
            .create_async()
            .await;

        let tool = HistoricalTemperatureTool::new(Client::new(), &endpoints(&server));
        let input = HistoricalTemperatureParameters {
            latitude: 40.7,
            longitude: -74.0,
            start_date: "2024-01-01".to_owned(),
            end_date: "2024-01-02".to_owned(),
        };
        let result: Value =
            serde_json::from_str(&tool.execute(input).await.unwrap()).unwrap();
        assert_eq!(
            result["temperature_data"]["temperature_2m_max"],
            json!([5.1, 6.0])
        );
    }

    #[tokio::test]
    async fn test_historical_dates_are_checked() {
        let tool = HistoricalTemperatureTool::new(Client::new(), &WeatherEndpoints::default());
        let input = HistoricalTemperatureParameters {
            latitude: 40.7,
            longitude: -74.0,
            start_date: "01/02/2024".to_owned(),
            end_date: "2024-01-02".to_owned(),
        };
        let err = tool.execute(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let input = HistoricalTemperatureParameters {
            latitude: 40.7,
            longitude: -74.0,
            start_date: "2024-02-01".to_owned(),
            end_date: "2024-01-02".to_owned(),
        };
        let err = tool.execute(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }
}
