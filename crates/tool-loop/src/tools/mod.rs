//! The built-in tools offered to the model.

mod calculator;
mod random;
mod stock;
mod time;
mod weather;

pub use calculator::CalculatorTool;
pub use random::RandomNumbersTool;
pub use stock::{AVAILABLE_INDICES, CalculateDifferenceTool, StockMarketDataTool};
pub use time::CurrentTimeTool;
pub use weather::{HistoricalTemperatureTool, TemperatureTool, WeatherEndpoints};
