use std::env;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::path::PathBuf;

use tool_loop_openai_model::{OpenAIConfig, OpenAIConfigBuilder};

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Error raised when the environment holds an unusable configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing(&'static str),
    /// A variable is set to a value that cannot be used.
    Invalid {
        /// Name of the variable.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(name) => {
                write!(f, "{name} environment variable is not set")
            }
            ConfigError::Invalid { name, value } => {
                write!(f, "{name} has an invalid value `{value}`")
            }
        }
    }
}

impl StdError for ConfigError {}

/// Settings read from the environment.
///
/// | variable | meaning |
/// |---|---|
/// | `API_HOST` | `openai` (default), `azure` or `ollama` |
/// | `OPENAI_API_KEY` | API key, required for `openai` |
/// | `OPENAI_BASE_URL` | API base URL |
/// | `OPENAI_MODEL` | model name |
/// | `AZURE_OPENAI_ENDPOINT` | resource URL, required for `azure` |
/// | `AZURE_OPENAI_API_KEY` | API key, required for `azure` |
/// | `AZURE_OPENAI_API_VERSION` | API version, required for `azure` |
/// | `AZURE_OPENAI_DEPLOYMENT_NAME` | deployment, required for `azure` |
/// | `OLLAMA_BASE_URL` | defaults to `http://localhost:11434/v1` |
/// | `OLLAMA_MODEL` | model name, required for `ollama` |
/// | `TOOL_LOOP_STREAMING` | `true` or `false`, defaults to `true` |
/// | `TOOL_LOOP_MAX_ITERATIONS` | iteration limit of a run |
/// | `TOOL_LOOP_STOCK_DATA` | path of the stock CSV dataset |
#[derive(Clone, Debug)]
pub struct Config {
    /// Configuration of the model provider.
    pub openai: OpenAIConfig,
    /// Iteration limit, when overridden.
    pub max_iterations: Option<usize>,
    /// Stock dataset path, when overridden.
    pub stock_data_path: Option<PathBuf>,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let host = var("API_HOST").unwrap_or_else(|| "openai".to_owned());
        let mut builder = match host.trim().to_ascii_lowercase().as_str() {
            "openai" => {
                let mut builder =
                    OpenAIConfigBuilder::with_api_key(required("OPENAI_API_KEY")?);
                if let Some(base_url) = var("OPENAI_BASE_URL") {
                    builder = builder.with_base_url(base_url);
                }
                if let Some(model) = var("OPENAI_MODEL") {
                    builder = builder.with_model(model);
                }
                builder
            }
            "azure" => OpenAIConfigBuilder::with_api_key(required("AZURE_OPENAI_API_KEY")?)
                .with_azure(
                    &required("AZURE_OPENAI_ENDPOINT")?,
                    &required("AZURE_OPENAI_DEPLOYMENT_NAME")?,
                    &required("AZURE_OPENAI_API_VERSION")?,
                ),
            "ollama" => {
                // Ollama ignores the key, but the header must be present.
                OpenAIConfigBuilder::with_api_key("nokeyneeded")
                    .with_base_url(
                        var("OLLAMA_BASE_URL")
                            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_owned()),
                    )
                    .with_model(required("OLLAMA_MODEL")?)
            }
            _ => {
                return Err(ConfigError::Invalid {
                    name: "API_HOST",
                    value: host,
                });
            }
        };
        if let Some(streaming) = var("TOOL_LOOP_STREAMING") {
            builder = builder.with_streaming(parse_bool("TOOL_LOOP_STREAMING", streaming)?);
        }

        let max_iterations = var("TOOL_LOOP_MAX_ITERATIONS")
            .map(|value| {
                value.trim().parse::<usize>().map_err(|_| ConfigError::Invalid {
                    name: "TOOL_LOOP_MAX_ITERATIONS",
                    value,
                })
            })
            .transpose()?;

        Ok(Self {
            openai: builder.build(),
            max_iterations,
            stock_data_path: var("TOOL_LOOP_STOCK_DATA").map(PathBuf::from),
        })
    }
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-1")])).unwrap();
        assert!(config.openai.is_streaming());
        assert_eq!(config.max_iterations, None);
        assert_eq!(config.stock_data_path, None);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("TOOL_LOOP_STREAMING", "off"),
            ("TOOL_LOOP_MAX_ITERATIONS", "4"),
            ("TOOL_LOOP_STOCK_DATA", "/data/stocks.csv"),
        ]))
        .unwrap();
        assert_eq!(config.openai.model(), "gpt-4o");
        assert!(!config.openai.is_streaming());
        assert_eq!(config.max_iterations, Some(4));
        assert_eq!(config.stock_data_path, Some(PathBuf::from("/data/stocks.csv")));
    }

    #[test]
    fn test_config_errors() {
        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));

        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("TOOL_LOOP_MAX_ITERATIONS", "many"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "TOOL_LOOP_MAX_ITERATIONS",
                value: "many".to_owned(),
            }
        );
    }

    #[test]
    fn test_azure_config() {
        let config = Config::from_lookup(lookup(&[
            ("API_HOST", "azure"),
            ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "az-key"),
            ("AZURE_OPENAI_API_VERSION", "2024-06-01"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "gpt4o-prod"),
        ]))
        .unwrap();
        assert!(config.openai.is_azure());
        assert_eq!(config.openai.model(), "gpt4o-prod");

        let err = Config::from_lookup(lookup(&[
            ("API_HOST", "azure"),
            ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "az-key"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "gpt4o-prod"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("AZURE_OPENAI_API_VERSION"));
    }

    #[test]
    fn test_ollama_config() {
        let config = Config::from_lookup(lookup(&[
            ("API_HOST", "ollama"),
            ("OLLAMA_MODEL", "llama3.1"),
        ]))
        .unwrap();
        assert!(!config.openai.is_azure());
        assert_eq!(config.openai.model(), "llama3.1");

        let err = Config::from_lookup(lookup(&[("API_HOST", "bedrock")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "API_HOST",
                value: "bedrock".to_owned(),
            }
        );
    }
}
