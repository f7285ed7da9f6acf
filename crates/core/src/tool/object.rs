use std::pin::Pin;

use serde_json::{Map, Value};
use tracing::Instrument;

use super::{Error, Tool, ToolResult};

pub(crate) type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
type InvokeFn = Box<dyn Fn(Map<String, Value>) -> ToolFuture + Send + Sync>;

/// A registered tool with its input type erased.
pub(crate) struct ErasedTool {
    name: String,
    description: String,
    schema: Value,
    invoke: InvokeFn,
}

impl ErasedTool {
    pub fn new<T: Tool>(tool: T) -> Self {
        let name = tool.name().to_owned();
        let description = tool.description().to_owned();
        let schema = tool.parameter_schema().clone();
        let span_name = name.clone();
        let invoke: InvokeFn = Box::new(move |arguments| {
            match decode_input::<T>(arguments) {
                Ok(input) => {
                    let span = debug_span!("tool execute", tool = %span_name);
                    Box::pin(tool.execute(input).instrument(span))
                }
                Err(err) => Box::pin(std::future::ready(Err(err))),
            }
        });
        Self {
            name,
            description,
            schema,
            invoke,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    pub fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    #[inline]
    pub fn execute(&self, arguments: Map<String, Value>) -> ToolFuture {
        (self.invoke)(arguments)
    }
}

/// Names are already checked against the schema, but values may still
/// have the wrong types. Those come back as a tool error the model can
/// react to.
fn decode_input<T: Tool>(arguments: Map<String, Value>) -> Result<T::Input, Error> {
    serde_json::from_value(Value::Object(arguments)).map_err(|err| {
        trace!("argument decoding failed: {err}");
        Error::invalid_input().with_reason(err.to_string())
    })
}
