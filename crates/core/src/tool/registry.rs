use std::collections::{BTreeSet, HashMap};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use serde_json::{Map, Value};
use tool_loop_model::{ModelTool, ToolCallRequest};

use super::{ErasedTool, Tool, ToolResult};
use crate::DispatchError;

/// The kind of [`RegistryError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryErrorKind {
    /// A tool has an empty name.
    EmptyName,
    /// Two tools share the same name.
    DuplicateName,
    /// The parameter schema is not a usable object schema.
    InvalidSchema,
}

/// An error raised while building a [`ToolRegistry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryError {
    kind: RegistryErrorKind,
    tool: String,
    reason: String,
}

impl RegistryError {
    fn new(
        kind: RegistryErrorKind,
        tool: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            tool: tool.to_owned(),
            reason: reason.into(),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> RegistryErrorKind {
        self.kind
    }

    /// Returns the name of the offending tool.
    #[inline]
    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tool `{}`: {}", self.tool, self.reason)
    }
}

impl StdError for RegistryError {}

/// Parameter names extracted from a schema at registration.
struct Parameters {
    declared: BTreeSet<String>,
    required: Vec<String>,
}

impl Parameters {
    fn from_schema(name: &str, schema: &Value) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| {
            RegistryError::new(RegistryErrorKind::InvalidSchema, name, reason)
        };
        let Some(schema) = schema.as_object() else {
            return Err(invalid("schema is not a JSON object"));
        };
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(invalid("schema type must be `object`"));
        }

        let declared = match schema.get("properties") {
            None => BTreeSet::new(),
            Some(Value::Object(properties)) => properties.keys().cloned().collect(),
            Some(_) => return Err(invalid("`properties` is not an object")),
        };
        let required = match schema.get("required") {
            None => vec![],
            Some(Value::Array(required)) => required
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| invalid("`required` has a non-string entry"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(invalid("`required` is not an array")),
        };
        if let Some(missing) = required.iter().find(|r| !declared.contains(*r)) {
            return Err(invalid(&format!(
                "required parameter `{missing}` is not declared"
            )));
        }
        Ok(Self { declared, required })
    }
}

struct Entry {
    tool: Arc<ErasedTool>,
    parameters: Parameters,
}

/// The dispatch table of a run: tools keyed by their names.
///
/// A registry is validated once when it is built and immutable after
/// that, so it can be shared by concurrent runs.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    declarations: Vec<ModelTool>,
}

impl ToolRegistry {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Returns the tool declarations in registration order.
    #[inline]
    pub fn declarations(&self) -> &[ModelTool] {
        &self.declarations
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if a tool with the given name is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Looks up the tool of a request and checks its arguments against the
    /// declared parameters.
    ///
    /// Only names are checked: every required parameter must be present,
    /// and no undeclared parameter may appear. Value types are left to the
    /// tool itself.
    pub fn resolve(
        &self,
        req: &ToolCallRequest,
    ) -> Result<ResolvedCall, DispatchError> {
        let Some(entry) = self.index.get(&req.name).map(|&i| &self.entries[i])
        else {
            return Err(DispatchError::UnknownTool {
                name: req.name.clone(),
            });
        };

        let arguments = parse_arguments(&req.arguments).map_err(|reason| {
            DispatchError::InvalidArguments {
                tool: req.name.clone(),
                reason,
            }
        })?;

        let params = &entry.parameters;
        let missing: Vec<_> = params
            .required
            .iter()
            .filter(|name| !arguments.contains_key(*name))
            .cloned()
            .collect();
        let unexpected: Vec<_> = arguments
            .keys()
            .filter(|name| !params.declared.contains(*name))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(DispatchError::ArityMismatch {
                tool: req.name.clone(),
                missing,
                unexpected,
            });
        }

        Ok(ResolvedCall {
            id: req.id.clone(),
            arguments,
            tool: Arc::clone(&entry.tool),
        })
    }
}

impl Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.declarations.iter().map(|d| &d.name))
            .finish()
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    // Some models send nothing at all for tools without parameters.
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got `{other}`")),
        Err(err) => Err(format!("malformed JSON: {err}")),
    }
}

/// [`ToolRegistry`] builder.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<ErasedTool>>,
}

impl ToolRegistryBuilder {
    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.add_tool(tool);
        self
    }

    /// Registers a tool in place.
    #[inline]
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        self.tools.push(Arc::new(ErasedTool::new(tool)));
    }

    /// Validates all tools and builds the registry.
    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut registry = ToolRegistry::default();
        for tool in self.tools {
            let name = tool.name();
            if name.is_empty() {
                return Err(RegistryError::new(
                    RegistryErrorKind::EmptyName,
                    name,
                    "tool name is empty",
                ));
            }
            if registry.index.contains_key(name) {
                return Err(RegistryError::new(
                    RegistryErrorKind::DuplicateName,
                    name,
                    "name is already registered",
                ));
            }
            let parameters =
                Parameters::from_schema(name, tool.parameter_schema())?;

            trace!("registered tool: {name}");
            registry
                .index
                .insert(name.to_owned(), registry.entries.len());
            registry.declarations.push(ModelTool {
                name: name.to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            });
            registry.entries.push(Entry { tool, parameters });
        }
        Ok(registry)
    }
}

/// A tool request that passed resolution and is ready to run.
pub struct ResolvedCall {
    id: String,
    arguments: Map<String, Value>,
    tool: Arc<ErasedTool>,
}

impl ResolvedCall {
    /// Returns the id of the originating request.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the name of the tool.
    #[inline]
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    /// Returns the parsed arguments.
    #[inline]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Runs the tool.
    pub fn execute(&self) -> impl Future<Output = ToolResult> + Send + 'static {
        self.tool.execute(self.arguments.clone())
    }
}

impl Debug for ResolvedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCall")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("arguments", &self.arguments)
            .finish()
    }
}
