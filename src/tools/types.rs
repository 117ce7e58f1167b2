//! Tool descriptors: name, description and parameter schema.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

const NO_DESCRIPTION: &str = "No description provided";

/// Primitive parameter types a tool may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

/// JSON Schema object describing a tool's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    pub schema: serde_json::Value,
}

impl ToolParameters {
    /// A schema with no parameters.
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Builder: create an object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Names of the declared parameters.
    pub fn names(&self) -> Vec<&str> {
        self.schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Builder for constructing tool parameter schemas.
#[derive(Debug, Clone)]
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    /// Add a parameter of the given primitive type.
    pub fn param(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        let description = if description.trim().is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            description
        };
        self.properties.insert(
            name.clone(),
            serde_json::json!({
                "type": kind.to_string(),
                "description": description,
            }),
        );
        if required && !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.param(name, ParamType::String, description, required)
    }

    pub fn integer(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.param(name, ParamType::Integer, description, required)
    }

    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.param(name, ParamType::Number, description, required)
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.param(name, ParamType::Boolean, description, required)
    }

    /// Fill parameter descriptions from `:param name: text` lines in `doc`.
    ///
    /// Only parameters already declared are touched; a doc line wins over the
    /// description given at declaration.
    pub fn describe_from_doc(mut self, doc: &str) -> Self {
        static PARAM_LINE: OnceLock<Option<Regex>> = OnceLock::new();
        let Some(pattern) = PARAM_LINE
            .get_or_init(|| Regex::new(r":param\s+(\w+):\s*(.*)").ok())
            .as_ref()
        else {
            return self;
        };

        for caps in pattern.captures_iter(doc) {
            let (name, text) = (&caps[1], caps[2].trim());
            if let Some(prop) = self.properties.get_mut(name).and_then(|p| p.as_object_mut()) {
                prop.insert("description".into(), text.into());
            }
        }
        self
    }

    /// Build into [`ToolParameters`].
    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

/// Statically declared description of a callable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl ToolDescriptor {
    /// A descriptor with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::empty(),
        }
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }
}
