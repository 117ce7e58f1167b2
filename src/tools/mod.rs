//! Tool system: capability descriptors, validation and the registry.

pub mod arguments;
pub mod capability;
pub mod registry;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use capability::{Capability, FunctionTool};
pub use registry::{ToolRegistry, FUNCTION_NOT_FOUND};
pub use types::{ParamType, ParameterBuilder, ToolDescriptor, ToolParameters};
