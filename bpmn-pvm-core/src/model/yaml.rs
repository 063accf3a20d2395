use super::dto::ProcessModelDto;
use crate::error::DefinitionError;

/// Parse a YAML process model.
///
/// Validation is not performed here; [`compile_model`](super::compile_model)
/// validates before building the definition.
pub fn parse_model_yaml(source: &str) -> Result<ProcessModelDto, DefinitionError> {
    serde_yaml::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))
}
