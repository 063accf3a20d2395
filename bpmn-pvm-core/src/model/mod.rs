//! Process models: authoring DTOs, their YAML and BPMN XML readers,
//! structural validation and compilation into a [`ProcessDefinition`].

pub mod dto;
mod compile;
mod validate;
mod xml;
mod yaml;

pub use compile::compile_model;
pub use dto::{FlowDto, NodeDto, ProcessModelDto};
pub use validate::{validate_model, ValidationError};
pub use xml::parse_bpmn_xml;
pub use yaml::parse_model_yaml;

use crate::bpmn::HandlerRegistry;
use crate::definition::ProcessDefinition;
use crate::deployment::checksum;
use crate::error::DefinitionError;
use crate::store::ModelFormat;

pub fn parse_model(format: ModelFormat, source: &str) -> Result<ProcessModelDto, DefinitionError> {
    match format {
        ModelFormat::Yaml => parse_model_yaml(source),
        ModelFormat::BpmnXml => parse_bpmn_xml(source),
    }
}

/// Parse, validate and compile `source`, stamping the definition with the
/// checksum of the source.
pub fn compile_source(
    format: ModelFormat,
    source: &str,
    handlers: &HandlerRegistry,
) -> Result<ProcessDefinition, DefinitionError> {
    let dto = parse_model(format, source)?;
    Ok(compile_model(&dto, handlers)?.with_checksum(checksum(source)))
}
