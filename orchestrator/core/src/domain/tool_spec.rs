// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Specification Types
//!
//! Declarative description of the tools embedded in a container image. An
//! image ships a spec file (`/src/tool.yml`) with a top-level `tools:` map and
//! optionally a `CITATION.cff`. Both are parsed here; probing images for them
//! lives in `crate::application::spec_probe`.
//!
//! Tools are addressed by slug: `<image-reference>::<tool-name>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Path of the spec file inside a tool image.
pub const SPEC_FILE_PATH: &str = "/src/tool.yml";
/// Path of the citation file inside a tool image.
pub const CITATION_FILE_PATH: &str = "/src/CITATION.cff";

const SLUG_SEPARATOR: &str = "::";

pub fn tool_slug(image: &str, tool_name: &str) -> String {
    format!("{}{}{}", image, SLUG_SEPARATOR, tool_name)
}

/// Split a slug into `(image, tool)`. Returns `None` for bare tool names.
pub fn split_slug(slug: &str) -> Option<(&str, &str)> {
    slug.rsplit_once(SLUG_SEPARATOR)
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Spec content is empty")]
    Empty,
    #[error("Invalid tool spec: {0}")]
    Invalid(String),
    #[error("Invalid citation file: {0}")]
    InvalidCitation(String),
}

/// Parsed contents of an image's spec file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecFile {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
}

impl SpecFile {
    /// Parse spec content. JSON is accepted as well since it is valid YAML.
    pub fn parse(content: &str) -> Result<Self, SpecError> {
        if content.trim().is_empty() {
            return Err(SpecError::Empty);
        }
        let mut spec: SpecFile =
            serde_yaml::from_str(content).map_err(|e| SpecError::Invalid(e.to_string()))?;
        if spec.tools.is_empty() {
            return Err(SpecError::Invalid("no tools declared".to_string()));
        }
        for (name, tool) in spec.tools.iter_mut() {
            tool.name = name.clone();
        }
        Ok(spec)
    }

    /// Tools of this image, slug-qualified and with the citation attached.
    pub fn qualified_tools(&self, image: &str, citation: Option<&Citation>) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| {
                let mut tool = tool.clone();
                tool.id = tool_slug(image, &tool.name);
                if let Some(citation) = citation {
                    tool.citation = Some(citation.clone());
                }
                tool
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Slug, assigned once the image reference is known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub data: BTreeMap<String, DataSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<Citation>,
}

impl ToolSpec {
    pub fn matches_filter(&self, needle_lowercase: &str) -> bool {
        self.name.to_lowercase().contains(needle_lowercase)
            || self.title.to_lowercase().contains(needle_lowercase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Enum,
    Datetime,
    Date,
    Time,
    File,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Float => "float",
            ParameterType::Boolean => "boolean",
            ParameterType::Enum => "enum",
            ParameterType::Datetime => "datetime",
            ParameterType::Date => "date",
            ParameterType::Time => "time",
            ParameterType::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values for `enum` parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParameterSpec {
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extensions {
    One(String),
    Many(Vec<String>),
}

impl Extensions {
    pub fn to_list(&self) -> Vec<String> {
        let raw = match self {
            Extensions::One(ext) => vec![ext.clone()],
            Extensions::Many(exts) => exts.clone(),
        };
        raw.into_iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<Extensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Subset of the Citation File Format carried alongside a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cff_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_released: Option<String>,
    #[serde(default)]
    pub authors: Vec<CitationAuthor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CitationAuthor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_names: Option<String>,
    /// Entity authors (organisations) use `name` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

impl Citation {
    pub fn parse(content: &str) -> Result<Self, SpecError> {
        if content.trim().is_empty() {
            return Err(SpecError::Empty);
        }
        let citation: Citation = serde_yaml::from_str(content)
            .map_err(|e| SpecError::InvalidCitation(e.to_string()))?;
        if citation.title.trim().is_empty() {
            return Err(SpecError::InvalidCitation("missing title".to_string()));
        }
        Ok(citation)
    }
}

/// Raw payload submitted for a run, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// dataset name -> host path
    #[serde(default)]
    pub datasets: BTreeMap<String, String>,
}
