// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Input Validation
//!
//! Checks a raw `ToolInput` against a `ToolSpec` and normalizes the accepted
//! parameters into typed `ParameterValue`s. Pure and synchronous; dataset
//! paths are checked by name and extension only, never touched on disk.
//!
//! Errors are field-addressable (`parameters.<name>`, `data.<name>`) so that
//! adapters can hand them to API consumers verbatim.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::domain::run::{IN_MOUNT, INPUTS_FILE};
use crate::domain::tool_spec::{DataSpec, ParameterSpec, ParameterType, ToolInput, ToolSpec};

/// A parameter value after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ParameterValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorCode {
    MissingParameter,
    UnknownParameter,
    TypeMismatch,
    NotInEnum,
    OutOfRange,
    InvalidFormat,
    MissingDataset,
    UnknownDataset,
    InvalidExtension,
    EmptyPath,
    StagingConflict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: ValidationErrorCode,
    pub message: String,
}

/// Every problem found in one payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn for_field(&self, field: &str) -> Vec<&FieldError> {
        self.0.iter().filter(|e| e.field == field).collect()
    }

    fn push(&mut self, field: String, code: ValidationErrorCode, message: impl Into<String>) {
        self.0.push(FieldError { field, code, message: message.into() });
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| format!("{}: {}", e.field, e.message)).collect();
        f.write_str(&parts.join("; "))
    }
}

/// Parameters and datasets that passed validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatedInput {
    pub parameters: BTreeMap<String, ParameterValue>,
    pub datasets: BTreeMap<String, String>,
}

pub fn validate_inputs(spec: &ToolSpec, input: &ToolInput) -> Result<ValidatedInput, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let mut validated = ValidatedInput::default();

    for (name, param) in &spec.parameters {
        let field = format!("parameters.{}", name);
        match input.parameters.get(name) {
            None | Some(Value::Null) => {
                if param.is_required() {
                    errors.push(field, ValidationErrorCode::MissingParameter, "required parameter is missing");
                }
            }
            Some(raw) => match normalize_parameter(param, raw) {
                Ok(value) => {
                    validated.parameters.insert(name.clone(), value);
                }
                Err((code, message)) => errors.push(field, code, message),
            },
        }
    }
    for name in input.parameters.keys() {
        if !spec.parameters.contains_key(name) {
            errors.push(
                format!("parameters.{}", name),
                ValidationErrorCode::UnknownParameter,
                format!("tool '{}' does not declare this parameter", spec.name),
            );
        }
    }

    for (name, data) in &spec.data {
        let field = format!("data.{}", name);
        match input.datasets.get(name) {
            None => {
                if !data.optional {
                    errors.push(field, ValidationErrorCode::MissingDataset, "required dataset is missing");
                }
            }
            Some(path) => match check_dataset(data, path) {
                Ok(()) => {
                    validated.datasets.insert(name.clone(), path.clone());
                }
                Err((code, message)) => errors.push(field, code, message),
            },
        }
    }
    for name in input.datasets.keys() {
        if !spec.data.contains_key(name) {
            errors.push(
                format!("data.{}", name),
                ValidationErrorCode::UnknownDataset,
                format!("tool '{}' does not declare this dataset", spec.name),
            );
        }
    }

    check_staging(&validated.datasets, &mut errors);

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(errors)
    }
}

type FieldFailure = (ValidationErrorCode, String);

fn normalize_parameter(spec: &ParameterSpec, raw: &Value) -> Result<ParameterValue, FieldFailure> {
    if spec.array {
        let items = raw.as_array().ok_or_else(|| {
            (
                ValidationErrorCode::TypeMismatch,
                format!("expected an array of {}", spec.param_type.as_str()),
            )
        })?;
        return items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                normalize_scalar(spec, item).map_err(|(code, msg)| (code, format!("item {}: {}", idx, msg)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ParameterValue::List);
    }
    normalize_scalar(spec, raw)
}

fn normalize_scalar(spec: &ParameterSpec, raw: &Value) -> Result<ParameterValue, FieldFailure> {
    let mismatch = || {
        (
            ValidationErrorCode::TypeMismatch,
            format!("expected {}, got {}", spec.param_type.as_str(), json_kind(raw)),
        )
    };

    match spec.param_type {
        ParameterType::Boolean => raw.as_bool().map(ParameterValue::Boolean).ok_or_else(mismatch),
        ParameterType::Integer => {
            let value = match raw {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && fits_i64(*f)).map(|f| f as i64)),
                _ => None,
            }
            .ok_or_else(mismatch)?;
            check_range(spec, value as f64)?;
            Ok(ParameterValue::Integer(value))
        }
        ParameterType::Float => {
            let value = raw.as_f64().ok_or_else(mismatch)?;
            check_range(spec, value)?;
            Ok(ParameterValue::Float(value))
        }
        ParameterType::Enum => {
            let value = raw.as_str().ok_or_else(mismatch)?;
            if spec.values.iter().any(|allowed| allowed == value) {
                Ok(ParameterValue::String(value.to_string()))
            } else {
                Err((
                    ValidationErrorCode::NotInEnum,
                    format!("'{}' is not one of [{}]", value, spec.values.join(", ")),
                ))
            }
        }
        ParameterType::Datetime | ParameterType::Date | ParameterType::Time => {
            let value = raw.as_str().ok_or_else(mismatch)?;
            if temporal_matches(spec.param_type, value) {
                Ok(ParameterValue::String(value.to_string()))
            } else {
                Err((
                    ValidationErrorCode::InvalidFormat,
                    format!("'{}' is not a valid {}", value, spec.param_type.as_str()),
                ))
            }
        }
        ParameterType::String | ParameterType::File => {
            raw.as_str().map(|s| ParameterValue::String(s.to_string())).ok_or_else(mismatch)
        }
    }
}

fn fits_i64(value: f64) -> bool {
    (i64::MIN as f64..i64::MAX as f64).contains(&value)
}

fn check_range(spec: &ParameterSpec, value: f64) -> Result<(), FieldFailure> {
    if let Some(min) = spec.min {
        if value < min {
            return Err((ValidationErrorCode::OutOfRange, format!("{} is below the minimum {}", value, min)));
        }
    }
    if let Some(max) = spec.max {
        if value > max {
            return Err((ValidationErrorCode::OutOfRange, format!("{} is above the maximum {}", value, max)));
        }
    }
    Ok(())
}

fn temporal_matches(kind: ParameterType, value: &str) -> bool {
    match kind {
        ParameterType::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        ParameterType::Time => {
            NaiveTime::parse_from_str(value, "%H:%M:%S").is_ok()
                || NaiveTime::parse_from_str(value, "%H:%M").is_ok()
        }
        _ => {
            DateTime::parse_from_rfc3339(value).is_ok()
                || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
                || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
        }
    }
}

fn check_dataset(spec: &DataSpec, path: &str) -> Result<(), FieldFailure> {
    if path.trim().is_empty() {
        return Err((ValidationErrorCode::EmptyPath, "dataset path is empty".to_string()));
    }
    if let Some(extensions) = &spec.extension {
        let allowed = extensions.to_list();
        let actual = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !allowed.is_empty() && !allowed.contains(&actual) {
            return Err((
                ValidationErrorCode::InvalidExtension,
                format!("expected one of [{}], got '{}'", allowed.join(", "), actual),
            ));
        }
    }
    Ok(())
}

/// Datasets are staged flat into the input mount by basename, next to
/// `inputs.json`; two datasets must never land on the same file.
fn check_staging(datasets: &BTreeMap<String, String>, errors: &mut ValidationErrors) {
    let mut staged: BTreeMap<String, &str> = BTreeMap::new();
    for (name, path) in datasets {
        let Some(basename) = Path::new(path).file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if basename == INPUTS_FILE {
            errors.push(
                format!("data.{}", name),
                ValidationErrorCode::StagingConflict,
                format!("'{}' is reserved in {}", INPUTS_FILE, IN_MOUNT),
            );
        } else if let Some(other) = staged.insert(basename.clone(), name) {
            errors.push(
                format!("data.{}", name),
                ValidationErrorCode::StagingConflict,
                format!("would be staged as {}/{}, same as dataset '{}'", IN_MOUNT, basename, other),
            );
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
