//! Environment configuration for each function.
//!
//! Every config has a `from_env()` used by the binaries and a `from_lookup()`
//! that takes the variable source as a closure, so tests never have to touch
//! the process environment.

use crate::error::ServiceError;
use crate::spreadsheet::layout::ColumnLayout;
use std::str::FromStr;

pub const DEFAULT_PAGE_LIMIT: i32 = 10;
pub const DEFAULT_EXCEL_FILE_NAME: &str = "EOED-Master_1.xlsx";
pub const DEFAULT_KB_NUMBER_OF_RESULTS: i32 = 5;

fn required<F>(lookup: &F, name: &str) -> Result<String, ServiceError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ServiceError::InvalidConfiguration(format!(
            "{} environment variable not set",
            name
        ))),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ServiceError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
{
    match optional(lookup, name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ServiceError::InvalidConfiguration(format!(
                "{} must be a positive integer, got '{}'",
                name, raw
            ))),
        },
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[derive(Debug, Clone)]
pub struct S3LoggerConfig {
    /// Knowledge-source bucket whose uploads are acknowledged.
    pub expected_bucket: String,
}

impl S3LoggerConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            expected_bucket: required(&lookup, "BUCKET")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EvalResultsConfig {
    pub summaries_table: String,
    pub results_table: String,
    pub default_limit: i32,
}

impl EvalResultsConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            summaries_table: required(&lookup, "EVALUATION_SUMMARIES_TABLE")?,
            results_table: required(&lookup, "EVALUATION_RESULTS_TABLE")?,
            default_limit: positive(&lookup, "DEFAULT_PAGE_LIMIT", DEFAULT_PAGE_LIMIT)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoadExcelConfig {
    pub knowledge_base_id: String,
    /// Bucket listed when the knowledge base does not surface the file.
    pub bucket: Option<String>,
    pub file_name: String,
    pub number_of_results: i32,
    pub layout: ColumnLayout,
}

impl LoadExcelConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let layout = match optional(&lookup, "SPREADSHEET_LAYOUT") {
            Some(raw) => ColumnLayout::from_json(&raw).map_err(|e| {
                ServiceError::InvalidConfiguration(format!("SPREADSHEET_LAYOUT: {}", e))
            })?,
            None => ColumnLayout::default(),
        };

        Ok(Self {
            knowledge_base_id: required(&lookup, "KB_ID")?,
            bucket: optional(&lookup, "BUCKET"),
            file_name: optional(&lookup, "EXCEL_FILE_NAME")
                .unwrap_or_else(|| DEFAULT_EXCEL_FILE_NAME.to_string()),
            number_of_results: positive(
                &lookup,
                "KB_NUMBER_OF_RESULTS",
                DEFAULT_KB_NUMBER_OF_RESULTS,
            )?,
            layout,
        })
    }
}
