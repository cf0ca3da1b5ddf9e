use crate::error::ServiceError;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

pub type Item = HashMap<String, AttributeValue>;

/// Last-evaluated key as handed to the caller, echoed back verbatim.
pub type PageToken = Map<String, Value>;

/// Partition shared by every summary row so they can be queried in order.
pub const SUMMARY_PARTITION: &str = "Evaluation";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    #[serde(rename = "Items")]
    pub items: Vec<T>,
    #[serde(rename = "NextPageToken")]
    pub next_page_token: Option<PageToken>,
}

/// One row per evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    #[serde(rename = "EvaluationId")]
    pub evaluation_id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub average_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub average_relevance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub average_correctness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_questions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evaluation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub test_cases_key: Option<String>,
}

/// Scores for a single question of an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(rename = "EvaluationId")]
    pub evaluation_id: String,
    #[serde(rename = "QuestionId")]
    pub question_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actual_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relevance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correctness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub test_cases_key: Option<String>,
}

fn string_attr(item: &Item, name: &str) -> Option<String> {
    match item.get(name) {
        Some(AttributeValue::S(s)) => Some(s.clone()),
        Some(AttributeValue::N(n)) => Some(n.clone()),
        _ => None,
    }
}

fn required_string(item: &Item, name: &str) -> Result<String, ServiceError> {
    string_attr(item, name).ok_or_else(|| {
        ServiceError::MalformedItem(format!("missing attribute {}", name))
    })
}

fn number_attr(item: &Item, name: &str) -> Option<f64> {
    match item.get(name) {
        Some(AttributeValue::N(n)) => n.parse().ok(),
        _ => None,
    }
}

fn integer_attr(item: &Item, name: &str) -> Option<i64> {
    match item.get(name) {
        Some(AttributeValue::N(n)) => n
            .parse::<i64>()
            .ok()
            .or_else(|| n.parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

fn put_string(item: &mut Item, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        item.insert(name.to_string(), AttributeValue::S(v.clone()));
    }
}

fn put_number<T: ToString>(item: &mut Item, name: &str, value: &Option<T>) {
    if let Some(v) = value {
        item.insert(name.to_string(), AttributeValue::N(v.to_string()));
    }
}

impl EvaluationSummary {
    pub fn from_item(item: &Item) -> Result<Self, ServiceError> {
        Ok(Self {
            evaluation_id: required_string(item, "EvaluationId")?,
            timestamp: required_string(item, "Timestamp")?,
            average_similarity: number_attr(item, "average_similarity"),
            average_relevance: number_attr(item, "average_relevance"),
            average_correctness: number_attr(item, "average_correctness"),
            total_questions: integer_attr(item, "total_questions"),
            evaluation_name: string_attr(item, "evaluation_name"),
            test_cases_key: string_attr(item, "test_cases_key"),
        })
    }

    /// Stored form, including the shared partition key. Absent fields are
    /// left out rather than written as nulls.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(
            "PartitionKey".to_string(),
            AttributeValue::S(SUMMARY_PARTITION.to_string()),
        );
        item.insert(
            "EvaluationId".to_string(),
            AttributeValue::S(self.evaluation_id.clone()),
        );
        item.insert(
            "Timestamp".to_string(),
            AttributeValue::S(self.timestamp.clone()),
        );
        put_number(&mut item, "average_similarity", &self.average_similarity);
        put_number(&mut item, "average_relevance", &self.average_relevance);
        put_number(&mut item, "average_correctness", &self.average_correctness);
        put_number(&mut item, "total_questions", &self.total_questions);
        put_string(&mut item, "evaluation_name", &self.evaluation_name);
        put_string(&mut item, "test_cases_key", &self.test_cases_key);
        item
    }
}

impl EvaluationResult {
    pub fn from_item(item: &Item) -> Result<Self, ServiceError> {
        Ok(Self {
            evaluation_id: required_string(item, "EvaluationId")?,
            question_id: required_string(item, "QuestionId")?,
            question: string_attr(item, "question"),
            expected_response: string_attr(item, "expected_response"),
            actual_response: string_attr(item, "actual_response"),
            similarity: number_attr(item, "similarity"),
            relevance: number_attr(item, "relevance"),
            correctness: number_attr(item, "correctness"),
            test_cases_key: string_attr(item, "test_cases_key"),
        })
    }

    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(
            "EvaluationId".to_string(),
            AttributeValue::S(self.evaluation_id.clone()),
        );
        item.insert(
            "QuestionId".to_string(),
            AttributeValue::S(self.question_id.clone()),
        );
        put_string(&mut item, "question", &self.question);
        put_string(&mut item, "expected_response", &self.expected_response);
        put_string(&mut item, "actual_response", &self.actual_response);
        put_number(&mut item, "similarity", &self.similarity);
        put_number(&mut item, "relevance", &self.relevance);
        put_number(&mut item, "correctness", &self.correctness);
        put_string(&mut item, "test_cases_key", &self.test_cases_key);
        item
    }

    /// Ordering key: numeric question ids ascending, anything else after.
    pub fn question_order(&self) -> (bool, u64, &str) {
        match self.question_id.parse::<u64>() {
            Ok(n) => (false, n, self.question_id.as_str()),
            Err(_) => (true, 0, self.question_id.as_str()),
        }
    }
}

/// Render a storage key as a JSON continuation token.
pub fn key_to_token(key: &Item) -> PageToken {
    key.iter()
        .map(|(name, value)| {
            let json = match value {
                AttributeValue::S(s) => Value::String(s.clone()),
                AttributeValue::N(n) => n
                    .parse::<i64>()
                    .map(Value::from)
                    .ok()
                    .or_else(|| {
                        n.parse::<f64>()
                            .ok()
                            .and_then(Number::from_f64)
                            .map(Value::Number)
                    })
                    .unwrap_or_else(|| Value::String(n.clone())),
                AttributeValue::Bool(b) => Value::Bool(*b),
                _ => Value::Null,
            };
            (name.clone(), json)
        })
        .collect()
}

/// Turn a continuation token supplied by a caller back into a storage key.
pub fn token_to_key(token: &PageToken) -> Result<Item, ServiceError> {
    if token.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "continuation_token must not be empty".to_string(),
        ));
    }

    token
        .iter()
        .map(|(name, value)| {
            let attr = match value {
                Value::String(s) => AttributeValue::S(s.clone()),
                Value::Number(n) => AttributeValue::N(n.to_string()),
                Value::Bool(b) => AttributeValue::Bool(*b),
                _ => {
                    return Err(ServiceError::InvalidRequest(format!(
                        "continuation_token attribute {} has an unsupported type",
                        name
                    )))
                }
            };
            Ok((name.clone(), attr))
        })
        .collect()
}
