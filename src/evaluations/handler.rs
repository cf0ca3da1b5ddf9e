use super::models::{EvaluationResult, EvaluationSummary, PageToken};
use super::store::EvaluationStore;
use crate::error::ServiceError;
use crate::response::ApiResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{error, info};

pub const EVALUATION_ID_REQUIRED: &str =
    "evaluation_id is required for retrieving evaluation results.";
pub const MISSING_ADD_PARAMETERS: &str = "Missing required parameters for adding evaluation.";

/// Body of an evaluation request. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct EvaluationRequest {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub evaluation_id: Option<String>,
    #[serde(default)]
    pub continuation_token: Option<PageToken>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub evaluation_name: Option<String>,
    #[serde(default)]
    pub average_similarity: Option<f64>,
    #[serde(default)]
    pub average_relevance: Option<f64>,
    #[serde(default)]
    pub average_correctness: Option<f64>,
    #[serde(default)]
    pub total_questions: Option<i64>,
    #[serde(default)]
    pub detailed_results: Vec<DetailedResult>,
    #[serde(default)]
    pub test_cases_key: Option<String>,
}

/// One scored question as posted by the evaluation runner.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedResult {
    pub question: String,
    pub expected_response: String,
    pub actual_response: String,
    pub similarity: f64,
    pub relevance: f64,
    pub correctness: f64,
}

/// Accepts an API Gateway proxy event, whose `body` holds the request as a
/// JSON string, or the bare request object.
pub fn parse_request(payload: Value) -> Result<EvaluationRequest, ServiceError> {
    let data = match payload {
        Value::Object(mut event) if event.contains_key("body") => match event.remove("body") {
            Some(Value::String(body)) => serde_json::from_str(&body).map_err(|e| {
                ServiceError::InvalidRequest(format!("Request body is not valid JSON: {}", e))
            })?,
            Some(Value::Null) | None => json!({}),
            Some(body) => body,
        },
        other => other,
    };

    serde_json::from_value(data)
        .map_err(|e| ServiceError::InvalidRequest(format!("Invalid request: {}", e)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct EvaluationsHandler<S> {
    store: S,
    default_limit: i32,
}

impl<S: EvaluationStore> EvaluationsHandler<S> {
    pub fn new(store: S, default_limit: i32) -> Self {
        Self {
            store,
            default_limit,
        }
    }

    pub async fn handle(&self, payload: Value) -> ApiResponse {
        let start = Instant::now();

        let request = match parse_request(payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                return ApiResponse::from_error(&e);
            }
        };

        let operation = request.operation.clone().unwrap_or_default();
        info!(operation = %operation, "Processing evaluation request");

        match self.dispatch(request).await {
            Ok(response) => {
                info!(
                    operation = %operation,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Request completed successfully"
                );
                response
            }
            Err(e) => {
                error!(operation = %operation, error = %e, "Evaluation request failed");
                ApiResponse::from_error(&e)
            }
        }
    }

    fn limit(&self, request: &EvaluationRequest) -> Result<i32, ServiceError> {
        match request.limit {
            None => Ok(self.default_limit),
            Some(limit) if limit > 0 && limit <= i64::from(i32::MAX) => Ok(limit as i32),
            Some(limit) => Err(ServiceError::InvalidRequest(format!(
                "limit must be a positive integer, got {}",
                limit
            ))),
        }
    }

    async fn dispatch(&self, request: EvaluationRequest) -> Result<ApiResponse, ServiceError> {
        match request.operation.as_deref() {
            Some("get_evaluation_summaries") => {
                let limit = self.limit(&request)?;
                let page = self
                    .store
                    .list_summaries(limit, request.continuation_token)
                    .await?;
                info!(
                    count = page.items.len(),
                    has_more = page.next_page_token.is_some(),
                    "Listed evaluation summaries"
                );
                Ok(ApiResponse::ok(&page))
            }
            Some("get_evaluation_results") => {
                let limit = self.limit(&request)?;
                let evaluation_id = non_empty(request.evaluation_id)
                    .ok_or_else(|| ServiceError::InvalidRequest(EVALUATION_ID_REQUIRED.to_string()))?;

                let mut page = self
                    .store
                    .list_results(&evaluation_id, limit, request.continuation_token)
                    .await?;
                page.items
                    .sort_by(|a, b| a.question_order().cmp(&b.question_order()));

                info!(
                    evaluation_id = %evaluation_id,
                    count = page.items.len(),
                    has_more = page.next_page_token.is_some(),
                    "Listed evaluation results"
                );
                Ok(ApiResponse::ok(&page))
            }
            Some("add_evaluation") => self.add_evaluation(request).await,
            other => Err(ServiceError::InvalidRequest(format!(
                "Operation not found/allowed! Operation Sent: {}",
                other.unwrap_or("None")
            ))),
        }
    }

    async fn add_evaluation(&self, request: EvaluationRequest) -> Result<ApiResponse, ServiceError> {
        let missing = || ServiceError::InvalidRequest(MISSING_ADD_PARAMETERS.to_string());

        let evaluation_id = non_empty(request.evaluation_id).ok_or_else(missing)?;
        let test_cases_key = non_empty(request.test_cases_key).ok_or_else(missing)?;
        let (Some(similarity), Some(relevance), Some(correctness)) = (
            request.average_similarity,
            request.average_relevance,
            request.average_correctness,
        ) else {
            return Err(missing());
        };
        if request.detailed_results.is_empty() {
            return Err(missing());
        }

        let scores_finite = [similarity, relevance, correctness]
            .into_iter()
            .chain(
                request
                    .detailed_results
                    .iter()
                    .flat_map(|r| [r.similarity, r.relevance, r.correctness]),
            )
            .all(f64::is_finite);
        if !scores_finite {
            return Err(ServiceError::InvalidRequest(
                "Scores must be finite numbers.".to_string(),
            ));
        }

        let total_questions = request
            .total_questions
            .unwrap_or(request.detailed_results.len() as i64);

        let summary = EvaluationSummary {
            evaluation_id: evaluation_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            average_similarity: Some(similarity),
            average_relevance: Some(relevance),
            average_correctness: Some(correctness),
            total_questions: Some(total_questions),
            evaluation_name: non_empty(request.evaluation_name),
            test_cases_key: Some(test_cases_key.clone()),
        };

        let results: Vec<EvaluationResult> = request
            .detailed_results
            .iter()
            .enumerate()
            .map(|(idx, r)| EvaluationResult {
                evaluation_id: evaluation_id.clone(),
                question_id: idx.to_string(),
                question: Some(r.question.clone()),
                expected_response: Some(r.expected_response.clone()),
                actual_response: Some(r.actual_response.clone()),
                similarity: Some(r.similarity),
                relevance: Some(r.relevance),
                correctness: Some(r.correctness),
                test_cases_key: Some(test_cases_key.clone()),
            })
            .collect();

        self.store.put_evaluation(&summary, &results).await?;

        info!(
            evaluation_id = %evaluation_id,
            total_questions,
            "Evaluation added"
        );
        Ok(ApiResponse::ok(
            &json!({"message": "Evaluation added successfully"}),
        ))
    }
}
