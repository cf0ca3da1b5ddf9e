use super::models::{
    key_to_token, token_to_key, EvaluationResult, EvaluationSummary, Item, Page, PageToken,
    SUMMARY_PARTITION,
};
use crate::error::ServiceError;
use async_trait::async_trait;
use aws_sdk_dynamodb::operation::put_item::builders::PutItemFluentBuilder;
use aws_sdk_dynamodb::operation::query::builders::QueryFluentBuilder;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// DynamoDB accepts at most 25 put requests per BatchWriteItem call.
const BATCH_WRITE_LIMIT: usize = 25;
const MAX_BATCH_ATTEMPTS: u32 = 5;

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Summaries, newest first.
    async fn list_summaries(
        &self,
        limit: i32,
        start: Option<PageToken>,
    ) -> Result<Page<EvaluationSummary>, ServiceError>;

    async fn list_results(
        &self,
        evaluation_id: &str,
        limit: i32,
        start: Option<PageToken>,
    ) -> Result<Page<EvaluationResult>, ServiceError>;

    /// Write a new run: result rows first, then the summary. Fails if a
    /// summary with the same timestamp exists.
    async fn put_evaluation(
        &self,
        summary: &EvaluationSummary,
        results: &[EvaluationResult],
    ) -> Result<(), ServiceError>;
}

/// One DynamoDB write, in the order `put_evaluation` performs them.
#[derive(Debug, Clone, PartialEq)]
enum WriteStep {
    ResultBatch(Vec<WriteRequest>),
    Summary(Item),
}

/// Result rows in batches of [`BATCH_WRITE_LIMIT`], then the summary row.
///
/// The summary goes last: a run only shows up in the listing once every
/// result row is stored, and a failed write leaves no summary behind.
fn write_plan(
    summary: &EvaluationSummary,
    results: &[EvaluationResult],
) -> Result<Vec<WriteStep>, ServiceError> {
    let mut steps = Vec::with_capacity(results.len() / BATCH_WRITE_LIMIT + 2);

    for chunk in results.chunks(BATCH_WRITE_LIMIT) {
        let requests = chunk
            .iter()
            .map(|result| {
                PutRequest::builder()
                    .set_item(Some(result.to_item()))
                    .build()
                    .map(|put| WriteRequest::builder().put_request(put).build())
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServiceError::MalformedItem(e.to_string()))?;
        steps.push(WriteStep::ResultBatch(requests));
    }

    steps.push(WriteStep::Summary(summary.to_item()));
    Ok(steps)
}

/// Decide what follows batch attempt number `attempt`: `None` when nothing
/// is left, the items to resubmit, or an error once attempts are used up.
fn remaining_after(
    unprocessed: Vec<WriteRequest>,
    attempt: u32,
) -> Result<Option<Vec<WriteRequest>>, ServiceError> {
    if unprocessed.is_empty() {
        return Ok(None);
    }
    if attempt >= MAX_BATCH_ATTEMPTS {
        return Err(ServiceError::BatchWriteIncomplete(format!(
            "{} result rows still unprocessed after {} attempts",
            unprocessed.len(),
            attempt
        )));
    }
    Ok(Some(unprocessed))
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(50 * 2u64.pow(attempt))
}

pub struct DynamoEvaluationStore {
    client: Client,
    summaries_table: String,
    results_table: String,
}

impl DynamoEvaluationStore {
    pub fn new(client: Client, summaries_table: &str, results_table: &str) -> Self {
        Self {
            client,
            summaries_table: summaries_table.to_string(),
            results_table: results_table.to_string(),
        }
    }

    fn summaries_query(&self, limit: i32, start_key: Option<Item>) -> QueryFluentBuilder {
        self.client
            .query()
            .table_name(&self.summaries_table)
            .key_condition_expression("#pk = :pk")
            .projection_expression("#eid, #ts, #as, #ar, #ac, #tq, #en, #tk")
            .expression_attribute_names("#pk", "PartitionKey")
            .expression_attribute_names("#eid", "EvaluationId")
            .expression_attribute_names("#ts", "Timestamp")
            .expression_attribute_names("#as", "average_similarity")
            .expression_attribute_names("#ar", "average_relevance")
            .expression_attribute_names("#ac", "average_correctness")
            .expression_attribute_names("#tq", "total_questions")
            .expression_attribute_names("#en", "evaluation_name")
            .expression_attribute_names("#tk", "test_cases_key")
            .expression_attribute_values(":pk", AttributeValue::S(SUMMARY_PARTITION.to_string()))
            .limit(limit)
            .scan_index_forward(false)
            .set_exclusive_start_key(start_key)
    }

    fn results_query(
        &self,
        evaluation_id: &str,
        limit: i32,
        start_key: Option<Item>,
    ) -> QueryFluentBuilder {
        self.client
            .query()
            .table_name(&self.results_table)
            .key_condition_expression("#eid = :eid")
            .expression_attribute_names("#eid", "EvaluationId")
            .expression_attribute_values(":eid", AttributeValue::S(evaluation_id.to_string()))
            .limit(limit)
            .set_exclusive_start_key(start_key)
    }

    /// Summary rows are immutable: the put fails if the timestamp is taken.
    fn summary_put(&self, item: Item) -> PutItemFluentBuilder {
        self.client
            .put_item()
            .table_name(&self.summaries_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#ts)")
            .expression_attribute_names("#ts", "Timestamp")
    }

    async fn write_batch(&self, mut requests: Vec<WriteRequest>) -> Result<(), ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.results_table, requests)
                .send()
                .await
                .map_err(|e| ServiceError::DynamoDb(e.into()))?;

            let unprocessed = output
                .unprocessed_items()
                .and_then(|unprocessed| unprocessed.get(&self.results_table))
                .cloned()
                .unwrap_or_default();

            match remaining_after(unprocessed, attempt)? {
                None => return Ok(()),
                Some(remaining) => {
                    warn!(
                        unprocessed = remaining.len(),
                        attempt, "Retrying unprocessed result rows"
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                    requests = remaining;
                }
            }
        }
    }
}

#[async_trait]
impl EvaluationStore for DynamoEvaluationStore {
    async fn list_summaries(
        &self,
        limit: i32,
        start: Option<PageToken>,
    ) -> Result<Page<EvaluationSummary>, ServiceError> {
        let start_key = start.as_ref().map(token_to_key).transpose()?;

        let output = self
            .summaries_query(limit, start_key)
            .send()
            .await
            .map_err(|e| ServiceError::DynamoDb(e.into()))?;

        let items = output
            .items()
            .iter()
            .map(EvaluationSummary::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = items.len(), "Fetched evaluation summaries");
        Ok(Page {
            items,
            next_page_token: output.last_evaluated_key().map(key_to_token),
        })
    }

    async fn list_results(
        &self,
        evaluation_id: &str,
        limit: i32,
        start: Option<PageToken>,
    ) -> Result<Page<EvaluationResult>, ServiceError> {
        let start_key = start.as_ref().map(token_to_key).transpose()?;

        let output = self
            .results_query(evaluation_id, limit, start_key)
            .send()
            .await
            .map_err(|e| ServiceError::DynamoDb(e.into()))?;

        let items = output
            .items()
            .iter()
            .map(EvaluationResult::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            evaluation_id = %evaluation_id,
            count = items.len(),
            "Fetched evaluation results"
        );
        Ok(Page {
            items,
            next_page_token: output.last_evaluated_key().map(key_to_token),
        })
    }

    async fn put_evaluation(
        &self,
        summary: &EvaluationSummary,
        results: &[EvaluationResult],
    ) -> Result<(), ServiceError> {
        info!(
            evaluation_id = %summary.evaluation_id,
            results = results.len(),
            "Writing evaluation"
        );

        for step in write_plan(summary, results)? {
            match step {
                WriteStep::ResultBatch(requests) => self.write_batch(requests).await?,
                WriteStep::Summary(item) => {
                    self.summary_put(item)
                        .send()
                        .await
                        .map_err(|e| ServiceError::DynamoDb(e.into()))?;
                }
            }
        }

        info!(evaluation_id = %summary.evaluation_id, "Evaluation written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::config::{BehaviorVersion, Region};
    use pretty_assertions::assert_eq;

    fn store() -> DynamoEvaluationStore {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        DynamoEvaluationStore::new(Client::from_conf(config), "summaries", "results")
    }

    fn summary() -> EvaluationSummary {
        EvaluationSummary {
            evaluation_id: "eval-1".to_string(),
            timestamp: "2024-10-01T12:00:00+00:00".to_string(),
            average_similarity: Some(0.8),
            average_relevance: Some(0.7),
            average_correctness: Some(0.9),
            total_questions: Some(26),
            evaluation_name: None,
            test_cases_key: Some("tests.csv".to_string()),
        }
    }

    fn results(count: usize) -> Vec<EvaluationResult> {
        (0..count)
            .map(|idx| EvaluationResult {
                evaluation_id: "eval-1".to_string(),
                question_id: idx.to_string(),
                question: Some(format!("q{}", idx)),
                expected_response: None,
                actual_response: None,
                similarity: Some(0.5),
                relevance: None,
                correctness: None,
                test_cases_key: None,
            })
            .collect()
    }

    fn question_ids(requests: &[WriteRequest]) -> Vec<String> {
        requests
            .iter()
            .filter_map(|r| r.put_request())
            .filter_map(|put| match put.item().get("QuestionId") {
                Some(AttributeValue::S(id)) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_write_plan_batches_results_before_summary() {
        let steps = write_plan(&summary(), &results(26)).unwrap();
        assert_eq!(steps.len(), 3);

        match &steps[0] {
            WriteStep::ResultBatch(requests) => {
                assert_eq!(requests.len(), 25);
                assert_eq!(question_ids(requests).first().map(String::as_str), Some("0"));
            }
            other => panic!("expected a result batch, got {:?}", other),
        }
        match &steps[1] {
            WriteStep::ResultBatch(requests) => {
                assert_eq!(question_ids(requests), vec!["25".to_string()]);
            }
            other => panic!("expected a result batch, got {:?}", other),
        }
        match &steps[2] {
            WriteStep::Summary(item) => {
                assert_eq!(
                    item.get("PartitionKey"),
                    Some(&AttributeValue::S("Evaluation".to_string()))
                );
            }
            other => panic!("expected the summary, got {:?}", other),
        }
    }

    #[test]
    fn test_write_plan_exact_batch_boundary() {
        let steps = write_plan(&summary(), &results(25)).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[0], WriteStep::ResultBatch(r) if r.len() == 25));
        assert!(matches!(steps[1], WriteStep::Summary(_)));
    }

    #[test]
    fn test_remaining_after_resubmits_until_attempts_run_out() {
        let pending = match write_plan(&summary(), &results(3)).unwrap().remove(0) {
            WriteStep::ResultBatch(requests) => requests,
            other => panic!("expected a result batch, got {:?}", other),
        };

        assert_eq!(remaining_after(Vec::new(), 1).unwrap(), None);
        assert_eq!(remaining_after(Vec::new(), MAX_BATCH_ATTEMPTS).unwrap(), None);

        let resubmit = remaining_after(pending.clone(), MAX_BATCH_ATTEMPTS - 1).unwrap();
        assert_eq!(resubmit.map(|r| r.len()), Some(3));

        let err = remaining_after(pending, MAX_BATCH_ATTEMPTS).unwrap_err();
        assert!(matches!(err, ServiceError::BatchWriteIncomplete(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_retry_delay_backs_off() {
        assert_eq!(retry_delay(1), Duration::from_millis(100));
        assert_eq!(retry_delay(2), Duration::from_millis(200));
        assert!(retry_delay(4) > retry_delay(3));
    }

    #[test]
    fn test_summaries_query_newest_first_with_projection() {
        let mut start = Item::new();
        start.insert("PartitionKey".into(), AttributeValue::S("Evaluation".into()));
        start.insert("Timestamp".into(), AttributeValue::S("2024-10-01".into()));

        let store = store();
        let query = store.summaries_query(5, Some(start.clone()));
        let input = query.as_input();

        assert_eq!(input.get_table_name().as_deref(), Some("summaries"));
        assert_eq!(*input.get_scan_index_forward(), Some(false));
        assert_eq!(*input.get_limit(), Some(5));
        assert_eq!(input.get_exclusive_start_key().as_ref(), Some(&start));
        assert_eq!(
            input.get_projection_expression().as_deref(),
            Some("#eid, #ts, #as, #ar, #ac, #tq, #en, #tk")
        );
        let names = input.get_expression_attribute_names().clone().unwrap_or_default();
        assert_eq!(names.get("#pk").map(String::as_str), Some("PartitionKey"));
        assert_eq!(names.get("#tk").map(String::as_str), Some("test_cases_key"));
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn test_results_query_targets_evaluation() {
        let store = store();
        let query = store.results_query("eval-7", 10, None);
        let input = query.as_input();

        assert_eq!(input.get_table_name().as_deref(), Some("results"));
        assert_eq!(*input.get_scan_index_forward(), None);
        assert!(input.get_exclusive_start_key().is_none());
        let values = input.get_expression_attribute_values().clone().unwrap_or_default();
        assert_eq!(values.get(":eid"), Some(&AttributeValue::S("eval-7".into())));
    }

    #[test]
    fn test_summary_put_is_conditional() {
        let store = store();
        let put = store.summary_put(summary().to_item());
        let input = put.as_input();

        assert_eq!(input.get_table_name().as_deref(), Some("summaries"));
        assert_eq!(
            input.get_condition_expression().as_deref(),
            Some("attribute_not_exists(#ts)")
        );
        assert!(input
            .get_item()
            .as_ref()
            .map(|item| item.contains_key("Timestamp"))
            .unwrap_or(false));
    }
}
