//! Paged access to stored LLM evaluation runs.

pub mod handler;
pub mod models;
pub mod store;

pub use self::handler::{parse_request, EvaluationRequest, EvaluationsHandler};
pub use self::models::{EvaluationResult, EvaluationSummary, Page, PageToken};
pub use self::store::{DynamoEvaluationStore, EvaluationStore};
