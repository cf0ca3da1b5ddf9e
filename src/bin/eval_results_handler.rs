use aws_config::BehaviorVersion;
use chatbot_functions::config::EvalResultsConfig;
use chatbot_functions::evaluations::{DynamoEvaluationStore, EvaluationsHandler};
use chatbot_functions::response::ApiResponse;
use chatbot_functions::telemetry::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = EvalResultsConfig::from_env()?;
    info!(
        summaries_table = %config.summaries_table,
        results_table = %config.results_table,
        "Initializing evaluation results handler"
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let store = DynamoEvaluationStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        &config.summaries_table,
        &config.results_table,
    );
    let handler = Arc::new(EvaluationsHandler::new(store, config.default_limit));

    info!("Handler initialized, starting Lambda runtime");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let handler = handler.clone();
        async move { Ok::<ApiResponse, Error>(handler.handle(event.payload).await) }
    }))
    .await
}
