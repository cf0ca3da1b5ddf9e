use chatbot_functions::config::S3LoggerConfig;
use chatbot_functions::response::ApiResponse;
use chatbot_functions::s3_events::handle_s3_event;
use chatbot_functions::telemetry::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Arc::new(S3LoggerConfig::from_env()?);
    info!(bucket = %config.expected_bucket, "Starting S3 event logger");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let config = config.clone();
        async move { Ok::<ApiResponse, Error>(handle_s3_event(&config, event.payload)) }
    }))
    .await
}
