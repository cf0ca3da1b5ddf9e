use aws_config::BehaviorVersion;
use chatbot_functions::config::LoadExcelConfig;
use chatbot_functions::knowledge_base::{BedrockKnowledgeBase, S3ObjectStore};
use chatbot_functions::load_excel::ExcelLoader;
use chatbot_functions::response::ApiResponse;
use chatbot_functions::telemetry::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = LoadExcelConfig::from_env()?;
    info!(
        knowledge_base_id = %config.knowledge_base_id,
        file_name = %config.file_name,
        layout_version = %config.layout.version,
        fallback_bucket = ?config.bucket,
        "Initializing spreadsheet loader"
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let knowledge_base = Arc::new(BedrockKnowledgeBase::new(
        aws_sdk_bedrockagentruntime::Client::new(&aws_config),
        &config.knowledge_base_id,
    ));
    let store = Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config)));
    let loader = Arc::new(ExcelLoader::new(config, knowledge_base, store));

    info!("Loader initialized, starting Lambda runtime");

    lambda_runtime::run(service_fn(move |_event: LambdaEvent<Value>| {
        let loader = loader.clone();
        async move { Ok::<ApiResponse, Error>(loader.handle().await) }
    }))
    .await
}
