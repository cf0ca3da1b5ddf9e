use crate::config::LoadExcelConfig;
use crate::error::ServiceError;
use crate::knowledge_base::{fetch_document, KnowledgeBase, ObjectStore};
use crate::response::ApiResponse;
use crate::spreadsheet::{build_ui_schema, Sheet, UiSchema};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Serves the resource spreadsheet as dropdown / checkbox / record JSON.
pub struct ExcelLoader {
    config: LoadExcelConfig,
    knowledge_base: Arc<dyn KnowledgeBase>,
    store: Arc<dyn ObjectStore>,
}

impl ExcelLoader {
    pub fn new(
        config: LoadExcelConfig,
        knowledge_base: Arc<dyn KnowledgeBase>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            knowledge_base,
            store,
        }
    }

    pub async fn load(&self) -> Result<UiSchema, ServiceError> {
        let (location, bytes) = fetch_document(
            self.knowledge_base.as_ref(),
            self.store.as_ref(),
            &self.config.file_name,
            self.config.bucket.as_deref(),
            self.config.number_of_results,
        )
        .await?;

        let layout = &self.config.layout;
        let sheet = Sheet::from_xlsx(bytes, layout.sheet.as_deref(), layout.header_rows)?;
        let schema = build_ui_schema(&sheet, layout);

        info!(
            location = %location,
            layout_version = %layout.version,
            dropdowns = schema.dropdowns.len(),
            checkboxes = schema.checkboxes.len(),
            records = schema.records.len(),
            "Spreadsheet processed"
        );
        Ok(schema)
    }

    pub async fn handle(&self) -> ApiResponse {
        let start = Instant::now();
        info!(file_name = %self.config.file_name, "Loading spreadsheet");

        match self.load().await {
            Ok(schema) => {
                info!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Request completed successfully"
                );
                ApiResponse::ok(&schema)
            }
            Err(e) => {
                error!(error = %e, "Failed to retrieve or process file");
                let status = match e {
                    ServiceError::DocumentNotFound(_) => 404,
                    _ => 500,
                };
                ApiResponse::message(
                    status,
                    &format!("Failed to retrieve or process file: {}", e),
                )
            }
        }
    }
}
