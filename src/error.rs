use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("DynamoDB error: {0}")]
    DynamoDb(#[from] aws_sdk_dynamodb::Error),

    #[error("S3 error: {0}")]
    S3(#[from] aws_sdk_s3::Error),

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(#[from] aws_sdk_bedrockagentruntime::Error),

    #[error("Stored item is malformed: {0}")]
    MalformedItem(String),

    #[error("Batch write incomplete: {0}")]
    BatchWriteIncomplete(String),

    #[error("Failed to read object body: {0}")]
    ObjectBody(String),

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("Invalid column layout: {0}")]
    InvalidLayout(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ServiceError {
    /// HTTP status used when the error is returned through an API response.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidRequest(_) => 400,
            ServiceError::DocumentNotFound(_) => 404,
            _ => 500,
        }
    }
}

impl From<calamine::Error> for ServiceError {
    fn from(err: calamine::Error) -> Self {
        ServiceError::Workbook(err.to_string())
    }
}
