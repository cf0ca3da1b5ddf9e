use crate::error::ServiceError;
use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::types::{
    KnowledgeBaseQuery, KnowledgeBaseRetrievalConfiguration,
    KnowledgeBaseVectorSearchConfiguration,
};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Location of an object, parsed from an `s3://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    pub fn parse(uri: &str) -> Result<Self, ServiceError> {
        let rest = uri.strip_prefix("s3://").ok_or_else(|| {
            ServiceError::InvalidRequest(format!("Invalid S3 URI format: {}", uri))
        })?;

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(ServiceError::InvalidRequest(format!(
                "S3 URI has no object key: {}",
                uri
            ))),
        }
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Semantic search over the indexed knowledge base.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// S3 URIs of the top `number_of_results` source documents for `query`.
    async fn retrieve_source_uris(
        &self,
        query: &str,
        number_of_results: i32,
    ) -> Result<Vec<String>, ServiceError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in the bucket, following continuation tokens.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ServiceError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ServiceError>;
}

pub struct BedrockKnowledgeBase {
    client: aws_sdk_bedrockagentruntime::Client,
    knowledge_base_id: String,
}

impl BedrockKnowledgeBase {
    pub fn new(client: aws_sdk_bedrockagentruntime::Client, knowledge_base_id: &str) -> Self {
        Self {
            client,
            knowledge_base_id: knowledge_base_id.to_string(),
        }
    }
}

/// Text query and vector-search settings for a `Retrieve` call.
fn retrieval_request(
    query: &str,
    number_of_results: i32,
) -> Result<(KnowledgeBaseQuery, KnowledgeBaseRetrievalConfiguration), ServiceError> {
    let retrieval_query = KnowledgeBaseQuery::builder().text(query).build();

    let retrieval_config = KnowledgeBaseRetrievalConfiguration::builder()
        .vector_search_configuration(
            KnowledgeBaseVectorSearchConfiguration::builder()
                .number_of_results(number_of_results)
                .build(),
        )
        .build();

    Ok((retrieval_query, retrieval_config))
}

#[async_trait]
impl KnowledgeBase for BedrockKnowledgeBase {
    async fn retrieve_source_uris(
        &self,
        query: &str,
        number_of_results: i32,
    ) -> Result<Vec<String>, ServiceError> {
        info!(
            knowledge_base_id = %self.knowledge_base_id,
            query = %query,
            number_of_results,
            "Querying knowledge base"
        );

        let (retrieval_query, retrieval_config) = retrieval_request(query, number_of_results)?;

        let output = self
            .client
            .retrieve()
            .knowledge_base_id(&self.knowledge_base_id)
            .retrieval_query(retrieval_query)
            .retrieval_configuration(retrieval_config)
            .send()
            .await
            .map_err(|e| ServiceError::KnowledgeBase(e.into()))?;

        let uris: Vec<String> = output
            .retrieval_results()
            .iter()
            .filter_map(|result| result.location())
            .filter_map(|location| location.s3_location())
            .filter_map(|s3| s3.uri())
            .map(str::to_string)
            .collect();

        debug!(uris = ?uris, "Knowledge base returned source documents");
        Ok(uris)
    }
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ServiceError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| ServiceError::S3(e.into()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(str::to_string),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket = %bucket, count = keys.len(), "Listed bucket");
        Ok(keys)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ServiceError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ServiceError::S3(e.into()))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| ServiceError::ObjectBody(e.to_string()))?;

        Ok(data.into_bytes().to_vec())
    }
}

fn search_query(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
}

fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Find `file_name` through the knowledge base, falling back to listing
/// `fallback_bucket` when retrieval does not surface it.
pub async fn locate_document(
    knowledge_base: &dyn KnowledgeBase,
    store: &dyn ObjectStore,
    file_name: &str,
    fallback_bucket: Option<&str>,
    number_of_results: i32,
) -> Result<S3Uri, ServiceError> {
    let query = search_query(file_name);

    let retrieval_error = match knowledge_base
        .retrieve_source_uris(query, number_of_results)
        .await
    {
        Ok(uris) => {
            if let Some(uri) = uris.iter().find(|uri| uri.contains(file_name)) {
                info!(uri = %uri, "Found document in knowledge base");
                return S3Uri::parse(uri);
            }
            None
        }
        Err(e) => {
            warn!(error = %e, "Knowledge base retrieval failed");
            Some(e)
        }
    };

    let Some(bucket) = fallback_bucket else {
        return Err(retrieval_error.unwrap_or_else(|| {
            ServiceError::DocumentNotFound(format!("{} not found in knowledge base", file_name))
        }));
    };

    info!(bucket = %bucket, file_name = %file_name, "Falling back to bucket listing");
    let keys = store.list_keys(bucket).await?;
    keys.into_iter()
        .find(|key| file_name_of(key) == file_name)
        .map(|key| S3Uri {
            bucket: bucket.to_string(),
            key,
        })
        .ok_or_else(|| {
            ServiceError::DocumentNotFound(format!(
                "{} not found in knowledge base or bucket {}",
                file_name, bucket
            ))
        })
}

/// Locate `file_name` and download it into memory.
pub async fn fetch_document(
    knowledge_base: &dyn KnowledgeBase,
    store: &dyn ObjectStore,
    file_name: &str,
    fallback_bucket: Option<&str>,
    number_of_results: i32,
) -> Result<(S3Uri, Vec<u8>), ServiceError> {
    let location = locate_document(
        knowledge_base,
        store,
        file_name,
        fallback_bucket,
        number_of_results,
    )
    .await?;

    let bytes = store.get_object(&location.bucket, &location.key).await?;
    info!(location = %location, size = bytes.len(), "Downloaded document");
    Ok((location, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_retrieval_request_carries_query_and_result_count() {
        let (query, config) = retrieval_request("EOED-Master_1", 7).unwrap();
        assert!(format!("{:?}", query).contains("\"EOED-Master_1\""));
        assert!(format!("{:?}", config).contains("number_of_results: Some(7)"));
    }

    struct FakeKnowledgeBase {
        uris: Result<Vec<String>, String>,
        queries: Mutex<Vec<(String, i32)>>,
    }

    impl FakeKnowledgeBase {
        fn returning(uris: &[&str]) -> Self {
            Self {
                uris: Ok(uris.iter().map(|s| s.to_string()).collect()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                uris: Err(message.to_string()),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KnowledgeBase for FakeKnowledgeBase {
        async fn retrieve_source_uris(
            &self,
            query: &str,
            number_of_results: i32,
        ) -> Result<Vec<String>, ServiceError> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), number_of_results));
            self.uris
                .clone()
                .map_err(|m| ServiceError::InvalidConfiguration(m))
        }
    }

    #[derive(Default)]
    struct FakeStore {
        objects: HashMap<(String, String), Vec<u8>>,
    }

    impl FakeStore {
        fn with(mut self, bucket: &str, key: &str, body: &[u8]) -> Self {
            self.objects
                .insert((bucket.to_string(), key.to_string()), body.to_vec());
            self
        }
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ServiceError> {
            let mut keys: Vec<String> = self
                .objects
                .keys()
                .filter(|(b, _)| b == bucket)
                .map(|(_, k)| k.clone())
                .collect();
            keys.sort();
            Ok(keys)
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ServiceError> {
            self.objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| ServiceError::DocumentNotFound(key.to_string()))
        }
    }

    #[test]
    fn test_parse_s3_uri() {
        let uri = S3Uri::parse("s3://kb-bucket/docs/EOED-Master_1.xlsx").unwrap();
        assert_eq!(uri.bucket, "kb-bucket");
        assert_eq!(uri.key, "docs/EOED-Master_1.xlsx");
        assert_eq!(uri.to_string(), "s3://kb-bucket/docs/EOED-Master_1.xlsx");
    }

    #[test]
    fn test_parse_s3_uri_rejects_invalid() {
        assert!(S3Uri::parse("https://kb-bucket/a.xlsx").is_err());
        assert!(S3Uri::parse("s3://kb-bucket").is_err());
        assert!(S3Uri::parse("s3://kb-bucket/").is_err());
    }

    #[test]
    fn test_search_query_strips_extension() {
        assert_eq!(search_query("EOED-Master_1.xlsx"), "EOED-Master_1");
        assert_eq!(search_query("README"), "README");
    }

    #[tokio::test]
    async fn test_locate_prefers_knowledge_base_match() {
        let kb = FakeKnowledgeBase::returning(&[
            "s3://kb-bucket/other.pdf",
            "s3://kb-bucket/sheets/EOED-Master_1.xlsx",
        ]);
        let store = FakeStore::default();

        let uri = locate_document(&kb, &store, "EOED-Master_1.xlsx", Some("kb-bucket"), 5)
            .await
            .unwrap();

        assert_eq!(uri.key, "sheets/EOED-Master_1.xlsx");
        assert_eq!(
            kb.queries.lock().unwrap().as_slice(),
            &[("EOED-Master_1".to_string(), 5)]
        );
    }

    #[tokio::test]
    async fn test_locate_falls_back_to_listing() {
        let kb = FakeKnowledgeBase::returning(&["s3://kb-bucket/other.pdf"]);
        let store = FakeStore::default()
            .with("kb-bucket", "archive/EOED-Master_1.xlsx.bak", b"old")
            .with("kb-bucket", "current/EOED-Master_1.xlsx", b"new");

        let uri = locate_document(&kb, &store, "EOED-Master_1.xlsx", Some("kb-bucket"), 5)
            .await
            .unwrap();

        assert_eq!(uri.bucket, "kb-bucket");
        assert_eq!(uri.key, "current/EOED-Master_1.xlsx");
    }

    #[tokio::test]
    async fn test_locate_falls_back_when_retrieval_fails() {
        let kb = FakeKnowledgeBase::failing("throttled");
        let store = FakeStore::default().with("kb-bucket", "EOED-Master_1.xlsx", b"data");

        let uri = locate_document(&kb, &store, "EOED-Master_1.xlsx", Some("kb-bucket"), 5)
            .await
            .unwrap();
        assert_eq!(uri.key, "EOED-Master_1.xlsx");
    }

    #[tokio::test]
    async fn test_locate_without_fallback_reports_not_found() {
        let kb = FakeKnowledgeBase::returning(&[]);
        let store = FakeStore::default();

        let err = locate_document(&kb, &store, "EOED-Master_1.xlsx", None, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_locate_without_fallback_keeps_retrieval_error() {
        let kb = FakeKnowledgeBase::failing("access denied");
        let store = FakeStore::default();

        let err = locate_document(&kb, &store, "EOED-Master_1.xlsx", None, 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access denied"));
    }

    #[tokio::test]
    async fn test_fetch_downloads_located_object() {
        let kb = FakeKnowledgeBase::returning(&["s3://kb-bucket/EOED-Master_1.xlsx"]);
        let store = FakeStore::default().with("kb-bucket", "EOED-Master_1.xlsx", b"workbook");

        let (uri, bytes) = fetch_document(&kb, &store, "EOED-Master_1.xlsx", None, 5)
            .await
            .unwrap();
        assert_eq!(uri.key, "EOED-Master_1.xlsx");
        assert_eq!(bytes, b"workbook".to_vec());
    }
}
