use crate::config::S3LoggerConfig;
use crate::response::ApiResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

/// The parts of an S3 notification the logger reads. Every other record
/// field (event time, identity, request ids) may be absent.
#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    #[serde(default)]
    s3: Option<S3Entity>,
}

#[derive(Debug, Default, Deserialize)]
struct S3Entity {
    #[serde(default)]
    bucket: Option<Named>,
    #[serde(default)]
    object: Option<ObjectKey>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectKey {
    key: Option<String>,
}

fn first_object(payload: Value) -> Result<(String, String, usize), String> {
    let notification: Notification =
        serde_json::from_value(payload).map_err(|e| format!("invalid S3 notification: {}", e))?;
    let record_count = notification.records.len();

    let entity = notification
        .records
        .into_iter()
        .next()
        .ok_or_else(|| "notification has no records".to_string())?
        .s3
        .unwrap_or_default();
    let bucket = entity
        .bucket
        .and_then(|bucket| bucket.name)
        .ok_or_else(|| "record has no bucket name".to_string())?;
    let key = entity
        .object
        .and_then(|object| object.key)
        .ok_or_else(|| "record has no object key".to_string())?;

    Ok((bucket, key, record_count))
}

/// Acknowledge an upload notification for the knowledge-source bucket.
///
/// Only the first record is checked; S3 delivers one record per object-created
/// notification.
pub fn handle_s3_event(config: &S3LoggerConfig, payload: Value) -> ApiResponse {
    info!(event = %payload, "S3 event received");

    let (bucket, key, record_count) = match first_object(payload) {
        Ok(parts) => parts,
        Err(reason) => {
            error!("Error extracting bucket/key from event: {}", reason);
            return ApiResponse::message(500, &format!("Error processing event: {}", reason));
        }
    };

    if record_count > 1 {
        warn!(record_count, "Notification carries extra records, only the first is checked");
    }

    if bucket == config.expected_bucket {
        info!(bucket = %bucket, key = %key, "File uploaded to knowledge bucket");
        ApiResponse::message(
            200,
            &format!("Successfully processed file {} from bucket {}", key, bucket),
        )
    } else {
        warn!(bucket = %bucket, key = %key, "Unexpected bucket");
        ApiResponse::message(400, &format!("Unexpected bucket: {}", bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> S3LoggerConfig {
        S3LoggerConfig {
            expected_bucket: "kb-bucket".to_string(),
        }
    }

    fn put_event(bucket: &str, key: &str) -> Value {
        json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "awsRegion": "us-east-1",
                "eventTime": "2024-10-01T12:00:00.000Z",
                "eventName": "ObjectCreated:Put",
                "userIdentity": {"principalId": "EXAMPLE"},
                "requestParameters": {"sourceIPAddress": "127.0.0.1"},
                "responseElements": {
                    "x-amz-request-id": "EXAMPLE123456789",
                    "x-amz-id-2": "EXAMPLE123/abcdefghijklmnopqrstuvwxyz"
                },
                "s3": {
                    "s3SchemaVersion": "1.0",
                    "configurationId": "testConfigRule",
                    "bucket": {
                        "name": bucket,
                        "ownerIdentity": {"principalId": "EXAMPLE"},
                        "arn": format!("arn:aws:s3:::{}", bucket)
                    },
                    "object": {
                        "key": key,
                        "size": 1024,
                        "eTag": "0123456789abcdef0123456789abcdef",
                        "sequencer": "0A1B2C3D4E5F678901"
                    }
                }
            }]
        })
    }

    #[test]
    fn test_expected_bucket_is_acknowledged() {
        let response = handle_s3_event(&config(), put_event("kb-bucket", "docs/guide.pdf"));
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body_json().unwrap(),
            json!("Successfully processed file docs/guide.pdf from bucket kb-bucket")
        );
    }

    #[test]
    fn test_unexpected_bucket_is_rejected() {
        let response = handle_s3_event(&config(), put_event("other-bucket", "a.txt"));
        assert_eq!(response.status_code, 400);
        assert_eq!(
            response.body_json().unwrap(),
            json!("Unexpected bucket: other-bucket")
        );
    }

    #[test]
    fn test_event_without_records_is_an_error() {
        let response = handle_s3_event(&config(), json!({"Records": []}));
        assert_eq!(response.status_code, 500);
        let body = response.body_json().unwrap();
        assert!(body
            .as_str()
            .unwrap()
            .starts_with("Error processing event: "));
    }

    #[test]
    fn test_non_s3_payload_is_an_error() {
        let response = handle_s3_event(&config(), json!({"detail": "not an s3 event"}));
        assert_eq!(response.status_code, 500);

        let response = handle_s3_event(&config(), json!({"Records": "nope"}));
        assert_eq!(response.status_code, 500);
    }

    #[test]
    fn test_minimal_record_is_enough() {
        let event = json!({"Records": [{"s3": {"bucket": {"name": "kb-bucket"}, "object": {"key": "k"}}}]});
        let response = handle_s3_event(&config(), event);
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body_json().unwrap(),
            json!("Successfully processed file k from bucket kb-bucket")
        );
    }

    #[test]
    fn test_record_without_key_is_an_error() {
        let event = json!({"Records": [{"s3": {"bucket": {"name": "kb-bucket"}, "object": {}}}]});
        let response = handle_s3_event(&config(), event);
        assert_eq!(response.status_code, 500);
        assert_eq!(
            response.body_json().unwrap(),
            json!("Error processing event: record has no object key")
        );

        let event = json!({"Records": [{"eventName": "ObjectCreated:Put"}]});
        let response = handle_s3_event(&config(), event);
        assert_eq!(
            response.body_json().unwrap(),
            json!("Error processing event: record has no bucket name")
        );
    }
}
