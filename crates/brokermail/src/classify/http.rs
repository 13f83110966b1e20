//! Classifier reached over HTTP with a JSON body.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::config::ClassifierConfig;
use crate::error::ConfigError;
use crate::resilience::DependencyError;
use crate::secrets::resolve_secret_optional;

use super::{Classification, ClassificationRequest, Classifier};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 200;

pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpClassifier {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        let api_key = resolve_secret_optional(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env_var.as_deref(),
        )
        .map_err(|e| ConfigError::invalid("classifier.api_key", e.to_string()))?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::invalid("classifier", format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, DependencyError> {
        debug!("Classifying message '{}'", request.message_id);

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<Classification>()
            .await
            .map_err(|e| DependencyError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> DependencyError {
    if err.is_timeout() {
        DependencyError::Timeout(err.to_string())
    } else if err.is_decode() {
        DependencyError::InvalidResponse(err.to_string())
    } else if err.is_builder() {
        DependencyError::Rejected(err.to_string())
    } else {
        DependencyError::Network(err.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> DependencyError {
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DependencyError::Rejected(format!("{}: {}", status, message))
        }
        _ => DependencyError::http(status.as_u16(), message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> ClassifierConfig {
        ClassifierConfig {
            endpoint: endpoint.to_string(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: None,
            timeout_secs: 2,
            auto_archive_confidence: 0.9,
        }
    }

    #[test]
    fn test_status_mapping() {
        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "try later");
        assert_eq!(err, DependencyError::http(503, "try later"));
        assert!(err.is_retryable());

        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.is_retryable());

        let err = status_error(StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(err, DependencyError::Rejected(_)));
        assert!(!err.is_retryable());

        let err = status_error(StatusCode::UNPROCESSABLE_ENTITY, "missing subject");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(1000);
        match status_error(StatusCode::BAD_GATEWAY, &body) {
            DependencyError::Http { message, .. } => assert_eq!(message.len(), MAX_ERROR_BODY),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let request = ClassificationRequest {
            message_id: "m1".to_string(),
            subject: Some("Trade confirmation".to_string()),
            from: None,
            text: Some("Bought 10 VTI".to_string()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["subject"], "Trade confirmation");
        assert!(json["from"].is_null());
    }

    #[tokio::test]
    async fn test_refused_connection_is_retryable() {
        // Nothing listens on port 1.
        let classifier = HttpClassifier::from_config(&config("http://127.0.0.1:1/classify")).unwrap();
        let request = ClassificationRequest {
            message_id: "m1".to_string(),
            subject: None,
            from: None,
            text: None,
        };
        let err = classifier.classify(&request).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {:?}", err);
    }
}
