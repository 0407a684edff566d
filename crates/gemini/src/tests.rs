// Unit tests for the restoration adapters

#[cfg(test)]
mod driver_tests {
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use reqwest::StatusCode;
    use serde_json::json;
    use timeglow_core::{ProviderError, ProviderOutput, RestorationProvider, RestorationRequest};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::driver::classify_status;
    use crate::GeminiProvider;

    const MODEL: &str = "gemini-test";

    fn request(image: &[u8]) -> RestorationRequest<'_> {
        RestorationRequest {
            image,
            content_type: "image/jpeg",
            instruction: "Remove noise",
            original_ref: "originals/u1/img_1.jpg",
        }
    }

    async fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new("test-key")
            .with_base_url(server.uri())
            .with_model(MODEL)
    }

    fn endpoint() -> String {
        format!("/models/{MODEL}:generateContent")
    }

    #[test]
    fn test_debug_redacts_key() {
        let driver = GeminiProvider::new("secret");
        let debug = format!("{:?}", driver);
        assert!(debug.contains("GeminiProvider"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_api_url() {
        let driver = GeminiProvider::new("k")
            .with_base_url("https://example.test/v1beta/")
            .with_model("m");
        assert_eq!(
            driver.api_url(),
            "https://example.test/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn test_status_classification() {
        let msg = || "x".to_string();
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, msg()),
            ProviderError::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, msg()),
            ProviderError::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, msg()),
            ProviderError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, msg()),
            ProviderError::InvalidInput(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::PAYLOAD_TOO_LARGE, msg()),
            ProviderError::InvalidInput(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, msg()),
            ProviderError::TransientUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, msg()),
            ProviderError::TransientUnavailable(_)
        ));
    }

    #[test]
    fn test_auth_and_missing_model_are_terminal() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            let err = classify_status(status, "x".to_string());
            assert!(matches!(err, ProviderError::InvalidInput(_)), "{status}");
            assert!(!err.is_retryable(), "{status}");
        }
    }

    #[tokio::test]
    async fn test_restored_image_is_decoded() {
        let server = MockServer::start().await;
        let restored = b"restored-bytes".to_vec();

        Mock::given(method("POST"))
            .and(path(endpoint()))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "Remove noise" },
                        { "inlineData": { "mimeType": "image/jpeg", "data": BASE64.encode(b"original") } }
                    ]
                }],
                "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            { "text": "Here is the restored photo." },
                            { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(&restored) } }
                        ]
                    },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = provider(&server)
            .await
            .restore(request(b"original"))
            .await
            .unwrap();

        assert_eq!(
            output,
            ProviderOutput::Restored {
                data: restored,
                content_type: "image/png".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_text_only_response_is_invalid_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "I cannot edit this image." }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .restore(request(b"original"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProviderError::InvalidInput("provider returned no image".to_string())
        );
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_invalid_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [],
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .restore(request(b"original"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidInput(msg) if msg.contains("SAFETY")));
    }

    #[tokio::test]
    async fn test_rate_limit_is_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint()))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "message": "Resource exhausted", "status": "RESOURCE_EXHAUSTED" }
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .restore(request(b"original"))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ProviderError::QuotaExceeded(msg) if msg.contains("RESOURCE_EXHAUSTED")
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejected_api_key_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint()))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .restore(request(b"original"))
            .await
            .unwrap_err();

        assert!(matches!(&err, ProviderError::InvalidInput(msg) if msg.contains("403")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint()))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .restore(request(b"original"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::TransientUnavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoint()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "candidates": [] }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .with_timeout(Duration::from_millis(50))
            .restore(request(b"original"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_empty_image_is_rejected_without_a_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .restore(request(b""))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }
}

#[cfg(test)]
mod fallback_tests {
    use timeglow_core::{ProviderError, ProviderOutput, RestorationProvider, RestorationRequest};

    use crate::{PassthroughProvider, ScriptedProvider};

    fn request() -> RestorationRequest<'static> {
        RestorationRequest {
            image: b"original",
            content_type: "image/png",
            instruction: "Colorize",
            original_ref: "originals/u1/img_1.png",
        }
    }

    #[tokio::test]
    async fn test_passthrough_returns_original_reference() {
        let output = PassthroughProvider::new().restore(request()).await.unwrap();
        assert_eq!(
            output,
            ProviderOutput::Reference("originals/u1/img_1.png".to_string())
        );
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_then_falls_back() {
        let provider = ScriptedProvider::failing(ProviderError::Timeout("slow".into()), 2);

        assert!(provider.restore(request()).await.is_err());
        assert!(provider.restore(request()).await.is_err());
        assert!(matches!(
            provider.restore(request()).await,
            Ok(ProviderOutput::Restored { .. })
        ));
        assert_eq!(provider.calls(), 3);
    }
}
