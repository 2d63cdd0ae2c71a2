//! Rule-by-rule tests for the classifier.

use super::*;
use crate::clock::Clock;
use crate::testing::ManualClock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ctx(operation: &str) -> ErrorContext {
    ErrorContext::for_operation(operation)
}

#[test]
fn test_failed_fetch_online_is_high_network() {
    let raw = RawError::from(json!({ "name": "TypeError", "message": "Failed to fetch" }));
    let err = classify(&raw, &ErrorContext::new(), true);

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.severity(), Severity::High);
    assert!(err.is_retryable());
    assert_eq!(err.context().get_str("name"), Some("TypeError"));
}

#[test]
fn test_failed_fetch_offline_is_medium_network() {
    let err = classify(&RawError::new("Failed to fetch"), &ErrorContext::new(), false);
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.severity(), Severity::Medium);
}

#[test]
fn test_network_rule_beats_code_rule() {
    let raw = RawError::new("NetworkError when attempting to fetch resource").with_code("23505");
    assert_eq!(classify(&raw, &ErrorContext::new(), true).kind(), ErrorKind::Network);
}

#[test]
fn test_unique_violation() {
    let raw = RawError::from(json!({ "code": "23505", "message": "duplicate key" }));
    let err = classify(&raw, &ErrorContext::new(), true);

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.severity(), Severity::Low);
    assert!(!err.is_retryable());
    assert_eq!(err.code(), Some("23505"));
}

#[test]
fn test_undefined_column_without_message() {
    let raw = RawError::from(json!({ "code": "42703" }));
    let err = classify(&raw, &ErrorContext::new(), true);

    assert_eq!(err.kind(), ErrorKind::BackendApi);
    assert_eq!(err.severity(), Severity::High);
    assert!(!err.is_retryable());
    assert_eq!(err.message(), "42703");
}

#[test]
fn test_code_table() {
    let cases = [
        ("PGRST204", ErrorKind::BackendApi, Severity::High, false),
        ("22P02", ErrorKind::Validation, Severity::Medium, false),
        ("PGRST116", ErrorKind::BackendApi, Severity::Low, false),
        ("23503", ErrorKind::BackendApi, Severity::Medium, false),
        ("57014", ErrorKind::BackendApi, Severity::Medium, true),
    ];

    for (code, kind, severity, retryable) in cases {
        let err = classify(&RawError::new("x").with_code(code), &ErrorContext::new(), true);
        assert_eq!(err.kind(), kind, "kind for {code}");
        assert_eq!(err.severity(), severity, "severity for {code}");
        assert_eq!(err.is_retryable(), retryable, "retryable for {code}");
    }
}

#[test]
fn test_long_code_is_not_a_machine_code() {
    let raw = RawError::new("odd").with_code("this is not a short code");
    assert_eq!(classify(&raw, &ErrorContext::new(), true).kind(), ErrorKind::Unknown);
}

#[test]
fn test_upload_messages_follow_substring() {
    let cases = [
        ("Payload size exceeded", "too large"),
        ("invalid mime type", "not supported"),
        ("network changed", "network problem"),
        ("request timeout", "took too long"),
        ("storage bucket missing", "storage is unavailable"),
        ("something odd", "Upload failed"),
    ];

    for (message, expected) in cases {
        let err = classify(&RawError::new(message), &ctx(FILE_UPLOAD_OPERATION), true);
        assert_eq!(err.kind(), ErrorKind::Upload);
        assert_eq!(err.severity(), Severity::Medium);
        assert!(err.is_retryable());
        assert!(
            err.user_message().contains(expected),
            "{message:?} gave {:?}",
            err.user_message()
        );
    }
}

#[test]
fn test_llm_operation_carries_provider_fallback() {
    let raw = RawError::new("upstream overloaded").with_provider("openai");
    let err = classify(&raw, &ctx("llm_chat"), true);

    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    assert!(err.is_retryable());
    let next = err.fallback().and_then(|f| f.next_provider());
    assert_eq!(next, Some("anthropic".to_string()));
}

#[test]
fn test_provider_named_in_message() {
    let err = classify(
        &RawError::new("Gemini returned 503"),
        &ErrorContext::new(),
        true,
    );
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    let next = err.fallback().and_then(|f| f.next_provider());
    assert_eq!(next, Some("openai".to_string()));
}

#[test]
fn test_provider_from_context() {
    let context = ctx("generate_llm_report").with(PROVIDER_KEY, "anthropic");
    let err = classify(&RawError::new("timeout"), &context, true);
    let next = err.fallback().and_then(|f| f.next_provider());
    assert_eq!(next, Some("gemini".to_string()));
}

#[test]
fn test_validation_mentions_field() {
    let err = classify(
        &RawError::validation("too short", "title"),
        &ErrorContext::new(),
        true,
    );
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.severity(), Severity::Low);
    assert!(!err.is_retryable());
    assert_eq!(err.user_message(), "Please check the title field.");
}

#[test]
fn test_validation_without_field() {
    let raw = RawError::new("bad").with_name(VALIDATION_ERROR);
    let err = classify(&raw, &ErrorContext::new(), true);
    assert_eq!(err.user_message(), ErrorKind::Validation.default_user_message());
}

#[test]
fn test_auth() {
    for raw in [
        RawError::new("JWT expired"),
        RawError::new("request failed").with_status(401),
        RawError::new("Invalid login credentials"),
    ] {
        let err = classify(&raw, &ErrorContext::new(), true);
        assert_eq!(err.kind(), ErrorKind::Authentication, "{raw}");
        assert_eq!(err.severity(), Severity::High);
        assert!(!err.is_retryable());
    }
}

#[test]
fn test_permission() {
    let err = classify(
        &RawError::new("new row violates row-level security policy"),
        &ErrorContext::new(),
        true,
    );
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(!err.is_retryable());

    let err = classify(&RawError::new("nope").with_status(403), &ErrorContext::new(), true);
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[test]
fn test_storage_and_processing_tags() {
    let err = classify(&RawError::storage("quota"), &ErrorContext::new(), true);
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.is_retryable());

    let raw = RawError::new("ocr crashed").with_name(PROCESSING_ERROR);
    assert_eq!(classify(&raw, &ErrorContext::new(), true).kind(), ErrorKind::Processing);
}

#[test]
fn test_null_and_primitives_fall_through_to_unknown() {
    for value in [json!(null), json!(7), json!(false), json!([1, 2]), json!({})] {
        let err = classify(&RawError::from(value), &ErrorContext::new(), true);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.severity(), Severity::Medium);
        assert!(err.is_retryable());
        assert!(!err.message().is_empty());
        assert!(!err.user_message().is_empty());
    }
}

#[test]
fn test_caller_context_is_preserved() {
    let context = ErrorContext::for_operation("sync").with("attempt", 2);
    let raw = RawError::new("boom").with_status(500);
    let err = classify(&raw, &context, true);

    assert_eq!(err.context().operation(), Some("sync"));
    assert_eq!(err.context().get("attempt"), Some(&json!(2)));
    assert_eq!(err.context().get("status"), Some(&json!(500)));
}

#[test]
fn test_timestamp_comes_from_injected_clock() {
    let clock = ManualClock::default();
    clock.advance(Duration::from_secs(300));
    let classifier = ErrorClassifier::default().with_clock(Arc::new(clock.clone()));

    for raw in [
        RawError::new("Failed to fetch"),
        RawError::new("duplicate").with_code("23505"),
        RawError::new("anything"),
    ] {
        let err = classifier.classify(&raw, &ErrorContext::new(), true);
        assert_eq!(err.timestamp(), clock.now());
    }
}
