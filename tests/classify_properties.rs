//! Property-based tests for error classification

use breakwater::{assert_classified, classify, AppError, ErrorContext, ErrorKind, RawError, Severity};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_map(|f| json!(f)),
        ".{0,40}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map(
                prop_oneof![
                    Just("name".to_string()),
                    Just("message".to_string()),
                    Just("code".to_string()),
                    Just("status".to_string()),
                    Just("field".to_string()),
                    Just("provider".to_string()),
                    "[a-z]{1,8}",
                ],
                inner,
                0..6
            )
            .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn arb_raw() -> impl Strategy<Value = RawError> {
    (
        prop::option::of(prop_oneof![
            Just("ValidationError".to_string()),
            Just("StorageError".to_string()),
            Just("ProcessingError".to_string()),
            Just("TypeError".to_string()),
            "[A-Za-z]{0,12}",
        ]),
        ".{0,60}",
        prop::option::of(prop_oneof![
            Just("23505".to_string()),
            Just("42703".to_string()),
            Just("PGRST116".to_string()),
            "[A-Z0-9]{1,14}",
            ".{0,10}",
        ]),
        prop::option::of(any::<u16>()),
    )
        .prop_map(|(name, message, code, status)| RawError {
            name,
            message,
            code,
            status,
            ..RawError::default()
        })
}

fn arb_context() -> impl Strategy<Value = ErrorContext> {
    prop::option::of(prop_oneof![
        Just("file_upload".to_string()),
        Just("llm_chat".to_string()),
        "[a-z_]{0,12}",
    ])
    .prop_map(|operation| match operation {
        Some(op) => ErrorContext::for_operation(op),
        None => ErrorContext::new(),
    })
}

fn well_formed(error: &AppError) -> bool {
    !error.message().is_empty() && !error.user_message().is_empty()
}

proptest! {
    #[test]
    fn prop_classify_is_total_for_any_json(value in arb_json(), online in any::<bool>()) {
        let raw = RawError::from(value);
        let error = classify(&raw, &ErrorContext::new(), online);
        prop_assert!(well_formed(&error));
    }

    #[test]
    fn prop_classify_is_deterministic(raw in arb_raw(), context in arb_context(), online in any::<bool>()) {
        let first = classify(&raw, &context, online);
        let second = classify(&raw, &context, online);
        prop_assert_eq!(first.kind(), second.kind());
        prop_assert_eq!(first.severity(), second.severity());
        prop_assert_eq!(first.is_retryable(), second.is_retryable());
        prop_assert_eq!(first.user_message(), second.user_message());
        prop_assert!(well_formed(&first));
    }

    #[test]
    fn prop_validation_and_auth_never_retryable(raw in arb_raw(), context in arb_context(), online in any::<bool>()) {
        let error = classify(&raw, &context, online);
        if matches!(error.kind(), ErrorKind::Validation | ErrorKind::Authentication | ErrorKind::Permission) {
            prop_assert!(!error.is_retryable());
        }
    }

    #[test]
    fn prop_failed_fetch_always_network(prefix in "[a-z ]{0,10}", online in any::<bool>()) {
        let raw = RawError::new(format!("{prefix}Failed to fetch"));
        let error = classify(&raw, &ErrorContext::new(), online);
        prop_assert_eq!(error.kind(), ErrorKind::Network);
        prop_assert!(error.is_retryable());
        let expected = if online { Severity::High } else { Severity::Medium };
        prop_assert_eq!(error.severity(), expected);
    }
}

#[test]
fn test_documented_examples() {
    let ctx = ErrorContext::new();
    assert_classified!(
        classify(&RawError::new("Failed to fetch").with_name("TypeError"), &ctx, true),
        Network,
        High,
        retryable = true
    );
    assert_classified!(
        classify(&RawError::new("duplicate key value").with_code("23505"), &ctx, true),
        Validation,
        Low,
        retryable = false
    );
    assert_classified!(
        classify(&RawError::new("column does not exist").with_code("42703"), &ctx, true),
        BackendApi,
        High,
        retryable = false
    );
}

#[test]
fn test_null_and_primitives_are_unknown() {
    for value in [Value::Null, json!(42), json!(true), json!([1, 2])] {
        let error = classify(&RawError::from(value), &ErrorContext::new(), true);
        assert_classified!(error, Unknown, Medium, retryable = true);
    }
}
