//! Tests for the error system.

use kestrel::error::unified::*;
use kestrel::error::*;
use kestrel::types::Turn;

#[test]
fn error_api_creation() {
    let err = KestrelError::api(404, "Not found");
    assert!(matches!(&err, KestrelError::Api { status: 404, .. }));
    assert_eq!(err.to_string(), "API error (status 404): Not found");
}

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: KestrelError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
        expected_recovery: RecoverySuggestion,
    }

    let network_error = reqwest::Client::new()
        .get("http://[::1")
        .build()
        .unwrap_err();
    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        Case {
            error: KestrelError::api(401, "bad key"),
            expected_category: ErrorCategory::Authentication,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckCredentials,
        },
        Case {
            error: KestrelError::RateLimited {
                retry_after_ms: Some(1000),
            },
            expected_category: ErrorCategory::RateLimit,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: KestrelError::api(429, "slow down"),
            expected_category: ErrorCategory::RateLimit,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: KestrelError::api(500, "boom"),
            expected_category: ErrorCategory::Server,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: KestrelError::api(400, "bad request"),
            expected_category: ErrorCategory::Api,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
        Case {
            error: KestrelError::Network(network_error),
            expected_category: ErrorCategory::Network,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: KestrelError::Timeout(5_000),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::IncreaseTimeout,
        },
        Case {
            error: KestrelError::Configuration("missing key".into()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
        Case {
            error: KestrelError::Serialization(serde_error),
            expected_category: ErrorCategory::Serialization,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RephrasePrompt,
        },
        Case {
            error: KestrelError::typed_conversion("expected a number", "four"),
            expected_category: ErrorCategory::Serialization,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RephrasePrompt,
        },
        Case {
            error: KestrelError::ToolExecution {
                tool_name: "delegate_0_send_message".into(),
                message: "peer failed".into(),
            },
            expected_category: ErrorCategory::ToolExecution,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckToolImplementation,
        },
        Case {
            error: KestrelError::TooManyToolCalls {
                limit: 3,
                history: Vec::new(),
            },
            expected_category: ErrorCategory::CallLimit,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RaiseCallLimit,
        },
        Case {
            error: KestrelError::Workflow("expected True/False".into()),
            expected_category: ErrorCategory::Workflow,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RephrasePrompt,
        },
        Case {
            error: KestrelError::Io(io_error),
            expected_category: ErrorCategory::Storage,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
        Case {
            error: KestrelError::InvalidState("already ran".into()),
            expected_category: ErrorCategory::Unknown,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
    ];

    for case in cases {
        assert_eq!(
            case.error.category(),
            case.expected_category,
            "category for {}",
            case.error
        );
        assert_eq!(
            case.error.is_retryable(),
            case.expected_retryable,
            "retryable for {}",
            case.error
        );
        assert_eq!(
            case.error.recovery_suggestion(),
            case.expected_recovery,
            "recovery for {}",
            case.error
        );
    }
}

#[test]
fn call_limit_error_carries_history() {
    let history = vec![Turn::user("loop"), Turn::model("again")];
    let err = KestrelError::TooManyToolCalls {
        limit: 1,
        history: history.clone(),
    };

    assert!(err.is_call_limit());
    assert_eq!(err.call_history(), Some(history.as_slice()));
    assert_eq!(err.to_string(), "Exceeded function call limit: 1");
    assert!(KestrelError::Timeout(1).call_history().is_none());
}

#[test]
fn typed_conversion_message_keeps_raw_answer() {
    let err = KestrelError::typed_conversion("expected a number", "four");
    assert_eq!(
        err.to_string(),
        "Typed conversion error: expected a number (raw answer: four)"
    );
}

#[test]
fn io_errors_convert_with_question_mark() {
    fn read() -> Result<String> {
        Ok(std::fs::read_to_string("/definitely/not/here")?)
    }
    assert!(matches!(read(), Err(KestrelError::Io(_))));
}
