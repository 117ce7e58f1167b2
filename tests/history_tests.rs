//! Tests for history persistence and projection.

use pretty_assertions::assert_eq;
use serde_json::json;

use kestrel::error::KestrelError;
use kestrel::history::{trim_history, History};
use kestrel::types::{SerializableTurn, Turn, TurnRole};

fn conversation() -> History {
    History::from_turns(vec![
        Turn::user("What's 2+2?"),
        Turn::tool_call("add", json!({ "a": 2, "b": 2 })),
        Turn::tool_result("add", json!(4)),
        Turn::model("4"),
    ])
}

#[tokio::test]
async fn save_and_load_keep_text_turns_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions").join("history.json");

    conversation().save(&path).await.unwrap();
    let loaded = History::load(&path).await.unwrap();

    assert_eq!(
        loaded.turns(),
        &[Turn::user("What's 2+2?"), Turn::model("4")]
    );
}

#[tokio::test]
async fn saved_file_uses_role_and_text_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    conversation().save(&path).await.unwrap();

    let raw = tokio::fs::read_to_string(&path).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(
        value,
        json!([
            { "role": "user", "text": "What's 2+2?" },
            { "role": "model", "text": "4" },
        ])
    );
}

#[tokio::test]
async fn loading_a_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = History::load(&dir.path().join("absent.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, KestrelError::Io(_)));
}

#[test]
fn import_skips_tool_records() {
    let records = vec![
        SerializableTurn {
            role: TurnRole::User,
            text: "hi".into(),
        },
        SerializableTurn {
            role: TurnRole::ToolCall,
            text: "ignored".into(),
        },
        SerializableTurn {
            role: TurnRole::Model,
            text: "hello".into(),
        },
    ];

    let history = History::import(records);

    assert_eq!(history.turns(), &[Turn::user("hi"), Turn::model("hello")]);
}

#[test]
fn malformed_json_is_a_serialization_error() {
    let err = History::from_json("{not json").unwrap_err();
    assert!(matches!(err, KestrelError::Serialization(_)));
}

#[test]
fn retain_known_tools_drops_unregistered_tool_turns() {
    let mut history = conversation();
    history.retain_known_tools(|name| name == "multiply");
    assert_eq!(
        history.turns(),
        &[Turn::user("What's 2+2?"), Turn::model("4")]
    );
}

#[test]
fn trim_history_keeps_turns_after_oldest_kept_user_turn() {
    let turns = vec![
        Turn::user("a"),
        Turn::model("1"),
        Turn::user("b"),
        Turn::tool_call("t", json!({})),
        Turn::tool_result("t", json!(null)),
        Turn::model("2"),
    ];

    assert_eq!(trim_history(&turns, 1), turns[2..].to_vec());
    assert_eq!(trim_history(&turns, 2), turns);
}

#[test]
fn render_lists_one_turn_per_line() {
    let rendered = conversation().render();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "user: What's 2+2?");
    assert!(lines[1].starts_with("Function called: add("));
    assert_eq!(lines[3], "model: 4");
}
