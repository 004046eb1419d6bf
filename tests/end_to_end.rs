//! Drives a real listening server with the library's own relay client.

mod common;

use chat_relay::models::chat::{ ChatMessage, Role };
use chat_relay::server::api::router;
use chat_relay::server::completion::RelayConfig;
use chat_relay::session::{ ChatSession, RelayClient, SubmitOutcome };
use common::{ state_with, ScriptedClient, Step };
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn serve(chat: Arc<ScriptedClient>) -> RelayClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state_with(chat, RelayConfig::default()));
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    RelayClient::new(&format!("http://{}", addr)).unwrap()
}

fn session() -> ChatSession {
    ChatSession::new("gpt-4-turbo", "You are a helpful assistant.")
}

#[tokio::test]
async fn two_plus_two_streams_into_the_session() {
    let chat = ScriptedClient::deltas(&["4"]);
    let client = serve(chat.clone()).await;
    let mut s = session();
    let mut rendered = String::new();

    let outcome = client.submit(&mut s, "2+2?", |d| rendered.push_str(d)).await;

    assert_eq!(outcome, SubmitOutcome::Completed);
    assert_eq!(s.messages(), &[ChatMessage::user("2+2?"), ChatMessage::assistant("4")]);
    assert_eq!(rendered, "4");
    assert!(!s.is_loading());
    assert_eq!(chat.last_request().unwrap().model, "gpt-4-turbo");
}

#[tokio::test]
async fn selected_model_reaches_the_generation_service() {
    let chat = ScriptedClient::deltas(&["ok"]);
    let client = serve(chat.clone()).await;
    let mut s = session();
    s.select_model("gpt-3.5-turbo");

    client.submit(&mut s, "hi", |_| {}).await;
    assert_eq!(chat.last_request().unwrap().model, "gpt-3.5-turbo");
}

#[tokio::test]
async fn upstream_failure_mid_stream_keeps_partial_reply() {
    let chat = ScriptedClient::new(
        vec![Step::Delta("Hel"), Step::Pause(Duration::from_millis(100)), Step::Fail("upstream reset")]
    );
    let client = serve(chat).await;
    let mut s = session();

    let outcome = client.submit(&mut s, "greet", |_| {}).await;

    assert_eq!(outcome, SubmitOutcome::Interrupted);
    assert_eq!(s.messages().len(), 2);
    assert_eq!(s.messages()[1].role, Role::Assistant);
    assert_eq!(s.messages()[1].content, "Hel");
    assert!(s.error().is_some());
    assert!(!s.is_loading());
}

#[tokio::test]
async fn upstream_rejection_surfaces_details() {
    let chat = ScriptedClient::failing_to_open("invalid model");
    let client = serve(chat).await;
    let mut s = session();

    let outcome = client.submit(&mut s, "hi", |_| {}).await;

    assert_eq!(outcome, SubmitOutcome::Rejected);
    assert_eq!(s.messages(), &[ChatMessage::user("hi")]);
    assert!(s.error().unwrap().contains("invalid model"));
}

#[tokio::test]
async fn persisted_exchange_can_be_reloaded() {
    let client = serve(ScriptedClient::deltas(&[])).await;
    let chat = client.create_chat(None).await.unwrap();
    assert_eq!(chat.title, "New Chat");

    client.add_message(&chat.id, Role::User, "2+2?").await.unwrap();
    client.add_message(&chat.id, Role::Assistant, "4").await.unwrap();

    let mut s = session();
    let history = client.get_chat_messages(&chat.id).await.unwrap();
    s.load(history.into_iter().map(ChatMessage::from).collect());
    assert_eq!(s.messages(), &[ChatMessage::user("2+2?"), ChatMessage::assistant("4")]);

    let listing = client.list_models().await.unwrap();
    assert_eq!(listing.default, "gpt-4-turbo");
}
