use super::*;
use async_trait::async_trait;
use lib_core::{create_pool, AppError, MessageStore, Result};
use serde_json::{json, Value};
use shared::dto::chat::ServerEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const PERSONA: &str = "Blue Magpie";
const FALLBACK: &str = "The magpie flew off, back soon!";
const PACING: Duration = Duration::from_millis(5);

// region: --- Fixtures

struct FixedClient(&'static str);

#[async_trait]
impl CompletionClient for FixedClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

#[derive(Default)]
struct RecordingClient {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl CompletionClient for RecordingClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Lovely to hear from you!".to_string())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

async fn memory_store() -> MessageStore {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    let store = MessageStore::new(pool);
    store.initialize().await.unwrap();
    store
}

fn generated(client: Arc<dyn CompletionClient>) -> ReplySource {
    ReplySource::Generated(ResponseGenerator::new(client, "You are {persona}.", FALLBACK, 2))
}

fn pipeline(store: &MessageStore, replies: ReplySource) -> ChatPipeline {
    ChatPipeline::new(
        store.clone(),
        Arc::new(ConnectionRegistry::new()),
        replies,
        PERSONA,
        PACING,
    )
}

/// Join `scope` and return the membership, the queue and the history event.
async fn join(pipeline: &ChatPipeline, scope: &Scope) -> (Membership, mpsc::Receiver<String>, Value) {
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (membership, history) = pipeline.join(scope.clone(), tx).await.unwrap();
    (membership, rx, serde_json::from_str(&history).unwrap())
}

async fn next_event(rx: &mut mpsc::Receiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("queue closed");
    serde_json::from_str(&raw).unwrap()
}

fn session(id: &str) -> Scope {
    Scope::Session(id.to_string())
}

// endregion: --- Fixtures

#[tokio::test]
async fn test_both_members_see_message_then_persona_reply() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, generated(Arc::new(FixedClient("Hello alice!"))));
    let scope = session("room-1");

    let (_first, mut rx_first, _) = join(&pipeline, &scope).await;
    let (_second, mut rx_second, _) = join(&pipeline, &scope).await;

    let outcome = pipeline
        .handle_text(&scope, r#"{"username":"alice","message":"hi"}"#)
        .await
        .unwrap();

    for rx in [&mut rx_first, &mut rx_second] {
        assert_eq!(
            next_event(rx).await,
            json!({ "type": "new_message", "username": "alice", "message": "hi" })
        );
        assert_eq!(
            next_event(rx).await,
            json!({ "type": "new_message", "username": PERSONA, "message": "Hello alice!" })
        );
    }

    assert_eq!(outcome.user_broadcast.delivered, 2);
    assert_eq!(outcome.reply.as_deref(), Some("Hello alice!"));
    assert!(outcome.user_message_id.is_some());
}

#[tokio::test]
async fn test_late_joiner_receives_history_in_order() {
    let store = memory_store().await;
    store.append("alice", "first", Some("room-1")).await.unwrap();
    store.append("bob", "second", Some("room-1")).await.unwrap();
    let pipeline = pipeline(&store, generated(Arc::new(OfflineClient)));

    let (_membership, mut rx, history) = join(&pipeline, &session("room-1")).await;

    assert_eq!(history["type"], "history");
    let data = history["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["username"], "alice");
    assert_eq!(data[0]["message"], "first");
    assert_eq!(data[1]["message"], "second");
    assert!(data[0]["timestamp"].as_str().unwrap().ends_with('Z'));

    // History goes to the new connection only and is not persisted.
    assert!(rx.try_recv().is_err());
    assert_eq!(store.read_all(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_generation_persists_and_broadcasts_fallback() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, generated(Arc::new(OfflineClient)));
    let scope = Scope::Global;
    let (_membership, mut rx, _) = join(&pipeline, &scope).await;

    let outcome = pipeline
        .handle_text(&scope, r#"{"username":"alice","message":"hi"}"#)
        .await
        .unwrap();

    assert_eq!(outcome.reply.as_deref(), Some(FALLBACK));

    next_event(&mut rx).await;
    let reply = next_event(&mut rx).await;
    assert_eq!(reply["message"], FALLBACK);

    let stored = store.read_all(None).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].username, PERSONA);
    assert_eq!(stored[1].text, FALLBACK);
}

#[tokio::test]
async fn test_invalid_frame_has_no_side_effects() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, generated(Arc::new(FixedClient("never"))));
    let scope = Scope::Global;
    let (_membership, mut rx, _) = join(&pipeline, &scope).await;

    let result = pipeline.handle_text(&scope, r#"{"username":"alice"}"#).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    let result = pipeline.handle_text(&scope, "not json at all").await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    assert!(store.read_all(None).await.unwrap().is_empty());
    assert!(rx.try_recv().is_err());

    // The connection stays usable.
    pipeline
        .handle_text(&scope, r#"{"username":"alice","message":"still here"}"#)
        .await
        .unwrap();
    assert_eq!(next_event(&mut rx).await["message"], "still here");
}

#[tokio::test]
async fn test_prompt_sees_scope_history_including_new_message() {
    let store = memory_store().await;
    store.append("carol", "elsewhere", Some("room-2")).await.unwrap();
    store.append("bob", "earlier", Some("room-1")).await.unwrap();

    let client = Arc::new(RecordingClient::default());
    let pipeline = pipeline(&store, generated(client.clone()));

    pipeline
        .handle_text(&session("room-1"), r#"{"username":"alice","message":"hi"}"#)
        .await
        .unwrap();

    let prompts = client.prompts.lock().unwrap();
    assert_eq!(prompts[0], "You are Blue Magpie.\n\nbob: earlier\nalice: hi");
}

#[tokio::test]
async fn test_scripted_frame_gets_animal_response() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, ReplySource::Scripted(ScriptedReplies::builtin()));
    let scope = session("zoo");
    let (_membership, mut rx, _) = join(&pipeline, &scope).await;

    let outcome = pipeline
        .handle_text(
            &scope,
            r#"{"type":"user_message","animal":"elephant","content_key":"hello","content":"Hi elephant!"}"#,
        )
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut rx).await,
        json!({ "type": "new_message", "username": "visitor", "message": "Hi elephant!" })
    );
    assert_eq!(
        next_event(&mut rx).await,
        json!({
            "type": "animal_response",
            "animal": "elephant",
            "content": "The elephant raises its trunk and lets out a friendly trumpet!"
        })
    );
    assert!(outcome.reply_broadcast.is_some());

    let stored = store.read_all(Some("zoo")).await.unwrap();
    assert_eq!(stored[1].username, "elephant");
}

#[tokio::test]
async fn test_scripted_miss_ends_turn_without_reply() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, ReplySource::Scripted(ScriptedReplies::builtin()));
    let scope = Scope::Global;
    let (_membership, mut rx, _) = join(&pipeline, &scope).await;

    let outcome = pipeline
        .handle_text(&scope, r#"{"type":"user_message","animal":"giraffe","content_key":"hello"}"#)
        .await
        .unwrap();

    assert!(outcome.reply.is_none());
    assert!(outcome.reply_broadcast.is_none());
    assert_eq!(next_event(&mut rx).await["message"], "hello");
    assert!(rx.try_recv().is_err());
    assert_eq!(store.read_all(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, generated(Arc::new(FixedClient("hey"))));

    let (_a, mut rx_a, _) = join(&pipeline, &session("a")).await;
    let (_b, mut rx_b, _) = join(&pipeline, &session("b")).await;

    pipeline
        .handle_text(&session("a"), r#"{"username":"alice","message":"only for a"}"#)
        .await
        .unwrap();

    assert_eq!(next_event(&mut rx_a).await["message"], "only for a");
    assert!(rx_b.try_recv().is_err());

    let (_late_b, _rx, history_b) = join(&pipeline, &session("b")).await;
    assert_eq!(history_b["data"], json!([]));
}

#[tokio::test]
async fn test_storage_failure_degrades_but_turn_completes() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, generated(Arc::new(FixedClient("still replying"))));
    let scope = Scope::Global;
    let (_membership, mut rx, _) = join(&pipeline, &scope).await;

    store.pool().close().await;

    let outcome = pipeline
        .handle_text(&scope, r#"{"username":"alice","message":"hi"}"#)
        .await
        .unwrap();

    assert!(outcome.user_message_id.is_none());
    assert_eq!(next_event(&mut rx).await["message"], "hi");
    assert_eq!(next_event(&mut rx).await["message"], "still replying");
}

#[tokio::test]
async fn test_dropped_membership_leaves_registry() {
    let store = memory_store().await;
    let pipeline = pipeline(&store, generated(Arc::new(OfflineClient)));

    let (membership, _rx, _) = join(&pipeline, &session("room-1")).await;
    assert_eq!(pipeline.registry().connection_count(), 1);

    drop(membership);
    assert_eq!(pipeline.registry().connection_count(), 0);
    assert_eq!(pipeline.registry().scope_count(), 0);
}

#[tokio::test]
async fn test_broadcast_during_join_stays_behind_history() {
    let store = memory_store().await;
    store.append("alice", "before", None).await.unwrap();
    let pipeline = pipeline(&store, generated(Arc::new(OfflineClient)));

    // Hold the pool's only connection so the history read inside `join` waits.
    let held = store.pool().acquire().await.unwrap();

    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    let joining = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.join(Scope::Global, tx).await })
    };

    while pipeline.registry().connection_count() == 0 {
        tokio::task::yield_now().await;
    }
    let live = ServerEvent::new_message("bob", "live").encode().unwrap();
    assert_eq!(pipeline.registry().broadcast(&Scope::Global, &live).delivered, 1);

    drop(held);
    let (_membership, history) = joining.await.unwrap().unwrap();

    let history: Value = serde_json::from_str(&history).unwrap();
    assert_eq!(history["type"], "history");
    assert_eq!(history["data"][0]["message"], "before");

    // Only the live frame is queued; the history never entered the queue.
    assert_eq!(next_event(&mut rx).await["message"], "live");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_reply_is_paced_and_persisted_before_broadcast() {
    const SLOW_PACING: Duration = Duration::from_millis(300);

    let store = memory_store().await;
    let pipeline = ChatPipeline::new(
        store.clone(),
        Arc::new(ConnectionRegistry::new()),
        generated(Arc::new(FixedClient("Patience pays."))),
        PERSONA,
        SLOW_PACING,
    );
    let scope = Scope::Global;
    let (_membership, mut rx, _) = join(&pipeline, &scope).await;

    let started = std::time::Instant::now();
    let turn = {
        let pipeline = pipeline.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            pipeline
                .handle_text(&scope, r#"{"username":"alice","message":"hi"}"#)
                .await
        })
    };

    assert_eq!(next_event(&mut rx).await["username"], "alice");

    // The reply row lands while the reply itself is still held back by the pacing delay.
    let stored = tokio::time::timeout(SLOW_PACING, async {
        loop {
            let stored = store.read_all(None).await.unwrap();
            if stored.len() == 2 {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reply was not persisted within the pacing delay");
    assert_eq!(stored[1].username, PERSONA);
    assert_eq!(stored[1].text, "Patience pays.");
    assert!(rx.try_recv().is_err(), "reply must wait for the pacing delay");

    let reply = next_event(&mut rx).await;
    assert!(started.elapsed() >= SLOW_PACING);
    assert_eq!(reply["username"], PERSONA);
    assert_eq!(store.read_all(None).await.unwrap().len(), 2);

    turn.await.unwrap().unwrap();
}
