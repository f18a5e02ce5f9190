//! Observer → Coordinator → Controller, end to end over the bus

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorRef};
use shared_types::{ConversationView, Message, ProcessingStatus, SimilarUserMatch};

use convo_sync::actors::controller::{self, ControllerActor, ControllerArguments, ControllerMsg, ControllerSettings};
use convo_sync::actors::coordinator::{self, CoordinatorActor, CoordinatorArguments};
use convo_sync::actors::observer::{ObserverActor, ObserverArguments};
use convo_sync::actors::record_store::{self, RecordStoreActor, RecordStoreArguments};
use convo_sync::actors::MessageBusActor;
use convo_sync::document::{FileDocument, InMemoryDocument};
use convo_sync::fingerprint::fingerprint;
use convo_sync::runtime::{RuntimeOptions, SyncRuntime};
use convo_sync::similarity::{serialize_snapshot, SimilarityError, SimilarityService};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Records every upsert and answers with no matches.
#[derive(Default)]
struct RecordingService {
    contents: Mutex<Vec<String>>,
}

impl RecordingService {
    fn contents(&self) -> Vec<String> {
        self.contents.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimilarityService for RecordingService {
    async fn upsert_conversation(
        &self,
        _id: &str,
        _title: &str,
        content: &str,
    ) -> Result<Vec<SimilarUserMatch>, SimilarityError> {
        self.contents.lock().unwrap().push(content.to_string());
        Ok(vec![])
    }
}

fn auto_settings() -> ControllerSettings {
    ControllerSettings {
        remote_timeout: Duration::from_secs(2),
        min_assistant_chars: 1,
        auto_process: true,
    }
}

fn options(
    source: Arc<dyn convo_sync::document::DocumentSource>,
    service: Arc<RecordingService>,
) -> RuntimeOptions {
    RuntimeOptions {
        store: RecordStoreArguments::InMemory,
        source,
        service,
        debounce: DEBOUNCE,
        controller: auto_settings(),
    }
}

async fn wait_view(
    controller_ref: &ActorRef<ControllerMsg>,
    predicate: impl FnMut(&ConversationView) -> bool,
) -> ConversationView {
    let mut rx = controller::subscribe_view(controller_ref)
        .await
        .expect("Failed to subscribe to view");
    let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("Timed out waiting for view")
        .expect("View channel closed");
    view.clone()
}

fn settled(view: &ConversationView) -> bool {
    !view.is_loading && view.similar_users.is_some()
}

#[tokio::test]
async fn test_open_conversation_is_processed_on_startup() {
    let doc = InMemoryDocument::new();
    doc.navigate("c-1", Some("Bread".to_string()));
    let messages = vec![Message::user("hi"), Message::assistant("hello")];
    doc.set_messages(&messages);

    let service = Arc::new(RecordingService::default());
    let runtime = SyncRuntime::start(options(doc.clone(), service.clone()))
        .await
        .expect("Failed to start runtime");

    let view = wait_view(&runtime.controller, settled).await;
    assert_eq!(view.conversation_id.as_deref(), Some("c-1"));
    assert_eq!(view.title.as_deref(), Some("Bread"));
    assert_eq!(view.content_hash, Some(fingerprint(&messages)));
    assert_eq!(service.contents(), vec![serialize_snapshot(&messages).unwrap()]);

    let record = record_store::get_record(&runtime.store, "c-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_streamed_reply_is_processed_once() {
    let doc = InMemoryDocument::new();
    doc.navigate("c-1", Some("Bread".to_string()));

    let service = Arc::new(RecordingService::default());
    let runtime = SyncRuntime::start(options(doc.clone(), service.clone()))
        .await
        .expect("Failed to start runtime");
    wait_view(&runtime.controller, |view| {
        view.conversation_id.as_deref() == Some("c-1")
    })
    .await;

    doc.push_message(&Message::user("tell me about bread"));
    doc.push_message(&Message::assistant("B"));
    for partial in ["Br", "Bre", "Brea", "Bread is great"] {
        tokio::time::sleep(Duration::from_millis(20)).await;
        doc.update_last(partial);
    }

    let view = wait_view(&runtime.controller, settled).await;
    let expected = vec![
        Message::user("tell me about bread"),
        Message::assistant("Bread is great"),
    ];
    assert_eq!(view.messages, expected);

    tokio::time::sleep(DEBOUNCE * 3).await;
    assert_eq!(service.contents(), vec![serialize_snapshot(&expected).unwrap()]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_navigation_switches_view_to_new_conversation() {
    let doc = InMemoryDocument::new();
    doc.navigate("c-1", Some("Bread".to_string()));
    doc.set_messages(&[Message::user("hi"), Message::assistant("hello")]);

    let service = Arc::new(RecordingService::default());
    let runtime = SyncRuntime::start(options(doc.clone(), service.clone()))
        .await
        .expect("Failed to start runtime");
    wait_view(&runtime.controller, settled).await;

    doc.navigate("c-2", None);
    let view = wait_view(&runtime.controller, |view| {
        view.conversation_id.as_deref() == Some("c-2")
    })
    .await;
    assert!(view.messages.is_empty());
    assert!(view.similar_users.is_none());

    doc.set_title("Pasta");
    doc.set_messages(&[Message::user("carbonara?"), Message::assistant("eggs, not cream")]);
    let view = wait_view(&runtime.controller, |view| {
        view.conversation_id.as_deref() == Some("c-2") && settled(view)
    })
    .await;
    assert_eq!(view.title.as_deref(), Some("Pasta"));
    assert_eq!(service.contents().len(), 2);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_late_controller_catches_up_through_active_state() {
    let doc = InMemoryDocument::new();
    doc.navigate("c-7", Some("Pasta".to_string()));
    let messages = vec![Message::user("carbonara?"), Message::assistant("eggs, not cream")];
    doc.set_messages(&messages);

    let (store, _) = Actor::spawn(None, RecordStoreActor, RecordStoreArguments::InMemory)
        .await
        .unwrap();
    let (bus, _) = Actor::spawn(None, MessageBusActor, ()).await.unwrap();
    let (coordinator_ref, _) = Actor::spawn(
        None,
        CoordinatorActor,
        CoordinatorArguments { bus: bus.clone() },
    )
    .await
    .unwrap();
    let (observer, _) = Actor::spawn(
        None,
        ObserverActor,
        ObserverArguments {
            source: doc.clone(),
            bus: bus.clone(),
            debounce: DEBOUNCE,
        },
    )
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let active = coordinator::active_conversation(&coordinator_ref)
                .await
                .unwrap();
            if active.id.as_deref() == Some("c-7") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Coordinator never saw the conversation");
    // The initial content went nowhere: no controller yet.
    tokio::time::sleep(DEBOUNCE).await;

    let service = Arc::new(RecordingService::default());
    let (controller_ref, _) = Actor::spawn(
        None,
        ControllerActor,
        ControllerArguments {
            bus: bus.clone(),
            store: store.clone(),
            service: service.clone(),
            settings: auto_settings(),
        },
    )
    .await
    .unwrap();

    let view = wait_view(&controller_ref, settled).await;
    assert_eq!(view.conversation_id.as_deref(), Some("c-7"));
    assert_eq!(view.title.as_deref(), Some("Pasta"));
    assert_eq!(view.content_hash, Some(fingerprint(&messages)));
    assert_eq!(service.contents().len(), 1);

    controller_ref.stop(None);
    observer.stop(None);
    coordinator_ref.stop(None);
    bus.stop(None);
    store.stop(None);
}

#[tokio::test]
async fn test_transcript_file_drives_processing() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let path = temp_dir.path().join("transcript.json");
    tokio::fs::write(
        &path,
        serde_json::json!({
            "id": "file-1",
            "title": "Sourdough",
            "messages": [
                {"role": "user", "content": "starter smells odd"},
                {"role": "assistant", "content": "feed it twice a day"},
                {"role": "system", "content": "ignored"}
            ]
        })
        .to_string(),
    )
    .await
    .unwrap();

    let doc = FileDocument::new(&path);
    let poller = doc.spawn_poller(Duration::from_millis(20));

    let service = Arc::new(RecordingService::default());
    let runtime = SyncRuntime::start(options(doc.clone(), service.clone()))
        .await
        .expect("Failed to start runtime");

    let view = wait_view(&runtime.controller, settled).await;
    assert_eq!(view.conversation_id.as_deref(), Some("file-1"));
    assert_eq!(view.title.as_deref(), Some("Sourdough"));
    assert_eq!(view.messages.len(), 2);

    poller.abort();
    runtime.shutdown().await;
}
