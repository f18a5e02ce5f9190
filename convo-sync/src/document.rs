//! Foreign document access.
//!
//! The observer never owns the conversation it watches; it reads it through
//! a [`DocumentSource`]. Extraction is synchronous and must not perform I/O:
//! sources keep a parsed cache and bump a revision counter whenever that
//! cache changes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use shared_types::{Message, Role};
use tokio::sync::watch;

/// Which conversation the document is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub conversation_id: String,
    pub title: Option<String>,
}

pub trait DocumentSource: Send + Sync + 'static {
    /// Best-effort read of the current snapshot. Malformed items are skipped;
    /// an empty vec means nothing usable was found.
    fn extract(&self) -> Vec<Message>;

    fn location(&self) -> Option<Location>;

    /// Change notifications. The value is an opaque revision counter.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("item is not an object")]
    NotAnObject,
    #[error("item has no role")]
    MissingRole,
    #[error("unsupported role: {0}")]
    UnsupportedRole(String),
    #[error("item has no text content")]
    MissingContent,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

// ============================================================================
// Item Parsing
// ============================================================================

/// Parse raw document items, skipping any that fail.
pub fn parse_items(items: &[Value]) -> Vec<Message> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match parse_item(item) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(index, error = %e, "Skipping unreadable document item");
                None
            }
        })
        .collect()
}

/// Accepts `{role, content}` (content as string or list of string parts) and
/// `{author: {role}, content: {parts: [...]}}`.
pub fn parse_item(item: &Value) -> Result<Message, DocumentError> {
    let obj = item.as_object().ok_or(DocumentError::NotAnObject)?;

    let role = obj
        .get("role")
        .or_else(|| obj.get("author").and_then(|a| a.get("role")))
        .and_then(Value::as_str)
        .ok_or(DocumentError::MissingRole)?;
    let role = parse_role(role)?;

    let content = match obj.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => join_parts(parts)?,
        Some(Value::Object(inner)) => match inner.get("parts") {
            Some(Value::Array(parts)) => join_parts(parts)?,
            _ => return Err(DocumentError::MissingContent),
        },
        _ => return Err(DocumentError::MissingContent),
    };

    Ok(Message::new(role, content.trim()))
}

fn parse_role(raw: &str) -> Result<Role, DocumentError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "user" | "human" => Ok(Role::User),
        "assistant" | "ai" | "model" => Ok(Role::Assistant),
        other => Err(DocumentError::UnsupportedRole(other.to_string())),
    }
}

fn join_parts(parts: &[Value]) -> Result<String, DocumentError> {
    let texts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
    if texts.is_empty() {
        return Err(DocumentError::MissingContent);
    }
    Ok(texts.join("\n"))
}

#[derive(Debug, Clone, Default)]
struct DocumentState {
    location: Option<Location>,
    items: Vec<Value>,
}

fn read_state(lock: &RwLock<DocumentState>) -> DocumentState {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_state(lock: &RwLock<DocumentState>, f: impl FnOnce(&mut DocumentState)) {
    match lock.write() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

// ============================================================================
// InMemoryDocument
// ============================================================================

/// Document held in memory and mutated programmatically. Used by embedders
/// that already receive the conversation from elsewhere, and by tests.
pub struct InMemoryDocument {
    state: RwLock<DocumentState>,
    revision: watch::Sender<u64>,
}

impl InMemoryDocument {
    pub fn new() -> Arc<Self> {
        let (revision, _rx) = watch::channel(0);
        Arc::new(Self {
            state: RwLock::new(DocumentState::default()),
            revision,
        })
    }

    /// Show a different conversation; its items start empty.
    pub fn navigate(&self, conversation_id: impl Into<String>, title: Option<String>) {
        write_state(&self.state, |state| {
            state.location = Some(Location {
                conversation_id: conversation_id.into(),
                title,
            });
            state.items.clear();
        });
        self.bump();
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        write_state(&self.state, |state| {
            if let Some(location) = state.location.as_mut() {
                location.title = Some(title);
            }
        });
        self.bump();
    }

    pub fn push_item(&self, item: Value) {
        write_state(&self.state, |state| state.items.push(item));
        self.bump();
    }

    pub fn push_message(&self, message: &Message) {
        self.push_item(serde_json::json!({
            "role": message.role.as_str(),
            "content": message.content,
        }));
    }

    /// Replace the content of the last item, as token streaming does.
    pub fn update_last(&self, content: impl Into<String>) {
        let content = content.into();
        write_state(&self.state, |state| {
            if let Some(Value::Object(last)) = state.items.last_mut() {
                last.insert("content".to_string(), Value::String(content));
            }
        });
        self.bump();
    }

    pub fn set_messages(&self, messages: &[Message]) {
        let items = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        write_state(&self.state, |state| state.items = items);
        self.bump();
    }

    /// Signal a mutation without changing content (attribute churn, re-render).
    pub fn touch(&self) {
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl DocumentSource for InMemoryDocument {
    fn extract(&self) -> Vec<Message> {
        parse_items(&read_state(&self.state).items)
    }

    fn location(&self) -> Option<Location> {
        read_state(&self.state).location
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

// ============================================================================
// FileDocument
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDocument {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    messages: Vec<Value>,
}

/// A JSON transcript on disk, re-read by a poller:
///
/// ```json
/// { "id": "conv-1", "title": "Bread", "messages": [{"role": "user", "content": "hi"}] }
/// ```
pub struct FileDocument {
    path: PathBuf,
    state: RwLock<DocumentState>,
    last_raw: RwLock<Option<String>>,
    revision: watch::Sender<u64>,
}

impl FileDocument {
    pub fn new(path: impl AsRef<Path>) -> Arc<Self> {
        let (revision, _rx) = watch::channel(0);
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            state: RwLock::new(DocumentState::default()),
            last_raw: RwLock::new(None),
            revision,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. Returns `true` when the cached document changed.
    pub async fn refresh(&self) -> Result<bool, DocumentError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DocumentError::Io(e.to_string()))?;

        let unchanged = match self.last_raw.read() {
            Ok(guard) => guard.as_deref() == Some(raw.as_str()),
            Err(poisoned) => poisoned.into_inner().as_deref() == Some(raw.as_str()),
        };
        if unchanged {
            return Ok(false);
        }

        let parsed: RawDocument =
            serde_json::from_str(&raw).map_err(|e| DocumentError::Parse(e.to_string()))?;

        write_state(&self.state, |state| {
            state.location = parsed.id.map(|conversation_id| Location {
                conversation_id,
                title: parsed.title,
            });
            state.items = parsed.messages;
        });
        match self.last_raw.write() {
            Ok(mut guard) => *guard = Some(raw),
            Err(poisoned) => *poisoned.into_inner() = Some(raw),
        }
        self.revision.send_modify(|rev| *rev += 1);
        Ok(true)
    }

    /// Poll the file on a fixed interval until the returned task is aborted.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let doc = Arc::clone(self);
        let interval = interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match doc.refresh().await {
                    Ok(true) => {
                        tracing::trace!(path = %doc.path.display(), "Document changed on disk")
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::debug!(path = %doc.path.display(), error = %e, "Document refresh failed")
                    }
                }
            }
        })
    }
}

impl DocumentSource for FileDocument {
    fn extract(&self) -> Vec<Message> {
        parse_items(&read_state(&self.state).items)
    }

    fn location(&self) -> Option<Location> {
        read_state(&self.state).location
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_items_skips_malformed_entries() {
        let items = vec![
            json!({"role": "user", "content": "hi"}),
            json!("not an object"),
            json!({"role": "system", "content": "be nice"}),
            json!({"content": "no role"}),
            json!({"author": {"role": "assistant"}, "content": {"parts": ["hel", "lo"]}}),
            json!({"role": "assistant", "content": 42}),
        ];

        let messages = parse_items(&items);
        assert_eq!(
            messages,
            vec![Message::user("hi"), Message::assistant("hel\nlo")]
        );
    }

    #[test]
    fn test_parse_item_normalizes_roles() {
        let human = parse_item(&json!({"role": "Human", "content": "  q  "})).unwrap();
        assert_eq!(human, Message::user("q"));
        let model = parse_item(&json!({"role": "model", "content": ["a", "b"]})).unwrap();
        assert_eq!(model, Message::assistant("a\nb"));
        assert!(matches!(
            parse_item(&json!({"role": "tool", "content": "x"})),
            Err(DocumentError::UnsupportedRole(_))
        ));
    }

    #[test]
    fn test_in_memory_document_tracks_location_and_revisions() {
        let doc = InMemoryDocument::new();
        let rx = doc.subscribe();
        assert!(doc.extract().is_empty());
        assert!(doc.location().is_none());

        doc.navigate("c-1", Some("Bread".to_string()));
        doc.push_message(&Message::user("hi"));
        doc.push_message(&Message::assistant("hel"));
        doc.update_last("hello");

        assert_eq!(
            doc.extract(),
            vec![Message::user("hi"), Message::assistant("hello")]
        );
        assert_eq!(
            doc.location(),
            Some(Location {
                conversation_id: "c-1".to_string(),
                title: Some("Bread".to_string())
            })
        );
        assert_eq!(*rx.borrow(), 4);

        doc.navigate("c-2", None);
        assert!(doc.extract().is_empty());
    }

    #[tokio::test]
    async fn test_file_document_refresh_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.json");
        std::fs::write(
            &path,
            json!({
                "id": "c-1",
                "title": "Bread",
                "messages": [{"role": "user", "content": "hi"}, {"oops": true}]
            })
            .to_string(),
        )
        .unwrap();

        let doc = FileDocument::new(&path);
        assert!(doc.refresh().await.unwrap());
        assert!(!doc.refresh().await.unwrap());
        assert_eq!(doc.extract(), vec![Message::user("hi")]);
        assert_eq!(doc.location().unwrap().conversation_id, "c-1");

        std::fs::write(
            &path,
            json!({
                "id": "c-1",
                "title": "Bread",
                "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]
            })
            .to_string(),
        )
        .unwrap();
        assert!(doc.refresh().await.unwrap());
        assert_eq!(doc.extract().len(), 2);
    }

    #[tokio::test]
    async fn test_file_document_missing_file_is_an_error_not_a_panic() {
        let doc = FileDocument::new("/definitely/not/here.json");
        assert!(matches!(doc.refresh().await, Err(DocumentError::Io(_))));
        assert!(doc.extract().is_empty());
    }
}
