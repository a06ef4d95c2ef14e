//! In-memory session tracking.
//!
//! Sessions correlate a series of HTTP requests via an opaque id carried in
//! the [`super::protocol::SESSION_ID_HEADER`] header. State lives only for
//! the process lifetime and is never persisted; a restart clears everything.
//! The stored agent id is diagnostic — authorization always uses the
//! `agent_id` argument inside `tools/call` params.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    pub session_id: String,
    pub agent_id: Option<String>,
    pub initialized: bool,
}

/// Concurrent map of live sessions. Entries are created lazily on first
/// contact and reclaimed only by process restart.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, AgentSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the session for an incoming request, creating it when the
    /// transport supplied no id (or an unseen one). Returns the session id
    /// to echo back.
    pub fn resolve(&self, header_session_id: Option<&str>) -> String {
        let session_id = match header_session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.clone())
            .or_insert_with(|| AgentSession {
                session_id: session_id.clone(),
                agent_id: None,
                initialized: false,
            });
        session_id
    }

    /// Mark a session initialized, recording the caller-supplied agent id.
    pub fn initialize(&self, session_id: &str, agent_id: Option<String>) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| AgentSession {
                session_id: session_id.to_string(),
                agent_id: None,
                initialized: false,
            });
        session.initialized = true;
        if agent_id.is_some() {
            session.agent_id = agent_id;
        }
    }

    pub fn get(&self, session_id: &str) -> Option<AgentSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn resolve_generates_id_when_header_absent() {
        let store = SessionStore::new();
        let id = store.resolve(None);
        assert!(!id.is_empty());
        let session = store.get(&id).unwrap();
        assert!(!session.initialized);
        assert!(session.agent_id.is_none());
    }

    #[test]
    fn resolve_reuses_existing_session() {
        let store = SessionStore::new();
        let id = store.resolve(None);
        store.initialize(&id, Some("agent-1".to_string()));

        let same = store.resolve(Some(&id));
        assert_eq!(same, id);
        assert_eq!(store.count(), 1);
        assert!(store.get(&id).unwrap().initialized);
    }

    #[test]
    fn initialize_records_agent_id() {
        let store = SessionStore::new();
        let id = store.resolve(None);
        store.initialize(&id, Some("agent-1".to_string()));

        let session = store.get(&id).unwrap();
        assert!(session.initialized);
        assert_eq!(session.agent_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn initialize_without_agent_id_keeps_previous() {
        let store = SessionStore::new();
        let id = store.resolve(None);
        store.initialize(&id, Some("agent-1".to_string()));
        store.initialize(&id, None);
        assert_eq!(store.get(&id).unwrap().agent_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.resolve(None);
        let b = store.resolve(None);
        assert_ne!(a, b);

        store.initialize(&a, Some("agent-a".to_string()));

        let session_b = store.get(&b).unwrap();
        assert!(!session_b.initialized);
        assert!(session_b.agent_id.is_none());
    }

    #[test]
    fn concurrent_initializes_do_not_corrupt_each_other() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let id = format!("session-{}", i);
                store.resolve(Some(&id));
                store.initialize(&id, Some(format!("agent-{}", i)));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count(), 16);
        for i in 0..16 {
            let session = store.get(&format!("session-{}", i)).unwrap();
            assert!(session.initialized);
            assert_eq!(session.agent_id.as_deref(), Some(format!("agent-{}", i).as_str()));
        }
    }
}
