use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use verser_db::models::NewMessage;
use verser_db::{SharedStorage, with_storage};
use verser_types::events::{RelayCommand, RelayEvent};
use verser_types::models::{MessageKind, UserStatus};

/// Frames queued for a single socket's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Utf8Bytes),
    Ping,
}

struct ConnectionEntry {
    /// Set by `join`, overwritten by a later `join`
    user_id: Option<i64>,
    /// Cleared before every heartbeat ping, set again by the pong
    alive: bool,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Owns the set of open relay connections and fans events out to them.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    storage: SharedStorage,

    /// conn_id -> connection state. Dropping an entry drops its sender,
    /// which ends the socket's writer task.
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

impl Relay {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                storage,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Add a freshly accepted socket. Returns (conn_id, outbound receiver).
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<Outbound>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionEntry {
                user_id: None,
                alive: true,
                tx,
            },
        );
        (conn_id, rx)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// The user bound to a connection, if it has sent `join`.
    pub async fn bound_user(&self, conn_id: Uuid) -> Option<i64> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .and_then(|c| c.user_id)
    }

    pub async fn pong(&self, conn_id: Uuid) {
        if let Some(conn) = self.inner.connections.write().await.get_mut(&conn_id) {
            conn.alive = true;
        }
    }

    /// Parse and handle one text frame. Malformed frames are logged and dropped.
    pub async fn handle_text(&self, conn_id: Uuid, text: &str) {
        match serde_json::from_str::<RelayCommand>(text) {
            Ok(cmd) => self.handle_command(conn_id, cmd).await,
            Err(e) => {
                let mut end = text.len().min(200);
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                warn!("conn {} bad frame: {} -- raw: {}", conn_id, e, &text[..end]);
            }
        }
    }

    pub async fn handle_command(&self, conn_id: Uuid, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Join { user_id } => self.join(conn_id, user_id).await,

            RelayCommand::SendMessage { .. } => {
                let Some((user_id, conversation_id, content)) = cmd.outgoing_message() else {
                    warn!("conn {} dropped incomplete send_message", conn_id);
                    return;
                };
                self.send_message(user_id, conversation_id, content.to_string())
                    .await;
            }

            RelayCommand::Typing {
                user_id,
                conversation_id,
                is_typing,
            } => {
                trace!("user {} typing={} in {}", user_id, is_typing, conversation_id);
                self.broadcast_except(
                    conn_id,
                    &RelayEvent::UserTyping {
                        user_id,
                        conversation_id,
                        is_typing,
                    },
                )
                .await;
            }

            RelayCommand::Unknown => {}
        }
    }

    async fn join(&self, conn_id: Uuid, user_id: i64) {
        {
            let mut connections = self.inner.connections.write().await;
            let Some(conn) = connections.get_mut(&conn_id) else {
                return;
            };
            conn.user_id = Some(user_id);
        }

        info!("user {} joined relay on conn {}", user_id, conn_id);

        match with_storage(&self.inner.storage, move |s| {
            s.update_user_status(user_id, UserStatus::Online)
        })
        .await
        {
            Ok(Some(_)) => {}
            Ok(None) => debug!("join for unknown user {}", user_id),
            Err(e) => {
                error!("failed to mark user {} online: {:#}", user_id, e);
                return;
            }
        }

        self.broadcast_except(
            conn_id,
            &RelayEvent::UserStatus {
                user_id,
                status: UserStatus::Online,
            },
        )
        .await;
    }

    async fn send_message(&self, user_id: i64, conversation_id: i64, content: String) {
        let persisted = with_storage(&self.inner.storage, move |s| {
            let message = s.create_message(NewMessage {
                user_id,
                conversation_id,
                content,
                kind: MessageKind::Text,
            })?;
            let user = s.get_user(user_id)?;
            Ok((message, user))
        })
        .await;

        let (message, user) = match persisted {
            Ok(found) => found,
            Err(e) => {
                error!(
                    "failed to persist message from user {} in conversation {}: {:#}",
                    user_id, conversation_id, e
                );
                return;
            }
        };

        debug!(
            "message {} from user {} in conversation {}",
            message.id, user_id, conversation_id
        );

        self.broadcast_all(&RelayEvent::NewMessage {
            message,
            user: user.map(Into::into),
        })
        .await;
    }

    /// Remove a connection after its socket closed. Safe to call more than
    /// once; only the first call for a conn_id has any effect.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let offline = {
            let mut connections = self.inner.connections.write().await;
            let Some(entry) = connections.remove(&conn_id) else {
                return;
            };
            entry
                .user_id
                .filter(|uid| !connections.values().any(|c| c.user_id == Some(*uid)))
        };

        debug!("conn {} left relay", conn_id);

        if let Some(user_id) = offline {
            self.mark_offline(user_id).await;
        }
    }

    /// One heartbeat pass: evict connections that never answered the last
    /// ping, then ping everyone left. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let (evicted, offline) = {
            let mut connections = self.inner.connections.write().await;

            let dead: Vec<Uuid> = connections
                .iter()
                .filter(|(_, c)| !c.alive)
                .map(|(id, _)| *id)
                .collect();

            let mut evicted_users = HashSet::new();
            for conn_id in &dead {
                if let Some(entry) = connections.remove(conn_id) {
                    warn!("conn {} missed heartbeat, terminating", conn_id);
                    evicted_users.extend(entry.user_id);
                }
            }

            for conn in connections.values_mut() {
                conn.alive = false;
                let _ = conn.tx.send(Outbound::Ping);
            }

            let offline: Vec<i64> = evicted_users
                .into_iter()
                .filter(|uid| !connections.values().any(|c| c.user_id == Some(*uid)))
                .collect();

            (dead.len(), offline)
        };

        for user_id in offline {
            self.mark_offline(user_id).await;
        }

        evicted
    }

    /// Persist and announce `offline`, unless the user has a bound connection
    /// again. The read guard is held to the end so a concurrent `join` (which
    /// needs the write lock) lands its `online` after this.
    async fn mark_offline(&self, user_id: i64) {
        let connections = self.inner.connections.read().await;
        if connections.values().any(|c| c.user_id == Some(user_id)) {
            debug!("user {} rejoined before going offline", user_id);
            return;
        }

        info!("user {} went offline", user_id);

        if let Err(e) = with_storage(&self.inner.storage, move |s| {
            s.update_user_status(user_id, UserStatus::Offline)
        })
        .await
        {
            error!("failed to mark user {} offline: {:#}", user_id, e);
            return;
        }

        let event = RelayEvent::UserStatus {
            user_id,
            status: UserStatus::Offline,
        };
        if let Some(text) = encode(&event) {
            deliver(&connections, &text, None);
        }
    }

    /// Send an event to every open connection.
    pub async fn broadcast_all(&self, event: &RelayEvent) {
        self.fan_out(event, None).await;
    }

    /// Send an event to every open connection except `conn_id`.
    pub async fn broadcast_except(&self, conn_id: Uuid, event: &RelayEvent) {
        self.fan_out(event, Some(conn_id)).await;
    }

    async fn fan_out(&self, event: &RelayEvent, skip: Option<Uuid>) {
        let Some(text) = encode(event) else {
            return;
        };
        deliver(&*self.inner.connections.read().await, &text, skip);
    }
}

fn encode(event: &RelayEvent) -> Option<Utf8Bytes> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            error!("failed to serialize relay event: {}", e);
            None
        }
    }
}

fn deliver(connections: &HashMap<Uuid, ConnectionEntry>, text: &Utf8Bytes, skip: Option<Uuid>) {
    for (id, conn) in connections {
        if Some(*id) == skip {
            continue;
        }
        // Receiver gone means the socket is already closing
        let _ = conn.tx.send(Outbound::Text(text.clone()));
    }
}
