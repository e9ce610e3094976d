//! Real-time broadcaster.
//!
//! Holds the per-user connection sets and a bounded write queue per
//! connection. The broadcaster exclusively owns the connection registry;
//! the notification service only ever looks connections up by user id.
//! Slow consumers that miss the per-write deadline are disconnected rather
//! than allowed to back-pressure the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use freerange_core::config::BroadcasterConfig;
use freerange_core::{Notification, NotificationStatus, NotifyError};
use freerange_store::NotificationRepository;

pub struct Broadcaster {
    connections: RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<String>>>>,
    notifications: Arc<dyn NotificationRepository>,
    config: BroadcasterConfig,
}

impl Broadcaster {
    pub fn new(notifications: Arc<dyn NotificationRepository>, config: BroadcasterConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            notifications,
            config,
        }
    }

    /// Register a connection for a user. The returned receiver yields JSON
    /// frames ready for the transport layer to wrap.
    pub async fn subscribe(&self, user_id: &str) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let id = Uuid::new_v4();
        let mut connections = self.connections.write().await;
        connections
            .entry(user_id.to_string())
            .or_default()
            .insert(id, tx);
        debug!(user_id, connection_id = %id, "stream connection registered");
        (id, rx)
    }

    pub async fn unsubscribe(&self, user_id: &str, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(set) = connections.get_mut(user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                connections.remove(user_id);
            }
        }
        debug!(user_id, connection_id = %connection_id, "stream connection removed");
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Write a notification frame to every live connection of the user.
    /// Returns how many connections accepted the frame within the write
    /// deadline; the ones that did not are dropped.
    pub async fn broadcast(&self, user_id: &str, notification: &Notification) -> usize {
        let frame = json!({
            "type": "notification",
            "notification": notification,
        })
        .to_string();
        self.broadcast_frame(user_id, frame).await
    }

    async fn broadcast_frame(&self, user_id: &str, frame: String) -> usize {
        let deadline = Duration::from_millis(self.config.write_deadline_ms);
        let senders: Vec<(Uuid, mpsc::Sender<String>)> = {
            let connections = self.connections.read().await;
            match connections.get(user_id) {
                Some(set) => set.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in senders {
            match tx.send_timeout(frame.clone(), deadline).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(user_id, connection_id = %id, error = %e, "dropping slow stream consumer");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            if let Some(set) = connections.get_mut(user_id) {
                for id in dead {
                    set.remove(&id);
                }
                if set.is_empty() {
                    connections.remove(user_id);
                }
            }
        }

        delivered
    }

    /// Push every undelivered in-app/stream notification for the user, in
    /// `created_at` order, and mark the ones that reached a connection as
    /// sent. Called on presence check-in so queued items jump the line.
    pub async fn flush_queued(&self, app_id: &str, user_id: &str) -> Result<usize, NotifyError> {
        let pending = self
            .notifications
            .find_undelivered_realtime(app_id, user_id)
            .await
            .map_err(NotifyError::from)?;

        let mut flushed = 0;
        for mut notification in pending {
            let delivered = self.broadcast(user_id, &notification).await;
            if delivered == 0 {
                // Still nobody listening; stop early, the rest would fail too.
                break;
            }
            flushed += 1;
            if notification.status == NotificationStatus::Queued {
                if notification.transition(NotificationStatus::Sent).is_ok() {
                    self.notifications
                        .update(&notification)
                        .await
                        .map_err(NotifyError::from)?;
                }
            }
        }
        if flushed > 0 {
            info!(user_id, flushed, "flushed queued notifications on check-in");
        }
        Ok(flushed)
    }

    /// Close every connection with a goodbye frame. Part of graceful
    /// shutdown; receivers observe the frame followed by channel close.
    pub async fn shutdown(&self) {
        let goodbye = json!({"type": "goodbye"}).to_string();
        let users: Vec<String> = {
            let connections = self.connections.read().await;
            connections.keys().cloned().collect()
        };
        for user_id in users {
            self.broadcast_frame(&user_id, goodbye.clone()).await;
        }
        self.connections.write().await.clear();
        info!("broadcaster shut down");
    }
}
