//! Background liveness signal for an active session.
//!
//! The scheduler pings the backend right away and then on every interval,
//! but only while an access token is present. At teardown a final beacon
//! goes out through the transport's non-blocking path. Failures are ignored.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::ApiRequest;
use crate::auth::SessionManager;
use crate::config::Config;

pub struct HeartbeatScheduler {
    session: Arc<SessionManager>,
    interval: Duration,
    path: String,
}

impl HeartbeatScheduler {
    pub fn new(session: Arc<SessionManager>, interval: Duration, path: impl Into<String>) -> Self {
        Self {
            session,
            interval,
            path: path.into(),
        }
    }

    pub fn from_config(session: Arc<SessionManager>, config: &Config) -> Self {
        Self::new(session, config.heartbeat_interval(), config.heartbeat_path.clone())
    }

    /// Spawn the timer task. Must be called inside a tokio runtime.
    pub fn start(self) -> HeartbeatHandle {
        let session = Arc::clone(&self.session);
        let path = self.path.clone();
        let interval = self.interval;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        beat(&session, &path).await;
                    }
                    // A dropped handle closes the channel and ends the loop too
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Heartbeat loop exited");
        });

        HeartbeatHandle {
            session: self.session,
            path: self.path,
            shutdown,
            task: Some(task),
        }
    }
}

/// Send one heartbeat if a token is present. Returns whether a call was made.
async fn beat(session: &SessionManager, path: &str) -> bool {
    let Some(token) = session.access_token() else {
        debug!("No access token, skipping heartbeat");
        return false;
    };

    let request = ApiRequest::post(path, json!({}));
    match session.transport().send(&request, Some(&token)).await {
        Ok(response) if response.is_success() => debug!("Heartbeat acknowledged"),
        Ok(response) => debug!(status = response.status, "Heartbeat rejected, ignoring"),
        Err(e) => debug!(error = %e, "Heartbeat failed, ignoring"),
    }
    true
}

/// Running heartbeat. Dropping the handle stops the timer.
pub struct HeartbeatHandle {
    session: Arc<SessionManager>,
    path: String,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal shutdown and wait until the task has actually ended.
    pub async fn stop(mut self) {
        // Err only means the loop already exited
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Heartbeat task ended abnormally");
            }
            debug!("Heartbeat stopped");
        }
    }

    /// Fire the teardown beacon (if a token is present) without waiting for it.
    pub fn send_beacon(&self) -> bool {
        let Some(token) = self.session.access_token() else {
            return false;
        };
        self.session
            .transport()
            .send_beacon(ApiRequest::post(self.path.clone(), json!({})), Some(token));
        true
    }

    /// Page teardown: final beacon, then stop the timer.
    pub async fn teardown(self) {
        self.send_beacon();
        self.stop().await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::{MemoryStore, PersistedStore, ACCESS_TOKEN_KEY, USER_KEY};
    use crate::api::ApiResponse;
    use crate::notify::TracingNotifier;
    use crate::testing::ScriptedTransport;

    const PATH: &str = "/study/heartbeat";
    const INTERVAL: Duration = Duration::from_secs(60);

    fn session(with_token: bool) -> (Arc<ScriptedTransport>, Arc<SessionManager>) {
        let store = Arc::new(MemoryStore::new());
        if with_token {
            store.set(ACCESS_TOKEN_KEY, "T1").unwrap();
            store.set(USER_KEY, r#"{"name": "A"}"#).unwrap();
        }
        let transport = ScriptedTransport::new();
        transport.respond(PATH, ApiResponse::new(200, r#"{"ok": true}"#));
        let session =
            SessionManager::new(transport.clone(), store, Arc::new(TracingNotifier)).unwrap();
        (transport, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_immediately_and_on_interval() {
        let (transport, session) = session(true);
        let handle = HeartbeatScheduler::new(session, INTERVAL, PATH).start();

        tokio::time::sleep(Duration::from_secs(150)).await;
        let beats = transport.sent_to(PATH);
        assert_eq!(beats.len(), 3);
        assert!(beats.iter().all(|b| b.bearer.as_deref() == Some("T1")));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_without_token() {
        let (transport, session) = session(false);
        let handle = HeartbeatScheduler::new(session, INTERVAL, PATH).start();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(transport.sent().is_empty());
        assert!(handle.is_running());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_follows_logout() {
        let (transport, session) = session(true);
        let handle = HeartbeatScheduler::new(Arc::clone(&session), INTERVAL, PATH).start();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.sent_to(PATH).len(), 1);

        session.logout().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.sent_to(PATH).len(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_timer() {
        let (transport, session) = session(true);
        let handle = HeartbeatScheduler::new(session, INTERVAL, PATH).start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.sent_to(PATH).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_loop_to_exit() {
        let (_, session) = session(true);
        let handle = HeartbeatScheduler::new(Arc::clone(&session), INTERVAL, PATH).start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_running());

        // The task held the only other clone of the session
        handle.stop().await;
        assert_eq!(Arc::strong_count(&session), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_heartbeats() {
        let (transport, session) = session(true);
        let handle = HeartbeatScheduler::new(session, INTERVAL, PATH).start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.sent_to(PATH).len(), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.sent_to(PATH).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_sends_beacon_with_token() {
        let (transport, session) = session(true);
        let handle = HeartbeatScheduler::new(session, INTERVAL, PATH).start();

        handle.teardown().await;
        let beacons = transport.beacons();
        assert_eq!(beacons.len(), 1);
        assert_eq!(beacons[0].path, PATH);
        assert_eq!(beacons[0].bearer.as_deref(), Some("T1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_without_token_sends_nothing() {
        let (transport, session) = session(false);
        let handle = HeartbeatScheduler::new(session, INTERVAL, PATH).start();

        handle.teardown().await;
        assert!(transport.beacons().is_empty());
    }

    #[tokio::test]
    async fn test_beat_reports_whether_it_sent() {
        let (_, with) = session(true);
        let (_, without) = session(false);
        assert!(beat(&with, PATH).await);
        assert!(!beat(&without, PATH).await);
    }
}
