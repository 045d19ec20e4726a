//! Scripted `ApiTransport` for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::api::{ApiError, ApiRequest, ApiResponse, ApiTransport};
use crate::auth::store::{MemoryStore, PersistedStore, ACCESS_TOKEN_KEY};

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(ApiResponse),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
    /// `access_token` in the watched store at the moment of sending
    pub stored_access_token: Option<String>,
}

struct Rule {
    path: String,
    bearer: Option<String>,
    replies: VecDeque<Scripted>,
}

/// Replies are matched by path, optionally narrowed to one bearer credential.
/// Each rule's replies are consumed in order and the last one repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    delays: Mutex<Vec<(String, Duration)>>,
    sent: Mutex<Vec<SentRequest>>,
    beacons: Mutex<Vec<SentRequest>>,
    watched_store: Mutex<Option<Arc<MemoryStore>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, path: &str, bearer: Option<&str>, reply: Scripted) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules
            .iter_mut()
            .find(|r| r.path == path && r.bearer.as_deref() == bearer)
        {
            rule.replies.push_back(reply);
        } else {
            rules.push(Rule {
                path: path.to_string(),
                bearer: bearer.map(str::to_string),
                replies: VecDeque::from([reply]),
            });
        }
    }

    pub fn respond(&self, path: &str, response: ApiResponse) {
        self.push(path, None, Scripted::Respond(response));
    }

    pub fn respond_for_bearer(&self, path: &str, bearer: &str, response: ApiResponse) {
        self.push(path, Some(bearer), Scripted::Respond(response));
    }

    pub fn fail(&self, path: &str, message: &str) {
        self.push(path, None, Scripted::Fail(message.to_string()));
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().push((path.to_string(), delay));
    }

    pub fn watch_store(&self, store: Arc<MemoryStore>) {
        *self.watched_store.lock().unwrap() = Some(store);
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, path: &str) -> Vec<SentRequest> {
        self.sent().into_iter().filter(|r| r.path == path).collect()
    }

    pub fn beacons(&self) -> Vec<SentRequest> {
        self.beacons.lock().unwrap().clone()
    }

    fn record(&self, request: &ApiRequest, bearer: Option<&str>) -> SentRequest {
        let stored_access_token = self
            .watched_store
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|store| store.get(ACCESS_TOKEN_KEY).unwrap());
        SentRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
            body: request.body.clone(),
            stored_access_token,
        }
    }

    fn next_reply(&self, path: &str, bearer: Option<&str>) -> Scripted {
        let mut rules = self.rules.lock().unwrap();
        let index = rules
            .iter()
            .position(|r| r.path == path && r.bearer.is_some() && r.bearer.as_deref() == bearer)
            .or_else(|| rules.iter().position(|r| r.path == path && r.bearer.is_none()));
        match index {
            Some(i) => {
                let replies = &mut rules[i].replies;
                if replies.len() > 1 {
                    replies.pop_front().unwrap()
                } else {
                    replies.front().cloned().unwrap()
                }
            }
            None => Scripted::Respond(ApiResponse::new(404, r#"{"error": "not scripted"}"#)),
        }
    }
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, ApiError> {
        let sent = self.record(request, bearer);
        self.sent.lock().unwrap().push(sent);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(path, _)| *path == request.path)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(&request.path, bearer) {
            Scripted::Respond(response) => Ok(response),
            Scripted::Fail(message) => Err(ApiError::Network(message)),
        }
    }

    fn send_beacon(&self, request: ApiRequest, bearer: Option<String>) {
        let sent = self.record(&request, bearer.as_deref());
        self.beacons.lock().unwrap().push(sent);
    }
}
