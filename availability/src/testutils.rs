use crate::source::{ExistenceSource, FetchError, IdMapping, MappingSource};
use crate::types::{CheckStatus, PrimaryId, Resolution, SecondaryId, Waiter};
use async_trait::async_trait;
use axum::Router;
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::net::TcpListener;

/// One-off behaviour for the next call to a fake source. Calls with nothing
/// scripted answer from the fake's data.
#[derive(Clone, Copy, Debug)]
pub enum Reply {
    RateLimited,
    Fail,
}

impl Reply {
    fn into_error(self) -> FetchError {
        match self {
            Reply::RateLimited => FetchError::RateLimited,
            Reply::Fail => FetchError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

pub struct FakeMappingSource {
    mappings: HashMap<PrimaryId, Option<SecondaryId>>,
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Vec<PrimaryId>>>,
}

impl FakeMappingSource {
    /// Ids not listed are omitted from responses.
    pub fn new<I>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (PrimaryId, Option<SecondaryId>)>,
    {
        FakeMappingSource {
            mappings: mappings.into_iter().collect(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Vec<PrimaryId>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MappingSource for FakeMappingSource {
    async fn resolve(&self, ids: &[PrimaryId]) -> Result<Vec<IdMapping>, FetchError> {
        self.calls.lock().push(ids.to_vec());
        if let Some(reply) = self.script.lock().pop_front() {
            return Err(reply.into_error());
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.mappings.get(id).map(|secondary_id| IdMapping {
                    primary_id: *id,
                    secondary_id: *secondary_id,
                })
            })
            .collect())
    }
}

pub struct FakeExistenceSource {
    existing: HashSet<SecondaryId>,
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Vec<SecondaryId>>>,
}

impl FakeExistenceSource {
    pub fn new<I>(existing: I) -> Self
    where
        I: IntoIterator<Item = SecondaryId>,
    {
        FakeExistenceSource {
            existing: existing.into_iter().collect(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Vec<SecondaryId>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExistenceSource for FakeExistenceSource {
    async fn check(&self, ids: &[SecondaryId]) -> Result<Vec<SecondaryId>, FetchError> {
        self.calls.lock().push(ids.to_vec());
        if let Some(reply) = self.script.lock().pop_front() {
            return Err(reply.into_error());
        }
        Ok(ids
            .iter()
            .copied()
            .filter(|id| self.existing.contains(id))
            .collect())
    }
}

/// Collects resolutions from any number of waiters.
#[derive(Clone, Default)]
pub struct Results {
    received: Arc<Mutex<Vec<Resolution>>>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiter(&self) -> Waiter {
        let received = self.received.clone();
        Box::new(move |resolution| received.lock().push(resolution))
    }

    pub fn all(&self) -> Vec<Resolution> {
        self.received.lock().clone()
    }

    pub fn statuses(&self) -> Vec<CheckStatus> {
        self.received.lock().iter().map(|r| r.status).collect()
    }
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_mock_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
