//! Outbound calls from the coordinator to the participants.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use shared::{BizData, ParticipantError, ParticipantStore};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Try,
    Confirm,
    Cancel,
}

impl Phase {
    pub fn path(self) -> &'static str {
        match self {
            Phase::Try => "/try",
            Phase::Confirm => "/confirm",
            Phase::Cancel => "/cancel",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path()[1..])
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("{participant} {phase} request failed: {source}")]
    Transport {
        participant: String,
        phase: Phase,
        #[source]
        source: reqwest::Error,
    },

    #[error("{participant} {phase} answered {status}")]
    Status {
        participant: String,
        phase: Phase,
        status: u16,
    },

    #[error("{participant} {phase} failed: {source}")]
    Local {
        participant: String,
        phase: Phase,
        #[source]
        source: ParticipantError,
    },
}

#[async_trait]
pub trait Participant: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn send(&self, phase: Phase, biz: &BizData) -> Result<(), CallError>;
}

/// A participant service reached over HTTP. Timeouts count as failures.
pub struct HttpParticipant {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpParticipant {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            name: name.into(),
            base_url,
            client,
        })
    }
}

#[async_trait]
impl Participant for HttpParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, phase: Phase, biz: &BizData) -> Result<(), CallError> {
        let url = format!("{}{}", self.base_url, phase.path());
        let response = self
            .client
            .post(url)
            .json(biz)
            .send()
            .await
            .map_err(|source| CallError::Transport {
                participant: self.name.clone(),
                phase,
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CallError::Status {
                participant: self.name.clone(),
                phase,
                status: response.status().as_u16(),
            })
        }
    }
}

/// A participant store called in-process, without a network hop.
pub struct LocalParticipant<S> {
    name: String,
    store: S,
}

impl<S: ParticipantStore> LocalParticipant<S> {
    pub fn new(store: S) -> Self {
        Self {
            name: store.kind().name().to_string(),
            store,
        }
    }
}

#[async_trait]
impl<S: ParticipantStore> Participant for LocalParticipant<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, phase: Phase, biz: &BizData) -> Result<(), CallError> {
        let result = match phase {
            Phase::Try => self.store.try_reserve(biz).await.map(drop),
            Phase::Confirm => self.store.confirm(biz).await.map(drop),
            Phase::Cancel => self.store.cancel(biz).await.map(drop),
        };
        result.map_err(|source| CallError::Local {
            participant: self.name.clone(),
            phase,
            source,
        })
    }
}
