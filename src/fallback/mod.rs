// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Fallback chain execution
//!
//! One algorithm serves every modality. A [`FallbackChain`] holds candidate
//! services in priority order; [`FallbackChain::run`] skips the unavailable
//! ones, moves past services that fail, records every failure, and lands on
//! the simulation entry when nothing real is left. The only difference between
//! chat, speech, image and video chains is which services populate them and
//! what the [`Payload`] holds.

mod health;

pub use health::ServiceHealth;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ApiError, RelayError, Result, ServiceFailure};
use crate::llm::provider::ChatPrompt;
use crate::registry::Modality;

/// What a service produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Generated text
    Text(String),
    /// Inline media (audio, image, video bytes)
    Binary { mime_type: String, data: Vec<u8> },
    /// Media hosted by the provider
    Url { mime_type: String, url: String },
    /// The service answered but produced nothing meaningful
    Empty,
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Payload::Text(_) => Some("text/plain"),
            Payload::Binary { mime_type, .. } | Payload::Url { mime_type, .. } => Some(mime_type),
            Payload::Empty => None,
        }
    }
}

/// Result of a successful chain run, identical for every modality
#[derive(Debug, Clone, PartialEq)]
pub struct ModalityOutput {
    pub payload: Payload,
    /// Provider-reported details (model, voice, dimensions, ...)
    pub metadata: BTreeMap<String, String>,
    /// Produced by the simulation entry; callers present it as approximate
    pub is_simulation: bool,
}

impl ModalityOutput {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            metadata: BTreeMap::new(),
            is_simulation: false,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn simulated(mut self) -> Self {
        self.is_simulation = true;
        self
    }
}

/// Input handed to every service of a chain
#[derive(Debug, Clone)]
pub struct ModalityRequest {
    pub modality: Modality,
    pub prompt: ChatPrompt,
    /// Modality-specific options (voice, size, duration, ...)
    pub options: BTreeMap<String, String>,
}

impl ModalityRequest {
    pub fn new(modality: Modality, prompt: ChatPrompt) -> Self {
        Self {
            modality,
            prompt,
            options: BTreeMap::new(),
        }
    }

    pub fn text(modality: Modality, text: impl Into<String>) -> Self {
        Self::new(modality, ChatPrompt::new(text))
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// One entry of a fallback chain
#[async_trait]
pub trait ChainService: Send + Sync {
    fn service_id(&self) -> &str;

    /// Checked before `invoke`; `Err` carries the reason the service is skipped
    fn availability(&self, request: &ModalityRequest) -> std::result::Result<(), String>;

    /// Terminal, always-succeeding entry
    fn is_simulation(&self) -> bool {
        false
    }

    async fn invoke(&self, request: &ModalityRequest) -> Result<ModalityOutput>;
}

/// Successful run plus the failures recorded on the way
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub output: ModalityOutput,
    /// Service that produced the output
    pub service_id: String,
    pub failures: Vec<ServiceFailure>,
}

struct Entry {
    service: Arc<dyn ChainService>,
    priority: i32,
}

/// Ordered candidate services for one modality
pub struct FallbackChain {
    modality: Modality,
    entries: Vec<Entry>,
    service_timeout: Option<Duration>,
    health: Option<Arc<ServiceHealth>>,
}

impl FallbackChain {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            entries: Vec::new(),
            service_timeout: None,
            health: None,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Add a service. A service id may appear only once per chain.
    pub fn push(&mut self, service: Arc<dyn ChainService>, priority: i32) -> Result<()> {
        let id = service.service_id();
        if self.entries.iter().any(|e| e.service.service_id() == id) {
            return Err(RelayError::Configuration(format!(
                "Service {} appears twice in the {} chain",
                id, self.modality
            )));
        }
        self.entries.push(Entry { service, priority });
        Ok(())
    }

    pub fn with_service(mut self, service: Arc<dyn ChainService>, priority: i32) -> Result<Self> {
        self.push(service, priority)?;
        Ok(self)
    }

    /// Upper bound for a single service call
    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_timeout = Some(timeout);
        self
    }

    /// Demote services whose breaker is open
    pub fn with_health(mut self, health: Arc<ServiceHealth>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.entries.iter().any(|e| e.service.service_id() == service_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Execution order: priority (stable), demoted services behind healthy
    /// ones, the simulation entry last.
    fn ordered(&self) -> Vec<&Entry> {
        let mut ordered: Vec<&Entry> = self.entries.iter().collect();
        ordered.sort_by_key(|e| {
            let demoted = self
                .health
                .as_ref()
                .map(|h| h.is_demoted(e.service.service_id()))
                .unwrap_or(false);
            (e.service.is_simulation(), demoted, e.priority)
        });
        ordered
    }

    /// Service ids in the order `run` would try them
    pub fn service_ids(&self) -> Vec<String> {
        self.ordered()
            .iter()
            .map(|e| e.service.service_id().to_string())
            .collect()
    }

    /// Try each service in order until one succeeds
    pub async fn run(&self, request: &ModalityRequest) -> Result<ChainOutcome> {
        let mut failures = Vec::new();

        for entry in self.ordered() {
            let service = &entry.service;
            let id = service.service_id();

            if let Err(reason) = service.availability(request) {
                tracing::debug!(
                    target: "relay.fallback",
                    modality = %self.modality,
                    service = %id,
                    reason = %reason,
                    "service unavailable, skipping"
                );
                failures.push(ServiceFailure::unavailable(id, reason));
                continue;
            }

            tracing::debug!(target: "relay.fallback", modality = %self.modality, service = %id, "invoking service");
            let result = match self.service_timeout {
                Some(limit) => match tokio::time::timeout(limit, service.invoke(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Api(ApiError::Timeout)),
                },
                None => service.invoke(request).await,
            };

            match result {
                Ok(mut output) => {
                    if let Some(health) = &self.health {
                        health.record_success(id);
                    }
                    output.is_simulation |= service.is_simulation();
                    tracing::info!(
                        target: "relay.fallback",
                        modality = %self.modality,
                        service = %id,
                        failed_before = failures.len(),
                        simulation = output.is_simulation,
                        "chain succeeded"
                    );
                    return Ok(ChainOutcome {
                        output,
                        service_id: id.to_string(),
                        failures,
                    });
                }
                Err(e) if e.advances_chain() => {
                    tracing::warn!(
                        target: "relay.fallback",
                        modality = %self.modality,
                        service = %id,
                        transient = e.is_transient(),
                        error = %e,
                        "service failed, trying next"
                    );
                    if let Some(health) = &self.health {
                        health.record_failure(id);
                    }
                    failures.push(ServiceFailure::new(id, &e));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            target: "relay.fallback",
            modality = %self.modality,
            failures = failures.len(),
            "chain exhausted"
        );
        Err(RelayError::ChainExhausted(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Succeed(&'static str),
        Fail(fn() -> RelayError),
        Unavailable(&'static str),
        Sleep(Duration),
    }

    struct FakeService {
        id: &'static str,
        behaviour: Behaviour,
        simulation: bool,
        calls: AtomicUsize,
    }

    impl FakeService {
        fn new(id: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id,
                behaviour,
                simulation: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn simulation() -> Arc<Self> {
            Arc::new(Self {
                id: "simulation",
                behaviour: Behaviour::Succeed("approximate"),
                simulation: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChainService for FakeService {
        fn service_id(&self) -> &str {
            self.id
        }

        fn availability(&self, _request: &ModalityRequest) -> std::result::Result<(), String> {
            match self.behaviour {
                Behaviour::Unavailable(reason) => Err(reason.to_string()),
                _ => Ok(()),
            }
        }

        fn is_simulation(&self) -> bool {
            self.simulation
        }

        async fn invoke(&self, _request: &ModalityRequest) -> Result<ModalityOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Succeed(text) => Ok(ModalityOutput::new(Payload::Text(text.to_string()))),
                Behaviour::Fail(make) => Err(make()),
                Behaviour::Unavailable(_) => unreachable!("unavailable services are never invoked"),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(ModalityOutput::new(Payload::Empty))
                }
            }
        }
    }

    fn quota() -> RelayError {
        RelayError::Api(ApiError::QuotaExceeded("out of credits".to_string()))
    }

    fn rate_limited() -> RelayError {
        RelayError::Api(ApiError::RateLimited(5))
    }

    fn auth() -> RelayError {
        RelayError::Api(ApiError::AuthenticationFailed)
    }

    fn integrity() -> RelayError {
        RelayError::Integrity("bad digest".to_string())
    }

    fn request() -> ModalityRequest {
        ModalityRequest::text(Modality::Speech, "hello")
    }

    #[tokio::test]
    async fn test_last_service_succeeds_after_transient_failures() {
        let chain = FallbackChain::new(Modality::Chat)
            .with_service(FakeService::new("a", Behaviour::Fail(rate_limited)), 0)
            .unwrap()
            .with_service(FakeService::new("b", Behaviour::Fail(quota)), 1)
            .unwrap()
            .with_service(FakeService::new("c", Behaviour::Succeed("from c")), 2)
            .unwrap();

        let outcome = chain.run(&request()).await.unwrap();
        assert_eq!(outcome.service_id, "c");
        assert_eq!(outcome.output.payload.as_text(), Some("from c"));
        assert!(!outcome.output.is_simulation);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().all(|f| f.transient));
    }

    #[tokio::test]
    async fn test_hard_failure_also_advances() {
        let chain = FallbackChain::new(Modality::Image)
            .with_service(FakeService::new("a", Behaviour::Fail(auth)), 0)
            .unwrap()
            .with_service(FakeService::new("b", Behaviour::Succeed("ok")), 0)
            .unwrap();
        let outcome = chain.run(&request()).await.unwrap();
        assert_eq!(outcome.service_id, "b");
        assert!(!outcome.failures[0].transient);
    }

    #[tokio::test]
    async fn test_unavailable_service_is_skipped_without_invoke() {
        let missing = FakeService::new("google", Behaviour::Unavailable("no credential"));
        let chain = FallbackChain::new(Modality::Speech)
            .with_service(missing.clone(), 0)
            .unwrap()
            .with_service(FakeService::new("openai", Behaviour::Succeed("audio")), 1)
            .unwrap();
        let outcome = chain.run(&request()).await.unwrap();
        assert_eq!(outcome.service_id, "openai");
        assert_eq!(missing.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.failures[0].reason, "no credential");
    }

    #[tokio::test]
    async fn test_simulation_is_terminal_and_tagged() {
        let chain = FallbackChain::new(Modality::Speech)
            .with_service(FakeService::simulation(), -10)
            .unwrap()
            .with_service(FakeService::new("google", Behaviour::Unavailable("no credential")), 0)
            .unwrap()
            .with_service(FakeService::new("openai", Behaviour::Fail(quota)), 1)
            .unwrap();

        assert_eq!(chain.service_ids(), vec!["google", "openai", "simulation"]);
        let outcome = chain.run(&request()).await.unwrap();
        assert!(outcome.output.is_simulation);
        assert_eq!(outcome.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_every_failure() {
        let chain = FallbackChain::new(Modality::Video)
            .with_service(FakeService::new("a", Behaviour::Fail(quota)), 0)
            .unwrap()
            .with_service(FakeService::new("b", Behaviour::Unavailable("no key")), 1)
            .unwrap();
        match chain.run(&request()).await {
            Err(RelayError::ChainExhausted(failures)) => {
                let ids: Vec<_> = failures.iter().map(|f| f.service_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|o| o.service_id)),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let chain = FallbackChain::new(Modality::Chat);
        assert!(matches!(
            chain.run(&request()).await,
            Err(RelayError::ChainExhausted(f)) if f.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_integrity_and_cancel_propagate() {
        let after = FakeService::new("b", Behaviour::Succeed("never"));
        let chain = FallbackChain::new(Modality::Speech)
            .with_service(FakeService::new("a", Behaviour::Fail(integrity)), 0)
            .unwrap()
            .with_service(after.clone(), 1)
            .unwrap();
        assert!(matches!(chain.run(&request()).await, Err(RelayError::Integrity(_))));
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);

        let chain = FallbackChain::new(Modality::Chat)
            .with_service(FakeService::new("a", Behaviour::Fail(|| RelayError::Cancelled)), 0)
            .unwrap()
            .with_service(FakeService::simulation(), 1)
            .unwrap();
        assert!(matches!(chain.run(&request()).await, Err(RelayError::Cancelled)));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let mut chain = FallbackChain::new(Modality::Chat);
        chain.push(FakeService::new("a", Behaviour::Succeed("x")), 0).unwrap();
        let err = chain
            .push(FakeService::new("a", Behaviour::Succeed("y")), 1)
            .unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let mut chain = FallbackChain::new(Modality::Image);
        for id in ["x", "y", "z"] {
            chain.push(FakeService::new(id, Behaviour::Succeed("")), 5).unwrap();
        }
        chain.push(FakeService::new("first", Behaviour::Succeed("")), 1).unwrap();
        assert_eq!(chain.service_ids(), vec!["first", "x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_service_timeout_advances() {
        let chain = FallbackChain::new(Modality::Video)
            .with_service_timeout(Duration::from_millis(20))
            .with_service(FakeService::new("slow", Behaviour::Sleep(Duration::from_secs(5))), 0)
            .unwrap()
            .with_service(FakeService::new("fast", Behaviour::Succeed("done")), 1)
            .unwrap();
        let outcome = chain.run(&request()).await.unwrap();
        assert_eq!(outcome.service_id, "fast");
        assert!(outcome.failures[0].transient);
    }

    #[tokio::test]
    async fn test_health_demotes_repeatedly_failing_service() {
        let health = Arc::new(ServiceHealth::new(1, 60_000));
        let build = |health: &Arc<ServiceHealth>| {
            FallbackChain::new(Modality::Chat)
                .with_health(Arc::clone(health))
                .with_service(FakeService::new("flaky", Behaviour::Fail(rate_limited)), 0)
                .unwrap()
                .with_service(FakeService::new("steady", Behaviour::Succeed("ok")), 1)
                .unwrap()
        };

        let first = build(&health);
        assert_eq!(first.service_ids(), vec!["flaky", "steady"]);
        first.run(&request()).await.unwrap();

        let second = build(&health);
        assert_eq!(second.service_ids(), vec!["steady", "flaky"]);
        let outcome = second.run(&request()).await.unwrap();
        assert!(outcome.failures.is_empty());
    }
}
