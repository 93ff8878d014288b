// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Router dispatcher
//!
//! Entry point for one conversation. Each request is analyzed, then handed
//! either to a specialized agent or straight to the chat fallback chain led
//! by the configured provider. Self-hosted providers are made available
//! through the model lifecycle manager first.
//!
//! Phases per request:
//! `idle → analyzing → (ensuring_model) → dispatching → streaming → idle`.
//! Only one request may be outside `idle` at a time; a second one is
//! rejected with [`RelayError::Busy`]. Settings arrive as a snapshot with
//! every request and are never mutated here.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::agents::{AgentExecutor, PromptedAgentExecutor};
use crate::analyzer::{analyze, AgentType, AnalysisHints, InputAnalysis};
use crate::config::{ConfigSnapshot, CredentialStore};
use crate::error::{RelayError, Result, ServiceFailure};
use crate::fallback::{ChainOutcome, ModalityRequest, Payload, ServiceHealth};
use crate::llm::provider::{ChatBackend, ChatPrompt, ProviderConfig};
use crate::models::ModelLifecycleManager;
use crate::progress::{NoopSink, ProgressSink};
use crate::registry::Modality;
use crate::request::Request;
use crate::services::{ChainBuilder, ChatHooks};
use crate::session::{is_meaningless, SessionControl};

type ChunkObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Where a request currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterPhase {
    Idle,
    Analyzing,
    EnsuringModel,
    Dispatching,
    Streaming,
}

impl RouterPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterPhase::Idle => "idle",
            RouterPhase::Analyzing => "analyzing",
            RouterPhase::EnsuringModel => "ensuring_model",
            RouterPhase::Dispatching => "dispatching",
            RouterPhase::Streaming => "streaming",
        }
    }
}

impl fmt::Display for RouterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path a request took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Agent(AgentType),
    Direct,
}

/// What the caller should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Nothing was produced; drop any placeholder
    Empty,
    /// Cancelled by the user; partial output is discarded
    Cancelled,
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub analysis: InputAnalysis,
    pub route: Route,
    pub reply: Reply,
    /// Service that produced the reply, when one did
    pub service_id: Option<String>,
    pub is_simulation: bool,
    /// Services that were skipped or failed before the reply
    pub failures: Vec<ServiceFailure>,
}

struct PathResult {
    reply: Reply,
    service_id: Option<String>,
    is_simulation: bool,
    failures: Vec<ServiceFailure>,
}

impl PathResult {
    fn cancelled() -> Self {
        Self {
            reply: Reply::Cancelled,
            service_id: None,
            is_simulation: false,
            failures: Vec::new(),
        }
    }
}

/// Cancellation handle of the request in flight
#[derive(Clone, Default)]
struct InFlight {
    notify: Arc<Notify>,
    requested: Arc<AtomicBool>,
    session: Arc<Mutex<Option<SessionControl>>>,
}

impl InFlight {
    fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Some(session) = lock(&self.session).as_ref() {
            session.cancel();
        }
        // Stores a permit if nothing is waiting yet.
        self.notify.notify_one();
    }

    /// Remember the session so a later cancel reaches it
    fn attach(&self, control: SessionControl) {
        if self.requested.load(Ordering::SeqCst) {
            control.cancel();
        }
        *lock(&self.session) = Some(control);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "relay.router", "Router lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Resets the busy flag and phase however the request ends
struct BusyGuard<'a> {
    router: &'a RouterDispatcher,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.router.in_flight) = None;
        set_phase(&self.router.phase, RouterPhase::Idle);
        self.router.busy.store(false, Ordering::Release);
    }
}

fn set_phase(phase: &Mutex<RouterPhase>, next: RouterPhase) {
    let mut current = lock(phase);
    if *current != next {
        tracing::debug!(target: "relay.router", from = %*current, to = %next, "phase");
        *current = next;
    }
}

/// Dispatches requests of one conversation
pub struct RouterDispatcher {
    credentials: Arc<dyn CredentialStore>,
    lifecycle: Arc<ModelLifecycleManager>,
    agents: Option<Arc<dyn AgentExecutor>>,
    sink: Arc<dyn ProgressSink>,
    health: Arc<ServiceHealth>,
    chat_backend: Option<Arc<dyn ChatBackend>>,
    busy: AtomicBool,
    phase: Arc<Mutex<RouterPhase>>,
    in_flight: Mutex<Option<InFlight>>,
}

impl RouterDispatcher {
    pub fn new(credentials: Arc<dyn CredentialStore>, lifecycle: Arc<ModelLifecycleManager>) -> Self {
        Self {
            credentials,
            lifecycle,
            agents: None,
            sink: Arc::new(NoopSink),
            health: Arc::new(ServiceHealth::default()),
            chat_backend: None,
            busy: AtomicBool::new(false),
            phase: Arc::new(Mutex::new(RouterPhase::Idle)),
            in_flight: Mutex::new(None),
        }
    }

    /// Use a custom specialized-agent executor instead of the prompted one
    pub fn with_agents(mut self, agents: Arc<dyn AgentExecutor>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_health(mut self, health: Arc<ServiceHealth>) -> Self {
        self.health = health;
        self
    }

    /// Use one chat backend for every real provider
    pub fn with_chat_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat_backend = Some(backend);
        self
    }

    pub fn phase(&self) -> RouterPhase {
        *lock(&self.phase)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancel the request in flight. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match lock(&self.in_flight).as_ref() {
            Some(in_flight) => {
                tracing::info!(target: "relay.router", phase = %self.phase(), "cancel requested");
                in_flight.cancel();
                true
            }
            None => false,
        }
    }

    fn acquire(&self) -> Result<(BusyGuard<'_>, InFlight)> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(target: "relay.router", phase = %self.phase(), "rejecting request, busy");
            return Err(RelayError::Busy);
        }
        let in_flight = InFlight::default();
        *lock(&self.in_flight) = Some(in_flight.clone());
        Ok((BusyGuard { router: self }, in_flight))
    }

    fn chains(&self, snapshot: &ConfigSnapshot) -> ChainBuilder {
        let chains = ChainBuilder::new(Arc::clone(snapshot), Arc::clone(&self.credentials))
            .with_health(Arc::clone(&self.health))
            .with_lifecycle(Arc::clone(&self.lifecycle))
            .with_sink(Arc::clone(&self.sink));
        match &self.chat_backend {
            Some(backend) => chains.with_chat_backend(Arc::clone(backend)),
            None => chains,
        }
    }

    fn chat_hooks(&self, in_flight: &InFlight, observer: ChunkObserver) -> ChatHooks {
        let phase = Arc::clone(&self.phase);
        let in_flight = in_flight.clone();
        ChatHooks::new()
            .with_chunk(move |text| observer(text))
            .with_session(move |control| {
                set_phase(&phase, RouterPhase::Streaming);
                in_flight.attach(control);
            })
    }

    /// Make sure a self-hosted provider's model is installed
    async fn ensure_model(&self, config: &ProviderConfig) -> Result<()> {
        if !config.is_self_hosted() {
            return Ok(());
        }
        set_phase(&self.phase, RouterPhase::EnsuringModel);
        self.lifecycle.ensure_available(&config.model_id).await
    }

    /// Route and answer one request
    pub async fn dispatch(&self, snapshot: ConfigSnapshot, request: Request) -> Result<DispatchOutcome> {
        self.dispatch_streaming(snapshot, request, |_| {}).await
    }

    /// Route and answer one request, reporting accumulated output as it grows
    pub async fn dispatch_streaming<F>(
        &self,
        snapshot: ConfigSnapshot,
        request: Request,
        on_chunk: F,
    ) -> Result<DispatchOutcome>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let (_guard, in_flight) = self.acquire()?;
        let observer: ChunkObserver = Arc::new(on_chunk);

        set_phase(&self.phase, RouterPhase::Analyzing);
        let analysis = analyze(&request, &AnalysisHints::from(&snapshot.router));
        let route = if analysis.needs_router_agent {
            Route::Agent(analysis.suggested_agent)
        } else {
            Route::Direct
        };
        tracing::info!(
            target: "relay.router",
            agent = %analysis.suggested_agent,
            confidence = analysis.confidence,
            route = ?route,
            "routing request"
        );

        let work = async {
            match route {
                Route::Agent(agent) => {
                    self.run_agent(&snapshot, agent, &request, &in_flight, Arc::clone(&observer))
                        .await
                }
                Route::Direct => {
                    self.run_direct(&snapshot, &request, &in_flight, Arc::clone(&observer))
                        .await
                }
            }
        };

        let result = tokio::select! {
            biased;
            result = work => result,
            _ = in_flight.notify.notified() => Ok(PathResult::cancelled()),
        };

        let result = match result {
            Err(RelayError::Cancelled) => Ok(PathResult::cancelled()),
            other => other,
        };
        match result {
            Ok(path) => {
                tracing::info!(
                    target: "relay.router",
                    route = ?route,
                    service = path.service_id.as_deref().unwrap_or("none"),
                    simulation = path.is_simulation,
                    failures = path.failures.len(),
                    cancelled = path.reply == Reply::Cancelled,
                    "request finished"
                );
                Ok(DispatchOutcome {
                    analysis,
                    route,
                    reply: path.reply,
                    service_id: path.service_id,
                    is_simulation: path.is_simulation,
                    failures: path.failures,
                })
            }
            Err(err) => {
                tracing::warn!(
                    target: "relay.router",
                    route = ?route,
                    error = %err,
                    message = %err.user_message(),
                    "request failed"
                );
                Err(err)
            }
        }
    }

    async fn run_direct(
        &self,
        snapshot: &ConfigSnapshot,
        request: &Request,
        in_flight: &InFlight,
        observer: ChunkObserver,
    ) -> Result<PathResult> {
        let primary = ProviderConfig::from_defaults(snapshot, self.credentials.as_ref())?;
        self.ensure_model(&primary).await?;

        set_phase(&self.phase, RouterPhase::Dispatching);
        let chain = self
            .chains(snapshot)
            .build_chat(Some(primary), self.chat_hooks(in_flight, observer))?;
        let outcome = chain
            .run(&ModalityRequest::new(Modality::Chat, ChatPrompt::from_request(request)))
            .await?;

        let reply = match outcome.output.payload {
            Payload::Text(text) => Reply::Text(text),
            _ => Reply::Empty,
        };
        Ok(PathResult {
            reply,
            service_id: Some(outcome.service_id),
            is_simulation: outcome.output.is_simulation,
            failures: outcome.failures,
        })
    }

    async fn run_agent(
        &self,
        snapshot: &ConfigSnapshot,
        agent: AgentType,
        request: &Request,
        in_flight: &InFlight,
        observer: ChunkObserver,
    ) -> Result<PathResult> {
        let (executor, streams): (Arc<dyn AgentExecutor>, bool) = match &self.agents {
            Some(agents) => (Arc::clone(agents), false),
            None => {
                // The built-in executor opens a session against the
                // configured provider, so the same availability rules apply.
                let primary = ProviderConfig::from_defaults(snapshot, self.credentials.as_ref()).ok();
                if let Some(config) = &primary {
                    self.ensure_model(config).await?;
                }
                let executor = PromptedAgentExecutor::new(self.chains(snapshot), primary)
                    .with_hooks(self.chat_hooks(in_flight, Arc::clone(&observer)));
                (Arc::new(executor), true)
            }
        };

        set_phase(&self.phase, RouterPhase::Dispatching);
        let response = executor.execute(agent, request).await?;
        set_phase(&self.phase, RouterPhase::Streaming);

        let reply = if is_meaningless(&response.content) {
            Reply::Empty
        } else {
            if !streams {
                observer(&response.content);
            }
            Reply::Text(response.content)
        };
        Ok(PathResult {
            reply,
            service_id: Some(format!("agent:{}", agent)),
            is_simulation: response.is_simulation,
            failures: Vec::new(),
        })
    }

    /// Run the speech, image or video chain for a prompt
    pub async fn dispatch_modality(
        &self,
        snapshot: ConfigSnapshot,
        request: ModalityRequest,
    ) -> Result<ChainOutcome> {
        if request.modality == Modality::Chat {
            return Err(RelayError::InvalidInput(
                "chat requests go through dispatch".to_string(),
            ));
        }
        let (_guard, in_flight) = self.acquire()?;
        set_phase(&self.phase, RouterPhase::Dispatching);
        let chain = self.chains(&snapshot).build(request.modality)?;

        tokio::select! {
            biased;
            result = chain.run(&request) => result,
            _ = in_flight.notify.notified() => Err(RelayError::Cancelled),
        }
    }
}
