//! Query pipeline.
//!
//! One query runs its stages strictly in order:
//!
//! ```text
//! Resolving -> Filtering -> Retrieving -> Gating -> Routing -> Assembling -> Done
//! ```
//!
//! Any failing stage ends the query in `Failed(reason)`. Identity failures
//! are the exception: they degrade to the empty principal set, which grants
//! nothing and produces the no-information answer. Only
//! [`QueryPipeline::respond`] should face callers; it collapses every
//! failure into the same generic reply.

use crate::rag::assemble::{assemble, is_low_confidence, is_restricted, select_context, AssembleOptions};
use crate::rag::prompt::PromptBuilder;
use crate::retrieval::RetrievalGateway;
use crate::retry::{with_deadline, RetryPolicy};
use crate::types::{Answer, QueryRequest};
use bastion_access::{
    build_filter, final_gate_at, AuditSink, PrincipalResolver, PrincipalSet, TracingAuditSink,
};
use bastion_core::{AppConfig, AppError, AppResult, Clock, SystemClock};
use bastion_llm::{
    Capability, ClientFactory, LlmRequest, ModelRouter, Requirements, TracingUsageSink, UsageMeter,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

const ANSWER_TEMPERATURE: f32 = 0.3;
const MAX_ANSWER_TOKENS: u32 = 1000;

/// Why a query ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidRequest,
    RetrievalUnavailable,
    NoEligibleModel,
    BudgetExceeded,
    GenerationFailed,
    Timeout,
    Internal,
}

impl From<&AppError> for FailureReason {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::Knowledge(_) => Self::InvalidRequest,
            AppError::RetrievalUnavailable(_) => Self::RetrievalUnavailable,
            AppError::NoEligibleModel(_) => Self::NoEligibleModel,
            AppError::BudgetExceededHard(_) => Self::BudgetExceeded,
            AppError::Llm(_) => Self::GenerationFailed,
            AppError::Timeout { .. } => Self::Timeout,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Resolving,
    Filtering,
    Retrieving,
    Gating,
    Routing,
    Assembling,
    Done,
    Failed(FailureReason),
}

impl QueryStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed({:?})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Stage history of one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTrace {
    pub request_id: Uuid,
    pub stages: Vec<QueryStage>,
}

impl QueryTrace {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            stages: Vec::new(),
        }
    }

    fn enter(&mut self, stage: QueryStage) {
        tracing::debug!("stage -> {}", stage);
        self.stages.push(stage);
    }

    pub fn last(&self) -> Option<QueryStage> {
        self.stages.last().copied()
    }
}

/// Per-stage budgets plus the end-to-end deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub identity: Duration,
    pub retrieval: Duration,
    pub generation: Duration,
    pub deadline: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            identity: Duration::from_secs(1),
            retrieval: Duration::from_secs(3),
            generation: Duration::from_secs(10),
            deadline: Duration::from_secs(10),
        }
    }
}

impl StageTimeouts {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            identity: config.identity_timeout(),
            retrieval: config.index_timeout(),
            generation: config.generation_timeout(),
            deadline: config.query_deadline(),
        }
    }
}

/// Answers questions from only the documents a caller may see.
pub struct QueryPipeline {
    resolver: Arc<PrincipalResolver>,
    gateway: RetrievalGateway,
    router: ModelRouter,
    clients: Arc<dyn ClientFactory>,
    prompts: PromptBuilder,
    audit: Arc<dyn AuditSink>,
    meter: UsageMeter,
    retry: RetryPolicy,
    timeouts: StageTimeouts,
    clock: Arc<dyn Clock>,
}

impl QueryPipeline {
    pub fn new(
        resolver: Arc<PrincipalResolver>,
        gateway: RetrievalGateway,
        router: ModelRouter,
        clients: Arc<dyn ClientFactory>,
    ) -> AppResult<Self> {
        Ok(Self {
            resolver,
            gateway,
            router,
            clients,
            prompts: PromptBuilder::new()?,
            audit: Arc::new(TracingAuditSink),
            meter: UsageMeter::new(Arc::new(TracingUsageSink)),
            retry: RetryPolicy::default(),
            timeouts: StageTimeouts::default(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_usage_meter(mut self, meter: UsageMeter) -> Self {
        self.meter = meter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Clock for gate decisions and fail-closed principal sets.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Answer `request`, or return the internal error.
    pub async fn execute(&self, request: &QueryRequest) -> AppResult<Answer> {
        self.execute_traced(request).await.0
    }

    /// Answer `request` for a caller. Every failure yields the same generic
    /// reply, so errors reveal nothing about access.
    pub async fn respond(&self, request: &QueryRequest) -> Answer {
        match self.execute(request).await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::error!(code = err.code(), "Query failed: {}", err);
                Answer::unavailable()
            }
        }
    }

    /// [`execute`](Self::execute), also returning the stage history.
    pub async fn execute_traced(&self, request: &QueryRequest) -> (AppResult<Answer>, QueryTrace) {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "query",
            %request_id,
            tenant = %request.tenant,
            feature = %request.feature
        );

        let mut trace = QueryTrace::new(request_id);
        let result = self.run(request, request_id, &mut trace).instrument(span).await;
        if let Err(err) = &result {
            trace.stages.push(QueryStage::Failed(FailureReason::from(err)));
        }
        (result, trace)
    }

    async fn run(&self, request: &QueryRequest, request_id: Uuid, trace: &mut QueryTrace) -> AppResult<Answer> {
        let started = Instant::now();
        let deadline = started + self.timeouts.deadline;
        request.validate()?;

        trace.enter(QueryStage::Resolving);
        let principals = self.resolve_principals(request, deadline).await;

        trace.enter(QueryStage::Filtering);
        let filter = build_filter(&principals);

        trace.enter(QueryStage::Retrieving);
        let candidates = {
            let gateway = &self.gateway;
            let (tenant, text, filter, top_k) = (request.tenant.as_str(), request.text.as_str(), &filter, request.top_k);
            let budget = self.timeouts.retrieval;
            self.retry
                .run("retrieval", deadline, move || {
                    with_deadline("retrieval", budget, deadline, gateway.retrieve(tenant, text, filter, top_k))
                })
                .await?
        };
        let retrieved = candidates.len();

        trace.enter(QueryStage::Gating);
        // Memberships may have changed while the index was queried
        let current = self.resolver.revalidate(&principals);
        if current.principals() != principals.principals() {
            tracing::info!("Principals changed during the query; gating with the current set");
        }
        let outcome = final_gate_at(candidates, &current, self.clock.now());
        self.audit.record_all(&outcome.decisions);
        let context = select_context(&outcome.allowed);
        let restricted = is_restricted(&outcome.denied);

        if context.is_empty() {
            trace.enter(QueryStage::Done);
            tracing::info!(
                filter = %filter.fingerprint(),
                retrieved,
                allowed = outcome.allowed.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query complete without context"
            );
            return Ok(Answer::no_information(restricted));
        }

        trace.enter(QueryStage::Routing);
        let prompt = self.prompts.render(
            &request.text,
            &context,
            is_low_confidence(&context),
            request.want_tables,
            request.want_charts,
        )?;
        let mut llm_request = LlmRequest::new(prompt.user, "")
            .with_system(prompt.system)
            .with_temperature(ANSWER_TEMPERATURE)
            .with_max_tokens(MAX_ANSWER_TOKENS);

        let mut requirements = Requirements::default()
            .with_capability(Capability::Chat)
            .with_estimated_input_tokens(llm_request.estimated_prompt_tokens());
        if let Some(model) = &request.model_override {
            requirements = requirements.with_override(model.clone());
        }
        let (decision, reservation) =
            self.router
                .select_and_reserve(&request.tenant, &request.feature, &requirements)?;
        llm_request.model = decision.model.id.clone();
        let client = self.clients.client_for(&decision.model)?;

        trace.enter(QueryStage::Assembling);
        let response = {
            let (client, llm_request) = (client.as_ref(), &llm_request);
            let budget = self.timeouts.generation;
            self.retry
                .run("generation", deadline, move || {
                    with_deadline("generation", budget, deadline, client.complete(llm_request))
                })
                .await?
        };
        let usage = self.meter.record(request_id, &decision, reservation, response.usage)?;

        let mut answer = assemble(
            &response.content,
            &context,
            AssembleOptions {
                want_tables: request.want_tables,
                want_charts: request.want_charts,
                restricted,
            },
        );
        answer.model = Some(decision.model.id.clone());

        trace.enter(QueryStage::Done);
        tracing::info!(
            filter = %filter.fingerprint(),
            retrieved,
            allowed = outcome.allowed.len(),
            model = %decision.model.id,
            route = ?decision.reason,
            cost = usage.cost,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query complete"
        );
        Ok(answer)
    }

    /// Resolve the caller, failing closed to the empty set.
    async fn resolve_principals(&self, request: &QueryRequest, deadline: Instant) -> Arc<PrincipalSet> {
        let lookup = with_deadline(
            "identity",
            self.timeouts.identity,
            deadline,
            self.resolver.resolve(&request.tenant, &request.caller),
        )
        .await;

        match lookup {
            Ok(principals) => principals,
            Err(err) => {
                tracing::warn!(code = err.code(), "Identity resolution failed, continuing with no principals");
                Arc::new(PrincipalSet::empty(
                    request.tenant.clone(),
                    request.caller.clone(),
                    self.clock.now(),
                ))
            }
        }
    }
}
