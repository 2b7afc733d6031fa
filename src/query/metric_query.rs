//! Metric Query - lifecycle of one distributed metric query
//!
//! A `MetricQuery` drives a single statement through planning, dispatch,
//! one bounded wait and the local merge. It is one-shot: once it reaches a
//! terminal state it cannot be run again.
//!
//! # State Machine
//!
//! ```text
//! Created ─▶ Planning ─▶ Planned ─▶ Dispatched ─▶ WaitingResponse ─▶ Merging ─▶ Completed
//!               │           │            │              │    │
//!               └───────────┴────────────┴──────────────┘    └──────▶ TimedOut
//!                                 ▼
//!                               Failed
//! ```
//!
//! Nothing is retried. The only suspension point is the wait for the
//! terminal event, raced against the query context.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dispatch::{EventReceiver, QueryContext, TaskDispatcher};
use super::error::{QueryError, QueryResult};
use super::expression::{ExpressionEvaluator, FieldExpression};
use super::merge::ResultMerger;
use super::plan::{BrokerPlan, PlannedQuery};
use super::result::{ExecutionStats, ResultSet};
use super::series::{StorageStats, TimeSeriesEvent};
use super::statement::Query;
use crate::config::QueryConfig;
use crate::coordinator::StateManager;
use crate::metrics;

// ============================================================================
// Query State
// ============================================================================

/// Lifecycle state of a metric query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryState {
    /// Not started
    Created,
    /// Building the physical plan
    Planning,
    /// Plan built
    Planned,
    /// Plan accepted by task dispatch
    Dispatched,
    /// Waiting for the terminal event
    WaitingResponse,
    /// Merging the event into a result set
    Merging,
    /// Result set returned
    Completed,
    /// Terminated with an error
    Failed,
    /// Context fired before the terminal event arrived
    TimedOut,
}

impl QueryState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Completed | QueryState::Failed | QueryState::TimedOut
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: QueryState) -> bool {
        use QueryState::*;
        match (*self, next) {
            (Created, Planning)
            | (Planning, Planned)
            | (Planned, Dispatched)
            | (Dispatched, WaitingResponse)
            | (WaitingResponse, Merging)
            | (WaitingResponse, TimedOut)
            | (Merging, Completed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Lower-case label
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Created => "created",
            QueryState::Planning => "planning",
            QueryState::Planned => "planned",
            QueryState::Dispatched => "dispatched",
            QueryState::WaitingResponse => "waiting_response",
            QueryState::Merging => "merging",
            QueryState::Completed => "completed",
            QueryState::Failed => "failed",
            QueryState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Phase Clock
// ============================================================================

/// Phase boundaries of one execution
///
/// Each phase starts where the previous one ended; dispatch submission is
/// part of the wait phase. Offsets come from a monotonic clock and are anchored to the wall clock
/// once, at start.
#[derive(Debug, Clone, Copy)]
struct PhaseClock {
    wall_start_ns: i64,
    start: Instant,
    plan_end: Instant,
    wait_end: Instant,
    expression_end: Instant,
}

impl PhaseClock {
    fn start() -> Self {
        let now = Instant::now();
        let wall_start_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();
        Self {
            wall_start_ns,
            start: now,
            plan_end: now,
            wait_end: now,
            expression_end: now,
        }
    }

    fn unix_nanos(&self, at: Instant) -> i64 {
        self.wall_start_ns + at.duration_since(self.start).as_nanos() as i64
    }

    fn cost(from: Instant, to: Instant) -> i64 {
        to.duration_since(from).as_nanos() as i64
    }

    fn record_metrics(&self) {
        metrics::record_phase("plan", Self::cost(self.start, self.plan_end));
        metrics::record_phase("wait", Self::cost(self.plan_end, self.wait_end));
        metrics::record_phase("expression", Self::cost(self.wait_end, self.expression_end));
    }

    fn execution_stats(&self, root: String, storage_nodes: StorageStats) -> ExecutionStats {
        ExecutionStats {
            root,
            plan_start: self.unix_nanos(self.start),
            plan_end: self.unix_nanos(self.plan_end),
            plan_cost: Self::cost(self.start, self.plan_end),
            wait_start: self.unix_nanos(self.plan_end),
            wait_end: self.unix_nanos(self.wait_end),
            wait_cost: Self::cost(self.plan_end, self.wait_end),
            expression_start: self.unix_nanos(self.wait_end),
            expression_end: self.unix_nanos(self.expression_end),
            expression_cost: Self::cost(self.wait_end, self.expression_end),
            start: self.unix_nanos(self.start),
            end: self.unix_nanos(self.expression_end),
            total_cost: Self::cost(self.start, self.expression_end),
            storage_nodes,
        }
    }
}

// ============================================================================
// Metric Query
// ============================================================================

/// Builds the evaluator used by one query's merge phase
pub type EvaluatorFactory = Arc<dyn Fn(&Query) -> Box<dyn ExpressionEvaluator> + Send + Sync>;

fn default_evaluator_factory() -> EvaluatorFactory {
    Arc::new(|query: &Query| {
        Box::new(FieldExpression::new(
            query.time_range,
            query.interval,
            query.select_items.clone(),
        )) as Box<dyn ExpressionEvaluator>
    })
}

/// One distributed metric query
pub struct MetricQuery {
    ctx: QueryContext,
    database: String,
    stmt: Query,
    state_mgr: Arc<dyn StateManager>,
    dispatcher: Arc<dyn TaskDispatcher>,
    evaluator_factory: EvaluatorFactory,
    state: QueryState,
}

impl MetricQuery {
    /// Create a query in the `Created` state
    pub fn new(
        ctx: QueryContext,
        database: impl Into<String>,
        stmt: Query,
        state_mgr: Arc<dyn StateManager>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            ctx,
            database: database.into(),
            stmt,
            state_mgr,
            dispatcher,
            evaluator_factory: default_evaluator_factory(),
            state: QueryState::Created,
        }
    }

    /// Replace the evaluator used in the merge phase
    pub fn with_evaluator_factory(mut self, factory: EvaluatorFactory) -> Self {
        self.evaluator_factory = factory;
        self
    }

    /// Current state
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Target database
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run the query to a terminal state
    pub async fn execute(&mut self) -> QueryResult<ResultSet> {
        self.transition(QueryState::Planning)?;
        let mut clock = PhaseClock::start();

        let planned = self.make_plan().map_err(|e| self.fail(e))?;
        clock.plan_end = Instant::now();
        self.transition(QueryState::Planned)?;
        debug!(
            database = %self.database,
            plan = %planned.physical_plan,
            "Built physical plan"
        );

        let submitted = self
            .dispatcher
            .submit_metric_task(&self.ctx, &planned.physical_plan, &planned.query)
            .await;
        let receiver = submitted.map_err(|e| self.fail(e))?;
        self.transition(QueryState::Dispatched)?;

        self.transition(QueryState::WaitingResponse)?;
        let event = self.wait_response(receiver).await?;
        clock.wait_end = Instant::now();

        self.transition(QueryState::Merging)?;
        let mut evaluator = (self.evaluator_factory)(&planned.query);
        let (mut result_set, summary) =
            ResultMerger::new(&planned.query, &mut *evaluator).merge(event);
        clock.expression_end = Instant::now();

        if let Some(storage_stats) = summary.storage_stats {
            let root = self.state_mgr.get_current_node().indicator();
            result_set.stats = Some(clock.execution_stats(root, storage_stats));
        }
        clock.record_metrics();

        self.transition(QueryState::Completed)?;
        debug!(
            metric = %result_set.metric_name,
            series = result_set.series.len(),
            dropped_series = summary.dropped_series,
            dropped_points = summary.dropped_points,
            "Metric query completed"
        );
        Ok(result_set)
    }

    /// Resolve cluster metadata and build the physical plan
    fn make_plan(&self) -> QueryResult<PlannedQuery> {
        let database_cfg = self
            .state_mgr
            .get_database_cfg(&self.database)
            .ok_or_else(|| QueryError::database_not_found(&self.database))?;

        let replicas = self
            .state_mgr
            .get_queryable_replicas(&self.database)
            .map_err(|e| {
                if e.is_not_exist() {
                    QueryError::replica_not_found(&self.database).with_source(e)
                } else {
                    QueryError::state(e)
                }
            })?;
        if replicas.is_empty() {
            return Err(QueryError::replica_not_found(&self.database));
        }

        let current_node = self.state_mgr.get_current_node();
        let live_nodes = self.state_mgr.get_live_nodes();
        let mut planned = BrokerPlan::new(
            &self.stmt,
            &database_cfg,
            &replicas,
            &current_node,
            &live_nodes,
        )
        .plan()?;
        planned.physical_plan.database = self.database.clone();
        Ok(planned)
    }

    /// Wait for the terminal event or the context, whichever comes first
    async fn wait_response(&mut self, mut receiver: EventReceiver) -> QueryResult<TimeSeriesEvent> {
        let delivered = tokio::select! {
            biased;
            event = receiver.recv() => Some(event),
            _ = self.ctx.done() => None,
        };

        match delivered {
            Some(Some(mut event)) => match event.err.take() {
                Some(err) => Err(self.fail(QueryError::remote(err))),
                None => Ok(event),
            },
            Some(None) => Err(self.fail(QueryError::missing_response())),
            None => {
                receiver.detach();
                self.transition(QueryState::TimedOut)?;
                Err(QueryError::timeout(format!(
                    "query of metric {} timed out waiting for storage response",
                    self.stmt.metric_name
                )))
            },
        }
    }

    fn transition(&mut self, next: QueryState) -> QueryResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(QueryError::internal(format!(
                "illegal query state transition {} -> {}",
                self.state, next
            )));
        }
        debug!(
            database = %self.database,
            metric = %self.stmt.metric_name,
            from = %self.state,
            to = %next,
            "Query state transition"
        );
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` and hand the error back
    fn fail(&mut self, err: QueryError) -> QueryError {
        debug!(
            database = %self.database,
            from = %self.state,
            error = %err,
            "Query failed"
        );
        self.state = QueryState::Failed;
        err
    }
}

// ============================================================================
// Query Factory
// ============================================================================

/// Decrements the in-flight gauge even when the query future is dropped
struct InFlightGuard;

impl InFlightGuard {
    fn new() -> Self {
        metrics::IN_FLIGHT_QUERIES.inc();
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::IN_FLIGHT_QUERIES.dec();
    }
}

/// Entry point for metric queries on this broker
pub struct QueryFactory {
    state_mgr: Arc<dyn StateManager>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: QueryConfig,
    evaluator_factory: EvaluatorFactory,
}

impl QueryFactory {
    /// Create a factory over the given collaborators
    pub fn new(
        state_mgr: Arc<dyn StateManager>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: QueryConfig,
    ) -> Self {
        Self {
            state_mgr,
            dispatcher,
            config,
            evaluator_factory: default_evaluator_factory(),
        }
    }

    /// Use a custom evaluator for every query
    pub fn with_evaluator_factory(mut self, factory: EvaluatorFactory) -> Self {
        self.evaluator_factory = factory;
        self
    }

    /// Create a query bound to `ctx`
    pub fn new_metric_query(&self, ctx: QueryContext, database: &str, stmt: Query) -> MetricQuery {
        MetricQuery::new(
            ctx,
            database,
            stmt,
            self.state_mgr.clone(),
            self.dispatcher.clone(),
        )
        .with_evaluator_factory(self.evaluator_factory.clone())
    }

    /// Execute `stmt` against `database`
    ///
    /// A context without deadline gets the configured default timeout.
    pub async fn execute_query(
        &self,
        ctx: &QueryContext,
        database: &str,
        stmt: Query,
    ) -> QueryResult<ResultSet> {
        let ctx = match ctx.deadline() {
            Some(_) => ctx.child(),
            None => ctx.child_with_timeout(self.config.timeout()),
        };
        let _in_flight = InFlightGuard::new();
        let started = Instant::now();
        let metric = stmt.metric_name.clone();

        let result = self.new_metric_query(ctx, database, stmt).execute().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(result_set) => {
                metrics::record_query("success");
                if self
                    .config
                    .slow_query_threshold()
                    .is_some_and(|threshold| elapsed >= threshold)
                {
                    warn!(
                        database,
                        metric = %metric,
                        elapsed_ms = elapsed.as_millis() as u64,
                        series = result_set.series.len(),
                        "Slow metric query"
                    );
                }
            },
            Err(err) => {
                metrics::record_query(err.kind.as_str());
                info!(database, metric = %metric, error = %err, "Metric query failed");
            },
        }
        result
    }
}
