//! Distributed metric query engine of the broker
//!
//! A metric query flows strictly forward through the stages below; no
//! stage re-enters an earlier one.
//!
//! ```text
//! Query statement
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Plan      │  BrokerPlan: cluster snapshot → PhysicalPlan
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Dispatch   │  TaskDispatcher: plan → single-use EventReceiver
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Wait      │  terminal TimeSeriesEvent vs. QueryContext
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Merge     │  ResultMerger + ExpressionEvaluator → ResultSet
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kuba_broker::query::{QueryBuilder, QueryContext, QueryFactory, SelectItem};
//!
//! let stmt = QueryBuilder::new("cpu")
//!     .time_range(TimeRange::new(start, end)?)
//!     .interval(Interval::from_secs(10))
//!     .group_by("host")
//!     .select(SelectItem::call(AggregateFunction::Avg, "usage"))
//!     .build()?;
//!
//! let factory = QueryFactory::new(state_mgr, dispatcher, config.query.clone());
//! let result_set = factory.execute_query(&QueryContext::new(), "metrics", stmt).await?;
//! ```

pub mod dispatch;
pub mod error;
pub mod expression;
pub mod merge;
pub mod metric_query;
pub mod plan;
pub mod result;
pub mod series;
pub mod statement;

// Re-export main types
pub use dispatch::{event_channel, EventReceiver, EventSender, QueryContext, TaskDispatcher};
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use expression::{ExpressionEvaluator, FieldExpression, FieldValues};
pub use merge::{group_tags, MergeSummary, ResultMerger};
pub use metric_query::{EvaluatorFactory, MetricQuery, QueryFactory, QueryState};
pub use plan::{BrokerPlan, Intermediate, Leaf, PhysicalPlan, PlannedQuery, Root};
pub use result::{ExecutionStats, Points, ResultSet, SeriesResult};
pub use series::{
    concat_tag_values, split_tag_values, RawField, RawSeries, RemoteError, StorageNodeStats,
    StorageStats, TimeSeriesEvent,
};
pub use statement::{AggregateFunction, BinaryOp, Expr, Query, QueryBuilder, SelectItem};
