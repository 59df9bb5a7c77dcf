//! Search orchestration: planning, correlation, aggregation.
//!
//! A request is expanded by the [`planner`] into site jobs, each job
//! ([`job`]) acquires a worker and waits on the [`correlator`] for its
//! listings, and [`aggregate`] merges the outcomes once every job is done.
//! [`coordinator`] ties the stages together.

pub mod aggregate;
pub mod coordinator;
pub mod correlator;
pub mod dedup;
pub mod job;
pub mod planner;
pub mod resolver;
pub mod url_normalize;

pub use coordinator::SearchCoordinator;
pub use correlator::{Correlation, CorrelationState};
pub use job::{JobOutcome, JobState, SiteSearchJob};
pub use planner::{JobSpec, SearchPlan, VariantPlanner};
pub use resolver::{PendingResolutions, Resolution, Resolver};
