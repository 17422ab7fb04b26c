//! Assignment orchestration and its downstream collaborators.
//!
//! The [`AssignmentOrchestrator`] depends only on narrow traits: the storage
//! traits from `lastmile-storage`, [`RoutePlanner`], and [`Notifier`].

mod error;
mod notify;
mod orchestrator;
mod planner;

pub use error::{AssignError, NotifyError, PlannerError, RecomputeError};
pub use notify::{driver_channel, NotificationEvent, Notifier, PubSubNotifier};
pub use orchestrator::{
    AssignmentOrchestrator, AssignmentResult, AssignmentStatus, Collaborators, Degraded,
    OrchestratorTimeouts, RouteSummary,
};
pub use planner::{
    FallbackPlanner, HttpRoutePlanner, OptimizeRequest, PlannedRoute, RoutePlanner, RouteStop,
};
