pub mod coordinator;
pub mod handling_tracker;
pub mod runner;

pub use coordinator::{Coordinator, CoordinatorCommand};
pub use handling_tracker::{for_strategy, HandlingTracker, RunnerId, Ticket};
pub use runner::{Runner, RunnerCommand};
