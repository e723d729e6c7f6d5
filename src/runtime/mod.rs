/// Runtime execution engine
///
/// This module runs workflows. It handles:
/// - Planning module order and branch blocks with petgraph
/// - Run-scoped variables and `[name]` substitution
/// - Dispatching modules to their handlers
/// - Condition gating and repeat control
/// - Cron schedules and automatic retries with tokio-cron-scheduler

// Dependency graph ordering and branch positions
pub mod plan;

// Run-scoped variable store and substitution
pub mod variables;

// Dual tracing / persistent run logging
pub mod logger;

// Built-in module handlers
pub mod modules;

// Module dispatch table
pub mod executor;

// Run controller walking an execution plan
pub mod engine;

// Background cron scheduler and retry manager
pub mod scheduler;

// Re-export main types
pub use engine::{ExecutionEngine, RunReport};
pub use executor::{ModuleExecutor, ModuleResult};
pub use plan::{execution_order, ExecutionPlan};
pub use scheduler::SchedulerService;
pub use variables::Variables;
