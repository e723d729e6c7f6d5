/// Autoflow: modular workflow automation engine
///
/// This library provides a workflow engine that orders modules by their
/// connections with petgraph, runs them sequentially against a shared variable
/// store, gates condition branches, repeats steps on request, and schedules
/// runs with cron expressions and automatic retries.

// Core configuration and setup
pub mod config;

// Error taxonomies for planning, modules, storage and scheduling
pub mod error;

// Storage traits with SQLite and in-memory implementations
pub mod storage;

// Notification channels (SMTP, WxPusher, PushPlus)
pub mod notification;

// Workflow management layer - workflow definitions and their persistence
pub mod workflow;

// Runtime execution engine - planning, module dispatch, run control, scheduling
pub mod runtime;

// HTTP API layer - REST endpoints for workflow management and manual runs
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, ModuleError, SchedulingError, StorageError};
pub use runtime::{ExecutionEngine, ModuleExecutor, ModuleResult, RunReport, SchedulerService};
pub use server::start_server;
pub use workflow::{Connection, Module, ModuleType, Workflow};
