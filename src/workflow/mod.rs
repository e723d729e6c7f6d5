/// Workflow Management Layer
///
/// This module handles workflow definitions and their persistence:
/// - Type definitions (Workflow, Module, Connection, ModuleType)
/// - SQLite persistence with sqlx

// Core workflow type definitions
pub mod types;

// SQLite persistence layer for workflow storage
pub mod storage;

// Re-export commonly used types
pub use storage::SqliteWorkflowStore;
pub use types::{CanvasPosition, Connection, Module, ModuleType, Workflow};
