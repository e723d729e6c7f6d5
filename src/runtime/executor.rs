/// Module dispatch
///
/// `ModuleExecutor` maps each module type to its handler and runs one module
/// at a time. Handler errors never escape: they are logged and folded into a
/// failed `ModuleResult` so the run can continue with the next step.

use crate::error::ModuleError;
use crate::runtime::logger::{truncate, WorkflowLogger, MAX_DETAIL_CHARS};
use crate::runtime::modules::{self, ModuleContext, ModuleHandler, ModuleServices, RepeatIntent};
use crate::runtime::variables::{stringify, Variables};
use crate::workflow::types::{Module, ModuleType};
use serde::Serialize;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

/// Outcome of executing a single module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Branch selected by a condition module
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Repetition requested by a repeat module, consumed by the run controller
    #[serde(skip)]
    pub repeat: Option<RepeatIntent>,
}

impl ModuleResult {
    pub fn failed(err: &ModuleError) -> Self {
        let output = match err {
            ModuleError::NoDomainAvailable => Value::String(String::new()),
            _ => Value::Null,
        };
        let status_code = match err {
            ModuleError::Status(code) => Some(*code),
            _ => None,
        };
        Self {
            success: false,
            output,
            error: Some(err.to_string()),
            branch: None,
            status_code,
            repeat: None,
        }
    }
}

/// Dispatch table from module type to handler
#[derive(Default)]
pub struct ModuleExecutor {
    handlers: HashMap<ModuleType, Arc<dyn ModuleHandler>>,
}

impl ModuleExecutor {
    /// Executor with no handlers; every module fails as unknown
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor with every built-in module installed
    pub fn with_builtin_modules(services: &ModuleServices) -> Self {
        let mut executor = Self::new();
        modules::register_builtin(&mut executor, services);
        executor
    }

    /// Install or replace the handler for `module_type`
    pub fn register(
        &mut self,
        module_type: ModuleType,
        handler: impl ModuleHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(module_type, Arc::new(handler));
        self
    }

    pub fn supports(&self, module_type: &ModuleType) -> bool {
        self.handlers.contains_key(module_type)
    }

    /// Execute a single module against the run's variables
    pub async fn execute(
        &self,
        module: &Module,
        variables: &mut Variables,
        log: &WorkflowLogger,
    ) -> ModuleResult {
        tracing::debug!("🚀 Executing module {} ({})", module.id, module.module_type);
        let start_time = std::time::Instant::now();

        let Some(handler) = self.handlers.get(&module.module_type) else {
            let err = ModuleError::UnknownModuleType(module.module_type.tag().to_string());
            log.error(
                format!("Module '{}' failed: {err}", module.display_name()),
                Some(json!({ "module_id": module.id })),
            )
            .await;
            return ModuleResult::failed(&err);
        };

        let outcome = {
            let mut ctx = ModuleContext::new(module, variables, log);
            handler.execute(&mut ctx).await
        };
        let duration = start_time.elapsed();

        match outcome {
            Ok(output) => {
                tracing::debug!("✅ Module {} completed in {:?}", module.id, duration);
                log.debug(
                    format!("Module '{}' completed", module.display_name()),
                    Some(json!({
                        "module_type": module.module_type.tag(),
                        "output": truncate(&stringify(&output.value), MAX_DETAIL_CHARS),
                    })),
                )
                .await;
                ModuleResult {
                    success: true,
                    output: output.value,
                    error: None,
                    branch: output.branch,
                    status_code: output.status_code,
                    repeat: output.repeat,
                }
            }
            Err(err) => {
                tracing::debug!("❌ Module {} failed in {:?}: {}", module.id, duration, err);
                log.error(
                    format!("Module '{}' failed: {err}", module.display_name()),
                    Some(json!({ "module_type": module.module_type.tag() })),
                )
                .await;
                ModuleResult::failed(&err)
            }
        }
    }
}
