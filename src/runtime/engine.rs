/// Workflow run controller
///
/// Plans a workflow with petgraph, then walks the plan sequentially: condition
/// blocks gate which branch executes, repeat modules re-run a target step, and
/// every executed module contributes to the run result. Variables are loaded
/// once before the first module and merged back once after the last.

use crate::error::EngineError;
use crate::runtime::executor::{ModuleExecutor, ModuleResult};
use crate::runtime::logger::WorkflowLogger;
use crate::runtime::modules::RepeatIntent;
use crate::runtime::plan::ExecutionPlan;
use crate::runtime::variables::{keys, Variables};
use crate::storage::{LogSink, VariableStore};
use crate::workflow::types::{ModuleType, Workflow};
use serde::Serialize;
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};

/// Branch gating state while walking a plan
#[derive(Debug, Clone, PartialEq, Eq)]
enum BranchState {
    Normal,
    /// Inside a condition block; `None` when the condition selected nothing
    InBlock(Option<String>),
}

impl BranchState {
    fn admits(&self, tag: &str) -> bool {
        matches!(self, BranchState::InBlock(Some(active)) if active == tag)
    }
}

/// Aggregated result of one workflow run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow_id: String,
    /// True when every executed module succeeded
    pub success: bool,
    /// Results keyed by module id; skipped modules are absent
    pub results: BTreeMap<String, ModuleResult>,
    /// "name (type label)" of every planned module, skipped ones included
    pub module_names: BTreeMap<String, String>,
    /// First failure in execution order, as "module name: error"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Summary stored as the workflow's `last_result`
    pub fn summary(&self) -> String {
        match &self.error {
            None => "success".to_string(),
            Some(error) => format!("failed: {error}"),
        }
    }
}

/// Executes workflows one module at a time
pub struct ExecutionEngine {
    executor: Arc<ModuleExecutor>,
    variables: Arc<dyn VariableStore>,
    logs: Arc<dyn LogSink>,
}

impl ExecutionEngine {
    pub fn new(
        executor: Arc<ModuleExecutor>,
        variables: Arc<dyn VariableStore>,
        logs: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            executor,
            variables,
            logs,
        }
    }

    pub fn logs(&self) -> &Arc<dyn LogSink> {
        &self.logs
    }

    /// Run `workflow` to completion
    ///
    /// Structural problems (cycles, dangling connections, nested blocks) and
    /// variable store failures abort the run before or after the module walk;
    /// module failures only mark the report as failed.
    pub async fn execute_workflow(&self, workflow: &Workflow) -> Result<RunReport, EngineError> {
        let workflow_start_time = std::time::Instant::now();
        let log = WorkflowLogger::new(Arc::clone(&self.logs), workflow.id.as_str());
        log.info(
            format!("🚀 Starting workflow '{}'", workflow.name),
            Some(json!({ "modules": workflow.modules.len(), "connections": workflow.connections.len() })),
        )
        .await;

        let plan = match ExecutionPlan::build(workflow) {
            Ok(plan) => plan,
            Err(err) => {
                log.error(format!("❌ Workflow '{}' cannot run: {err}", workflow.name), None)
                    .await;
                return Err(err);
            }
        };
        tracing::debug!(
            "📋 Execution order: {:?}",
            plan.steps()
                .iter()
                .map(|step| format!("{} {}", step.position, step.module.id))
                .collect::<Vec<_>>()
        );

        let mut vars = Variables::from_persisted(self.variables.load_all().await?);
        let mut report = RunReport {
            workflow_id: workflow.id.clone(),
            success: true,
            results: BTreeMap::new(),
            module_names: plan
                .steps()
                .iter()
                .map(|step| (step.module.id.clone(), step.module.display_name()))
                .collect(),
            error: None,
            duration_ms: 0,
        };
        let mut state = BranchState::Normal;

        for (step_num, step) in plan.steps().iter().enumerate() {
            let module = step.module;
            if let Some(tag) = step.position.branch_tag() {
                if !state.admits(tag) {
                    tracing::debug!("⏭️ Skipping module {} (branch {} inactive)", module.id, tag);
                    continue;
                }
            }

            tracing::info!(
                "📍 Step {}/{} [{}]: '{}' ({})",
                step_num + 1,
                plan.len(),
                step.position,
                module.name,
                module.module_type
            );
            let mut result = self.executor.execute(module, &mut vars, &log).await;

            match module.module_type {
                ModuleType::Condition => state = BranchState::InBlock(result.branch.clone()),
                ModuleType::ConditionEnd => state = BranchState::Normal,
                _ => {}
            }
            if let Some(intent) = result.repeat.take() {
                self.run_repeat(&plan, &intent, &mut vars, &log).await;
            }

            if !result.success {
                report.success = false;
                if report.error.is_none() {
                    report.error = Some(format!(
                        "{}: {}",
                        module.name,
                        result.error.as_deref().unwrap_or("failed")
                    ));
                }
            }
            report.results.insert(module.id.clone(), result);
        }

        self.variables.save_all(&vars.into_persisted()).await?;
        report.duration_ms = workflow_start_time.elapsed().as_millis() as u64;

        match &report.error {
            None => {
                log.info(
                    format!("🎉 Workflow '{}' completed in {}ms", workflow.name, report.duration_ms),
                    None,
                )
                .await
            }
            Some(error) => {
                log.error(format!("❌ Workflow '{}' failed: {error}", workflow.name), None)
                    .await
            }
        }
        Ok(report)
    }

    /// Re-run the step labelled `intent.target`; failures are logged only
    async fn run_repeat(
        &self,
        plan: &ExecutionPlan<'_>,
        intent: &RepeatIntent,
        vars: &mut Variables,
        log: &WorkflowLogger,
    ) {
        let Some(target) = plan.find_by_label(&intent.target) else {
            clear_repeat_state(vars);
            log.warning(
                format!("Repeat target '{}' does not match any module position", intent.target),
                None,
            )
            .await;
            return;
        };

        for iteration in 1..=intent.times {
            vars.set(keys::REPEAT_CURRENT, iteration);
            tracing::debug!(
                "🔁 Repeat {}/{} of module {}",
                iteration,
                intent.times,
                target.module.id
            );
            let result = self.executor.execute(target.module, vars, log).await;
            if !result.success {
                log.warning(
                    format!(
                        "Repeat {iteration}/{} of '{}' failed: {}",
                        intent.times,
                        target.module.name,
                        result.error.as_deref().unwrap_or("failed")
                    ),
                    None,
                )
                .await;
            }
            if iteration < intent.times && !intent.interval.is_zero() {
                tokio::time::sleep(intent.interval).await;
            }
        }

        clear_repeat_state(vars);
    }
}

fn clear_repeat_state(vars: &mut Variables) {
    vars.remove(keys::REPEAT_MODULE);
    vars.remove(keys::REPEAT_TIMES);
    vars.remove(keys::REPEAT_CURRENT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModuleError;
    use crate::runtime::modules::{control, data, text, ModuleContext, ModuleHandler, ModuleOutput};
    use crate::runtime::variables::VariableMap;
    use crate::storage::{MemoryLogSink, MemoryVariableStore};
    use crate::workflow::types::{Connection, Module};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    /// Records each execution as "name" or "name#iteration"
    #[derive(Clone, Default)]
    struct Probe {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ModuleHandler for Probe {
        async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
            let entry = match ctx.variables.text(keys::REPEAT_CURRENT) {
                Some(iteration) => format!("{}#{iteration}", ctx.module.name),
                None => ctx.module.name.clone(),
            };
            self.seen.lock().await.push(entry);
            if ctx.flag("fail", false) {
                return Err(ModuleError::Validation("probe told to fail".into()));
            }
            Ok(ModuleOutput::new(Value::Null))
        }
    }

    fn probe_type() -> ModuleType {
        ModuleType::Unknown("probe".into())
    }

    fn probe_module(id: &str) -> Module {
        Module::new(id, probe_type(), id)
    }

    fn engine(variables: Arc<MemoryVariableStore>) -> (ExecutionEngine, Probe) {
        let probe = Probe::default();
        let mut executor = ModuleExecutor::new();
        executor
            .register(probe_type(), probe.clone())
            .register(ModuleType::Condition, control::Condition)
            .register(ModuleType::ConditionEnd, control::ConditionEnd)
            .register(ModuleType::Repeat, control::Repeat)
            .register(ModuleType::Calculate, data::Calculate)
            .register(ModuleType::SetVariable, text::SetVariable);
        let engine = ExecutionEngine::new(
            Arc::new(executor),
            variables,
            Arc::new(MemoryLogSink::new(0)),
        );
        (engine, probe)
    }

    fn workflow(modules: Vec<Module>, connections: &[(&str, &str)]) -> Workflow {
        let mut workflow = Workflow::new("test");
        workflow.modules = modules;
        workflow.connections = connections
            .iter()
            .map(|(source, target)| Connection::new(*source, *target))
            .collect();
        workflow
    }

    #[tokio::test]
    async fn inactive_branch_never_runs() {
        let (engine, probe) = engine(Arc::new(MemoryVariableStore::new()));
        let workflow = workflow(
            vec![
                Module::new("check", ModuleType::Condition, "check")
                    .with("input", "5")
                    .with("condition", "equals")
                    .with("compare_value", "5"),
                probe_module("yes").with("branch", "if_true"),
                probe_module("no").with("branch", "if_false"),
                Module::new("end", ModuleType::ConditionEnd, "end"),
                probe_module("after"),
            ],
            &[("check", "yes"), ("check", "no"), ("yes", "end"), ("no", "end"), ("end", "after")],
        );

        let report = engine.execute_workflow(&workflow).await.unwrap();
        assert!(report.success);
        assert_eq!(*probe.seen.lock().await, vec!["yes", "after"]);
        assert!(!report.results.contains_key("no"));
        assert_eq!(report.results["check"].branch.as_deref(), Some("if_true"));
        assert_eq!(report.summary(), "success");
    }

    #[tokio::test]
    async fn repeat_reruns_the_target_step() {
        let store = Arc::new(MemoryVariableStore::with_values(VariableMap::from([(
            "count".to_string(),
            json!(0),
        )])));
        let (engine, probe) = engine(store.clone());
        let workflow = workflow(
            vec![
                Module::new("bump", ModuleType::Calculate, "bump")
                    .with("input1", "[count]")
                    .with("operator", "+")
                    .with("input2", "1")
                    .with("output_var", "count"),
                probe_module("tick"),
                Module::new("again", ModuleType::Repeat, "again")
                    .with("target_module", "2")
                    .with("times", 3),
                Module::new("again_bump", ModuleType::Repeat, "again_bump")
                    .with("target_module", "1")
                    .with("times", 3),
            ],
            &[("bump", "tick"), ("tick", "again"), ("again", "again_bump")],
        );

        let report = engine.execute_workflow(&workflow).await.unwrap();
        assert!(report.success);
        assert_eq!(*probe.seen.lock().await, vec!["tick", "tick#1", "tick#2", "tick#3"]);

        // one planned run plus three repeats
        let stored = store.load_all().await.unwrap();
        assert_eq!(stored["count"], json!("4"));
        assert!(stored.keys().all(|name| !name.starts_with('_')));
    }

    #[tokio::test]
    async fn unknown_repeat_target_only_warns() {
        let (engine, probe) = engine(Arc::new(MemoryVariableStore::new()));
        let workflow = workflow(
            vec![
                Module::new("again", ModuleType::Repeat, "again")
                    .with("target_module", "9")
                    .with("times", 2),
                probe_module("tail"),
            ],
            &[("again", "tail")],
        );
        let report = engine.execute_workflow(&workflow).await.unwrap();
        assert!(report.success);
        assert_eq!(*probe.seen.lock().await, vec!["tail"]);
    }

    #[tokio::test]
    async fn numeric_repeat_targets_match_their_step() {
        let (engine, probe) = engine(Arc::new(MemoryVariableStore::new()));
        let workflow = workflow(
            vec![
                probe_module("tick"),
                Module::new("again", ModuleType::Repeat, "again")
                    .with("target_module", 1.0)
                    .with("times", 2),
            ],
            &[("tick", "again")],
        );
        engine.execute_workflow(&workflow).await.unwrap();
        assert_eq!(*probe.seen.lock().await, vec!["tick", "tick#1", "tick#2"]);
    }

    #[tokio::test]
    async fn module_names_cover_skipped_modules() {
        let (engine, _) = engine(Arc::new(MemoryVariableStore::new()));
        let workflow = workflow(
            vec![
                Module::new("check", ModuleType::Condition, "check")
                    .with("input", "")
                    .with("condition", "empty"),
                probe_module("no").with("branch", "if_false"),
                Module::new("end", ModuleType::ConditionEnd, "end"),
            ],
            &[("check", "no"), ("no", "end")],
        );

        let report = engine.execute_workflow(&workflow).await.unwrap();
        assert!(!report.results.contains_key("no"));
        assert_eq!(report.module_names["check"], "check (Condition)");
        assert_eq!(report.module_names["no"], "no (probe)");
        assert_eq!(report.module_names["end"], "end (Condition End)");
    }

    #[tokio::test]
    async fn module_failures_do_not_stop_the_run() {
        let (engine, probe) = engine(Arc::new(MemoryVariableStore::new()));
        let workflow = workflow(
            vec![probe_module("first").with("fail", true), probe_module("second"), probe_module("third").with("fail", true)],
            &[("first", "second"), ("second", "third")],
        );

        let report = engine.execute_workflow(&workflow).await.unwrap();
        assert!(!report.success);
        assert_eq!(probe.seen.lock().await.len(), 3);
        assert_eq!(
            report.error.as_deref(),
            Some("first: invalid input: probe told to fail")
        );
        assert_eq!(report.summary(), "failed: first: invalid input: probe told to fail");
        assert!(report.results["second"].success);
    }

    #[tokio::test]
    async fn cycle_aborts_before_any_side_effect() {
        let store = Arc::new(MemoryVariableStore::new());
        let (engine, probe) = engine(store.clone());
        let workflow = workflow(
            vec![
                Module::new("set", ModuleType::SetVariable, "set")
                    .with("name", "touched")
                    .with("value", "yes"),
                probe_module("a"),
                probe_module("b"),
            ],
            &[("set", "a"), ("a", "b"), ("b", "a")],
        );

        let err = engine.execute_workflow(&workflow).await.unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { .. }));
        assert!(probe.seen.lock().await.is_empty());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn variables_carry_over_between_runs() {
        let store = Arc::new(MemoryVariableStore::new());
        let (engine, _) = engine(store.clone());
        let workflow = workflow(
            vec![Module::new("set", ModuleType::SetVariable, "set")
                .with("name", "greeting")
                .with("value", "hi")],
            &[],
        );
        engine.execute_workflow(&workflow).await.unwrap();
        assert_eq!(store.load_all().await.unwrap()["greeting"], json!("hi"));
    }
}
