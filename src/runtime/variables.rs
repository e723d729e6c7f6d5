/// Run-scoped variable store and `[name]` expression substitution
///
/// Variables are loaded from the persistent store once at run start, mutated by
/// modules while the run walks its plan, and merged back once at the end.
/// Keys starting with `_` are engine state for the current run only.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Persisted variable map as exchanged with a `VariableStore`
pub type VariableMap = HashMap<String, Value>;

/// Reserved engine keys
pub mod keys {
    pub const CURRENT_BRANCH: &str = "_current_branch";
    pub const CONDITION_RESULT: &str = "_condition_result";
    pub const GLOBAL_PROXY: &str = "_global_proxy";
    pub const REPEAT_MODULE: &str = "_repeat_module";
    pub const REPEAT_TIMES: &str = "_repeat_times";
    pub const REPEAT_CURRENT: &str = "_repeat_current";

    /// Branch-scoped proxy key; `default` when no branch is active
    pub fn branch_proxy(branch: Option<&str>) -> String {
        format!("_branch_proxy_{}", branch.unwrap_or("default"))
    }
}

const MISSING_PREFIX: &str = "${missing variable: ";

/// Shared mutable key/value state of one workflow run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: BTreeMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the run state from persisted values, dropping stale engine keys
    pub fn from_persisted(persisted: VariableMap) -> Self {
        let values = persisted
            .into_iter()
            .filter(|(name, _)| !is_reserved(name))
            .collect();
        Self { values }
    }

    /// User-visible values to merge back into the persistent store
    pub fn into_persisted(self) -> VariableMap {
        self.values
            .into_iter()
            .filter(|(name, _)| !is_reserved(name))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Stringified value, `None` when the variable does not exist
    pub fn text(&self, name: &str) -> Option<String> {
        self.values.get(name).map(stringify)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Active branch tag set by the last condition module
    pub fn current_branch(&self) -> Option<&str> {
        match self.values.get(keys::CURRENT_BRANCH) {
            Some(Value::String(branch)) if !branch.is_empty() => Some(branch.as_str()),
            _ => None,
        }
    }

    /// Proxy for outgoing requests: branch-scoped first, then global
    pub fn resolve_proxy(&self) -> Option<String> {
        let branch_key = keys::branch_proxy(self.current_branch());
        let proxy = [branch_key.as_str(), keys::GLOBAL_PROXY]
            .into_iter()
            .filter_map(|key| self.values.get(key))
            .map(stringify)
            .find(|proxy| !proxy.is_empty() && proxy != "null");
        proxy
    }

    /// Replace each `[name]` with the stringified variable value
    ///
    /// Matches are the shortest bracketed spans on a single line; names are
    /// trimmed. Unknown names become `${missing variable: <name>}`. The output
    /// is never expanded a second time.
    pub fn substitute(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find('[') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                break;
            };
            let candidate = &after[..close];
            if candidate.contains('\n') {
                output.push_str(&rest[..=open]);
                rest = after;
                continue;
            }

            output.push_str(&rest[..open]);
            let name = candidate.trim();
            match self.values.get(name) {
                Some(value) => output.push_str(&stringify(value)),
                None => {
                    output.push_str(MISSING_PREFIX);
                    output.push_str(name);
                    output.push('}');
                }
            }
            rest = &after[close + 1..];
        }

        output.push_str(rest);
        output
    }
}

/// Engine-owned key that never leaves the run
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('_')
}

/// Text form of a variable value
///
/// Strings verbatim, `null` for null, compact JSON for everything else.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Exact `[name]` reference, returning the trimmed name
pub fn whole_reference(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.contains('[') || inner.contains(']') {
        return None;
    }
    Some(inner.trim())
}
