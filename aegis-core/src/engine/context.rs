use serde_json::{Map, Value};

use crate::condition::resolve_path;

/// Namespaced results accumulated during one run.
///
/// The root is a JSON object such as `{trigger, edrActions, firewallActions,
/// ...}`. Handlers only ever add keys. A forked context keeps a journal of
/// its writes so a parallel branch can be merged back into its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    root: Value,
    journal: Option<Vec<(String, String, Value)>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            journal: None,
        }
    }

    pub fn with_trigger(trigger: Value) -> Self {
        let mut ctx = Self::new();
        if let Value::Object(map) = &mut ctx.root {
            map.insert("trigger".to_string(), trigger);
        }
        ctx
    }

    pub fn trigger(&self) -> Option<&Value> {
        self.root.get("trigger")
    }

    pub fn resolve(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.root, path)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Write `value` at `namespace.key`, replacing any previous value.
    pub fn record(&mut self, namespace: &str, key: &str, value: Value) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push((namespace.to_string(), key.to_string(), value.clone()));
        }

        let Value::Object(root) = &mut self.root else {
            return;
        };
        let slot = root
            .entry(namespace.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(key.to_string(), value);
        }
    }

    /// Snapshot for a concurrent branch; writes are journaled for [`merge`].
    ///
    /// [`merge`]: ExecutionContext::merge
    pub fn fork(&self) -> Self {
        Self {
            root: self.root.clone(),
            journal: Some(Vec::new()),
        }
    }

    /// Replay a fork's writes in the order they happened.
    pub fn merge(&mut self, fork: ExecutionContext) {
        for (namespace, key, value) in fork.journal.unwrap_or_default() {
            self.record(&namespace, &key, value);
        }
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Substitute `${dot.path}` placeholders in every string of `value`.
    ///
    /// Returns the rendered value and the paths that could not be resolved;
    /// those placeholders are left verbatim.
    pub fn render(&self, value: &Value) -> (Value, Vec<String>) {
        let mut unresolved = Vec::new();
        let rendered = self.render_value(value, &mut unresolved);
        (rendered, unresolved)
    }

    pub fn render_str(&self, input: &str, unresolved: &mut Vec<String>) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let path = after[..end].trim();
            match self.resolve(path) {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
                None => {
                    unresolved.push(path.to_string());
                    out.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }

    fn render_value(&self, value: &Value, unresolved: &mut Vec<String>) -> Value {
        match value {
            Value::String(s) if s.contains("${") => Value::String(self.render_str(s, unresolved)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item, unresolved))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v, unresolved)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
