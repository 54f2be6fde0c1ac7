//! Hook registrations, keyed by table and event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::db::Database;
use crate::storage::{InvalidNameError, Record, TableName};

/// Error type hooks may return; any `Error + Send + Sync` converts with `?`.
pub type HookFailure = Box<dyn std::error::Error + Send + Sync>;

pub type HookResult = Result<(), HookFailure>;

type HookFn = dyn Fn(&HookContext<'_>) -> HookResult + Send + Sync;

/// Write events hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    AfterInsert,
    AfterUpdate,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::AfterInsert => write!(f, "after_insert"),
            HookEvent::AfterUpdate => write!(f, "after_update"),
        }
    }
}

/// What a hook sees when it runs.
///
/// `db` is the database the write went through. Writes made with it join the
/// transaction of the triggering write.
pub struct HookContext<'a> {
    pub db: &'a Database,
    pub table: &'a TableName,
    pub event: HookEvent,
    /// the record as staged, after the write
    pub record: &'a Record,
    /// true when the record was just inserted
    pub created: bool,
    /// 1 for hooks of a top-level write, +1 for each hook-triggered write
    pub depth: usize,
}

/// A registered callback.
#[derive(Clone)]
pub struct RegisteredHook {
    pub(crate) name: String,
    pub(crate) callback: Arc<HookFn>,
}

impl RegisteredHook {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RegisteredHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHook").field("name", &self.name).finish()
    }
}

/// Ordered hook lists per (table, event).
///
/// Built during setup and handed to the database when it is opened; the
/// database never changes it afterwards.
///
/// ```ignore
/// let mut hooks = HookRegistry::new();
/// hooks.register("accounts", HookEvent::AfterInsert, |ctx| {
///     ctx.db.insert("logs", json!({ "account": ctx.record.id.as_str() }))?;
///     Ok(())
/// })?;
/// let db = Database::in_memory(hooks)?;
/// ```
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<(TableName, HookEvent), Vec<RegisteredHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook for `table` and `event`. Hooks run in registration order.
    pub fn register<F>(&mut self, table: &str, event: HookEvent, callback: F) -> Result<&mut Self, InvalidNameError>
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        let table = TableName::new(table)?;
        let index = self.hooks_for(&table, event).len();
        let name = format!("{}.{}#{}", table, event, index);
        Ok(self.insert(table, event, name, callback))
    }

    /// Like [`register`](Self::register), with a name used in logs and errors.
    pub fn register_named<F>(
        &mut self,
        table: &str,
        event: HookEvent,
        name: impl Into<String>,
        callback: F,
    ) -> Result<&mut Self, InvalidNameError>
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        let table = TableName::new(table)?;
        Ok(self.insert(table, event, name.into(), callback))
    }

    fn insert<F>(&mut self, table: TableName, event: HookEvent, name: String, callback: F) -> &mut Self
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        tracing::debug!(table = %table, event = %event, hook = %name, "hook registered");
        self.hooks.entry((table, event)).or_default().push(RegisteredHook {
            name,
            callback: Arc::new(callback),
        });
        self
    }

    /// Hooks for a (table, event) pair, in registration order.
    pub fn hooks_for(&self, table: &TableName, event: HookEvent) -> &[RegisteredHook] {
        self.hooks
            .get(&(table.clone(), event))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self
            .hooks
            .values()
            .flat_map(|hooks| hooks.iter().map(|h| h.name.as_str()))
            .collect();
        names.sort_unstable();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order() {
        let mut registry = HookRegistry::new();
        registry
            .register("accounts", HookEvent::AfterInsert, |_| Ok(()))
            .unwrap()
            .register_named("accounts", HookEvent::AfterInsert, "audit", |_| Ok(()))
            .unwrap()
            .register("accounts", HookEvent::AfterUpdate, |_| Ok(()))
            .unwrap();

        let accounts = TableName::new("accounts").unwrap();
        let names: Vec<&str> = registry
            .hooks_for(&accounts, HookEvent::AfterInsert)
            .iter()
            .map(RegisteredHook::name)
            .collect();
        assert_eq!(names, vec!["accounts.after_insert#0", "audit"]);
        assert_eq!(registry.hooks_for(&accounts, HookEvent::AfterUpdate).len(), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unknown_pair_is_empty() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
        let logs = TableName::new("logs").unwrap();
        assert!(registry.hooks_for(&logs, HookEvent::AfterInsert).is_empty());
    }

    #[test]
    fn test_invalid_table_name() {
        let mut registry = HookRegistry::new();
        assert!(registry.register("bad/name", HookEvent::AfterInsert, |_| Ok(())).is_err());
    }
}
