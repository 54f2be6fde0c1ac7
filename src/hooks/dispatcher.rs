//! Synchronous, in-thread hook dispatch.

use std::time::Instant;

use thiserror::Error;

use crate::hooks::registry::{HookContext, HookEvent, HookFailure, HookRegistry};
use crate::storage::TableName;

/// A hook failed; the surrounding transaction is rolled back.
#[derive(Debug, Error)]
#[error("hook '{name}' (#{hook}) on {table} {event} failed: {cause}")]
pub struct HookError {
    pub table: TableName,
    pub event: HookEvent,
    /// position of the failing hook in registration order
    pub hook: usize,
    pub name: String,
    #[source]
    pub cause: HookFailure,
}

/// Hook-triggered writes nested deeper than the configured limit.
#[derive(Debug, Error)]
#[error("hook dispatch nested deeper than {limit} levels")]
pub struct HookDepthExceeded {
    pub limit: usize,
}

/// Runs registered hooks inline in the calling thread.
#[derive(Debug, Clone)]
pub struct HookDispatcher {
    registry: HookRegistry,
    max_depth: usize,
}

impl HookDispatcher {
    pub fn new(registry: HookRegistry, max_depth: usize) -> Self {
        Self { registry, max_depth }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Run every hook for the context's (table, event), in order.
    ///
    /// Returns when all hooks have returned. The first failure stops the rest.
    pub fn dispatch(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        let hooks = self.registry.hooks_for(ctx.table, ctx.event);
        let first = match hooks.first() {
            Some(first) => first,
            None => return Ok(()),
        };

        if ctx.depth > self.max_depth {
            return Err(HookError {
                table: ctx.table.clone(),
                event: ctx.event,
                hook: 0,
                name: first.name.clone(),
                cause: Box::new(HookDepthExceeded { limit: self.max_depth }),
            });
        }

        for (index, hook) in hooks.iter().enumerate() {
            let started = Instant::now();
            let outcome = (hook.callback)(ctx);
            tracing::debug!(
                table = %ctx.table,
                event = %ctx.event,
                hook = %hook.name,
                depth = ctx.depth,
                elapsed_us = started.elapsed().as_micros() as u64,
                ok = outcome.is_ok(),
                "hook ran"
            );

            if let Err(cause) = outcome {
                return Err(HookError {
                    table: ctx.table.clone(),
                    event: ctx.event,
                    hook: index,
                    name: hook.name.clone(),
                    cause,
                });
            }
        }
        Ok(())
    }
}
