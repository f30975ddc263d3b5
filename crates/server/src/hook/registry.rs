use std::fmt;

use crate::PhaseError;
use crate::hook::{Hook, Order, Phase};

struct PhaseEntry {
    name: String,
    order: Order,
    hooks: Vec<Hook>,
}

/// The hooks of every phase, kept sorted by position.
///
/// The registry is assembled by the server builder and frozen afterwards; hooks added while a
/// request is processed live in that request's context instead.
pub struct HookRegistry {
    phases: Vec<PhaseEntry>,
}

impl HookRegistry {
    pub fn new() -> Self {
        let phases = vec![
            PhaseEntry { name: "request".to_owned(), order: Order::Ascending, hooks: vec![] },
            PhaseEntry { name: "response".to_owned(), order: Order::Stack, hooks: vec![] },
        ];
        Self { phases }
    }

    /// Defines a new phase dispatched in `order`.
    pub fn define(&mut self, name: &str, order: Order) -> Result<Phase, PhaseError> {
        if self.lookup(name).is_some() {
            return Err(PhaseError::DuplicatePhase(name.to_owned()));
        }
        self.phases.push(PhaseEntry { name: name.to_owned(), order, hooks: vec![] });
        Ok(Phase(self.phases.len() - 1))
    }

    pub fn add(&mut self, phase: Phase, hook: Hook) -> Result<(), PhaseError> {
        let entry = self.phases.get_mut(phase.index()).ok_or_else(|| PhaseError::UnknownPhase(format!("#{}", phase.index())))?;
        let index = entry.hooks.partition_point(|existing| existing.position() < hook.position());
        entry.hooks.insert(index, hook);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Phase> {
        self.phases.iter().position(|entry| entry.name == name).map(Phase)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        phase.index() < self.phases.len()
    }

    pub fn name(&self, phase: Phase) -> Option<&str> {
        self.phases.get(phase.index()).map(|entry| entry.name.as_str())
    }

    pub fn order(&self, phase: Phase) -> Option<Order> {
        self.phases.get(phase.index()).map(|entry| entry.order)
    }

    /// Hooks of `phase` in ascending position; empty for unknown phases.
    pub fn hooks(&self, phase: Phase) -> &[Hook] {
        self.phases.get(phase.index()).map_or(&[], |entry| entry.hooks.as_slice())
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.phases.iter().map(|entry| (entry.name.as_str(), entry.hooks.len())))
            .finish()
    }
}
