//! Lighting programs.

use crate::action::Action;
use std::fmt;
use std::sync::Arc;

/// An action with an id and a human-readable description. Programs
/// are immutable; schedulers share them through `Arc`.
#[derive(Clone)]
pub struct Program {
    id: u32,
    description: String,
    action: Arc<dyn Action>,
}

impl Program {
    pub fn new(id: u32, description: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            id,
            description: description.into(),
            action,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.description)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
