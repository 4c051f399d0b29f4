use tk_core::types::{Awaiting, Status, Tick, TickType};

// ---------------------------------------------------------------------------
// AwaitingFilter
// ---------------------------------------------------------------------------

/// How a filter matches the awaiting state. The CLI maps an empty string to
/// `NotAwaiting` and a comma list to `OneOf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitingFilter {
    /// Only ticks with no effective awaiting state.
    NotAwaiting,
    /// Any tick that is awaiting something (manual included).
    Any,
    /// Ticks whose effective awaiting state is one of these.
    OneOf(Vec<Awaiting>),
}

impl AwaitingFilter {
    fn matches(&self, tick: &Tick) -> bool {
        match (self, tick.effective_awaiting()) {
            (AwaitingFilter::NotAwaiting, state) => state.is_none(),
            (AwaitingFilter::Any, state) => state.is_some(),
            (AwaitingFilter::OneOf(wanted), Some(state)) => wanted.contains(&state),
            (AwaitingFilter::OneOf(_), None) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// A declarative tick filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub owner: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<u8>,
    pub tick_type: Option<TickType>,
    pub label: Option<String>,
    pub parent: Option<String>,
    pub awaiting: Option<AwaitingFilter>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tick_type(mut self, tick_type: TickType) -> Self {
        self.tick_type = Some(tick_type);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn awaiting(mut self, awaiting: AwaitingFilter) -> Self {
        self.awaiting = Some(awaiting);
        self
    }

    pub fn matches(&self, tick: &Tick) -> bool {
        if let Some(owner) = &self.owner {
            if &tick.owner != owner {
                return false;
            }
        }
        if let Some(status) = self.status {
            if tick.status != status {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if tick.priority != priority {
                return false;
            }
        }
        if let Some(tick_type) = self.tick_type {
            if tick.tick_type != tick_type {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if !tick.labels.contains(label) {
                return false;
            }
        }
        if let Some(parent) = &self.parent {
            if tick.parent.as_deref() != Some(parent.as_str()) {
                return false;
            }
        }
        if let Some(awaiting) = &self.awaiting {
            if !awaiting.matches(tick) {
                return false;
            }
        }
        true
    }

    /// Apply the filter, returning matching ticks by value.
    pub fn apply(&self, ticks: &[Tick]) -> Vec<Tick> {
        ticks.iter().filter(|t| self.matches(t)).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
