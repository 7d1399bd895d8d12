use std::fmt;

use super::EPollSelector;
use crate::error::Result;

const DEFAULT_MAX_EVENTS: usize = 8192;

/// Selector configuration object.
pub struct SelectorBuilder {
    pub(super) max_events: usize,
}

impl SelectorBuilder {
    /// Create a default selector configuration.
    ///
    /// See the other methods on this builder for details on the default configuration.
    pub fn new() -> SelectorBuilder {
        SelectorBuilder {
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    /// Set the maximum number of kernel events a single [EPollSelector::wait] call can report.
    ///
    /// Readiness is level triggered so anything beyond this is simply reported on the next wait.
    /// The value is clamped to at least one, and defaults to 8192.
    pub fn max_events(&mut self, max_events: usize) -> &mut Self {
        self.max_events = max_events.max(1);
        self
    }

    /// Create the selector with the given configuration. The selector still needs
    /// [EPollSelector::start] before it can be used.
    pub fn build<A>(&self) -> Result<EPollSelector<A>> {
        EPollSelector::with_config(self)
    }
}

impl Default for SelectorBuilder {
    fn default() -> Self {
        SelectorBuilder::new()
    }
}

impl fmt::Debug for SelectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorBuilder")
            .field("max_events", &self.max_events)
            .finish()
    }
}
