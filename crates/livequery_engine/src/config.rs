//! Configuration for the in-memory engine.

/// Configuration for a [`MemoryEngine`](crate::MemoryEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reject statements and registrations that name a collection the
    /// engine has never written to.
    ///
    /// Off by default: unknown collections read as empty and are created
    /// on first write, which is what interactive apps expect.
    pub strict_queries: bool,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            strict_queries: false,
        }
    }

    /// Sets whether unknown collections are rejected.
    pub fn with_strict_queries(mut self, strict: bool) -> Self {
        self.strict_queries = strict;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_lenient() {
        assert!(!EngineConfig::default().strict_queries);
        assert!(EngineConfig::new().with_strict_queries(true).strict_queries);
    }
}
