use std::sync::Mutex;

use ulid::{Generator, Ulid};

/// Identifier of an asynchronous statement.
pub type StatementId = Ulid;

/// Thread-safe, monotonic ULID generator for statement tickets.
pub struct StatementIdGenerator {
    inner: Mutex<Generator>,
}

impl StatementIdGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`StatementId`]. Within one millisecond ids keep
    /// increasing; on random-part overflow a fresh, non-monotonic id is used.
    pub fn generate(&self) -> StatementId {
        let mut guard = self
            .inner
            .lock()
            .expect("statement id generator mutex should not be poisoned");
        guard.generate().unwrap_or_else(|_| Ulid::new())
    }
}

impl Default for StatementIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::StatementIdGenerator;

    #[test]
    fn ids_increase() {
        let generator = StatementIdGenerator::new();
        let ids = (0..64).map(|_| generator.generate()).collect::<Vec<_>>();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
