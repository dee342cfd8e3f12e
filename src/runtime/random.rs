//! Random source indirection for destination selection.

use rand::Rng;
use std::sync::Mutex;

/// A single-use source of random indices.
pub trait RandomSource {
    /// Uniform random index in `0..bound`. `bound` must be non-zero.
    fn next_index(&mut self, bound: usize) -> usize;
}

/// Factory yielding a fresh [`RandomSource`] per request.
///
/// The forwarder asks for a new instance on every selection, which lets
/// tests inject deterministic sequences without any process-wide state.
pub trait RandomFactory: Send + Sync {
    fn create(&self) -> Box<dyn RandomSource>;
}

/// Production factory wrapping the thread-local PRNG.
#[derive(Debug, Default)]
pub struct ThreadRandomFactory;

impl ThreadRandomFactory {
    pub fn new() -> Self {
        Self
    }
}

struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn next_index(&mut self, bound: usize) -> usize {
        rand::thread_rng().gen_range(0..bound)
    }
}

impl RandomFactory for ThreadRandomFactory {
    fn create(&self) -> Box<dyn RandomSource> {
        Box::new(ThreadRandomSource)
    }
}

/// Test factory replaying a fixed sequence of indices.
#[derive(Debug)]
pub struct SequenceRandomFactory {
    values: Mutex<Vec<usize>>,
}

impl SequenceRandomFactory {
    /// The sequence is consumed front to back, one value per `create()` call.
    pub fn new(values: Vec<usize>) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }
}

struct FixedSource(usize);

impl RandomSource for FixedSource {
    fn next_index(&mut self, bound: usize) -> usize {
        self.0 % bound
    }
}

impl RandomFactory for SequenceRandomFactory {
    fn create(&self) -> Box<dyn RandomSource> {
        let mut values = self.values.lock().unwrap();
        let value = if values.is_empty() { 0 } else { values.remove(0) };
        Box::new(FixedSource(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_factory_in_bounds() {
        let factory = ThreadRandomFactory::new();
        for _ in 0..100 {
            let idx = factory.create().next_index(3);
            assert!(idx < 3);
        }
    }

    #[test]
    fn test_sequence_factory_replays() {
        let factory = SequenceRandomFactory::new(vec![1, 2, 0]);
        assert_eq!(factory.create().next_index(3), 1);
        assert_eq!(factory.create().next_index(3), 2);
        assert_eq!(factory.create().next_index(3), 0);
        // Exhausted sequences fall back to the first candidate.
        assert_eq!(factory.create().next_index(3), 0);
    }

    #[test]
    fn test_sequence_factory_wraps_bound() {
        let factory = SequenceRandomFactory::new(vec![5]);
        assert_eq!(factory.create().next_index(3), 2);
    }
}
