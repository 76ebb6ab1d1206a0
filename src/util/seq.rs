//! Monotonic sequence numbers.
//!
//! Each execution owns one generator; there is no process-wide counter, so two
//! executions in the same process produce independent, reproducible streams.

/// Hands out strictly increasing `u64` values starting at zero.
#[derive(Debug, Default, Clone)]
pub struct SeqGen {
    next: u64,
}

impl SeqGen {
    /// Creates a generator whose first value is zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the next value.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Value the next call will return.
    #[must_use]
    pub const fn peek(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let mut seq = SeqGen::new();
        let values: Vec<u64> = (0..4).map(|_| seq.next_seq()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert_eq!(seq.peek(), 4);
    }
}
