use serde::{Deserialize, Serialize};

/// One buffer size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolClass {
    /// Usable bytes per buffer.
    pub bufsize: usize,
    /// Number of buffers in the class.
    pub count: usize,
}

impl PoolClass {
    pub const fn new(bufsize: usize, count: usize) -> Self {
        Self { bufsize, count }
    }
}

/// Pool table for a [`PoolAllocator`](crate::PoolAllocator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Size classes. Sorted ascending by the allocator.
    pub classes: Vec<PoolClass>,
    /// Write and verify magic tags around every buffer. Adds 8 bytes per slot.
    pub boundary_check: bool,
}

impl Default for PoolConfig {
    /// The daughterboard table: 4 KiB of small buffers, 16 KiB of medium
    /// buffers and four MTU-sized buffers.
    fn default() -> Self {
        Self {
            classes: vec![
                PoolClass::new(64, 64),
                PoolClass::new(512, 32),
                PoolClass::new(1500, 4),
            ],
            boundary_check: true,
        }
    }
}

impl PoolConfig {
    /// Build a config from explicit classes with boundary checking on.
    pub fn with_classes(classes: &[PoolClass]) -> Self {
        Self {
            classes: classes.to_vec(),
            boundary_check: true,
        }
    }

    /// Largest single allocation the table can serve.
    pub fn max_alloc(&self) -> usize {
        self.classes.iter().map(|c| c.bufsize).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_board() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.classes.len(), 3);
        assert_eq!(cfg.max_alloc(), 1500);
        assert!(cfg.boundary_check);
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: PoolConfig =
            serde_json::from_str(r#"{"classes":[{"bufsize":32,"count":2}]}"#).unwrap();
        assert_eq!(cfg.classes, vec![PoolClass::new(32, 2)]);
        assert!(cfg.boundary_check);
    }
}
