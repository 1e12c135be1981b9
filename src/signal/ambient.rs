//! Shared ambient-noise estimate
//!
//! One writer (the conditioner) and any number of readers. The value is an
//! `f32` stored as bits in an atomic, so readers never block the pipeline and
//! see a value at most one frame stale.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Create a cell holding `initial`
#[must_use]
pub fn channel(initial: f32) -> (AmbientWriter, AmbientReader) {
    let cell = Arc::new(AtomicU32::new(initial.to_bits()));
    (
        AmbientWriter {
            cell: Arc::clone(&cell),
        },
        AmbientReader { cell },
    )
}

/// Sole writer of the ambient estimate
#[derive(Debug)]
pub struct AmbientWriter {
    cell: Arc<AtomicU32>,
}

impl AmbientWriter {
    /// Publish a new estimate
    pub fn set(&self, value: f32) {
        self.cell.store(value.to_bits(), Ordering::Release);
    }

    /// Last published estimate
    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.cell.load(Ordering::Acquire))
    }

    /// A reader observing this writer
    #[must_use]
    pub fn reader(&self) -> AmbientReader {
        AmbientReader {
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Read-only view of the ambient estimate
#[derive(Debug, Clone)]
pub struct AmbientReader {
    cell: Arc<AtomicU32>,
}

impl AmbientReader {
    /// Current estimate
    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.cell.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_writes() {
        let (writer, reader) = channel(0.25);
        let other = reader.clone();
        assert!((reader.get() - 0.25).abs() < f32::EPSILON);

        writer.set(0.5);
        assert!((other.get() - 0.5).abs() < f32::EPSILON);
        assert!((writer.reader().get() - 0.5).abs() < f32::EPSILON);
    }
}
