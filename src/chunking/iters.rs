use super::{ChunkPosition, ChunkingScheme};

/// Lazy iteration over a scheme's native positions, in lexicographic
/// order with axis 0 major.
pub struct ChunkPositions<'a> {
    scheme: &'a ChunkingScheme,
    next: Option<ChunkPosition>,
}

impl<'a> ChunkPositions<'a> {
    pub(super) fn new(scheme: &'a ChunkingScheme) -> Self {
        Self {
            scheme,
            next: Some(scheme.first()),
        }
    }
}

impl Iterator for ChunkPositions<'_> {
    type Item = ChunkPosition;

    fn next(&mut self) -> Option<ChunkPosition> {
        let current = self.next.take()?;
        self.next = self.scheme.next(&current);
        Some(current)
    }
}

impl<'a> IntoIterator for &'a ChunkingScheme {
    type Item = ChunkPosition;
    type IntoIter = ChunkPositions<'a>;

    fn into_iter(self) -> ChunkPositions<'a> {
        self.positions()
    }
}
