/// Append-only record of chunk indices successfully handed to the decoder
///
/// Lives exactly as long as one playback session; a song change discards it
/// together with the decoder buffer. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkLedger {
    entries: Vec<u64>,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, chunk_index: u64) {
        self.entries.push(chunk_index);
    }

    /// Most recently appended chunk
    pub fn last(&self) -> Option<u64> {
        self.entries.last().copied()
    }

    /// Chunk after the most recent append, or chunk 0 for an empty ledger
    pub fn next_sequential(&self) -> u64 {
        self.last().map_or(0, |last| last.saturating_add(1))
    }

    pub fn contains(&self, chunk_index: u64) -> bool {
        self.entries.contains(&chunk_index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appended indices in append order
    pub fn entries(&self) -> &[u64] {
        &self.entries
    }
}
