use std::sync::atomic::{AtomicBool, Ordering};

use super::chunk::{chunk_count, chunk_index_for};
use super::ledger::ChunkLedger;
use crate::models::Song;
use crate::player::{TimeRange, range_containing};

/// Why a chunk is being fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// Chunk 0, fetched eagerly when the session starts
    Bootstrap,
    /// The playback position is not covered by any buffered range
    UnbufferedJump,
    /// Covered, but the remaining buffered time is below the low-water mark
    LowRunway,
    /// Explicit seek to an uncovered position
    Seek,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Fetch {
        chunk_index: u64,
        reason: FetchReason,
    },
    /// Covered with enough runway, or nothing left to fetch
    Idle,
}

/// Prefetch scheduler driven by playback position updates
///
/// At most one monitor-initiated fetch runs at a time; ticks arriving while
/// one is in flight are dropped, not queued.
#[derive(Debug)]
pub struct BufferMonitor {
    in_flight: AtomicBool,
    low_water_mark_secs: f64,
    chunk_size: u64,
}

/// Clears the in-flight flag when dropped
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl BufferMonitor {
    pub fn new(low_water_mark_secs: f64, chunk_size: u64) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            low_water_mark_secs,
            chunk_size,
        }
    }

    /// Claim the in-flight slot, or `None` if a fetch is already running
    pub fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Decide what one tick should do. Pure; performs no I/O.
    pub fn evaluate(
        &self,
        position: f64,
        buffered: &[TimeRange],
        ledger: &ChunkLedger,
        song: &Song,
    ) -> TickAction {
        let total_chunks = chunk_count(song.size, self.chunk_size);
        if total_chunks == 0 || position >= song.duration {
            return TickAction::Idle;
        }

        match range_containing(buffered, position) {
            None => {
                let mut target =
                    chunk_index_for(position, song.duration, song.size, self.chunk_size);

                // The estimate already landed on an appended chunk that does not
                // cover the position; move forward instead of refetching it.
                while ledger.contains(target) && target + 1 < total_chunks {
                    target += 1;
                }

                TickAction::Fetch {
                    chunk_index: target,
                    reason: FetchReason::UnbufferedJump,
                }
            }
            Some(range) => {
                let runway = range.end - position;
                if runway >= self.low_water_mark_secs {
                    return TickAction::Idle;
                }

                let next = ledger.next_sequential();
                if next >= total_chunks {
                    return TickAction::Idle;
                }

                TickAction::Fetch {
                    chunk_index: next,
                    reason: FetchReason::LowRunway,
                }
            }
        }
    }
}
