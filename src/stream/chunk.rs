//! Byte-range arithmetic and the time→chunk translator.
//!
//! Chunk `i` covers bytes `[i * chunk_size, (i + 1) * chunk_size - 1]`
//! (end-inclusive, like an HTTP `Range` header). The last chunk may extend
//! past end-of-file; servers clamp it.

/// Default chunk size: 512 KiB
pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;

/// Start byte of a chunk
pub fn chunk_start_byte(chunk_index: u64, chunk_size: u64) -> u64 {
    chunk_index.saturating_mul(chunk_size)
}

/// Inclusive byte range requested for a chunk, not clamped to the file size
pub fn chunk_byte_range(chunk_index: u64, chunk_size: u64) -> (u64, u64) {
    let start = chunk_start_byte(chunk_index, chunk_size);
    let end = chunk_index
        .saturating_add(1)
        .saturating_mul(chunk_size)
        .saturating_sub(1);
    (start, end)
}

/// Calculate chunk index from byte offset
pub fn byte_to_chunk_index(byte_offset: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    byte_offset / chunk_size
}

/// Number of chunks needed to cover a file
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Map a playback position to the chunk holding it.
///
/// Linear constant-bitrate approximation:
/// `floor(floor(time / duration * file_size) / chunk_size)`.
/// Degenerate inputs (non-positive duration, empty file, zero chunk size,
/// negative or NaN time) map to chunk 0. Positions past the end map to the
/// last chunk.
pub fn chunk_index_for(time_secs: f64, duration_secs: f64, file_size: u64, chunk_size: u64) -> u64 {
    if !(duration_secs > 0.0) || !duration_secs.is_finite() || file_size == 0 || chunk_size == 0 {
        return 0;
    }
    if !(time_secs > 0.0) {
        return 0;
    }

    let fraction = (time_secs / duration_secs).min(1.0);
    let byte_offset = (fraction * file_size as f64).floor() as u64;
    let last_chunk = (file_size - 1) / chunk_size;

    byte_to_chunk_index(byte_offset, chunk_size).min(last_chunk)
}
