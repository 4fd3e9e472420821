//! Realignment of a resume offset to an object region start
//!
//! A resumed job with excluded objects must restart on a region boundary,
//! otherwise the exclusion stage cannot tell which object the first moves
//! belong to. The saved offset is moved to the first region-start line at
//! or after it within one chunk, or failing that to the nearest one before
//! it, searching backwards a chunk at a time.

use std::io::{self, Read, Seek, SeekFrom};

/// Prefix of a region-start line
pub const REGION_START_MARKER: &[u8] = b"EXCLUDE_OBJECT_START NAME=";

/// Find the region start to resume from, if any
///
/// `offset` must be the start of a line.
pub fn realign_to_region_start<R: Read + Seek>(
    file: &mut R,
    offset: u64,
    chunk: usize,
) -> io::Result<Option<u64>> {
    let chunk = chunk.max(1) as u64;
    let marker_len = REGION_START_MARKER.len() as u64;

    let forward = read_range(file, offset, chunk + marker_len)?;
    if let Some(found) = marker_lines(&forward, offset, true)
        .into_iter()
        .find(|&start| start < offset + chunk)
    {
        return Ok(Some(found));
    }

    let mut window_end = offset;
    while window_end > 0 {
        let window_start = window_end.saturating_sub(chunk);
        // One byte of lead-in shows whether the window opens on a line start
        let read_start = window_start.saturating_sub(1);
        let buf = read_range(file, read_start, window_end - read_start + marker_len)?;
        let found = marker_lines(&buf, read_start, read_start == 0)
            .into_iter()
            .filter(|&start| start >= window_start && start < window_end)
            .max();
        if found.is_some() {
            return Ok(found);
        }
        window_end = window_start;
    }
    Ok(None)
}

fn read_range<R: Read + Seek>(file: &mut R, start: u64, len: u64) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.by_ref().take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Absolute offsets of lines in `buf` that begin with the marker
fn marker_lines(buf: &[u8], base: u64, starts_on_line: bool) -> Vec<u64> {
    let first = starts_on_line.then_some(0);
    let after_newline = buf
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .map(|(i, _)| i + 1);
    first
        .into_iter()
        .chain(after_newline)
        .filter(|&i| buf[i..].starts_with(REGION_START_MARKER))
        .map(|i| base + i as u64)
        .collect()
}
