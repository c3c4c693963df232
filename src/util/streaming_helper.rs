// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use actix_web::body::SizedStream;
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;

/// One `Range` specifier, before it is checked against a file size.
#[derive(Debug, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-last`
    Bounded(u64, u64),
    /// `first-`
    From(u64),
    /// `-count`
    Last(u64),
}

/// The part of a file a request asked for.
#[derive(Debug, PartialEq, Eq)]
pub enum Slice {
    Whole,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a `bytes=` range header. Malformed specifiers are skipped; `None` when nothing usable remains.
pub fn parse_range_header(value: &str) -> Option<Vec<ByteRange>> {
    let specs = value.trim().strip_prefix("bytes=")?;
    let ranges: Vec<ByteRange> = specs
        .split(',')
        .filter_map(|spec| {
            let (first, last) = spec.trim().split_once('-')?;
            let (first, last) = (first.trim(), last.trim());
            match (first.parse::<u64>(), last.parse::<u64>()) {
                (Ok(start), Ok(end)) if start <= end => Some(ByteRange::Bounded(start, end)),
                (Ok(start), Err(_)) if last.is_empty() => Some(ByteRange::From(start)),
                (Err(_), Ok(count)) if first.is_empty() && count > 0 => Some(ByteRange::Last(count)),
                _ => None,
            }
        })
        .collect();

    if ranges.is_empty() { None } else { Some(ranges) }
}

/// Inclusive bounds of `range` within a file of `size` bytes.
pub fn range_bounds(range: &ByteRange, size: u64) -> Option<(u64, u64)> {
    let last = size.checked_sub(1)?;
    match *range {
        ByteRange::Bounded(start, end) if start <= last => Some((start, end.min(last))),
        ByteRange::From(start) if start <= last => Some((start, last)),
        ByteRange::Last(count) if count <= size => Some((size - count, last)),
        _ => None,
    }
}

/// Decide what to send for an optional `Range` header. Multi-range requests get the whole file.
pub fn select_slice(range_header: Option<&str>, size: u64) -> Slice {
    let Some(ranges) = range_header.and_then(parse_range_header) else {
        return Slice::Whole;
    };
    if ranges.len() != 1 {
        return Slice::Whole;
    }
    match range_bounds(&ranges[0], size) {
        Some((start, end)) => Slice::Partial { start, end },
        None => Slice::Unsatisfiable,
    }
}

pub fn format_content_range_header(start: u64, end: u64, total_size: u64) -> String {
    format!("bytes {}-{}/{}", start, end, total_size)
}

/// Stream `len` bytes of `path` starting at `start`, with a known content length.
pub async fn file_stream(
    path: &Path,
    start: u64,
    len: u64,
) -> io::Result<SizedStream<ReaderStream<Take<File>>>> {
    let mut file = File::open(path).await?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    Ok(SizedStream::new(len, ReaderStream::new(file.take(len))))
}
