// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Result, bail};
use fastcdc::v2020::FastCDC;

use crate::global::defaults::{AVG_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::utils::size;

/// How object payloads are cut into contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterConfig {
    /// Boundaries at every multiple of `block_size`.
    Fixed { block_size: u32 },
    /// Content-defined chunking (FastCDC).
    ContentDefined { min: u32, avg: u32, max: u32 },
}

impl Default for SplitterConfig {
    fn default() -> Self {
        SplitterConfig::ContentDefined {
            min: MIN_CHUNK_SIZE,
            avg: AVG_CHUNK_SIZE,
            max: MAX_CHUNK_SIZE,
        }
    }
}

impl SplitterConfig {
    /// Parses a splitter policy algorithm string: `cdc` (optionally
    /// `cdc-<avg>`) or `fixed` (optionally `fixed-<block>`), where sizes
    /// accept a `k`/`m` suffix.
    pub fn from_algorithm(algorithm: &str) -> Result<Self> {
        let (kind, param) = match algorithm.split_once('-') {
            Some((kind, param)) => (kind, Some(param)),
            None => (algorithm, None),
        };

        match kind {
            "cdc" => {
                let avg = match param {
                    Some(p) => parse_chunk_size(p)?,
                    None => AVG_CHUNK_SIZE,
                };
                Ok(SplitterConfig::ContentDefined {
                    min: avg / 2,
                    avg,
                    max: avg * 8,
                })
            }
            "fixed" => {
                let block_size = match param {
                    Some(p) => parse_chunk_size(p)?,
                    None => AVG_CHUNK_SIZE,
                };
                Ok(SplitterConfig::Fixed { block_size })
            }
            _ => bail!("Unknown splitter algorithm '{algorithm}'"),
        }
    }

    pub fn max_chunk_size(&self) -> u32 {
        match self {
            SplitterConfig::Fixed { block_size } => *block_size,
            SplitterConfig::ContentDefined { max, .. } => *max,
        }
    }
}

fn parse_chunk_size(s: &str) -> Result<u32> {
    let (digits, multiplier) = match s.chars().last() {
        Some('k') => (&s[..s.len() - 1], size::KiB),
        Some('m') => (&s[..s.len() - 1], size::MiB),
        _ => (s, 1),
    };

    let n: u64 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid chunk size '{s}'"))?;
    let bytes = n * multiplier;

    if bytes == 0 || bytes > 64 * size::MiB {
        bail!("Chunk size '{s}' out of range");
    }

    Ok(bytes as u32)
}

/// Incremental splitter fed by the object writer. Chunks are emitted as
/// soon as enough data is buffered to determine their boundary; the tail is
/// held back until `eof`.
pub(crate) struct IncrementalSplitter {
    config: SplitterConfig,
}

impl IncrementalSplitter {
    pub(crate) fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    /// Splits as much of `buffer` as the configuration allows, invoking
    /// `emit` for each complete chunk and draining it from the buffer. With
    /// `eof` set, the buffer is consumed entirely.
    pub(crate) fn push(
        &mut self,
        buffer: &mut Vec<u8>,
        eof: bool,
        emit: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        match self.config {
            SplitterConfig::Fixed { block_size } => {
                let block = block_size as usize;

                while buffer.len() >= block {
                    emit(&buffer[..block])?;
                    buffer.drain(..block);
                }

                if eof && !buffer.is_empty() {
                    emit(buffer)?;
                    buffer.clear();
                }
            }
            SplitterConfig::ContentDefined { min, avg, max } => {
                // Keep at least two maximum chunks buffered before cutting,
                // so boundaries match what a whole-buffer split would give.
                if !eof && buffer.len() < 2 * max as usize {
                    return Ok(());
                }

                let chunks: Vec<(usize, usize)> = FastCDC::new(buffer, min, avg, max)
                    .map(|chunk| (chunk.offset, chunk.length))
                    .collect();

                let mut consumed = 0;
                let emit_count = if eof {
                    chunks.len()
                } else {
                    chunks.len().saturating_sub(1)
                };

                for (offset, length) in chunks.into_iter().take(emit_count) {
                    emit(&buffer[offset..offset + length])?;
                    consumed = offset + length;
                }

                buffer.drain(..consumed);

                if eof && !buffer.is_empty() {
                    emit(buffer)?;
                    buffer.clear();
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(config: SplitterConfig, data: &[u8], step: usize) -> Vec<usize> {
        let mut splitter = IncrementalSplitter::new(config);
        let mut buffer = Vec::new();
        let mut lengths = Vec::new();

        let mut emit = |chunk: &[u8]| {
            lengths.push(chunk.len());
            Ok(())
        };

        for piece in data.chunks(step) {
            buffer.extend_from_slice(piece);
            splitter.push(&mut buffer, false, &mut emit).unwrap();
        }
        splitter.push(&mut buffer, true, &mut emit).unwrap();

        lengths
    }

    #[test]
    fn test_fixed_splitter_cuts_at_multiples() {
        let data = vec![7u8; 10_000];
        let lengths = split_all(SplitterConfig::Fixed { block_size: 4096 }, &data, 1000);

        assert_eq!(lengths, vec![4096, 4096, 1808]);

        // Boundary offsets are multiples of the block size.
        let mut offset = 0;
        for len in &lengths[..lengths.len() - 1] {
            offset += len;
            assert_eq!(offset % 4096, 0);
        }
    }

    #[test]
    fn test_cdc_splitter_respects_bounds() {
        // Pseudo-random but deterministic content.
        let data: Vec<u8> = (0..1_000_000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 16) as u8)
            .collect();

        let config = SplitterConfig::ContentDefined {
            min: 4 * 1024,
            avg: 16 * 1024,
            max: 64 * 1024,
        };
        let lengths = split_all(config, &data, 10_000);

        assert!(lengths.len() > 1);
        assert_eq!(lengths.iter().sum::<usize>(), data.len());
        for len in &lengths[..lengths.len() - 1] {
            assert!(*len >= 4 * 1024 && *len <= 64 * 1024);
        }
    }

    #[test]
    fn test_cdc_incremental_matches_whole_buffer() {
        let data: Vec<u8> = (0..500_000u32)
            .map(|i| (i.wrapping_mul(40503) >> 8) as u8)
            .collect();

        let config = SplitterConfig::ContentDefined {
            min: 4 * 1024,
            avg: 16 * 1024,
            max: 64 * 1024,
        };

        let incremental = split_all(config, &data, 7_777);
        let whole = split_all(config, &data, data.len());
        assert_eq!(incremental, whole);
    }

    #[test]
    fn test_from_algorithm() -> Result<()> {
        assert_eq!(
            SplitterConfig::from_algorithm("fixed-4m")?,
            SplitterConfig::Fixed {
                block_size: 4 * size::MiB as u32
            }
        );
        assert_eq!(
            SplitterConfig::from_algorithm("cdc-512k")?,
            SplitterConfig::ContentDefined {
                min: 256 * size::KiB as u32,
                avg: 512 * size::KiB as u32,
                max: 4 * size::MiB as u32,
            }
        );
        assert!(SplitterConfig::from_algorithm("rabin").is_err());
        assert!(SplitterConfig::from_algorithm("fixed-0").is_err());

        Ok(())
    }
}
