//! Pattern encoding and decoding.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::format::{
    Encoding, PatternError, PatternHeader, PayloadPreamble, DESCRIPTION_CAPACITY, NAME_CAPACITY,
    truncate_utf8,
};
use crate::compute::{Cell, CellParams, Dimensions, Grid, Position};
use crate::error::EngineError;
use crate::schema::{BoundaryKind, CUSTOM_RULE_ID, RuleSet};

/// Cell stream encoding requested on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Raw,
    RunLength,
    /// LZ4 over the raw bits. Requires the `lz4` feature.
    Lz4,
    /// Smaller of `Raw` and `RunLength`.
    #[default]
    Auto,
}

/// Descriptive fields stored alongside the cells.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternMetadata {
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    /// Unix seconds; 0 means "now" on save.
    pub created: u64,
    /// Unix seconds; set on save.
    pub modified: u64,
}

impl PatternMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0".to_string(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A decoded pattern: alive bits plus the context needed to rebuild a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub metadata: PatternMetadata,
    pub rule: RuleSet,
    pub boundary: BoundaryKind,
    pub dims: Dimensions,
    /// Alive flags in index order.
    pub cells: Vec<bool>,
    pub population: u64,
    pub generation: u64,
}

impl Pattern {
    /// Build a pattern from explicit live positions. Out-of-range positions are ignored.
    pub fn from_positions(
        metadata: PatternMetadata,
        rule: RuleSet,
        boundary: BoundaryKind,
        dims: Dimensions,
        alive: &[(u32, u32, u32)],
    ) -> Self {
        let mut cells = vec![false; dims.total_cells()];
        for &(x, y, z) in alive {
            if dims.contains(x, y, z) {
                cells[dims.index(x, y, z)] = true;
            }
        }
        let population = cells.iter().filter(|&&alive| alive).count() as u64;
        Self {
            metadata,
            rule,
            boundary,
            dims,
            cells,
            population,
            generation: 0,
        }
    }

    /// Snapshot the current generation of `grid`.
    pub fn from_grid(grid: &Grid, metadata: &PatternMetadata) -> Self {
        Self {
            metadata: metadata.clone(),
            rule: grid.rule().clone(),
            boundary: grid.boundary(),
            dims: grid.dimensions(),
            cells: grid.current().iter().map(|c| c.is_alive()).collect(),
            population: grid.population(),
            generation: grid.generation(),
        }
    }

    /// Live cell positions in index order.
    pub fn alive_positions(&self) -> impl Iterator<Item = Position> + '_ {
        let dims = self.dims;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(move |(i, _)| dims.position(i))
    }

    /// Rebuild a grid holding this pattern's cells, generation and rule.
    pub fn to_grid(&self, params: &CellParams) -> Result<Grid, EngineError> {
        let total = self.dims.checked_cells()?;
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(total)
            .map_err(|_| EngineError::AllocationFailure {
                cells: total as u128,
            })?;
        let spawned = Cell::spawned(params);
        cells.extend(
            self.cells
                .iter()
                .map(|&alive| if alive { spawned } else { Cell::DEAD }),
        );
        Grid::from_cells(
            self.dims,
            cells,
            self.generation,
            self.rule.clone(),
            self.boundary,
            *params,
        )
    }

    /// Serialize to the `.3dlife` byte layout.
    pub fn encode(&self, compression: Compression) -> Result<Vec<u8>, PatternError> {
        let (encoding, stream) = encode_cells(&self.cells, compression)?;

        let now = unix_now();
        let preamble = PayloadPreamble {
            encoding,
            birth: self.rule.birth,
            survival: self.rule.survival,
            population: self.population,
            generation: self.generation,
            created: if self.metadata.created == 0 {
                now
            } else {
                self.metadata.created
            },
            modified: now,
        };

        let data_size = u32::try_from(PayloadPreamble::SIZE + stream.len())
            .map_err(|_| PatternError::Corrupt("payload exceeds 4 GiB".to_string()))?;
        let name = truncate_utf8(&self.metadata.name, NAME_CAPACITY);
        let description = truncate_utf8(&self.metadata.description, DESCRIPTION_CAPACITY);
        let header = PatternHeader {
            width: self.dims.width,
            height: self.dims.height,
            depth: self.dims.depth,
            rule_id: self.rule.id(),
            boundary_id: self.boundary.id(),
            name_len: name.len() as u32,
            desc_len: description.len() as u32,
            data_size,
            name: name.to_string(),
            description: description.to_string(),
            author: self.metadata.author.clone(),
            version: self.metadata.version.clone(),
        };

        let mut bytes = Vec::with_capacity(PatternHeader::SIZE + data_size as usize);
        header.write_to(&mut bytes)?;
        preamble.write_to(&mut bytes)?;
        bytes.extend_from_slice(&stream);
        Ok(bytes)
    }

    /// Parse and validate a `.3dlife` byte buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, PatternError> {
        let header = PatternHeader::parse(bytes)?;

        let dims = Dimensions::new(header.width, header.height, header.depth);
        let total = dims
            .checked_cells()
            .map_err(|_| PatternError::InvalidDimensions)?;

        let preset_rule = if header.rule_id == CUSTOM_RULE_ID {
            None
        } else {
            let rule = RuleSet::by_id(header.rule_id)
                .map_err(|_| PatternError::UnknownRuleSet(header.rule_id))?;
            Some(rule)
        };
        let boundary = BoundaryKind::from_id(header.boundary_id)
            .ok_or(PatternError::UnknownBoundary(header.boundary_id))?;

        let expected = PatternHeader::SIZE + header.data_size as usize;
        if bytes.len() < expected {
            return Err(PatternError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(PatternError::Corrupt(format!(
                "{} trailing bytes after payload",
                bytes.len() - expected
            )));
        }

        let payload = &bytes[PatternHeader::SIZE..];
        let preamble = PayloadPreamble::parse(payload)?;
        let rule = match preset_rule {
            Some(rule) => rule,
            None => RuleSet::custom(preamble.birth, preamble.survival)
                .map_err(|e| PatternError::Corrupt(e.to_string()))?,
        };

        let cells = decode_cells(preamble.encoding, &payload[PayloadPreamble::SIZE..], total)?;
        let population = cells.iter().filter(|&&alive| alive).count() as u64;
        if population != preamble.population {
            return Err(PatternError::Corrupt(format!(
                "stored population {} but {} cells are alive",
                preamble.population, population
            )));
        }

        Ok(Self {
            metadata: PatternMetadata {
                name: header.name,
                description: header.description,
                author: header.author,
                version: header.version,
                created: preamble.created,
                modified: preamble.modified,
            },
            rule,
            boundary,
            dims,
            cells,
            population,
            generation: preamble.generation,
        })
    }
}

/// Encode the current generation of `grid`.
pub fn save(
    grid: &Grid,
    metadata: &PatternMetadata,
    compression: Compression,
) -> Result<Vec<u8>, PatternError> {
    Pattern::from_grid(grid, metadata).encode(compression)
}

/// Decode `bytes` into a fresh grid. Nothing existing is touched.
pub fn load(bytes: &[u8], params: &CellParams) -> Result<Grid, EngineError> {
    Pattern::decode(bytes)?.to_grid(params)
}

fn pack_bits(cells: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; cells.len().div_ceil(8)];
    for (i, _) in cells.iter().enumerate().filter(|(_, alive)| **alive) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    bytes
}

fn unpack_bits(bytes: &[u8], total: usize) -> Result<Vec<bool>, PatternError> {
    let expected = total.div_ceil(8);
    if bytes.len() != expected {
        return Err(PatternError::Corrupt(format!(
            "raw cell stream is {} bytes, expected {}",
            bytes.len(),
            expected
        )));
    }
    Ok((0..total).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect())
}

fn run_length_encode(cells: &[bool]) -> Vec<u8> {
    let mut runs: Vec<u32> = Vec::new();
    let mut state = false;
    let mut run = 0u32;
    for &alive in cells {
        if alive != state {
            runs.push(run);
            state = alive;
            run = 0;
        }
        if run == u32::MAX {
            // Split an overlong run with an empty run of the other state.
            runs.push(run);
            runs.push(0);
            run = 0;
        }
        run += 1;
    }
    runs.push(run);
    runs.iter().flat_map(|r| r.to_le_bytes()).collect()
}

fn run_length_decode(bytes: &[u8], total: usize) -> Result<Vec<bool>, PatternError> {
    if bytes.len() % 4 != 0 {
        return Err(PatternError::Corrupt(
            "run-length stream is not a whole number of u32 runs".to_string(),
        ));
    }
    let runs: Vec<usize> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as usize)
        .collect();
    let covered = runs
        .iter()
        .try_fold(0usize, |sum, &run| sum.checked_add(run));
    if covered != Some(total) {
        return Err(PatternError::Corrupt(format!(
            "runs do not cover exactly {total} cells"
        )));
    }

    let mut cells = Vec::new();
    cells
        .try_reserve_exact(total)
        .map_err(|_| PatternError::Corrupt(format!("cannot hold {total} cells")))?;
    let mut state = false;
    for run in runs {
        cells.resize(cells.len() + run, state);
        state = !state;
    }
    Ok(cells)
}

fn encode_cells(
    cells: &[bool],
    compression: Compression,
) -> Result<(Encoding, Vec<u8>), PatternError> {
    match compression {
        Compression::Raw => Ok((Encoding::Raw, pack_bits(cells))),
        Compression::RunLength => Ok((Encoding::RunLength, run_length_encode(cells))),
        Compression::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                Ok((Encoding::Lz4, lz4_flex::compress_prepend_size(&pack_bits(cells))))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(PatternError::EncodingUnavailable(Encoding::Lz4.name()))
            }
        }
        Compression::Auto => {
            let runs = run_length_encode(cells);
            if runs.len() < cells.len().div_ceil(8) {
                Ok((Encoding::RunLength, runs))
            } else {
                Ok((Encoding::Raw, pack_bits(cells)))
            }
        }
    }
}

fn decode_cells(encoding: Encoding, stream: &[u8], total: usize) -> Result<Vec<bool>, PatternError> {
    match encoding {
        Encoding::Raw => unpack_bits(stream, total),
        Encoding::RunLength => run_length_decode(stream, total),
        Encoding::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                let declared = stream
                    .get(..4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize);
                if declared != Some(total.div_ceil(8)) {
                    return Err(PatternError::Corrupt(
                        "lz4 stream declares the wrong size".to_string(),
                    ));
                }
                let raw = lz4_flex::decompress_size_prepended(stream)
                    .map_err(|e| PatternError::Corrupt(e.to_string()))?;
                unpack_bits(&raw, total)
            }
            #[cfg(not(feature = "lz4"))]
            {
                let _ = (stream, total);
                Err(PatternError::EncodingUnavailable(Encoding::Lz4.name()))
            }
        }
    }
}
