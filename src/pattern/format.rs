//! Binary layout of `.3dlife` pattern files.

use std::io::{self, Read, Write};

use crate::schema::NeighborRange;

/// Magic number identifying a pattern file ("V3DL" little-endian).
pub const PATTERN_MAGIC: u32 = u32::from_le_bytes(*b"V3DL");

/// Current format version.
pub const PATTERN_VERSION: u32 = 1;

/// File extension used by [`save_to_file`](super::save_to_file) and
/// [`load_directory`](super::load_directory).
pub const PATTERN_EXTENSION: &str = "3dlife";

pub const NAME_CAPACITY: usize = 64;
pub const DESCRIPTION_CAPACITY: usize = 256;
pub const AUTHOR_CAPACITY: usize = 64;
pub const VERSION_CAPACITY: usize = 16;

/// Errors from encoding or decoding patterns.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported pattern version {0}")]
    UnsupportedVersion(u32),

    #[error("Pattern truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Pattern dimensions are zero or too large")]
    InvalidDimensions,

    #[error("Unknown rule set id {0}")]
    UnknownRuleSet(u32),

    #[error("Unknown boundary kind id {0}")]
    UnknownBoundary(u32),

    #[error("Unknown payload encoding {0}")]
    UnknownEncoding(u8),

    #[error("Payload uses {0} encoding, which this build does not support")]
    EncodingUnavailable(&'static str),

    #[error("Corrupt pattern: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Cell stream encoding tag stored in the payload preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Alive bits packed LSB-first.
    Raw = 0,
    /// Alternating u32 runs, starting with a dead run.
    RunLength = 1,
    /// Raw bits compressed with LZ4 (size-prepended).
    Lz4 = 2,
}

impl Encoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Encoding::Raw),
            1 => Some(Encoding::RunLength),
            2 => Some(Encoding::Lz4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::RunLength => "run-length",
            Encoding::Lz4 => "lz4",
        }
    }
}

/// Fixed-size file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternHeader {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub rule_id: u32,
    pub boundary_id: u32,
    /// Stored byte length of `name`.
    pub name_len: u32,
    /// Stored byte length of `description`.
    pub desc_len: u32,
    /// Payload bytes following the header.
    pub data_size: u32,
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
}

impl PatternHeader {
    /// Size of header in bytes.
    /// Ten u32 fields (40) + name(64) + description(256) + author(64) +
    /// version(16) = 440
    pub const SIZE: usize =
        40 + NAME_CAPACITY + DESCRIPTION_CAPACITY + AUTHOR_CAPACITY + VERSION_CAPACITY;

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&PATTERN_MAGIC.to_le_bytes())?;
        w.write_all(&PATTERN_VERSION.to_le_bytes())?;
        w.write_all(&self.width.to_le_bytes())?;
        w.write_all(&self.height.to_le_bytes())?;
        w.write_all(&self.depth.to_le_bytes())?;
        w.write_all(&self.rule_id.to_le_bytes())?;
        w.write_all(&self.boundary_id.to_le_bytes())?;
        w.write_all(&self.name_len.to_le_bytes())?;
        w.write_all(&self.desc_len.to_le_bytes())?;
        w.write_all(&self.data_size.to_le_bytes())?;
        write_fixed(w, &self.name, NAME_CAPACITY)?;
        write_fixed(w, &self.description, DESCRIPTION_CAPACITY)?;
        write_fixed(w, &self.author, AUTHOR_CAPACITY)?;
        write_fixed(w, &self.version, VERSION_CAPACITY)?;
        Ok(())
    }

    /// Parse the header at the start of `bytes`.
    ///
    /// Magic is checked first, then version, then length.
    pub fn parse(bytes: &[u8]) -> Result<Self, PatternError> {
        let word = |at: usize| -> Option<u32> {
            bytes
                .get(at..at + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };

        let magic = word(0).ok_or(PatternError::Truncated {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        if magic != PATTERN_MAGIC {
            return Err(PatternError::BadMagic(magic));
        }

        let version = word(4).ok_or(PatternError::Truncated {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        if version != PATTERN_VERSION {
            return Err(PatternError::UnsupportedVersion(version));
        }

        if bytes.len() < Self::SIZE {
            return Err(PatternError::Truncated {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let mut r = &bytes[8..Self::SIZE];
        Self::read_from(&mut r)
    }

    /// Read the header fields that follow magic and version.
    fn read_from<R: Read>(r: &mut R) -> Result<Self, PatternError> {
        let mut buf4 = [0u8; 4];
        let mut next_u32 = |r: &mut R| -> io::Result<u32> {
            r.read_exact(&mut buf4)?;
            Ok(u32::from_le_bytes(buf4))
        };

        let width = next_u32(r)?;
        let height = next_u32(r)?;
        let depth = next_u32(r)?;
        let rule_id = next_u32(r)?;
        let boundary_id = next_u32(r)?;
        let name_len = next_u32(r)?;
        let desc_len = next_u32(r)?;
        let data_size = next_u32(r)?;

        if name_len as usize > NAME_CAPACITY || desc_len as usize > DESCRIPTION_CAPACITY {
            return Err(PatternError::Corrupt(format!(
                "string lengths {name_len}/{desc_len} exceed their fields"
            )));
        }

        let name = read_fixed(r, NAME_CAPACITY, Some(name_len as usize))?;
        let description = read_fixed(r, DESCRIPTION_CAPACITY, Some(desc_len as usize))?;
        let author = read_fixed(r, AUTHOR_CAPACITY, None)?;
        let version = read_fixed(r, VERSION_CAPACITY, None)?;

        Ok(Self {
            width,
            height,
            depth,
            rule_id,
            boundary_id,
            name_len,
            desc_len,
            data_size,
            name,
            description,
            author,
            version,
        })
    }
}

/// Fixed-size start of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadPreamble {
    pub encoding: Encoding,
    pub birth: NeighborRange,
    pub survival: NeighborRange,
    pub population: u64,
    pub generation: u64,
    /// Unix seconds.
    pub created: u64,
    /// Unix seconds.
    pub modified: u64,
}

impl PayloadPreamble {
    /// Encoding(1) + ranges(4) + reserved(3) + four u64 (32) = 40
    pub const SIZE: usize = 40;

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[
            self.encoding as u8,
            self.birth.min,
            self.birth.max,
            self.survival.min,
            self.survival.max,
            0,
            0,
            0,
        ])?;
        w.write_all(&self.population.to_le_bytes())?;
        w.write_all(&self.generation.to_le_bytes())?;
        w.write_all(&self.created.to_le_bytes())?;
        w.write_all(&self.modified.to_le_bytes())?;
        Ok(())
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PatternError> {
        if payload.len() < Self::SIZE {
            return Err(PatternError::Corrupt(format!(
                "payload of {} bytes is shorter than its {}-byte preamble",
                payload.len(),
                Self::SIZE
            )));
        }
        let encoding =
            Encoding::from_u8(payload[0]).ok_or(PatternError::UnknownEncoding(payload[0]))?;
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&payload[at..at + 8]);
            u64::from_le_bytes(b)
        };

        Ok(Self {
            encoding,
            birth: NeighborRange::new(payload[1], payload[2]),
            survival: NeighborRange::new(payload[3], payload[4]),
            population: u64_at(8),
            generation: u64_at(16),
            created: u64_at(24),
            modified: u64_at(32),
        })
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn write_fixed<W: Write>(w: &mut W, s: &str, width: usize) -> io::Result<()> {
    let stored = truncate_utf8(s, width).as_bytes();
    w.write_all(stored)?;
    w.write_all(&vec![0u8; width - stored.len()])?;
    Ok(())
}

/// Read a NUL-padded field; `len` overrides the NUL scan when given.
fn read_fixed<R: Read>(
    r: &mut R,
    width: usize,
    len: Option<usize>,
) -> Result<String, PatternError> {
    let mut field = vec![0u8; width];
    r.read_exact(&mut field)?;
    let end = len.unwrap_or_else(|| field.iter().position(|&b| b == 0).unwrap_or(width));
    field.truncate(end);
    String::from_utf8(field)
        .map_err(|_| PatternError::Corrupt("string field is not UTF-8".to_string()))
}
