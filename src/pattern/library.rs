//! Built-in patterns and `.3dlife` file helpers.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::prelude::*;

use super::codec::{self, Compression, Pattern, PatternMetadata};
use super::format::{PATTERN_EXTENSION, PatternError};
use crate::compute::{Dimensions, Grid, Position};
use crate::schema::{BoundaryKind, RulePreset};

/// Seed used for the reproducible random soup.
const SOUP_SEED: u64 = 0x5EED_3D11;

fn builtin_pattern(
    name: &str,
    description: &str,
    size: u32,
    rule: RulePreset,
    alive: &[(u32, u32, u32)],
) -> Pattern {
    Pattern::from_positions(
        PatternMetadata::named(name).with_description(description),
        rule.rule(),
        BoundaryKind::Toroidal,
        Dimensions::new(size, size, size),
        alive,
    )
}

fn random_soup() -> Pattern {
    let dims = Dimensions::new(10, 10, 10);
    let mut rng = StdRng::seed_from_u64(SOUP_SEED);
    let alive: Vec<(u32, u32, u32)> = (0..dims.total_cells())
        .filter(|_| rng.gen_bool(0.3))
        .map(|i| {
            let p = dims.position(i);
            (p.x, p.y, p.z)
        })
        .collect();
    builtin_pattern(
        "3D Random Soup",
        "A random pattern that often leads to interesting emergent behavior",
        10,
        RulePreset::R5766,
        &alive,
    )
}

/// All built-in patterns, each with its preferred rule and dimensions.
pub fn builtin_patterns() -> Vec<Pattern> {
    let mut crystal: Vec<(u32, u32, u32)> = (0..8)
        .map(|i| (3 + (i & 1), 3 + ((i >> 1) & 1), 3 + ((i >> 2) & 1)))
        .collect();
    crystal.extend([
        (2, 3, 3),
        (5, 3, 3),
        (3, 2, 3),
        (3, 5, 3),
        (3, 3, 2),
        (3, 3, 5),
    ]);

    vec![
        builtin_pattern(
            "3D Glider",
            "A simple 3D glider pattern that moves diagonally",
            5,
            RulePreset::R5766,
            &[(2, 2, 2), (3, 2, 2), (4, 2, 2), (4, 3, 2), (3, 4, 2)],
        ),
        builtin_pattern(
            "3D Block",
            "A stable 2x2x2 block pattern",
            3,
            RulePreset::R5766,
            &[
                (0, 0, 0),
                (1, 0, 0),
                (0, 1, 0),
                (1, 1, 0),
                (0, 0, 1),
                (1, 0, 1),
                (0, 1, 1),
                (1, 1, 1),
            ],
        ),
        builtin_pattern(
            "3D Pulsar",
            "A 3D oscillating pattern that pulses between states",
            7,
            RulePreset::R4556,
            &[
                (2, 2, 2),
                (4, 2, 2),
                (2, 4, 2),
                (4, 4, 2),
                (2, 2, 4),
                (4, 2, 4),
                (2, 4, 4),
                (4, 4, 4),
            ],
        ),
        builtin_pattern(
            "3D Spaceship",
            "A complex 3D spaceship pattern that moves through space",
            6,
            RulePreset::R5667,
            &[
                // core
                (2, 2, 2),
                (3, 2, 2),
                (2, 3, 2),
                (3, 3, 2),
                // wings
                (1, 2, 3),
                (4, 2, 3),
                (2, 1, 3),
                (3, 1, 3),
                (2, 4, 3),
                (3, 4, 3),
            ],
        ),
        builtin_pattern(
            "3D Crystal",
            "A growing crystal-like pattern that expands outward",
            8,
            RulePreset::R3444,
            &crystal,
        ),
        random_soup(),
    ]
}

/// Look up a built-in pattern by name.
pub fn builtin(name: &str) -> Option<Pattern> {
    builtin_patterns()
        .into_iter()
        .find(|p| p.metadata.name == name)
}

/// Bring the pattern's live cells to life in `grid`, shifted by `offset`.
///
/// Cells landing outside the grid are clipped. Returns how many were placed.
pub fn stamp(grid: &mut Grid, pattern: &Pattern, offset: Position) -> usize {
    let dims = grid.dimensions();
    let mut placed = 0;
    for p in pattern.alive_positions() {
        let (Some(x), Some(y), Some(z)) = (
            p.x.checked_add(offset.x),
            p.y.checked_add(offset.y),
            p.z.checked_add(offset.z),
        ) else {
            continue;
        };
        if dims.contains(x, y, z) && grid.set_cell(x, y, z, true).is_ok() {
            placed += 1;
        }
    }
    placed
}

/// Encode the grid and write it to `path`.
pub fn save_to_file<P: AsRef<Path>>(
    path: P,
    grid: &Grid,
    metadata: &PatternMetadata,
    compression: Compression,
) -> Result<(), PatternError> {
    let bytes = codec::save(grid, metadata, compression)?;
    fs::write(path.as_ref(), &bytes)?;
    info!(
        "Saved pattern '{}' ({} bytes) to {}",
        metadata.name,
        bytes.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Read and decode a pattern file.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Pattern, PatternError> {
    let bytes = fs::read(path)?;
    Pattern::decode(&bytes)
}

/// Load every valid `.3dlife` file in `dir`.
///
/// Unreadable or invalid files are skipped with a warning. Results are
/// ordered by file name.
pub fn load_directory<P: AsRef<Path>>(dir: P) -> Result<Vec<Pattern>, PatternError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == PATTERN_EXTENSION)
        })
        .collect();
    paths.sort();

    let mut patterns = Vec::with_capacity(paths.len());
    for path in paths {
        match load_from_file(&path) {
            Ok(pattern) => patterns.push(pattern),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    info!(
        "Loaded {} patterns from {}",
        patterns.len(),
        dir.as_ref().display()
    );
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::CellParams;
    use crate::schema::RuleSet;

    #[test]
    fn test_builtins_are_well_formed() {
        let patterns = builtin_patterns();
        let names: Vec<&str> = patterns.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "3D Glider",
                "3D Block",
                "3D Pulsar",
                "3D Spaceship",
                "3D Crystal",
                "3D Random Soup"
            ]
        );
        let populations: Vec<u64> = patterns.iter().map(|p| p.population).collect();
        assert_eq!(&populations[..5], &[5, 8, 8, 10, 14]);
        for pattern in &patterns {
            assert_eq!(pattern.boundary, BoundaryKind::Toroidal);
            assert_eq!(pattern.cells.len(), pattern.dims.total_cells());
        }
    }

    #[test]
    fn test_random_soup_is_reproducible() {
        let a = builtin("3D Random Soup").unwrap();
        let b = builtin("3D Random Soup").unwrap();
        assert_eq!(a.cells, b.cells);
        assert!(a.population > 150 && a.population < 450);
    }

    #[test]
    fn test_stamp_places_block_at_offset() {
        let block = builtin("3D Block").unwrap();
        let mut grid = Grid::new(
            Dimensions::new(6, 6, 6),
            block.rule.clone(),
            BoundaryKind::Fixed,
            CellParams::default(),
        )
        .unwrap();
        assert_eq!(stamp(&mut grid, &block, Position::new(2, 2, 2)), 8);
        assert_eq!(grid.population(), 8);
        let alive: Vec<Position> = grid.frame().alive().collect();
        assert_eq!(alive.first(), Some(&Position::new(2, 2, 2)));
        assert_eq!(alive.last(), Some(&Position::new(3, 3, 3)));

        // Stamping over live cells places them again without double counting.
        assert_eq!(stamp(&mut grid, &block, Position::new(2, 2, 2)), 8);
        assert_eq!(grid.population(), 8);
    }

    #[test]
    fn test_stamp_clips_outside_cells() {
        let glider = builtin("3D Glider").unwrap();
        let mut grid = Grid::new(
            Dimensions::new(5, 5, 5),
            RuleSet::default(),
            BoundaryKind::Toroidal,
            CellParams::default(),
        )
        .unwrap();
        // x + 1 pushes (4, 2, 2) and (4, 3, 2) off the edge.
        assert_eq!(stamp(&mut grid, &glider, Position::new(1, 0, 0)), 3);
        assert_eq!(grid.population(), 3);
        assert!(grid.get_cell(3, 2, 2).unwrap());
        assert!(grid.get_cell(4, 4, 2).unwrap());

        assert_eq!(stamp(&mut grid, &glider, Position::new(u32::MAX, 0, 0)), 0);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crystal.3dlife");
        let crystal = builtin("3D Crystal").unwrap();
        let grid = crystal.to_grid(&CellParams::default()).unwrap();

        save_to_file(&path, &grid, &crystal.metadata, Compression::Auto).unwrap();
        let loaded = load_from_file(&path).unwrap();
        assert_eq!(loaded.cells, crystal.cells);
        assert_eq!(loaded.rule, crystal.rule);
        assert_eq!(loaded.metadata.name, "3D Crystal");
    }

    #[test]
    fn test_load_directory_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let params = CellParams::default();
        for name in ["3D Block", "3D Glider"] {
            let pattern = builtin(name).unwrap();
            let grid = pattern.to_grid(&params).unwrap();
            let file = dir
                .path()
                .join(format!("{}.{}", name.replace(' ', "_"), PATTERN_EXTENSION));
            save_to_file(file, &grid, &pattern.metadata, Compression::Raw).unwrap();
        }
        fs::write(dir.path().join("broken.3dlife"), b"V3DL junk").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a pattern").unwrap();

        let loaded = load_directory(dir.path()).unwrap();
        let names: Vec<&str> = loaded.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, ["3D Block", "3D Glider"]);
    }

    struct Capture(std::sync::Mutex<Vec<(String, String)>>);

    impl log::Log for Capture {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            self.0
                .lock()
                .unwrap()
                .push((record.target().to_string(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(std::sync::Mutex::new(Vec::new()));

    #[test]
    fn test_file_helpers_log_under_module_path() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Info);

        let dir = tempfile::tempdir().unwrap();
        let block = builtin("3D Block").unwrap();
        let grid = block.to_grid(&CellParams::default()).unwrap();
        save_to_file(dir.path().join("block.3dlife"), &grid, &block.metadata, Compression::Raw)
            .unwrap();
        fs::write(dir.path().join("broken.3dlife"), b"V3DL junk").unwrap();
        assert_eq!(load_directory(dir.path()).unwrap().len(), 1);

        let shown = dir.path().display().to_string();
        let records: Vec<(String, String)> = CAPTURE
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.contains(&shown))
            .cloned()
            .collect();
        assert_eq!(records.len(), 3, "{records:?}");
        assert!(records[0].1.starts_with("Saved pattern '3D Block'"));
        assert!(records[1].1.starts_with("Skipping"));
        assert!(records[2].1.starts_with("Loaded 1 patterns"));
        for (target, _) in &records {
            assert_eq!(target, "voxel_life::pattern::library");
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_from_file(dir.path().join("absent.3dlife")),
            Err(PatternError::Io(_))
        ));
    }
}
