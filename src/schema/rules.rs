//! Rule sets and boundary kinds.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Size of the 3D Moore neighborhood.
pub const MAX_NEIGHBORS: u8 = 26;

/// Rule id written to pattern files for custom rule sets.
pub const CUSTOM_RULE_ID: u32 = u32::MAX;

/// Inclusive neighbor-count interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeighborRange {
    pub min: u8,
    pub max: u8,
}

impl NeighborRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, count: u8) -> bool {
        count >= self.min && count <= self.max
    }

    fn is_valid(&self) -> bool {
        self.min <= self.max && self.max <= MAX_NEIGHBORS
    }
}

impl std::fmt::Display for NeighborRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Birth and survival ranges for the automaton.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSet {
    /// Display name, e.g. `"5766"` or `"Custom"`.
    pub name: String,
    /// Neighbor counts that bring a dead cell to life.
    pub birth: NeighborRange,
    /// Neighbor counts that keep a live cell alive.
    pub survival: NeighborRange,
}

impl RuleSet {
    /// Build a custom rule set.
    pub fn custom(birth: NeighborRange, survival: NeighborRange) -> Result<Self, EngineError> {
        let rule = Self {
            name: "Custom".to_string(),
            birth,
            survival,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Look up a catalog rule by name (`"5766"`, `"2333"`, ...).
    pub fn by_name(name: &str) -> Result<Self, EngineError> {
        RulePreset::from_name(name)
            .map(RulePreset::rule)
            .ok_or_else(|| EngineError::UnsupportedRuleSet(name.to_string()))
    }

    /// Look up a catalog rule by its numeric id.
    pub fn by_id(id: u32) -> Result<Self, EngineError> {
        RulePreset::from_id(id)
            .map(RulePreset::rule)
            .ok_or_else(|| EngineError::UnsupportedRuleSet(format!("rule id {id}")))
    }

    /// Check that both ranges lie within `0..=26` and are ordered.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.birth.is_valid() || !self.survival.is_valid() {
            return Err(EngineError::UnsupportedRuleSet(format!(
                "{}: birth {}-{}, survival {}-{}",
                self.name, self.birth.min, self.birth.max, self.survival.min, self.survival.max
            )));
        }
        Ok(())
    }

    /// Catalog entry this rule is, matched on name and both ranges.
    ///
    /// A custom rule that happens to share a preset's ranges is not that
    /// preset.
    pub fn preset(&self) -> Option<RulePreset> {
        RulePreset::from_name(&self.name).filter(|p| {
            let rule = p.rule();
            rule.birth == self.birth && rule.survival == self.survival
        })
    }

    /// Catalog id for presets, otherwise [`CUSTOM_RULE_ID`].
    pub fn id(&self) -> u32 {
        self.preset().map_or(CUSTOM_RULE_ID, RulePreset::id)
    }

    /// Family of the matching preset, [`RuleCategory::Custom`] otherwise.
    pub fn category(&self) -> RuleCategory {
        self.preset()
            .map_or(RuleCategory::Custom, RulePreset::category)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        RulePreset::R5766.rule()
    }
}

impl std::fmt::Display for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (B{}/S{})", self.name, self.birth, self.survival)
    }
}

/// Rule families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCategory {
    Classic,
    Growth,
    Dense,
    Oscillator,
    Custom,
}

/// Built-in rule catalog. Discriminants are the ids stored in pattern files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RulePreset {
    #[serde(rename = "5766")]
    R5766 = 0,
    #[serde(rename = "4555")]
    R4555 = 1,
    #[serde(rename = "2333")]
    R2333 = 2,
    #[serde(rename = "3444")]
    R3444 = 3,
    #[serde(rename = "6777")]
    R6777 = 4,
    #[serde(rename = "7888")]
    R7888 = 5,
    #[serde(rename = "4556")]
    R4556 = 6,
    #[serde(rename = "5667")]
    R5667 = 7,
}

impl RulePreset {
    pub const ALL: [RulePreset; 8] = [
        RulePreset::R5766,
        RulePreset::R4555,
        RulePreset::R2333,
        RulePreset::R3444,
        RulePreset::R6777,
        RulePreset::R7888,
        RulePreset::R4556,
        RulePreset::R5667,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            RulePreset::R5766 => "5766",
            RulePreset::R4555 => "4555",
            RulePreset::R2333 => "2333",
            RulePreset::R3444 => "3444",
            RulePreset::R6777 => "6777",
            RulePreset::R7888 => "7888",
            RulePreset::R4556 => "4556",
            RulePreset::R5667 => "5667",
        }
    }

    /// `(birth_min, birth_max, survival_min, survival_max)`.
    fn ranges(self) -> (u8, u8, u8, u8) {
        match self {
            RulePreset::R5766 => (5, 7, 6, 6),
            RulePreset::R4555 => (4, 5, 5, 5),
            RulePreset::R2333 => (2, 3, 3, 3),
            RulePreset::R3444 => (3, 4, 4, 4),
            RulePreset::R6777 => (6, 7, 7, 7),
            RulePreset::R7888 => (7, 8, 8, 8),
            RulePreset::R4556 => (4, 5, 5, 6),
            RulePreset::R5667 => (5, 6, 6, 7),
        }
    }

    pub fn rule(self) -> RuleSet {
        let (b_min, b_max, s_min, s_max) = self.ranges();
        RuleSet {
            name: self.name().to_string(),
            birth: NeighborRange::new(b_min, b_max),
            survival: NeighborRange::new(s_min, s_max),
        }
    }

    pub fn category(self) -> RuleCategory {
        match self {
            RulePreset::R5766 | RulePreset::R4555 => RuleCategory::Classic,
            RulePreset::R2333 | RulePreset::R3444 => RuleCategory::Growth,
            RulePreset::R6777 | RulePreset::R7888 => RuleCategory::Dense,
            RulePreset::R4556 | RulePreset::R5667 => RuleCategory::Oscillator,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RulePreset::R5766 => "Classic 3D rule: born with 5-7 neighbors, survives with 6",
            RulePreset::R4555 => "Alternative 3D rule: born with 4-5 neighbors, survives with 5",
            RulePreset::R2333 => "Growth rule: born with 2-3 neighbors, survives with 3; expands rapidly",
            RulePreset::R3444 => "Stable growth: born with 3-4 neighbors, survives with 4",
            RulePreset::R6777 => "Dense rule: born with 6-7 neighbors, survives with 7; forms clusters",
            RulePreset::R7888 => "Very dense rule: born with 7-8 neighbors, survives with 8",
            RulePreset::R4556 => "Oscillator rule: born with 4-5 neighbors, survives with 5-6",
            RulePreset::R5667 => "Complex oscillator: born with 5-6 neighbors, survives with 6-7",
        }
    }

    /// Presets belonging to `category`, in catalog order.
    pub fn in_category(category: RuleCategory) -> Vec<RulePreset> {
        Self::ALL
            .into_iter()
            .filter(|p| p.category() == category)
            .collect()
    }
}

/// Policy for neighbor lookups that fall outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum BoundaryKind {
    /// Wrap around each axis.
    #[default]
    Toroidal = 0,
    /// Cells beyond the edge are permanently dead.
    Fixed = 1,
    /// Unbounded space outside the grid, all dead.
    Infinite = 2,
    /// Reflect back across the edge.
    Mirror = 3,
}

impl BoundaryKind {
    pub const ALL: [BoundaryKind; 4] = [
        BoundaryKind::Toroidal,
        BoundaryKind::Fixed,
        BoundaryKind::Infinite,
        BoundaryKind::Mirror,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            BoundaryKind::Toroidal => "Toroidal",
            BoundaryKind::Fixed => "Fixed",
            BoundaryKind::Infinite => "Infinite",
            BoundaryKind::Mirror => "Mirror",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

impl std::fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
