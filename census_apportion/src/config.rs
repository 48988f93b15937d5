// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;
use std::str::FromStr;

/// The vote counts reported for one precinct.
///
/// The precinct identifier is kept as text: official keys carry leading zeros.
/// There is one count per choice, in the order the choices were declared.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PrecinctVotes {
    pub precinct: String,
    pub counts: Vec<u64>,
}

/// One line of the precinct to block conversion table.
///
/// Weights are registration counts. They are optional because the source
/// tables leave them blank for some rows; such rows are skipped during
/// allocation.
#[derive(PartialEq, Debug, Clone)]
pub struct ConversionRow {
    pub precinct: String,
    pub sub_unit: String,
    /// Registered voters of the precinct living in this sub-unit.
    pub sub_unit_weight: Option<f64>,
    /// Registered voters of the whole precinct.
    pub precinct_weight: Option<f64>,
}

/// Population of a single census block.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BlockPopulation {
    pub block: String,
    pub population: u64,
}

// ******** Intermediate data structures *********

/// The real-valued share of a precinct's votes given to one sub-unit.
///
/// `seq` is the position of the conversion row that produced it. It is the
/// only ordering used to break ties during apportionment.
#[derive(PartialEq, Debug, Clone)]
pub struct RawAllocation {
    pub seq: usize,
    pub precinct: String,
    pub sub_unit: String,
    pub shares: Vec<f64>,
}

/// A raw allocation after Hamilton rounding.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ApportionedRow {
    pub seq: usize,
    pub precinct: String,
    pub sub_unit: String,
    pub counts: Vec<u64>,
}

/// Counters for the conversion rows that did not take part in the allocation.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct AllocationStats {
    pub conversion_rows: usize,
    pub allocated_rows: usize,
    /// No vote record for the precinct of the row.
    pub missing_votes: usize,
    /// Precinct registration total missing, zero, negative or not finite.
    pub invalid_precinct_weight: usize,
    /// Sub-unit registration missing, negative or not finite.
    pub invalid_sub_unit_weight: usize,
    /// The division produced an infinite or NaN share.
    pub non_finite: usize,
}

impl AllocationStats {
    pub fn excluded_rows(&self) -> usize {
        self.missing_votes + self.invalid_precinct_weight + self.invalid_sub_unit_weight + self.non_finite
    }
}

// ******** Output data structures *********

/// Sum of the apportioned votes for one sub-unit.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SubUnitTotals {
    pub sub_unit: String,
    pub counts: Vec<u64>,
}

/// One line of the final table.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct GeographyRow {
    pub geoid: String,
    /// Always the sum of `counts`.
    pub total: u64,
    pub counts: Vec<u64>,
    pub population: Option<u64>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AggregateTable {
    pub level: GeographyLevel,
    pub choices: Vec<String>,
    /// Sorted by ascending identifier.
    pub rows: Vec<GeographyRow>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Rollup {
    pub table: AggregateTable,
    pub stats: AllocationStats,
    /// Sub-units dropped because they lie in a sentinel (water only) area.
    pub sentinel_sub_units: usize,
}

/// Errors that prevent the engine from completing.
///
/// Bad data rows are never reported here: they are skipped and counted in
/// [`AllocationStats`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ApportionErrors {
    UnknownLevel(String),
    TooFewChoices(usize),
    ChoiceCountMismatch {
        precinct: String,
        expected: usize,
        found: usize,
    },
    InvalidRules(String),
}

impl Error for ApportionErrors {}

impl Display for ApportionErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApportionErrors::UnknownLevel(level) => write!(
                f,
                "unknown aggregation level {:?}: choose from 'block', 'blockgroup', 'tract' or 'county'",
                level
            ),
            ApportionErrors::TooFewChoices(n) => {
                write!(f, "at least two choices are required, got {}", n)
            }
            ApportionErrors::ChoiceCountMismatch {
                precinct,
                expected,
                found,
            } => write!(
                f,
                "precinct {}: expected {} vote counts, found {}",
                precinct, expected, found
            ),
            ApportionErrors::InvalidRules(msg) => write!(f, "invalid aggregation rules: {}", msg),
        }
    }
}

// ********* Configuration **********

/// The census geography to aggregate to.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum GeographyLevel {
    Block,
    BlockGroup,
    Tract,
    County,
}

impl GeographyLevel {
    pub const ALL: [GeographyLevel; 4] = [
        GeographyLevel::Block,
        GeographyLevel::BlockGroup,
        GeographyLevel::Tract,
        GeographyLevel::County,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GeographyLevel::Block => "block",
            GeographyLevel::BlockGroup => "blockgroup",
            GeographyLevel::Tract => "tract",
            GeographyLevel::County => "county",
        }
    }

    /// Name of the identifier column in output tables, e.g. `GEOID_BLOCKGROUP`.
    pub fn geoid_column(&self) -> String {
        format!("GEOID_{}", self.name().to_uppercase())
    }
}

impl FromStr for GeographyLevel {
    type Err = ApportionErrors;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(GeographyLevel::Block),
            "blockgroup" | "block_group" => Ok(GeographyLevel::BlockGroup),
            "tract" => Ok(GeographyLevel::Tract),
            "county" => Ok(GeographyLevel::County),
            _ => Err(ApportionErrors::UnknownLevel(s.to_string())),
        }
    }
}

impl Display for GeographyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How sub-unit identifiers map onto coarser geographies.
///
/// The defaults follow the 2020 census block layout: a 15 digit block
/// identifier whose first 12, 11 and 5 characters are the block group, the
/// tract and the county.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AggregationRules {
    /// Final character of a block group code marking a water only area.
    pub sentinel: char,
    /// Length of the code whose final character is checked against `sentinel`.
    pub sentinel_prefix_len: usize,
    pub block_group_len: usize,
    pub tract_len: usize,
    pub county_len: usize,
    /// If set, identifiers shorter than this are left-padded with zeros.
    pub sub_unit_id_width: Option<usize>,
}

impl AggregationRules {
    pub const DEFAULT_RULES: AggregationRules = AggregationRules {
        sentinel: '0',
        sentinel_prefix_len: 12,
        block_group_len: 12,
        tract_len: 11,
        county_len: 5,
        sub_unit_id_width: None,
    };

    /// Prefix length for a level, `None` for blocks (identity).
    pub fn prefix_len(&self, level: GeographyLevel) -> Option<usize> {
        match level {
            GeographyLevel::Block => None,
            GeographyLevel::BlockGroup => Some(self.block_group_len),
            GeographyLevel::Tract => Some(self.tract_len),
            GeographyLevel::County => Some(self.county_len),
        }
    }

    pub fn validate(&self) -> Result<(), ApportionErrors> {
        if self.sentinel_prefix_len == 0 {
            return Err(ApportionErrors::InvalidRules(
                "the sentinel prefix length must be positive".to_string(),
            ));
        }
        for level in GeographyLevel::ALL {
            if self.prefix_len(level) == Some(0) {
                return Err(ApportionErrors::InvalidRules(format!(
                    "the prefix length for level {} must be positive",
                    level
                )));
            }
        }
        Ok(())
    }
}

impl Default for AggregationRules {
    fn default() -> Self {
        AggregationRules::DEFAULT_RULES
    }
}
