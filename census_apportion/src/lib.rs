/*!
Reallocation of precinct-level election results to census geographies.

Votes are reported by precinct, but districting works on census units. This
crate splits every precinct's votes across the census blocks it overlaps,
proportionally to the registered voters of each block, and rounds the shares
back to whole votes with the Hamilton (largest remainder) method. Within a
precinct, the blocks always receive exactly the votes the precinct reported.
The blocks can then be summed to block groups, tracts or counties.

```
use census_apportion::*;

let choices = vec!["dem".to_string(), "rep".to_string()];
let votes = vec![PrecinctVotes { precinct: "P1".to_string(), counts: vec![10, 5] }];
let conversion = vec![
    ConversionRow {
        precinct: "P1".to_string(),
        sub_unit: "060014001001000".to_string(),
        sub_unit_weight: Some(30.0),
        precinct_weight: Some(100.0),
    },
    ConversionRow {
        precinct: "P1".to_string(),
        sub_unit: "060014001002000".to_string(),
        sub_unit_weight: Some(70.0),
        precinct_weight: Some(100.0),
    },
];
let res = rollup(
    &choices,
    &votes,
    &conversion,
    GeographyLevel::BlockGroup,
    &AggregationRules::DEFAULT_RULES,
)?;
assert_eq!(res.table.rows[0].geoid, "060014001001");
assert_eq!(res.table.rows[0].counts, vec![3, 2]);
assert_eq!(res.table.rows[1].counts, vec![7, 3]);
# Ok::<(), ApportionErrors>(())
```
*/

pub mod builder;
mod config;
pub mod manual;

use log::{debug, info, warn};

use std::collections::{BTreeMap, HashMap, HashSet};

pub use crate::config::*;

/// Vote counts by precinct identifier.
pub type PrecinctCounts = HashMap<String, Vec<u64>>;

/// The result of the proportional allocation step.
#[derive(PartialEq, Debug, Clone)]
pub struct Allocation {
    /// In conversion row order.
    pub raw: Vec<RawAllocation>,
    pub stats: AllocationStats,
}

/// Indexes the vote records by precinct.
///
/// Every record must carry exactly `num_choices` counts. A precinct reported
/// more than once has its counts summed.
pub fn index_votes(
    votes: &[PrecinctVotes],
    num_choices: usize,
) -> Result<PrecinctCounts, ApportionErrors> {
    if num_choices < 2 {
        return Err(ApportionErrors::TooFewChoices(num_choices));
    }
    let mut res: PrecinctCounts = HashMap::with_capacity(votes.len());
    for v in votes.iter() {
        if v.counts.len() != num_choices {
            return Err(ApportionErrors::ChoiceCountMismatch {
                precinct: v.precinct.clone(),
                expected: num_choices,
                found: v.counts.len(),
            });
        }
        if let Some(existing) = res.get_mut(&v.precinct) {
            warn!(
                "index_votes: precinct {} is reported more than once, summing the counts",
                v.precinct
            );
            for (acc, c) in existing.iter_mut().zip(v.counts.iter()) {
                *acc = acc.saturating_add(*c);
            }
        } else {
            res.insert(v.precinct.clone(), v.counts.clone());
        }
    }
    Ok(res)
}

fn valid_precinct_weight(w: Option<f64>) -> Option<f64> {
    w.filter(|x| x.is_finite() && *x > 0.0)
}

fn valid_sub_unit_weight(w: Option<f64>) -> Option<f64> {
    w.filter(|x| x.is_finite() && *x >= 0.0)
}

/// Splits the precinct counts over the sub-units of the conversion table.
///
/// Each retained row receives `count * sub_unit_weight / precinct_weight` for
/// every choice. Rows without a vote record, without a positive precinct
/// weight, with an unusable sub-unit weight or with a non-finite share are
/// skipped and counted in the returned statistics.
pub fn allocate_raw(precinct_counts: &PrecinctCounts, conversion: &[ConversionRow]) -> Allocation {
    let mut stats = AllocationStats {
        conversion_rows: conversion.len(),
        ..AllocationStats::default()
    };
    let mut raw: Vec<RawAllocation> = Vec::with_capacity(conversion.len());
    for (seq, row) in conversion.iter().enumerate() {
        let counts = match precinct_counts.get(&row.precinct) {
            Some(counts) => counts,
            None => {
                debug!("allocate_raw: row {}: no votes for precinct {:?}", seq, row.precinct);
                stats.missing_votes += 1;
                continue;
            }
        };
        let precinct_weight = match valid_precinct_weight(row.precinct_weight) {
            Some(w) => w,
            None => {
                debug!(
                    "allocate_raw: row {}: precinct {:?} has registration {:?}",
                    seq, row.precinct, row.precinct_weight
                );
                stats.invalid_precinct_weight += 1;
                continue;
            }
        };
        let sub_unit_weight = match valid_sub_unit_weight(row.sub_unit_weight) {
            Some(w) => w,
            None => {
                debug!(
                    "allocate_raw: row {}: sub-unit {:?} has registration {:?}",
                    seq, row.sub_unit, row.sub_unit_weight
                );
                stats.invalid_sub_unit_weight += 1;
                continue;
            }
        };
        let shares: Vec<f64> = counts
            .iter()
            .map(|c| (*c as f64) * sub_unit_weight / precinct_weight)
            .collect();
        if shares.iter().any(|s| !s.is_finite()) {
            debug!("allocate_raw: row {}: non-finite shares {:?}", seq, shares);
            stats.non_finite += 1;
            continue;
        }
        raw.push(RawAllocation {
            seq,
            precinct: row.precinct.clone(),
            sub_unit: row.sub_unit.clone(),
            shares,
        });
    }
    stats.allocated_rows = raw.len();
    Allocation { raw, stats }
}

/// Rounds a group of real values to integers with the largest remainder method.
///
/// Every value is first rounded down. The units still needed to reach the
/// rounded sum of the group go to the values with the largest fractional
/// parts, one each. Equal fractional parts are served in slice order.
///
/// Undefined, negative or non-finite values count as zero and never receive a
/// unit. A group with no defined value yields zeros.
pub fn hamilton_round(values: &[Option<f64>]) -> Vec<u64> {
    let defined: Vec<Option<f64>> = values
        .iter()
        .map(|v| v.filter(|x| x.is_finite() && *x >= 0.0))
        .collect();
    if defined.iter().all(|v| v.is_none()) {
        return vec![0; values.len()];
    }

    let mut res: Vec<u64> = defined
        .iter()
        .map(|v| v.map(|x| x.floor() as u64).unwrap_or(0))
        .collect();
    let remainders: Vec<(usize, f64)> = defined
        .iter()
        .enumerate()
        .filter_map(|(idx, v)| v.map(|x| (idx, x - x.floor())))
        .collect();

    let total: f64 = defined.iter().flatten().sum();
    // Half sums round to even.
    let target = total.round_ties_even() as i128;
    let floored: i128 = res.iter().map(|x| *x as i128).sum();
    let deficit = target - floored;
    if deficit <= 0 {
        return res;
    }

    let mut ranked = remainders;
    // Stable sort: equal remainders keep their position order.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (idx, _) in ranked.iter().take(deficit as usize) {
        res[*idx] += 1;
    }
    res
}

/// Rounds the raw allocations, one Hamilton group per precinct and choice.
///
/// Members of a group are taken in sequence order. The result is sorted by
/// sequence.
pub fn apportion(raw: &[RawAllocation]) -> Vec<ApportionedRow> {
    let mut groups: BTreeMap<&str, Vec<&RawAllocation>> = BTreeMap::new();
    for r in raw.iter() {
        groups.entry(r.precinct.as_str()).or_default().push(r);
    }

    let mut res: Vec<ApportionedRow> = Vec::with_capacity(raw.len());
    for (precinct, mut members) in groups {
        members.sort_by_key(|r| r.seq);
        let num_choices = members.iter().map(|r| r.shares.len()).max().unwrap_or(0);
        let mut counts: Vec<Vec<u64>> = vec![Vec::with_capacity(num_choices); members.len()];
        for choice in 0..num_choices {
            let values: Vec<Option<f64>> =
                members.iter().map(|r| r.shares.get(choice).copied()).collect();
            let rounded = hamilton_round(&values);
            for (member_counts, c) in counts.iter_mut().zip(rounded) {
                member_counts.push(c);
            }
        }
        debug!("apportion: precinct {}: {} sub-units", precinct, members.len());
        for (r, c) in members.iter().zip(counts) {
            res.push(ApportionedRow {
                seq: r.seq,
                precinct: r.precinct.clone(),
                sub_unit: r.sub_unit.clone(),
                counts: c,
            });
        }
    }
    res.sort_by_key(|r| r.seq);
    res
}

/// Left-pads an identifier with zeros up to `width` characters.
pub fn normalize_id(id: &str, width: Option<usize>) -> String {
    match width {
        Some(w) if id.chars().count() < w => format!("{:0>width$}", id, width = w),
        _ => id.to_string(),
    }
}

/// The first `len` characters of `id`, or all of it if it is shorter.
fn prefix(id: &str, len: usize) -> &str {
    match id.char_indices().nth(len) {
        Some((pos, _)) => &id[..pos],
        None => id,
    }
}

/// True if the sub-unit lies in a block group reserved for water only areas.
pub fn is_sentinel(sub_unit: &str, rules: &AggregationRules) -> bool {
    prefix(sub_unit, rules.sentinel_prefix_len).chars().last() == Some(rules.sentinel)
}

/// The identifier of the unit of `level` that contains `sub_unit`.
pub fn target_id<'a>(sub_unit: &'a str, level: GeographyLevel, rules: &AggregationRules) -> &'a str {
    match rules.prefix_len(level) {
        Some(len) => prefix(sub_unit, len),
        None => sub_unit,
    }
}

// Sums saturate at u64::MAX instead of overflowing.
fn add_counts(acc: &mut Vec<u64>, counts: &[u64]) {
    if acc.len() < counts.len() {
        acc.resize(counts.len(), 0);
    }
    for (a, c) in acc.iter_mut().zip(counts.iter()) {
        *a = a.saturating_add(*c);
    }
}

fn total_of(counts: &[u64]) -> u64 {
    counts.iter().fold(0, |acc, c| acc.saturating_add(*c))
}

/// Sums the apportioned rows of each sub-unit, sorted by identifier.
pub fn sum_by_sub_unit(rows: &[ApportionedRow], rules: &AggregationRules) -> Vec<SubUnitTotals> {
    let mut acc: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for r in rows.iter() {
        let id = normalize_id(&r.sub_unit, rules.sub_unit_id_width);
        add_counts(acc.entry(id).or_default(), &r.counts);
    }
    acc.into_iter()
        .map(|(sub_unit, counts)| SubUnitTotals { sub_unit, counts })
        .collect()
}

/// Groups the sub-unit totals by the identifiers of `level`.
///
/// Sub-units in a sentinel block group are left out. The rows are sorted by
/// ascending identifier.
pub fn aggregate(
    sub_units: &[SubUnitTotals],
    level: GeographyLevel,
    rules: &AggregationRules,
) -> Vec<GeographyRow> {
    let mut acc: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for su in sub_units.iter() {
        if is_sentinel(&su.sub_unit, rules) {
            debug!("aggregate: skipping sentinel sub-unit {}", su.sub_unit);
            continue;
        }
        add_counts(acc.entry(target_id(&su.sub_unit, level, rules)).or_default(), &su.counts);
    }
    acc.into_iter()
        .map(|(geoid, counts)| GeographyRow {
            geoid: geoid.to_string(),
            total: total_of(&counts),
            counts,
            population: None,
        })
        .collect()
}

/// Groups rows of an aggregated table again, to a coarser `level`.
///
/// No sentinel filtering happens here: the input rows are expected to come
/// from [`aggregate`].
pub fn reaggregate(
    rows: &[GeographyRow],
    level: GeographyLevel,
    rules: &AggregationRules,
) -> Vec<GeographyRow> {
    let mut acc: BTreeMap<&str, (Vec<u64>, Option<u64>)> = BTreeMap::new();
    for r in rows.iter() {
        let entry = acc.entry(target_id(&r.geoid, level, rules)).or_default();
        add_counts(&mut entry.0, &r.counts);
        if let Some(p) = r.population {
            entry.1 = Some(entry.1.unwrap_or(0).saturating_add(p));
        }
    }
    acc.into_iter()
        .map(|(geoid, (counts, population))| GeographyRow {
            geoid: geoid.to_string(),
            total: total_of(&counts),
            counts,
            population,
        })
        .collect()
}

/// Attaches the population of each row, summed from the blocks it contains.
///
/// Blocks in a sentinel block group are left out, as in [`aggregate`]. Rows
/// without any population data keep `None`.
pub fn with_population(
    table: &AggregateTable,
    population: &[BlockPopulation],
    rules: &AggregationRules,
) -> AggregateTable {
    let mut by_target: HashMap<String, u64> = HashMap::new();
    for bp in population.iter() {
        let block = normalize_id(&bp.block, rules.sub_unit_id_width);
        if is_sentinel(&block, rules) {
            continue;
        }
        let acc = by_target
            .entry(target_id(&block, table.level, rules).to_string())
            .or_insert(0);
        *acc = acc.saturating_add(bp.population);
    }
    let rows: Vec<GeographyRow> = table
        .rows
        .iter()
        .map(|r| GeographyRow {
            population: by_target.get(&r.geoid).copied(),
            ..r.clone()
        })
        .collect();
    let missing = rows.iter().filter(|r| r.population.is_none()).count();
    if missing > 0 {
        warn!("with_population: {} of {} rows have no population data", missing, rows.len());
    }
    AggregateTable {
        rows,
        ..table.clone()
    }
}

/// Runs the full pipeline: allocation, apportionment and aggregation.
pub fn rollup(
    choices: &[String],
    votes: &[PrecinctVotes],
    conversion: &[ConversionRow],
    level: GeographyLevel,
    rules: &AggregationRules,
) -> Result<Rollup, ApportionErrors> {
    rules.validate()?;
    info!(
        "rollup: {} precincts, {} conversion rows, choices: {:?}, level: {}",
        votes.len(),
        conversion.len(),
        choices,
        level
    );
    let precinct_counts = index_votes(votes, choices.len())?;

    let allocation = allocate_raw(&precinct_counts, conversion);
    let stats = allocation.stats;
    info!(
        "rollup: allocated {} of {} conversion rows (no votes: {}, bad precinct registration: {}, bad sub-unit registration: {}, non-finite: {})",
        stats.allocated_rows,
        stats.conversion_rows,
        stats.missing_votes,
        stats.invalid_precinct_weight,
        stats.invalid_sub_unit_weight,
        stats.non_finite
    );

    let apportioned = apportion(&allocation.raw);
    let sub_units = sum_by_sub_unit(&apportioned, rules);
    let sentinel_sub_units = sub_units
        .iter()
        .filter(|su| is_sentinel(&su.sub_unit, rules))
        .count();
    info!(
        "rollup: {} sub-units, {} in sentinel areas",
        sub_units.len(),
        sentinel_sub_units
    );

    let rows = aggregate(&sub_units, level, rules);
    info!("rollup: {} rows at level {}", rows.len(), level);
    Ok(Rollup {
        table: AggregateTable {
            level,
            choices: choices.to_vec(),
            rows,
        },
        stats,
        sentinel_sub_units,
    })
}

/// Keeps the manual edges whose both ends appear in the table.
pub fn retain_known_edges(
    table: &AggregateTable,
    edges: &[(String, String)],
) -> Vec<(String, String)> {
    let known: HashSet<&str> = table.rows.iter().map(|r| r.geoid.as_str()).collect();
    edges
        .iter()
        .filter(|(a, b)| {
            let ok = known.contains(a.as_str()) && known.contains(b.as_str());
            if !ok {
                warn!("retain_known_edges: one of {} {} is not in the table", a, b);
            }
            ok
        })
        .cloned()
        .collect()
}

/// A SHA-256 fingerprint of the table content and row order.
pub fn table_digest(table: &AggregateTable) -> String {
    let mut text = String::new();
    text.push_str(&table.level.geoid_column());
    for c in table.choices.iter() {
        text.push(',');
        text.push_str(c);
    }
    text.push('\n');
    for r in table.rows.iter() {
        text.push_str(&r.geoid);
        text.push_str(&format!(",{}", r.total));
        for c in r.counts.iter() {
            text.push_str(&format!(",{}", c));
        }
        if let Some(p) = r.population {
            text.push_str(&format!(",{}", p));
        }
        text.push('\n');
    }
    sha256::digest(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn choices() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn pv(precinct: &str, counts: &[u64]) -> PrecinctVotes {
        PrecinctVotes {
            precinct: precinct.to_string(),
            counts: counts.to_vec(),
        }
    }

    fn conv(precinct: &str, sub_unit: &str, w: f64, total: f64) -> ConversionRow {
        ConversionRow {
            precinct: precinct.to_string(),
            sub_unit: sub_unit.to_string(),
            sub_unit_weight: Some(w),
            precinct_weight: Some(total),
        }
    }

    fn counts_of(precincts: &[(&str, [u64; 2])]) -> PrecinctCounts {
        precincts
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_vec()))
            .collect()
    }

    // Deterministic pseudo-random numbers for the property tests.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    #[test]
    fn hamilton_examples() {
        assert_eq!(hamilton_round(&[Some(3.0), Some(7.0)]), vec![3, 7]);
        assert_eq!(hamilton_round(&[Some(1.5), Some(3.5)]), vec![2, 3]);
        assert_eq!(hamilton_round(&[Some(0.3), Some(0.3), Some(0.4)]), vec![0, 0, 1]);
        assert_eq!(hamilton_round(&[Some(2.6), Some(1.2), Some(1.2)]), vec![3, 1, 1]);
    }

    #[test]
    fn hamilton_ties_follow_position() {
        let third = 1.0 / 3.0;
        assert_eq!(hamilton_round(&[Some(third), Some(third), Some(third)]), vec![1, 0, 0]);
        assert_eq!(hamilton_round(&[Some(0.5), Some(0.5), Some(0.5)]), vec![1, 1, 0]);
        assert_eq!(hamilton_round(&[Some(4.5), Some(0.5)]), vec![5, 0]);
    }

    #[test]
    fn hamilton_rounds_half_sums_to_even() {
        assert_eq!(hamilton_round(&[Some(2.5)]), vec![2]);
        assert_eq!(hamilton_round(&[Some(0.25), Some(0.25)]), vec![0, 0]);
        assert_eq!(hamilton_round(&[Some(1.75), Some(1.75)]), vec![2, 2]);
    }

    #[test]
    fn hamilton_undefined_values() {
        assert_eq!(hamilton_round(&[]), Vec::<u64>::new());
        assert_eq!(hamilton_round(&[None, None]), vec![0, 0]);
        assert_eq!(hamilton_round(&[None, Some(0.6), Some(0.4)]), vec![0, 1, 0]);
        assert_eq!(hamilton_round(&[Some(f64::NAN), Some(1.0)]), vec![0, 1]);
        assert_eq!(hamilton_round(&[Some(-2.0), Some(1.5)]), vec![0, 2]);
    }

    #[test]
    fn hamilton_sum_and_bounds() {
        let mut rng = Lcg(7);
        for _ in 0..200 {
            let n = 1 + rng.next(12) as usize;
            let total = rng.next(5000);
            let weights: Vec<u64> = (0..n).map(|_| 1 + rng.next(100)).collect();
            let wsum: u64 = weights.iter().sum();
            let values: Vec<Option<f64>> = weights
                .iter()
                .map(|w| Some(total as f64 * (*w as f64 / wsum as f64)))
                .collect();
            let rounded = hamilton_round(&values);
            assert_eq!(rounded.iter().sum::<u64>(), total);
            for (r, v) in rounded.iter().zip(values.iter()) {
                let floor = v.unwrap_or(0.0).floor() as u64;
                assert!(*r == floor || *r == floor + 1, "{} vs {:?}", r, v);
            }
        }
    }

    #[test]
    fn allocate_raw_example() {
        let counts = counts_of(&[("P1", [10, 5])]);
        let conversion = vec![conv("P1", "U1", 30.0, 100.0), conv("P1", "U2", 70.0, 100.0)];
        let alloc = allocate_raw(&counts, &conversion);
        assert_eq!(alloc.stats.allocated_rows, 2);
        assert_eq!(alloc.raw[0].shares, vec![3.0, 1.5]);
        assert_eq!(alloc.raw[1].shares, vec![7.0, 3.5]);
        assert_eq!(alloc.raw[1].seq, 1);

        let rows = apportion(&alloc.raw);
        assert_eq!(rows[0].counts, vec![3, 2]);
        assert_eq!(rows[1].counts, vec![7, 3]);
    }

    #[test]
    fn allocate_raw_exclusions() {
        init_logger();
        let counts = counts_of(&[("P1", [10, 5]), ("P2", [8, 8]), ("P3", [4, 4])]);
        let conversion = vec![
            conv("P2", "U1", 30.0, 0.0),
            conv("P9", "U2", 30.0, 100.0),
            ConversionRow {
                precinct: "P1".to_string(),
                sub_unit: "U3".to_string(),
                sub_unit_weight: None,
                precinct_weight: Some(100.0),
            },
            ConversionRow {
                precinct: "P1".to_string(),
                sub_unit: "U4".to_string(),
                sub_unit_weight: Some(10.0),
                precinct_weight: None,
            },
            conv("P1", "U5", 10.0, -3.0),
            conv("P1", "U6", f64::INFINITY, 100.0),
            conv("P3", "U7", 1e308, 1e-10),
            conv("P1", "U8", 50.0, 100.0),
        ];
        let alloc = allocate_raw(&counts, &conversion);
        assert_eq!(
            alloc.stats,
            AllocationStats {
                conversion_rows: 8,
                allocated_rows: 1,
                missing_votes: 1,
                invalid_precinct_weight: 3,
                invalid_sub_unit_weight: 2,
                non_finite: 1,
            }
        );
        assert_eq!(alloc.stats.excluded_rows(), 7);
        assert_eq!(alloc.raw.len(), 1);
        assert_eq!(alloc.raw[0].sub_unit, "U8");
        assert_eq!(alloc.raw[0].seq, 7);
    }

    #[test]
    fn zero_registration_precinct_contributes_nothing() {
        let votes = vec![pv("P1", &[10, 5]), pv("P2", &[40, 60])];
        let conversion = vec![
            conv("P1", "060014001001000", 1.0, 1.0),
            conv("P2", "060014001001001", 0.0, 0.0),
            conv("P2", "060014001001002", 0.0, 0.0),
        ];
        let res = rollup(
            &choices(),
            &votes,
            &conversion,
            GeographyLevel::Block,
            &AggregationRules::DEFAULT_RULES,
        )
        .unwrap();
        assert_eq!(res.stats.invalid_precinct_weight, 2);
        assert_eq!(res.table.rows.len(), 1);
        assert_eq!(res.table.rows[0].geoid, "060014001001000");
        assert_eq!(res.table.rows[0].total, 15);
    }

    #[test]
    fn votes_must_match_choices() {
        let votes = vec![pv("P1", &[10, 5, 1])];
        let res = rollup(
            &choices(),
            &votes,
            &[],
            GeographyLevel::Block,
            &AggregationRules::DEFAULT_RULES,
        );
        assert_eq!(
            res,
            Err(ApportionErrors::ChoiceCountMismatch {
                precinct: "P1".to_string(),
                expected: 2,
                found: 3
            })
        );
        let res = rollup(
            &["A".to_string()],
            &[pv("P1", &[10])],
            &[],
            GeographyLevel::Block,
            &AggregationRules::DEFAULT_RULES,
        );
        assert_eq!(res, Err(ApportionErrors::TooFewChoices(1)));
    }

    #[test]
    fn duplicate_precincts_are_summed() {
        let idx = index_votes(&[pv("007", &[1, 2]), pv("007", &[3, 4]), pv("7", &[1, 1])], 2).unwrap();
        assert_eq!(idx.get("007"), Some(&vec![4, 6]));
        assert_eq!(idx.get("7"), Some(&vec![1, 1]));
    }

    #[test]
    fn conservation_per_precinct() {
        let mut rng = Lcg(42);
        let mut counts: PrecinctCounts = HashMap::new();
        let mut conversion: Vec<ConversionRow> = Vec::new();
        for p in 0..50 {
            let precinct = format!("{:06}", p);
            counts.insert(precinct.clone(), vec![rng.next(900), rng.next(900), rng.next(50)]);
            let n = 1 + rng.next(9);
            let weights: Vec<f64> = (0..n).map(|_| rng.next(300) as f64).collect();
            let total: f64 = weights.iter().sum();
            for (i, w) in weights.iter().enumerate() {
                conversion.push(conv(&precinct, &format!("B{}-{}", p, i), *w, total));
            }
        }
        let alloc = allocate_raw(&counts, &conversion);
        let rows = apportion(&alloc.raw);
        let mut sums: HashMap<&str, Vec<u64>> = HashMap::new();
        for r in rows.iter() {
            add_counts(sums.entry(r.precinct.as_str()).or_default(), &r.counts);
        }
        for (precinct, expected) in counts.iter() {
            match sums.get(precinct.as_str()) {
                Some(found) => assert_eq!(found, expected, "precinct {}", precinct),
                // Every sub-unit had a zero weight.
                None => assert!(conversion
                    .iter()
                    .filter(|c| &c.precinct == precinct)
                    .all(|c| c.precinct_weight == Some(0.0))),
            }
        }
        // Bounded rounding error
        for (raw, r) in alloc.raw.iter().zip(rows.iter()) {
            assert_eq!(raw.seq, r.seq);
            for (s, c) in raw.shares.iter().zip(r.counts.iter()) {
                let floor = s.floor() as u64;
                assert!(*c == floor || *c == floor + 1);
            }
        }
    }

    #[test]
    fn apportion_groups_by_precinct_not_sub_unit() {
        // Both precincts share U2. Rounding happens per precinct.
        let counts = counts_of(&[("P1", [1, 1]), ("P2", [1, 3])]);
        let conversion = vec![
            conv("P1", "U1", 1.0, 2.0),
            conv("P1", "U2", 1.0, 2.0),
            conv("P2", "U2", 1.0, 2.0),
            conv("P2", "U3", 1.0, 2.0),
        ];
        let rows = apportion(&allocate_raw(&counts, &conversion).raw);
        let seqs: Vec<usize> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(rows[0].counts, vec![1, 1]);
        assert_eq!(rows[1].counts, vec![0, 0]);
        assert_eq!(rows[2].counts, vec![1, 2]);
        assert_eq!(rows[3].counts, vec![0, 1]);

        let totals = sum_by_sub_unit(&rows, &AggregationRules::DEFAULT_RULES);
        let u2 = totals.iter().find(|t| t.sub_unit == "U2").unwrap();
        assert_eq!(u2.counts, vec![1, 2]);
    }

    #[test]
    fn tie_break_uses_row_order() {
        let counts = counts_of(&[("P1", [1, 1])]);
        let forward = vec![conv("P1", "U1", 1.0, 2.0), conv("P1", "U2", 1.0, 2.0)];
        let backward = vec![conv("P1", "U2", 1.0, 2.0), conv("P1", "U1", 1.0, 2.0)];
        let f = apportion(&allocate_raw(&counts, &forward).raw);
        let b = apportion(&allocate_raw(&counts, &backward).raw);
        assert_eq!(f[0].sub_unit, "U1");
        assert_eq!(f[0].counts, vec![1, 1]);
        assert_eq!(b[0].sub_unit, "U2");
        assert_eq!(b[0].counts, vec![1, 1]);
    }

    #[test]
    fn target_ids() {
        let rules = AggregationRules::DEFAULT_RULES;
        let id = "060014001001000";
        assert_eq!(target_id(id, GeographyLevel::Block, &rules), id);
        assert_eq!(target_id(id, GeographyLevel::BlockGroup, &rules), "060014001001");
        assert_eq!(target_id(id, GeographyLevel::Tract, &rules), "06001400100");
        assert_eq!(target_id(id, GeographyLevel::County, &rules), "06001");
        assert_eq!(target_id("0600", GeographyLevel::County, &rules), "0600");
    }

    #[test]
    fn sentinel_detection() {
        let rules = AggregationRules::DEFAULT_RULES;
        assert!(is_sentinel("060759804010001", &rules));
        assert!(!is_sentinel("060759804011001", &rules));
        assert!(is_sentinel("0600", &rules));
        assert!(!is_sentinel("", &rules));
        let rules = AggregationRules {
            sentinel: '9',
            sentinel_prefix_len: 11,
            ..AggregationRules::DEFAULT_RULES
        };
        assert!(is_sentinel("60759804019001", &rules));
    }

    #[test]
    fn sentinel_sub_units_never_contribute() {
        let votes = vec![pv("P1", &[100, 50])];
        let conversion = vec![
            conv("P1", "060759804010001", 50.0, 100.0),
            conv("P1", "060759804011001", 25.0, 100.0),
            conv("P1", "060759804011002", 25.0, 100.0),
        ];
        for level in GeographyLevel::ALL {
            let res = rollup(&choices(), &votes, &conversion, level, &AggregationRules::DEFAULT_RULES)
                .unwrap();
            assert_eq!(res.sentinel_sub_units, 1);
            let total: u64 = res.table.rows.iter().map(|r| r.total).sum();
            assert_eq!(total, 75);
            assert!(res.table.rows.iter().all(|r| !r.geoid.starts_with("060759804010")));
        }
    }

    #[test]
    fn aggregation_is_sorted_and_totals_are_sums() {
        let sub_units = vec![
            SubUnitTotals {
                sub_unit: "060372001002003".to_string(),
                counts: vec![1, 2],
            },
            SubUnitTotals {
                sub_unit: "060014001001001".to_string(),
                counts: vec![3, 4],
            },
            SubUnitTotals {
                sub_unit: "060014001001002".to_string(),
                counts: vec![5, 6],
            },
        ];
        let rows = aggregate(&sub_units, GeographyLevel::County, &AggregationRules::DEFAULT_RULES);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].geoid, "06001");
        assert_eq!(rows[0].counts, vec![8, 10]);
        assert_eq!(rows[0].total, 18);
        assert_eq!(rows[1].geoid, "06037");
        assert_eq!(rows[1].total, 3);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let mut rng = Lcg(3);
        let mut votes: Vec<PrecinctVotes> = Vec::new();
        let mut conversion: Vec<ConversionRow> = Vec::new();
        for p in 0..30 {
            let precinct = format!("SR{:04}", p);
            votes.push(pv(&precinct, &[rng.next(400), rng.next(400)]));
            for _ in 0..(1 + rng.next(6)) {
                let block = format!(
                    "06{:03}{:06}{}{:03}",
                    1 + 2 * rng.next(3),
                    rng.next(4),
                    rng.next(3),
                    rng.next(5)
                );
                conversion.push(conv(&precinct, &block, rng.next(50) as f64, 100.0));
            }
        }
        let rules = AggregationRules::DEFAULT_RULES;
        let blocks = rollup(&choices(), &votes, &conversion, GeographyLevel::Block, &rules).unwrap();
        for level in [GeographyLevel::BlockGroup, GeographyLevel::Tract, GeographyLevel::County] {
            let direct = rollup(&choices(), &votes, &conversion, level, &rules).unwrap();
            assert_eq!(reaggregate(&blocks.table.rows, level, &rules), direct.table.rows);
        }
        let tracts = rollup(&choices(), &votes, &conversion, GeographyLevel::Tract, &rules).unwrap();
        let counties = rollup(&choices(), &votes, &conversion, GeographyLevel::County, &rules).unwrap();
        assert_eq!(
            reaggregate(&tracts.table.rows, GeographyLevel::County, &rules),
            counties.table.rows
        );
    }

    #[test]
    fn identifiers_are_padded() {
        let rules = AggregationRules {
            sub_unit_id_width: Some(15),
            ..AggregationRules::DEFAULT_RULES
        };
        assert_eq!(normalize_id("60014001001001", Some(15)), "060014001001001");
        assert_eq!(normalize_id("060014001001001", Some(15)), "060014001001001");
        assert_eq!(normalize_id("6001", None), "6001");
        let votes = vec![pv("P1", &[4, 2])];
        let conversion = vec![
            conv("P1", "60014001001001", 1.0, 2.0),
            conv("P1", "060014001001002", 1.0, 2.0),
        ];
        let res = rollup(&choices(), &votes, &conversion, GeographyLevel::BlockGroup, &rules).unwrap();
        assert_eq!(res.table.rows.len(), 1);
        assert_eq!(res.table.rows[0].geoid, "060014001001");
        assert_eq!(res.table.rows[0].counts, vec![4, 2]);
    }

    #[test]
    fn population_is_summed_per_target() {
        let rules = AggregationRules::DEFAULT_RULES;
        let votes = vec![pv("P1", &[4, 2])];
        let conversion = vec![
            conv("P1", "060014001001001", 1.0, 2.0),
            conv("P1", "060014001002001", 1.0, 2.0),
        ];
        let res = rollup(&choices(), &votes, &conversion, GeographyLevel::BlockGroup, &rules).unwrap();
        let population = vec![
            BlockPopulation {
                block: "060014001001001".to_string(),
                population: 10,
            },
            BlockPopulation {
                block: "060014001001002".to_string(),
                population: 15,
            },
        ];
        let table = with_population(&res.table, &population, &rules);
        assert_eq!(table.rows[0].population, Some(25));
        assert_eq!(table.rows[1].population, None);
        assert_eq!(table.rows[0].counts, res.table.rows[0].counts);
    }

    #[test]
    fn sentinel_population_is_left_out() {
        init_logger();
        let rules = AggregationRules::DEFAULT_RULES;
        let votes = vec![pv("P1", &[100, 50])];
        let conversion = vec![
            conv("P1", "060759804010001", 1.0, 2.0),
            conv("P1", "060759804011001", 1.0, 2.0),
        ];
        let population = vec![
            BlockPopulation {
                block: "060759804010001".to_string(),
                population: 1000,
            },
            BlockPopulation {
                block: "060759804011001".to_string(),
                population: 10,
            },
        ];

        let tracts = rollup(&choices(), &votes, &conversion, GeographyLevel::Tract, &rules).unwrap();
        let tracts = with_population(&tracts.table, &population, &rules);
        assert_eq!(tracts.rows.len(), 1);
        assert_eq!(tracts.rows[0].counts, vec![50, 25]);
        assert_eq!(tracts.rows[0].population, Some(10));

        let blocks = rollup(&choices(), &votes, &conversion, GeographyLevel::Block, &rules).unwrap();
        let blocks = with_population(&blocks.table, &population, &rules);
        assert_eq!(reaggregate(&blocks.rows, GeographyLevel::Tract, &rules), tracts.rows);

        let counties = rollup(&choices(), &votes, &conversion, GeographyLevel::County, &rules).unwrap();
        let counties = with_population(&counties.table, &population, &rules);
        assert_eq!(counties.rows[0].population, Some(10));
        assert_eq!(reaggregate(&tracts.rows, GeographyLevel::County, &rules), counties.rows);
    }

    #[test]
    fn large_counts_saturate() {
        let votes = vec![pv("P1", &[u64::MAX, 1]), pv("P1", &[1, 1])];
        let indexed = index_votes(&votes, 2).unwrap();
        assert_eq!(indexed["P1"], vec![u64::MAX, 2]);

        let rules = AggregationRules::DEFAULT_RULES;
        let sub_units = vec![
            SubUnitTotals {
                sub_unit: "060014001001001".to_string(),
                counts: vec![u64::MAX, 3],
            },
            SubUnitTotals {
                sub_unit: "060014001001002".to_string(),
                counts: vec![2, 0],
            },
        ];
        let rows = aggregate(&sub_units, GeographyLevel::BlockGroup, &rules);
        assert_eq!(rows[0].counts, vec![u64::MAX, 3]);
        assert_eq!(rows[0].total, u64::MAX);
    }

    #[test]
    fn edges_and_digest() {
        let rules = AggregationRules::DEFAULT_RULES;
        let votes = vec![pv("P1", &[4, 2])];
        let conversion = vec![
            conv("P1", "060014001001001", 1.0, 2.0),
            conv("P1", "060014001002001", 1.0, 2.0),
        ];
        let res = rollup(&choices(), &votes, &conversion, GeographyLevel::BlockGroup, &rules).unwrap();
        let edges = vec![
            ("060014001001".to_string(), "060014001002".to_string()),
            ("060014001001".to_string(), "060759804011".to_string()),
        ];
        let kept = retain_known_edges(&res.table, &edges);
        assert_eq!(kept, vec![edges[0].clone()]);

        let again = rollup(&choices(), &votes, &conversion, GeographyLevel::BlockGroup, &rules).unwrap();
        assert_eq!(table_digest(&res.table), table_digest(&again.table));
        assert_eq!(table_digest(&res.table).len(), 64);
        let counties = rollup(&choices(), &votes, &conversion, GeographyLevel::County, &rules).unwrap();
        assert_ne!(table_digest(&res.table), table_digest(&counties.table));
    }
}
