pub use crate::config::*;

/// A builder for collecting the input tables row by row.
///
/// Readers that stream their input should use it rather than assembling the
/// slices themselves.
///
/// ```
/// pub use census_apportion::builder::Builder;
/// pub use census_apportion::{AggregationRules, GeographyLevel};
/// # use census_apportion::ApportionErrors;
///
/// let mut builder = Builder::new(&AggregationRules::DEFAULT_RULES)?
///     .choices(&["dem".to_string(), "rep".to_string()])?;
///
/// builder.add_precinct("0010", &[12, 3])?;
/// builder.add_conversion("0010", "060014001001001", Some(4.0), Some(8.0));
/// builder.add_conversion("0010", "060014001001002", Some(4.0), Some(8.0));
///
/// let res = builder.rollup(GeographyLevel::BlockGroup)?;
/// assert_eq!(res.table.rows[0].counts, vec![12, 3]);
///
/// # Ok::<(), ApportionErrors>(())
/// ```
pub struct Builder {
    pub(crate) _rules: AggregationRules,
    pub(crate) _choices: Vec<String>,
    pub(crate) _votes: Vec<PrecinctVotes>,
    pub(crate) _conversion: Vec<ConversionRow>,
    pub(crate) _population: Option<Vec<BlockPopulation>>,
}

impl Builder {
    pub fn new(rules: &AggregationRules) -> Result<Builder, ApportionErrors> {
        rules.validate()?;
        Ok(Builder {
            _rules: rules.clone(),
            _choices: Vec::new(),
            _votes: Vec::new(),
            _conversion: Vec::new(),
            _population: None,
        })
    }

    /// Declares the choices. Any precinct added before is discarded.
    pub fn choices(self, names: &[String]) -> Result<Builder, ApportionErrors> {
        if names.len() < 2 {
            return Err(ApportionErrors::TooFewChoices(names.len()));
        }
        Ok(Builder {
            _choices: names.to_vec(),
            _votes: Vec::new(),
            ..self
        })
    }

    /// Adds the vote counts of a precinct, in the order of the choices.
    pub fn add_precinct(&mut self, precinct: &str, counts: &[u64]) -> Result<(), ApportionErrors> {
        self.add_precinct_2(&PrecinctVotes {
            precinct: precinct.to_string(),
            counts: counts.to_vec(),
        })
    }

    pub fn add_precinct_2(&mut self, votes: &PrecinctVotes) -> Result<(), ApportionErrors> {
        if votes.counts.len() != self._choices.len() {
            return Err(ApportionErrors::ChoiceCountMismatch {
                precinct: votes.precinct.clone(),
                expected: self._choices.len(),
                found: votes.counts.len(),
            });
        }
        self._votes.push(votes.clone());
        Ok(())
    }

    /// Adds a line of the conversion table.
    ///
    /// Lines are kept in insertion order, which decides the ties of the
    /// apportionment.
    pub fn add_conversion(
        &mut self,
        precinct: &str,
        sub_unit: &str,
        sub_unit_weight: Option<f64>,
        precinct_weight: Option<f64>,
    ) {
        self._conversion.push(ConversionRow {
            precinct: precinct.to_string(),
            sub_unit: sub_unit.to_string(),
            sub_unit_weight,
            precinct_weight,
        });
    }

    pub fn add_population(&mut self, block: &str, population: u64) {
        self._population
            .get_or_insert_with(Vec::new)
            .push(BlockPopulation {
                block: block.to_string(),
                population,
            });
    }

    pub fn num_precincts(&self) -> usize {
        self._votes.len()
    }

    pub fn num_conversion_rows(&self) -> usize {
        self._conversion.len()
    }

    /// Runs the pipeline on the collected tables.
    ///
    /// The population column is filled only if some population was added.
    pub fn rollup(&self, level: GeographyLevel) -> Result<Rollup, ApportionErrors> {
        let mut res = crate::rollup(
            &self._choices,
            &self._votes,
            &self._conversion,
            level,
            &self._rules,
        )?;
        if let Some(population) = self._population.as_deref() {
            res.table = crate::with_population(&res.table, population, &self._rules);
        }
        Ok(res)
    }
}
