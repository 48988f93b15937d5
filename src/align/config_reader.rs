use crate::align::*;

use serde::{Deserialize, Serialize};

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "jobName")]
    pub job_name: String,
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
    pub level: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct VoteSource {
    /// csv (default) or xlsx
    pub provider: Option<String>,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "precinctColumn")]
    pub precinct_column: String,
    pub delimiter: Option<String>,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceColumn {
    pub name: String,
    pub column: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSource {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "precinctColumn")]
    pub precinct_column: String,
    #[serde(rename = "subUnitColumn")]
    pub sub_unit_column: String,
    #[serde(rename = "subUnitWeightColumn")]
    pub sub_unit_weight_column: String,
    #[serde(rename = "precinctWeightColumn")]
    pub precinct_weight_column: String,
    pub delimiter: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PopulationSource {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "blockColumn")]
    pub block_column: String,
    #[serde(rename = "populationColumn")]
    pub population_column: String,
    pub delimiter: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    pub sentinel: Option<String>,
    #[serde(rename = "sentinelPrefixLength")]
    pub sentinel_prefix_length: Option<usize>,
    #[serde(rename = "blockGroupLength")]
    pub block_group_length: Option<usize>,
    #[serde(rename = "tractLength")]
    pub tract_length: Option<usize>,
    #[serde(rename = "countyLength")]
    pub county_length: Option<usize>,
    #[serde(rename = "subUnitIdWidth")]
    pub sub_unit_id_width: Option<usize>,
}

impl RulesConfig {
    pub fn aggregation_rules(&self) -> AlignResult<AggregationRules> {
        let d = AggregationRules::DEFAULT_RULES;
        let sentinel = match self.sentinel.as_deref() {
            None => d.sentinel,
            Some(s) if s.chars().count() == 1 => s.chars().next().unwrap_or(d.sentinel),
            Some(s) => {
                whatever!("the sentinel must be a single character, got {:?}", s)
            }
        };
        let rules = AggregationRules {
            sentinel,
            sentinel_prefix_len: self.sentinel_prefix_length.unwrap_or(d.sentinel_prefix_len),
            block_group_len: self.block_group_length.unwrap_or(d.block_group_len),
            tract_len: self.tract_length.unwrap_or(d.tract_len),
            county_len: self.county_length.unwrap_or(d.county_len),
            sub_unit_id_width: self.sub_unit_id_width,
        };
        rules.validate().context(ApportionSnafu {})?;
        Ok(rules)
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AlignConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: OutputSettings,
    #[serde(rename = "voteSource")]
    pub vote_source: VoteSource,
    pub choices: Vec<ChoiceColumn>,
    #[serde(rename = "conversionSource")]
    pub conversion_source: ConversionSource,
    #[serde(rename = "populationSource")]
    pub population_source: Option<PopulationSource>,
    pub rules: Option<RulesConfig>,
    #[serde(rename = "customEdges")]
    pub custom_edges: Option<Vec<(String, String)>>,
}

impl AlignConfig {
    pub fn choice_names(&self) -> Vec<String> {
        self.choices.iter().map(|c| c.name.clone()).collect()
    }

    /// The level from the command line if given, else from the file, else block groups.
    pub fn level(&self, override_level: Option<&str>) -> AlignResult<GeographyLevel> {
        let name = override_level
            .or(self.output_settings.level.as_deref())
            .unwrap_or("blockgroup");
        name.parse::<GeographyLevel>().context(ApportionSnafu {})
    }

    pub fn aggregation_rules(&self) -> AlignResult<AggregationRules> {
        self.rules.clone().unwrap_or_default().aggregation_rules()
    }
}

pub fn read_config(path: &str) -> AlignResult<AlignConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    debug!("read_config: {:?}", contents);
    let config: AlignConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    if config.choices.len() < 2 {
        whatever!(
            "at least two choices are required in {}, found {}",
            path,
            config.choices.len()
        )
    }
    Ok(config)
}

/// The field delimiter of a source: `,` unless configured.
pub fn delimiter_byte(delimiter: &Option<String>) -> AlignResult<u8> {
    match delimiter.as_deref() {
        None | Some("") => Ok(b','),
        Some("\t") | Some("tab") | Some("\\t") => Ok(b'\t'),
        Some(s) if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        Some(s) => {
            whatever!("unsupported delimiter {:?}", s)
        }
    }
}
