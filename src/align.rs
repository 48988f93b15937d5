use log::{debug, info, warn};

use census_apportion::builder::Builder;
use census_apportion::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::Path;

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::align::config_reader::*;
use crate::align::io_common::resolve_path;

mod config_reader;
mod io_common;
mod io_csv;
mod io_excel;

#[derive(Debug, Snafu)]
pub enum AlignError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the configuration {path}: {source}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error formatting the summary"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading line {lineno} of {path}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("Error writing CSV output"))]
    CsvWrite { source: csv::Error },
    #[snafu(display("Column {column} not found in {path}"))]
    MissingColumn { column: String, path: String },
    #[snafu(display("Error opening Excel file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("No worksheet found in {path}"))]
    EmptyExcel { path: String },
    #[snafu(display("Provider {provider} is not supported (use csv or xlsx)"))]
    UnknownProvider { provider: String },
    #[snafu(display("Error writing {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error reading the reference {path}"))]
    ReadingReference {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The output differs from the reference {path}"))]
    ReferenceMismatch { path: String },
    #[snafu(display("{source}"))]
    Apportion { source: ApportionErrors },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type AlignResult<T> = Result<T, AlignError>;
pub type BAlignResult<T> = Result<T, Box<AlignError>>;

/// Everything produced by one run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub table: AggregateTable,
    pub csv: String,
    pub summary: JSValue,
}

fn read_votes(root: &Path, config: &AlignConfig) -> BAlignResult<Vec<PrecinctVotes>> {
    let source = &config.vote_source;
    let path = resolve_path(root, &source.file_path);
    info!("Attempting to read vote file {:?}", path);
    match source.provider.as_deref().unwrap_or("csv") {
        "csv" => io_csv::read_votes(&path, source, &config.choices),
        "xlsx" => io_excel::read_votes(&path, source, &config.choices),
        x => Err(Box::new(AlignError::UnknownProvider {
            provider: x.to_string(),
        })),
    }
}

fn totals_js(table: &AggregateTable) -> JSValue {
    let mut totals: JSMap<String, JSValue> = JSMap::new();
    let total: u64 = table.rows.iter().map(|r| r.total).sum();
    totals.insert("total".to_string(), json!(total));
    for (idx, name) in table.choices.iter().enumerate() {
        let count: u64 = table
            .rows
            .iter()
            .map(|r| r.counts.get(idx).copied().unwrap_or(0))
            .sum();
        totals.insert(name.clone(), json!(count));
    }
    let population: Option<u64> = table
        .rows
        .iter()
        .filter_map(|r| r.population)
        .reduce(|a, b| a + b);
    if let Some(p) = population {
        totals.insert("population".to_string(), json!(p));
    }
    JSValue::Object(totals)
}

fn build_summary_js(
    config: &AlignConfig,
    res: &Rollup,
    edges: &[(String, String)],
    digest: &str,
) -> JSValue {
    let stats = &res.stats;
    let edges_js: Vec<JSValue> = edges.iter().map(|(a, b)| json!([a, b])).collect();
    json!({
        "config": {
            "jobName": config.output_settings.job_name,
            "level": res.table.level.name(),
            "choices": res.table.choices,
        },
        "allocation": {
            "conversionRows": stats.conversion_rows,
            "allocatedRows": stats.allocated_rows,
            "missingVotes": stats.missing_votes,
            "invalidPrecinctRegistration": stats.invalid_precinct_weight,
            "invalidSubUnitRegistration": stats.invalid_sub_unit_weight,
            "nonFinite": stats.non_finite,
            "sentinelSubUnits": res.sentinel_sub_units,
        },
        "rows": res.table.rows.len(),
        "totals": totals_js(&res.table),
        "customEdges": edges_js,
        "digest": digest,
    })
}

fn write_outputs(
    out_dir: &str,
    config: &AlignConfig,
    level: GeographyLevel,
    csv_text: &str,
    summary: &str,
) -> BAlignResult<()> {
    fs::create_dir_all(out_dir).context(WritingOutputSnafu { path: out_dir })?;
    let job = &config.output_settings.job_name;
    let table_p = resolve_path(Path::new(out_dir), &format!("{}_{}.csv", job, level.name()));
    fs::write(&table_p, csv_text).context(WritingOutputSnafu { path: &table_p })?;
    let summary_p = resolve_path(Path::new(out_dir), &format!("{}_summary.json", job));
    fs::write(&summary_p, summary).context(WritingOutputSnafu { path: &summary_p })?;
    info!("Wrote {} and {}", table_p, summary_p);
    Ok(())
}

fn normalize_lines(s: &str) -> String {
    s.replace("\r\n", "\n").trim_end().to_string()
}

fn check_reference(reference_path: &str, csv_text: &str) -> BAlignResult<()> {
    let reference =
        fs::read_to_string(reference_path).context(ReadingReferenceSnafu { path: reference_path })?;
    let expected = normalize_lines(&reference);
    let found = normalize_lines(csv_text);
    if expected != found {
        warn!("Found differences with the reference file {}", reference_path);
        print_diff(expected.as_str(), found.as_str(), "\n");
        return Err(Box::new(AlignError::ReferenceMismatch {
            path: reference_path.to_string(),
        }));
    }
    info!("Output matches the reference {}", reference_path);
    Ok(())
}

/// Runs the job described by the configuration file.
///
/// `level` overrides the level of the configuration. `out` is a directory,
/// or `stdout` to print the table. If a reference table is given, the run
/// fails when the output differs from it.
pub fn run_job(
    config_path: String,
    level: Option<String>,
    out: Option<String>,
    reference: Option<String>,
) -> BAlignResult<JobOutcome> {
    let config = read_config(&config_path)?;
    info!("config: {:?}", config);
    let root_p = Path::new(config_path.as_str())
        .parent()
        .context(MissingParentDirSnafu {})?;

    let level = config.level(level.as_deref())?;
    let rules = config.aggregation_rules()?;
    let mut builder = Builder::new(&rules)
        .and_then(|b| b.choices(&config.choice_names()))
        .context(ApportionSnafu {})?;

    for pv in read_votes(root_p, &config)?.iter() {
        builder.add_precinct_2(pv).context(ApportionSnafu {})?;
    }

    let conversion_p = resolve_path(root_p, &config.conversion_source.file_path);
    info!("Attempting to read conversion file {:?}", conversion_p);
    for row in io_csv::read_conversion(&conversion_p, &config.conversion_source)? {
        builder.add_conversion(
            &row.precinct,
            &row.sub_unit,
            row.sub_unit_weight,
            row.precinct_weight,
        );
    }

    if let Some(ps) = &config.population_source {
        let population_p = resolve_path(root_p, &ps.file_path);
        info!("Attempting to read population file {:?}", population_p);
        for bp in io_csv::read_population(&population_p, ps)? {
            builder.add_population(&bp.block, bp.population);
        }
    }

    let res = builder.rollup(level).context(ApportionSnafu {})?;
    debug!("rollup: {:?}", res);

    let edges = retain_known_edges(&res.table, config.custom_edges.as_deref().unwrap_or(&[]));
    let csv_text = io_csv::table_to_csv(&res.table, config.population_source.is_some())?;
    let digest = table_digest(&res.table);
    let summary = build_summary_js(&config, &res, &edges, &digest);
    let pretty_summary = serde_json::to_string_pretty(&summary).context(SerializingJsonSnafu {})?;

    let out_dir: Option<String> = match out {
        Some(o) => Some(o),
        None => config
            .output_settings
            .output_directory
            .as_ref()
            .map(|d| resolve_path(root_p, d)),
    };
    match out_dir.as_deref() {
        Some("stdout") | None => {
            print!("{}", csv_text);
            info!("summary:{}", pretty_summary);
        }
        Some(dir) => write_outputs(dir, &config, level, &csv_text, &pretty_summary)?,
    }

    if let Some(reference_p) = reference {
        check_reference(&reference_p, &csv_text)?;
    }

    Ok(JobOutcome {
        table: res.table,
        csv: csv_text,
        summary,
    })
}
