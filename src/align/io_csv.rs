// Primitives for reading and writing CSV files.

use std::fs::File;

use csv::StringRecord;

use crate::align::{
    io_common::{find_column, parse_count, parse_weight},
    *,
};

fn open_reader(path: &str, delimiter: &Option<String>) -> AlignResult<(csv::Reader<File>, StringRecord)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    let header = rdr.headers().context(CsvOpenSnafu { path })?.clone();
    debug!("open_reader: {}: header: {:?}", path, header);
    Ok((rdr, header))
}

fn cell(line: &StringRecord, idx: usize) -> &str {
    line.get(idx).map(|s| s.trim()).unwrap_or("")
}

/// Reads the precinct identifier and one count per choice.
///
/// Rows without an identifier, or with a count that is not a non negative
/// integer, are skipped.
pub fn read_votes(
    path: &str,
    source: &VoteSource,
    choices: &[ChoiceColumn],
) -> BAlignResult<Vec<PrecinctVotes>> {
    let (mut rdr, header) = open_reader(path, &source.delimiter)?;
    let precinct_idx = find_column(&header, &source.precinct_column, path)?;
    let mut choice_idxs: Vec<usize> = Vec::new();
    for c in choices.iter() {
        choice_idxs.push(find_column(&header, &c.column, path)?);
    }

    let mut res: Vec<PrecinctVotes> = Vec::new();
    let mut skipped: usize = 0;
    for (idx, line_r) in rdr.records().enumerate() {
        // The header is line 1.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        let precinct = cell(&line, precinct_idx);
        let counts: Option<Vec<u64>> = choice_idxs
            .iter()
            .map(|i| parse_count(cell(&line, *i)))
            .collect();
        match counts {
            Some(counts) if !precinct.is_empty() => res.push(PrecinctVotes {
                precinct: precinct.to_string(),
                counts,
            }),
            _ => {
                debug!("read_votes: {}: skipping line {}: {:?}", path, lineno, line);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("read_votes: {}: skipped {} lines with missing data", path, skipped);
    }
    info!("read_votes: {}: {} precincts", path, res.len());
    Ok(res)
}

/// Reads the conversion table, in file order.
///
/// Registration cells that cannot be read are kept as undefined, so that the
/// engine counts them. Rows without a precinct or a block are dropped here.
pub fn read_conversion(path: &str, source: &ConversionSource) -> BAlignResult<Vec<ConversionRow>> {
    let (mut rdr, header) = open_reader(path, &source.delimiter)?;
    let precinct_idx = find_column(&header, &source.precinct_column, path)?;
    let sub_unit_idx = find_column(&header, &source.sub_unit_column, path)?;
    let sub_weight_idx = find_column(&header, &source.sub_unit_weight_column, path)?;
    let precinct_weight_idx = find_column(&header, &source.precinct_weight_column, path)?;

    let mut res: Vec<ConversionRow> = Vec::new();
    for (idx, line_r) in rdr.records().enumerate() {
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        let precinct = cell(&line, precinct_idx);
        let sub_unit = cell(&line, sub_unit_idx);
        if precinct.is_empty() || sub_unit.is_empty() {
            warn!("read_conversion: {}: line {} has no identifier", path, lineno);
            continue;
        }
        res.push(ConversionRow {
            precinct: precinct.to_string(),
            sub_unit: sub_unit.to_string(),
            sub_unit_weight: parse_weight(cell(&line, sub_weight_idx)),
            precinct_weight: parse_weight(cell(&line, precinct_weight_idx)),
        });
    }
    info!("read_conversion: {}: {} rows", path, res.len());
    Ok(res)
}

pub fn read_population(path: &str, source: &PopulationSource) -> BAlignResult<Vec<BlockPopulation>> {
    let (mut rdr, header) = open_reader(path, &source.delimiter)?;
    let block_idx = find_column(&header, &source.block_column, path)?;
    let population_idx = find_column(&header, &source.population_column, path)?;

    let mut res: Vec<BlockPopulation> = Vec::new();
    for (idx, line_r) in rdr.records().enumerate() {
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        let block = cell(&line, block_idx);
        match parse_count(cell(&line, population_idx)) {
            Some(population) if !block.is_empty() => res.push(BlockPopulation {
                block: block.to_string(),
                population,
            }),
            _ => {
                warn!("read_population: {}: skipping line {}: {:?}", path, lineno, line);
            }
        }
    }
    info!("read_population: {}: {} blocks", path, res.len());
    Ok(res)
}

/// Renders the table with a `GEOID_<LEVEL>` column, the total and the choices.
pub fn table_to_csv(table: &AggregateTable, with_population: bool) -> AlignResult<String> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(vec![]);

    let mut header: Vec<String> = vec![table.level.geoid_column(), "total".to_string()];
    header.extend(table.choices.iter().cloned());
    if with_population {
        header.push("population".to_string());
    }
    wtr.write_record(&header).context(CsvWriteSnafu {})?;

    for r in table.rows.iter() {
        let mut record: Vec<String> = vec![r.geoid.clone(), r.total.to_string()];
        record.extend(r.counts.iter().map(|c| c.to_string()));
        if with_population {
            record.push(r.population.map(|p| p.to_string()).unwrap_or_default());
        }
        wtr.write_record(&record).context(CsvWriteSnafu {})?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| e.into_error())
        .context(WritingOutputSnafu { path: "csv buffer" })?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}
