use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::align::{
    io_common::{parse_count, simplify_file_name},
    *,
};

fn get_range(path: &str, source: &VoteSource) -> BAlignResult<calamine::Range<DataType>> {
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let wrange = match source.excel_worksheet_name.as_deref() {
        Some(worksheet_name) => {
            debug!("get_range: {:?} worksheet: {:?}", path, worksheet_name);
            workbook.worksheet_range(worksheet_name)
        }
        None => workbook.worksheet_range_at(0),
    }
    .context(EmptyExcelSnafu { path })?
    .context(OpeningExcelSnafu { path })?;
    Ok(wrange)
}

/// The text of a cell, as it would appear in a CSV export.
fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{}", *f as i64),
        DataType::Float(f) => f.to_string(),
        DataType::Empty => "".to_string(),
        _ => format!("{}", cell),
    }
}

fn cell_count(cell: &DataType) -> Option<u64> {
    match cell {
        DataType::Int(i) if *i >= 0 => Some(*i as u64),
        DataType::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
        DataType::String(s) => parse_count(s),
        _ => None,
    }
}

/// Reads the vote table from the first worksheet, or from the configured one.
///
/// The first row is the header. Rows are skipped the same way as in CSV files.
pub fn read_votes(
    path: &str,
    source: &VoteSource,
    choices: &[ChoiceColumn],
) -> BAlignResult<Vec<PrecinctVotes>> {
    let wrange = get_range(path, source)?;
    let mut rows = wrange.rows();
    let header: Vec<String> = rows
        .next()
        .context(EmptyExcelSnafu { path })?
        .iter()
        .map(cell_text)
        .collect();
    debug!("read_votes: {}: header: {:?}", path, header);

    let find = |column: &str| -> AlignResult<usize> {
        header
            .iter()
            .position(|h| h == column)
            .context(MissingColumnSnafu { column, path })
    };
    let precinct_idx = find(&source.precinct_column)?;
    let mut choice_idxs: Vec<usize> = Vec::new();
    for c in choices.iter() {
        choice_idxs.push(find(&c.column)?);
    }

    let file_name = simplify_file_name(path);
    let mut res: Vec<PrecinctVotes> = Vec::new();
    let mut skipped: usize = 0;
    for (idx, row) in rows.enumerate() {
        let precinct = row.get(precinct_idx).map(cell_text).unwrap_or_default();
        let counts: Option<Vec<u64>> = choice_idxs
            .iter()
            .map(|i| row.get(*i).and_then(cell_count))
            .collect();
        match counts {
            Some(counts) if !precinct.is_empty() => res.push(PrecinctVotes { precinct, counts }),
            _ => {
                debug!("read_votes: {}: skipping row {}: {:?}", file_name, idx + 2, row);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("read_votes: {}: skipped {} rows with missing data", file_name, skipped);
    }
    info!("read_votes: {}: {} precincts", file_name, res.len());
    Ok(res)
}
