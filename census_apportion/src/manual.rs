/*!

This is the long-form manual for `census_apportion` and `censusalign`.

## How votes are moved

Three steps are applied, in this order:

1. **Allocation.** Each line of the conversion table links a precinct to a census block and
gives two registration counts: the voters of the precinct living in the block, and all the voters
of the precinct. The block receives `votes * block registration / precinct registration` for each
choice. This is a real number.

2. **Apportionment.** The real shares of a precinct are rounded with the Hamilton method, one
choice at a time: all shares are rounded down, then the missing votes are given one by one to the
shares with the largest fractional part. When two shares have the same fractional part, the one
coming first in the conversion table wins. After this step the blocks of a precinct hold exactly
the votes of the precinct.

3. **Aggregation.** The blocks are summed by block group, tract or county, using the prefix of
their identifier. Blocks whose block group code ends with `0` are water only areas and are left
out.

The following lines are skipped without raising an error:
- conversion lines for a precinct with no vote record,
- lines with a missing, zero or negative precinct registration,
- lines with a missing or negative block registration,
- lines producing an infinite share.

The number of skipped lines is reported in the summary. In particular, a precinct whose total
registration is zero contributes no vote at all.

## Input formats

### Vote table

A CSV file (or an Excel `.xlsx` file with `"provider": "xlsx"`) with a header row. One column
holds the precinct identifier, and each choice is read from its own column. Identifiers are kept
as text. Rows with an empty or non numeric count are skipped.

|SRPREC_KEY|GOVDEM01|GOVREP01|
|----------|--------|--------|
|0010001   |312     |127     |

### Conversion table

A CSV file with a header row, and four columns: precinct identifier, block identifier, block
registration and precinct registration.

|SRPREC_KEY|BLOCK_KEY      |BLKREG|SRTOTREG|
|----------|---------------|------|--------|
|0010001   |060014001001000|120.5 |439     |

### Population table (optional)

A CSV file with a block identifier column and a population column. The population is summed to
the output level and added as a `population` column.

Tab separated files are read by setting `"delimiter": "\t"` on a source.

## Configuration

The job is described by a JSON file. Paths are relative to the file.

```json
{
  "outputSettings": {
    "jobName": "ca_2022_governor",
    "outputDirectory": "out",
    "level": "blockgroup"
  },
  "voteSource": {
    "provider": "csv",
    "filePath": "state_g22_sov_data_by_g22_srprec.csv",
    "precinctColumn": "SRPREC_KEY"
  },
  "choices": [
    { "name": "dem", "column": "GOVDEM01" },
    { "name": "rep", "column": "GOVREP01" }
  ],
  "conversionSource": {
    "filePath": "state_g22_sr_blk_map.csv",
    "precinctColumn": "SRPREC_KEY",
    "subUnitColumn": "BLOCK_KEY",
    "subUnitWeightColumn": "BLKREG",
    "precinctWeightColumn": "SRTOTREG"
  },
  "rules": {
    "subUnitIdWidth": 15
  }
}
```

`rules` accepts `sentinel` (default `"0"`), `sentinelPrefixLength` (12), `blockGroupLength` (12),
`tractLength` (11), `countyLength` (5) and `subUnitIdWidth` (no padding). Setting
`subUnitIdWidth` to 15 restores the leading zero of block identifiers that went through a
spreadsheet.

`customEdges` is a list of pairs of identifiers at the output level. The pairs whose both ends are
in the output are written to the summary, for the tool that builds the adjacency graph.

## Outputs

- `<jobName>_<level>.csv`: columns `GEOID_<LEVEL>`, `total`, one column per choice, and
`population` if a population table was given. Rows are sorted by identifier.
- `<jobName>_summary.json`: the configuration, the skipped line counts, the totals, the retained
custom edges and a SHA-256 digest of the table.

*/
