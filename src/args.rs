use clap::Parser;

/// Moves precinct election results onto census geographies.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file describing the job: the vote table, the conversion table and
    /// the choices. Paths inside it are relative to its location.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (block, blockgroup, tract or county) The level of the output. Overrides the level of the
    /// configuration. Block groups by default.
    #[clap(short, long, value_parser)]
    pub level: Option<String>,

    /// (directory or 'stdout') Where the table and the summary are written. Overrides the
    /// output directory of the configuration.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference table in CSV format. If provided, censusalign checks that the
    /// output table matches it.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
