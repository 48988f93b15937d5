use clap::Parser;
use log::{debug, info, LevelFilter};

mod align;
mod args;

fn main() {
    let args = args::Args::parse();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
    debug!("args: {:?}", args);

    match align::run_job(args.config, args.level, args.out, args.reference) {
        Ok(outcome) => {
            info!(
                "main: {} rows at level {}",
                outcome.table.rows.len(),
                outcome.table.level
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
