mod actors;
mod cli;
mod config;
mod database;
mod fetcher;
mod io;
mod logging;
mod outside;
mod pipeline;
mod planner;
mod reconstruct;
mod resolver;
mod result;
#[cfg(test)]
mod testing;
mod types;
mod utils;
mod vendors;

use miette::{Context, IntoDiagnostic, Result};
use tracing::{debug, info};

use crate::{
    cli::{Action, Args, Step},
    config::Settings,
    database::{CacheDb, Sqlite},
    logging::{init_logging, level_of_verbosity},
    outside::{Ffmpeg, HttpClient},
    pipeline::{Pipeline, RunOptions},
    resolver::Resolver,
    types::RunReport,
    utils::CancelToken,
    vendors::adapter_for,
};

fn main() -> Result<()> {
    let args = Args::parse()?;
    init_logging(level_of_verbosity(args.verbose))?;

    let config_path = args.config_path();
    let mut settings = Settings::load(&config_path, args.config.is_some())?;
    if let Some(workers) = args.workers {
        settings.fetch.workers = workers;
    }
    debug!("Configuration: {settings:?}");

    let channel_id = match &args.action {
        Action::Pipeline { channel, .. } | Action::Dates { channel, .. } => channel,
    };
    let channel = settings.channel(channel_id)?;

    let transport = HttpClient::new(settings.fetch.request_timeout())
        .into_diagnostic()
        .wrap_err("Could not build the HTTP client")?;
    let adapter = adapter_for(channel.vendor, &transport);

    let (step, dates) = match &args.action {
        Action::Dates { from, to, .. } => {
            let resolver = Resolver::new(
                adapter.as_ref(),
                settings.fetch.retry_policy(),
                CancelToken::new(),
            );
            for date in resolver.available_dates(channel, *from, *to)? {
                println!("{date}");
            }
            return Ok(());
        }
        Action::Pipeline { step, dates, .. } => (*step, dates),
    };

    let media = Ffmpeg::new(settings.reconstruct.tool_timeout())
        .into_diagnostic()
        .wrap_err("Could not find ffmpeg and ffprobe")?;

    if let Some(parent) = settings.database.parent() {
        std::fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err("Could not create the database parent directories")?;
    }
    let db = Sqlite::read_or_create(&settings.database)
        .wrap_err("Could not create or read the database file")?;
    info!(
        "{} meetings already reconstructed, {} failed",
        db.count_meetings(Some(true))?,
        db.failures()?.len()
    );

    let pipeline = Pipeline::new(&settings, channel, adapter.as_ref(), &transport, &media, &db)
        .with_options(RunOptions {
            title_filter: args.title_contains.clone(),
            force: args.force,
        });
    let report = match step {
        Step::Metadata => pipeline.metadata(dates)?,
        Step::Download => pipeline.download(dates)?,
        Step::Process => pipeline.process(dates)?,
        Step::Run => pipeline.run(dates)?,
    };

    print_report(&report);
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{report}");
    for failure in &report.failed {
        println!(
            "  {} '{}' ({}): {}",
            failure.kind, failure.title, failure.manifest_id, failure.reason
        );
    }
    for date in &report.failed_dates {
        println!("  discovery failed for {date}");
    }
}
