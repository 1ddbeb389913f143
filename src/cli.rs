use std::path::PathBuf;

use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use miette::{miette, Result};
use time::{macros::format_description, Date};

pub const DEFAULT_CONFIG: &str = "civicrec.toml";

/// Which part of the pipeline to run over the dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Metadata,
    Download,
    Process,
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Pipeline {
        step: Step,
        channel: String,
        dates: Vec<Date>,
    },
    Dates {
        channel: String,
        from: Date,
        to: Date,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub action: Action,
    /// Only set when given on the command line
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub title_contains: Option<String>,
    pub force: bool,
    pub verbose: u8,
}

impl Args {
    pub fn parse() -> Result<Self> {
        Self::from_matches(&build_command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let (name, sub) = matches
            .subcommand()
            .ok_or_else(|| miette!("A subcommand is required"))?;

        let channel: String = required(sub, "channel")?;
        let action = match name {
            "dates" => Action::Dates {
                channel,
                from: required(sub, "from")?,
                to: required(sub, "to")?,
            },
            name => Action::Pipeline {
                step: match name {
                    "metadata" => Step::Metadata,
                    "download" => Step::Download,
                    "process" => Step::Process,
                    "run" => Step::Run,
                    _ => return Err(miette!("Unknown subcommand '{name}'")),
                },
                channel,
                dates: sub
                    .get_many::<Date>("dates")
                    .map(|dates| dates.copied().collect())
                    .unwrap_or_default(),
            },
        };

        Ok(Self {
            action,
            config: matches.get_one::<PathBuf>("config").cloned(),
            workers: matches.get_one::<usize>("workers").copied(),
            title_contains: matches.get_one::<String>("title-contains").cloned(),
            force: matches.get_flag("force"),
            verbose: matches.get_count("verbose"),
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| miette!("Missing argument <{}>", id.to_uppercase()))
}

fn parse_date(s: &str) -> Result<Date, String> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| format!("'{s}' is not a YYYY-MM-DD date: {err}"))
}

pub fn build_command() -> Command {
    let channel = Arg::new("channel")
        .value_name("CHANNEL")
        .required(true)
        .help("Channel identifier, as in the configuration file");
    let dates = Arg::new("dates")
        .value_name("DATES")
        .required(true)
        .value_delimiter(',')
        .value_parser(parse_date)
        .help("Comma separated dates (YYYY-MM-DD)");
    let on_dates = |name: &'static str, about: &'static str| {
        Command::new(name)
            .about(about)
            .arg(channel.clone())
            .arg(dates.clone())
    };

    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help(format!("Configuration file [default: {DEFAULT_CONFIG}]")),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .short('j')
                .global(true)
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Number of concurrent downloads, overrides the configuration"),
        )
        .arg(
            Arg::new("title-contains")
                .long("title-contains")
                .global(true)
                .value_name("TEXT")
                .help("Only handle meetings whose title contains this text, ignoring case"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Reconstruct meetings even if they were already reconstructed"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("Log more, may be repeated"),
        )
        .subcommand(on_dates(
            "metadata",
            "Discover the meetings and save their manifests",
        ))
        .subcommand(on_dates(
            "download",
            "Discover the meetings and download their video",
        ))
        .subcommand(on_dates(
            "process",
            "Reconstruct the meetings from the downloaded video",
        ))
        .subcommand(on_dates("run", "Discover, download and reconstruct the meetings"))
        .subcommand(
            Command::new("dates")
                .about("List the dates with video between two dates, both included")
                .arg(channel.clone())
                .arg(
                    Arg::new("from")
                        .value_name("FROM")
                        .required(true)
                        .value_parser(parse_date),
                )
                .arg(
                    Arg::new("to")
                        .value_name("TO")
                        .required(true)
                        .value_parser(parse_date),
                ),
        )
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        let matches = build_command()
            .try_get_matches_from(std::iter::once("civicrec").chain(args.iter().copied()))
            .map_err(|err| miette!("{err}"))?;
        Args::from_matches(&matches)
    }

    #[test]
    fn command_is_well_formed() {
        build_command().debug_assert();
    }

    #[test]
    fn dates_are_comma_separated() {
        let args = parse(&["run", "surrey", "2016-07-11,2016-07-25", "-vv", "--force"]).unwrap();
        assert_eq!(
            args.action,
            Action::Pipeline {
                step: Step::Run,
                channel: "surrey".to_owned(),
                dates: vec![date!(2016 - 07 - 11), date!(2016 - 07 - 25)],
            }
        );
        assert_eq!(args.verbose, 2);
        assert!(args.force);
        assert_eq!(args.config_path(), PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn global_options_before_the_subcommand() {
        let args = parse(&[
            "--config",
            "/etc/civicrec.toml",
            "--workers",
            "3",
            "--title-contains",
            "council",
            "process",
            "coquitlam",
            "2016-12-12",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/civicrec.toml")));
        assert_eq!(args.workers, Some(3));
        assert_eq!(args.title_contains.as_deref(), Some("council"));
        assert!(matches!(
            args.action,
            Action::Pipeline {
                step: Step::Process,
                ..
            }
        ));
    }

    #[test]
    fn date_range_subcommand() {
        let args = parse(&["dates", "vancouver", "2016-01-01", "2016-01-31"]).unwrap();
        assert_eq!(
            args.action,
            Action::Dates {
                channel: "vancouver".to_owned(),
                from: date!(2016 - 01 - 01),
                to: date!(2016 - 01 - 31),
            }
        );
    }

    #[test]
    fn malformed_date_is_rejected() {
        assert!(parse(&["download", "surrey", "2016-07-11,11/07/2016"]).is_err());
        assert!(parse(&["download", "surrey"]).is_err());
    }
}
