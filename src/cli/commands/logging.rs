use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_LEVEL: &str = "log-level";

/// Level names in verbosity order, `error` being the quietest.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accept either a level name or a numeric verbosity (`0..=5`).
///
/// `--log-level info` and `-vv` end up as the same count.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> Result<u8, String> {
        if let Ok(count) = level.parse::<u8>()
            && count <= 5
        {
            return Ok(count);
        }

        let level = level.trim().to_lowercase();
        LEVEL_NAMES
            .iter()
            .position(|name| *name == level)
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level: {level}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Increase verbosity: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .long("log-level")
                .help("Log level: ERROR, WARN, INFO, DEBUG, TRACE or 0-5 (default: ERROR)")
                .env("SALESDESK_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(validator_log_level()),
        )
}

/// The louder of `-v` and `--log-level`.
#[must_use]
pub fn verbosity(matches: &ArgMatches) -> u8 {
    let count = matches.get_count(ARG_VERBOSITY);
    let level = matches.get_one::<u8>(ARG_LOG_LEVEL).copied().unwrap_or(0);
    count.max(level)
}
