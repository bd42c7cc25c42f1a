//! Map validated CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_CORS_ORIGINS, ARG_DSN, ARG_PORT, auth};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let cors_origins = matches
        .get_many::<String>(ARG_CORS_ORIGINS)
        .map(|values| {
            values
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let auth = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        cors_origins,
        auth,
    }))
}
