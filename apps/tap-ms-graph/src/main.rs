//! tap-ms-graph - Singer tap for Microsoft Graph
//!
//! Run with `--discover` to print the catalog, or with a config (and
//! optionally state and catalog) to extract records to stdout.

use std::path::{Path, PathBuf};

use clap::Parser;
use msgraph_tap::{catalog, sync, Catalog, GraphError, GraphResult, JsonLinesSink, TapConfig, TapState};

mod logging;

/// Extract Microsoft Graph resources as Singer messages
#[derive(Parser, Debug)]
#[command(name = "tap-ms-graph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config with tenant_id, client_id, client_secret and start_date
    #[arg(short, long)]
    config: PathBuf,

    /// State file written by a previous run
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Catalog selecting the streams to sync (all streams when omitted)
    #[arg(long, alias = "properties")]
    catalog: Option<PathBuf>,

    /// Print the catalog and exit
    #[arg(short, long)]
    discover: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info,msgraph_tap=info")]
    log_filter: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_filter, cli.log_json);

    match run(cli).await {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!(kind = e.kind_label(), error = %e, "Tap failed");
            std::process::exit(1);
        }
    }
}

fn read_file(path: &Path) -> GraphResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| GraphError::Config(format!("Failed to read {}: {e}", path.display())))
}

/// Returns whether every stream succeeded.
async fn run(cli: Cli) -> GraphResult<bool> {
    let config = TapConfig::from_json(&read_file(&cli.config)?)?;

    if cli.discover {
        tracing::info!("Running discovery");
        println!("{}", catalog::discover().to_json_pretty()?);
        return Ok(true);
    }

    let mut state = match &cli.state {
        Some(path) => TapState::from_json(&read_file(path)?)?,
        None => TapState::default(),
    };
    let catalog = match &cli.catalog {
        Some(path) => Catalog::from_json(&read_file(path)?)?,
        None => catalog::discover().with_all_selected(),
    };

    let mut sink = JsonLinesSink::stdout();
    let summary = sync::sync(&config, &catalog, &mut state, &mut sink).await?;

    for (stream, count) in &summary.record_counts {
        tracing::info!(stream = %stream, records = count, "Stream record count");
    }
    for failure in &summary.failures {
        tracing::warn!(
            stream = %failure.stream,
            kind = failure.kind,
            attempts = failure.attempts,
            error = %failure.message,
            "Stream did not complete"
        );
    }
    Ok(summary.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_singer_flags() {
        let cli = Cli::try_parse_from([
            "tap-ms-graph",
            "--config",
            "config.json",
            "--state",
            "state.json",
            "--properties",
            "catalog.json",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.state, Some(PathBuf::from("state.json")));
        assert_eq!(cli.catalog, Some(PathBuf::from("catalog.json")));
        assert!(!cli.discover);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["tap-ms-graph", "--discover"]).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = read_file(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }
}
