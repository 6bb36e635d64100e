//! Console front end: runs one match from the command line and prints
//! the serialized log plus a final `finished <scores>` / `aborted` line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, Level};

use match_arena::configuration::{MatchConfiguration, PlayerKind};
use match_arena::game::Game;
use match_arena::judge::ProgramJudge;
use match_arena::logger::init_console_logger;
use match_arena::match_runner::{LocalMatch, RemoteMatch};
use match_arena::match_state::{CancelToken, Match, MatchStatus};
use match_arena::registry::ActiveMatchSlot;
use match_arena::remote::{Credentials, RemoteClient};

const CREDENTIALS_ENV: &str = "ARENA_CREDENTIALS_URL";
const API_BASE_ENV: &str = "ARENA_API_BASE";

#[derive(Parser)]
#[command(
    name = "match-arena",
    version,
    about = "Runs one turn-based AI match, locally or through the matchmaking service"
)]
struct Cli {
    /// Game name
    game: String,

    /// One identifier per slot: an existing file path plays as a local
    /// program, a 24-character hex token as a remote bot
    #[arg(required = true)]
    players: Vec<String>,

    /// Use the line-oriented subprocess protocol instead of one-line JSON
    #[arg(long)]
    simple_io: bool,

    /// Judge executable (required for local matches)
    #[arg(long)]
    judge: Option<PathBuf>,

    /// Credentials URL copied from the service (or set ARENA_CREDENTIALS_URL)
    #[arg(short = 'u', long)]
    credentials: Option<String>,

    /// Service API base URL (or set ARENA_API_BASE)
    #[arg(long)]
    api_base: Option<String>,

    /// Also write the serialized turn log to this file
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,

    /// Append the finished match to this JSON match-collection file
    #[arg(short = 'o', long)]
    collection: Option<PathBuf>,

    /// Per-turn time limit for player programs, in milliseconds
    #[arg(long, default_value_t = 1000)]
    time_limit_ms: u64,

    /// Per-turn time limit for the judge, in milliseconds
    #[arg(long, default_value_t = 5000)]
    judge_time_limit_ms: u64,

    /// Print the service's game list and exit
    #[arg(long)]
    list_games: bool,
}

fn main() {
    let cli = Cli::parse();
    init_console_logger(Level::INFO);
    if let Err(e) = run(cli) {
        error!("{e:#}");
        println!("error");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.list_games {
        let client = remote_client(&cli)?;
        for game in client.fetch_games(&CancelToken::new())? {
            println!("{} ({} players): {}", game.name, game.player_count, game.description);
        }
        return Ok(());
    }

    let configuration = build_configuration(&cli)?;
    let result = if configuration.is_remote_match() {
        info!("running a remote match");
        let client = remote_client(&cli)?;
        let mut m = RemoteMatch::create(&configuration, client, &ActiveMatchSlot::new())?;
        m.run();
        m.into_state()
    } else {
        info!("running a local match");
        let Some(judge_path) = &cli.judge else {
            bail!("a local match needs --judge <path-to-judge-executable>");
        };
        let judge = ProgramJudge::new(judge_path)
            .with_time_limit(Duration::from_millis(cli.judge_time_limit_ms));
        let mut m = LocalMatch::new(&configuration, Box::new(judge), &ActiveMatchSlot::new())?;
        m.run();
        m.into_state()
    };

    report(&cli, &result)
}

fn build_configuration(cli: &Cli) -> anyhow::Result<MatchConfiguration> {
    let mut configuration = MatchConfiguration::new()
        .with_simple_io(cli.simple_io)
        .with_time_limit(Duration::from_millis(cli.time_limit_ms));
    configuration.set_game(Game::new(cli.game.clone(), cli.players.len()));

    for (index, identifier) in cli.players.iter().enumerate() {
        if std::path::Path::new(identifier).is_file() {
            configuration.set_slot_kind(index, PlayerKind::LocalProgram);
        } else if is_bot_token(identifier) {
            configuration.set_slot_kind(index, PlayerKind::RemoteBot);
        } else {
            bail!("'{identifier}' is neither an existing program file nor a remote bot ID");
        }
        configuration.set_slot_identity(index, identifier.clone());
    }

    if !configuration.is_valid() {
        bail!("{}", configuration.validity().reason);
    }
    Ok(configuration)
}

fn is_bot_token(identifier: &str) -> bool {
    identifier.len() == 24 && identifier.bytes().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn remote_client(cli: &Cli) -> anyhow::Result<RemoteClient> {
    let url = cli
        .credentials
        .clone()
        .or_else(|| std::env::var(CREDENTIALS_ENV).ok())
        .with_context(|| format!("pass --credentials <url> or set {CREDENTIALS_ENV}"))?;
    let base = cli
        .api_base
        .clone()
        .or_else(|| std::env::var(API_BASE_ENV).ok())
        .with_context(|| format!("pass --api-base <url> or set {API_BASE_ENV}"))?;
    Ok(RemoteClient::new(base, Credentials::from_url(&url)?))
}

fn report(cli: &Cli, result: &Match) -> anyhow::Result<()> {
    let log_json = serde_json::to_string(result.logs()).context("could not serialize the log")?;
    if let Some(path) = &cli.log_file {
        std::fs::write(path, format!("{log_json}\n"))
            .with_context(|| format!("could not write the log to {}", path.display()))?;
    }
    if let Some(path) = &cli.collection {
        append_to_collection(path, result)?;
    }

    println!("{log_json}");
    match result.status() {
        MatchStatus::Finished => {
            let scores = result
                .scores()
                .unwrap_or_default()
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            println!("finished {scores}");
        }
        _ => println!("aborted"),
    }
    Ok(())
}

fn append_to_collection(path: &std::path::Path, result: &Match) -> anyhow::Result<()> {
    let mut matches: Vec<serde_json::Value> = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("{} is not a JSON match collection", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
        Err(e) => {
            return Err(e).with_context(|| format!("could not read {}", path.display()));
        }
    };
    matches.push(serde_json::to_value(result).context("could not serialize the match")?);
    std::fs::write(path, serde_json::to_string(&matches)?)
        .with_context(|| format!("could not update {}", path.display()))?;
    Ok(())
}
