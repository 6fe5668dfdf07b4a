use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quiz_core::model::{LearnerId, QuizDefinition};
use quiz_core::remediation::{RemediationCatalog, RemediationPlanner};
use services::{Clock, EngineConfig, EventBus, InterruptHub, MemoryEventBus, QuizSessionService};
use storage::repository::{ProgressKey, ProgressRepository, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod terminal;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingQuiz,
    UnknownArg(String),
    InvalidLearnerId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingQuiz => write!(f, "--quiz <path> is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidLearnerId { raw } => write!(f, "invalid --learner value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz-engine run     --quiz <file.json> [--remediation <file.json>] [--db <sqlite_url>] [--learner <id>]");
    eprintln!("  quiz-engine history --quiz <file.json> [--db <sqlite_url>] [--learner <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:quiz.sqlite3");
    eprintln!("  --learner 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_LEARNER_ID");
    eprintln!("  QUIZ_SAVE_MODE (immediate|debounced), QUIZ_DEBOUNCE_SECS, QUIZ_MAX_SUGGESTIONS");
    eprintln!("  RUST_LOG (default quiz_engine=info,services=info,storage=warn)");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    History,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "history" => Some(Self::History),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    learner_id: LearnerId,
    quiz_path: PathBuf,
    remediation_path: Option<PathBuf>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("QUIZ_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("sqlite:quiz.sqlite3".into()), normalize_sqlite_url);
        let mut learner_id = std::env::var("QUIZ_LEARNER_ID")
            .ok()
            .and_then(|value| value.parse::<LearnerId>().ok())
            .unwrap_or_else(|| LearnerId::new(1));
        let mut quiz_path = None;
        let mut remediation_path = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--learner" => {
                    let value = require_value(args, "--learner")?;
                    learner_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidLearnerId { raw: value.clone() })?;
                }
                "--quiz" => quiz_path = Some(PathBuf::from(require_value(args, "--quiz")?)),
                "--remediation" => {
                    remediation_path = Some(PathBuf::from(require_value(args, "--remediation")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            learner_id,
            quiz_path: quiz_path.ok_or(ArgsError::MissingQuiz)?,
            remediation_path,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn read_quiz(path: &Path) -> Result<QuizDefinition, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn read_catalog(path: Option<&Path>) -> Result<RemediationCatalog, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(RemediationCatalog::new());
    };
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => {
            print_usage();
            return Err(ArgsError::MissingQuiz.into());
        }
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let quiz = Arc::new(read_quiz(&parsed.quiz_path)?);

    // Open + migrate SQLite here so core and services stay free of I/O setup.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    match cmd {
        Command::Run => {
            let config = EngineConfig::from_env();
            let catalog = read_catalog(parsed.remediation_path.as_deref())?;
            let hub = Arc::new(InterruptHub::new());
            let events = Arc::new(MemoryEventBus::default());
            let mut completions = events.subscribe();
            tokio::spawn(async move {
                while let Ok((seq, event)) = completions.recv().await {
                    info!(
                        seq,
                        learner = %event.learner_id,
                        quiz = %event.quiz_id,
                        attempt = event.attempt_number,
                        score = event.score,
                        xp = event.xp_earned,
                        "quiz completed"
                    );
                }
            });
            let service = QuizSessionService::new(
                Clock::system(),
                Arc::clone(&storage.progress),
                events,
                RemediationPlanner::new(catalog),
            )
            .with_config(config)
            .with_interrupts(Arc::clone(&hub));

            info!(
                learner = %parsed.learner_id,
                quiz = %quiz.id,
                save_policy = ?config.save_policy,
                "opening quiz"
            );
            let session = service.open(parsed.learner_id, quiz).await?;
            terminal::drive(&service, &hub, session).await
        }
        Command::History => {
            let key = ProgressKey::new(parsed.learner_id, quiz.id);
            for record in storage.progress.history(key).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quiz_engine=info,services=info,storage=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
