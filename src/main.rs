use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use panodb::config::Config;
use panodb::db::{self, Database, Entity, Record};
use panodb::{logging, malette};

#[derive(Parser)]
#[command(
    version,
    about = "Storage for the panorama-capture pipeline",
    after_help = "ENVIRONMENT:\n    PANODB_CONFIG       Path to config file\n    PANODB_LOG          Log filter (trace, debug, info, warn, error)\n    PANODB_MALETTE_ID   Malette id when none is configured"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log to stderr instead of the journal or log file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the tables of the configured database
    Init,
    /// Print the DDL
    Schema {
        #[arg(long, value_enum, default_value_t = DialectArg::Sqlite)]
        dialect: DialectArg,
    },
    /// Check the live database against the declared tables
    Check,
    /// Print one record as JSON
    Get {
        entity: Entity,
        /// "<local_id>-<malette_id>"
        key: String,
    },
    /// Print every record of an entity, one JSON object per line
    List { entity: Entity },
    /// Insert a record from its JSON draft and print the stored record
    Insert { entity: Entity, json: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Sqlite,
    Postgres,
}

impl From<DialectArg> for db::Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => db::Dialect::Sqlite,
            DialectArg::Postgres => db::Dialect::Postgres,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let target = if cli.verbose {
        logging::Target::Stderr
    } else {
        logging::Target::System
    };
    let _ = logging::init(target, Some(Config::config_dir().join("logs")));

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let open = || -> Result<Database> {
        let config = match &cli.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        let source = malette::from_config(&config.malette);
        Database::open(&config.database, source).context("Failed to open database")
    };

    match &cli.command {
        Command::Schema { dialect } => {
            print!("{}", db::schema::render((*dialect).into()));
        }
        Command::Init => {
            open()?.initialize()?;
            tracing::info!("Database initialized");
            println!("Database initialized");
        }
        Command::Check => {
            open()?.validate_schema()?;
            println!("Schema OK");
        }
        Command::Get { entity, key } => match open()?.lookup(*entity, key)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => {
                eprintln!("No {} record with key {}", entity, key);
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::List { entity } => {
            for record in open()?.list(*entity)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Insert { entity, json } => {
            let record = insert(&open()?, *entity, json)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn insert(db: &Database, entity: Entity, json: &str) -> Result<Record> {
    let context = || format!("Invalid {} draft", entity);
    let record = match entity {
        Entity::Campaign => {
            Record::Campaign(db.create_campaign(serde_json::from_str(json).with_context(context)?)?)
        }
        Entity::Sensors => {
            Record::Sensors(db.create_sensors(serde_json::from_str(json).with_context(context)?)?)
        }
        Entity::Lot => Record::Lot(db.create_lot(serde_json::from_str(json).with_context(context)?)?),
        Entity::Cp => Record::Cp(db.create_cp(serde_json::from_str(json).with_context(context)?)?),
        Entity::Panorama => Record::Panorama(
            db.create_panorama(serde_json::from_str(json).with_context(context)?)?,
        ),
        Entity::Tile => {
            Record::Tile(db.create_tile(serde_json::from_str(json).with_context(context)?)?)
        }
    };
    Ok(record)
}
