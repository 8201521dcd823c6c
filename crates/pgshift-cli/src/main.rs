//! pgshift CLI - generate, apply and roll back Postgres migrations

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use owo_colors::OwoColorize;
use pgshift::{
    ConnectParams, Direction, FileProvider, IntrospectMode, Introspector, MigrationStatus,
    MigrationStore, Migrator, Outcome, Schema, SchemaProvider,
};

mod cli;
mod config;

use cli::{Cli, Commands, GlobalArgs};
use config::Loaded;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Pgshift(#[from] pgshift::Error),

    #[error("no desired schema: pass --schema or set `schema` in .config/pgshift.styx")]
    NoSchema,

    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pgshift=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
        .and_then(|runtime| runtime.block_on(run(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Pgshift(e)) if e.is_no_changes() => {
            println!("No changes detected.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let loaded = config::load()?;
    let ctx = Context::new(&cli.global, loaded);

    match cli.command {
        Commands::List => {
            let mut migrator = ctx.migrator().await?;
            migrator.initialize().await?;
            print_status(&migrator.status());
        }
        Commands::Generate => {
            let version = ctx.store().create_empty()?;
            println!("{} {}", "Created".green(), ctx.store().path(&version, Direction::Up));
            println!("{} {}", "Created".green(), ctx.store().path(&version, Direction::Down));
        }
        Commands::Diff(args) => {
            let provider = ctx.provider()?;
            let mode = if args.initial {
                IntrospectMode::Initial
            } else {
                IntrospectMode::Live
            };
            let mut migrator = ctx.migrator().await?;

            if args.dry_run {
                let migration = migrator.plan_diff(&provider, mode).await?;
                print!("{migration}");
            } else {
                let version = migrator.generate_diff(&provider, mode).await?;
                println!("{} migration {}", "Generated".green(), version.bold());
            }
        }
        Commands::Up => {
            let mut migrator = ctx.migrator().await?;
            let applied = migrator.execute_all(Direction::Up).await?;
            report_batch("Applied", &applied);
        }
        Commands::Down => {
            let mut migrator = ctx.migrator().await?;
            let rolled_back = migrator.execute_all(Direction::Down).await?;
            report_batch("Rolled back", &rolled_back);
        }
        Commands::Exec(args) => {
            let direction = if args.down { Direction::Down } else { Direction::Up };
            let mut migrator = ctx.migrator().await?;
            match migrator.execute(&args.version, direction).await? {
                Outcome::Applied => println!("{} {}", "Applied".green(), args.version),
                Outcome::RolledBack => println!("{} {}", "Rolled back".green(), args.version),
                Outcome::Skipped(reason) => {
                    println!("{} {}: {}", "Skipped".yellow(), args.version, reason)
                }
            }
        }
        Commands::Schema(args) => {
            let schema = if args.desired {
                pgshift::parse_desired_schema(&ctx.provider()?.desired_schema()?)?
            } else {
                ctx.migrator().await?.live_schema().await?
            };
            print_schema(&schema);
        }
    }

    Ok(())
}

/// Command-line arguments merged over the config file.
struct Context {
    database_url: Option<String>,
    loaded: Loaded,
    migrations_dir: Utf8PathBuf,
    schema: Option<Utf8PathBuf>,
}

impl Context {
    fn new(global: &GlobalArgs, loaded: Loaded) -> Self {
        let migrations_dir = match &global.migrations_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => loaded.resolve(loaded.config.migrations_dir()),
        };
        let schema = match (&global.schema, &loaded.config.schema) {
            (Some(path), _) => Some(Utf8PathBuf::from(path)),
            (None, Some(path)) => Some(loaded.resolve(path)),
            (None, None) => None,
        };

        Self {
            database_url: global.database_url.clone(),
            loaded,
            migrations_dir,
            schema,
        }
    }

    fn store(&self) -> MigrationStore {
        MigrationStore::new(self.migrations_dir.clone())
    }

    fn provider(&self) -> Result<FileProvider, CliError> {
        self.schema
            .as_ref()
            .map(FileProvider::new)
            .ok_or(CliError::NoSchema)
    }

    fn connect_params(&self) -> Result<ConnectParams, CliError> {
        let params = match &self.database_url {
            Some(url) => ConnectParams::from_url(url)?,
            None => ConnectParams::from_env(&config::env_keys(&self.loaded.config))?,
        };
        Ok(params)
    }

    async fn migrator(&self) -> Result<Migrator, CliError> {
        let params = self.connect_params()?;
        tracing::info!(database = %params, "connecting");
        let client = pgshift::connect(&params).await?;

        Ok(Migrator::new(
            client,
            self.store(),
            Introspector::new(self.loaded.config.excluded_tables()),
        ))
    }
}

fn report_batch(verb: &str, versions: &[String]) {
    if versions.is_empty() {
        println!("Nothing to do.");
        return;
    }
    for version in versions {
        println!("{} {}", verb.green(), version);
    }
}

fn print_status(statuses: &[MigrationStatus]) {
    println!("Applied migrations:");
    for status in statuses.iter().filter(|s| s.applied) {
        let mut notes = Vec::new();
        if status.up_missing {
            notes.push("up deleted");
        }
        if status.down_missing {
            notes.push("down deleted");
        }

        if notes.is_empty() {
            println!("  - {}", status.version.green());
        } else {
            println!(
                "  - {} {}",
                status.version.green(),
                format!("({})", notes.join(", ")).yellow()
            );
        }
    }

    println!();
    println!("Pending migrations:");
    for status in statuses.iter().filter(|s| !s.applied) {
        println!("  - {}", status.version);
    }
}

fn print_schema(schema: &Schema) {
    if schema.is_empty() {
        println!("No tables.");
        return;
    }

    println!("Schema ({} tables):", schema.tables.len());
    println!();
    for table in schema.iter_tables() {
        println!("  {} ({} columns)", table.name.bold(), table.columns.len());
        for col in &table.columns {
            let mut attrs = Vec::new();
            if col.is_primary_key() {
                attrs.push("PK".to_string());
            }
            if col.is_unique() {
                attrs.push("UNIQUE".to_string());
            }
            if col.not_null {
                attrs.push("NOT NULL".to_string());
            }
            if let Some(default) = &col.default {
                attrs.push(format!("DEFAULT {default}"));
            }

            let attrs = if attrs.is_empty() {
                String::new()
            } else {
                format!(" [{}]", attrs.join(", "))
            };
            println!("    {}: {}{}", col.name, col.data_type, attrs);

            for fk in col.foreign_keys() {
                let target = fk
                    .complete_foreign_key()
                    .and_then(|d| Some((d.reference_table.as_deref()?, d.reference_column.as_deref()?)));
                match target {
                    Some((table, column)) => println!("    FK {}: -> {}.{}", fk.name, table, column),
                    None => println!("    FK {}: -> (unresolved)", fk.name),
                }
            }
        }
        println!();
    }
}
