//! CLI argument definitions using clap derive API

use clap::{ArgGroup, Args, Parser, Subcommand};

/// Postgres schema diffing and reversible SQL migrations.
#[derive(Parser, Debug)]
#[command(name = "pgshift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Database URL; when absent, the DB_* environment variables are used
    #[arg(long, global = true, env = "PGSHIFT_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Migrations directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,

    /// Desired-schema JSON document (overrides the config file)
    #[arg(short, long, global = true)]
    pub schema: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List applied and pending migrations
    List,

    /// Create an empty migration to fill in by hand
    Generate,

    /// Create a migration from the difference between the desired schema and the database
    Diff(DiffArgs),

    /// Apply every pending migration
    Up,

    /// Roll back every applied migration, highest version first
    Down,

    /// Apply or roll back a single migration
    Exec(ExecArgs),

    /// Print the live schema (or the desired one)
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Treat the database as empty and create everything from scratch
    #[arg(long)]
    pub initial: bool,

    /// Print the statements instead of writing a migration
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("direction").required(true).args(["up", "down"])))]
pub struct ExecArgs {
    /// Migration version, e.g. 20260114093000
    pub version: String,

    /// Apply the migration
    #[arg(long)]
    pub up: bool,

    /// Roll the migration back
    #[arg(long)]
    pub down: bool,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Print the desired schema instead of introspecting the database
    #[arg(long)]
    pub desired: bool,
}
