pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rollwise",
    about = "Rollwise operator CLI",
    long_about = "Operate Rollwise runtime readiness, migrations, demo data, config inspection, and API tokens.",
    after_help = "Examples:\n  rollwise doctor --json\n  rollwise config\n  rollwise token --email owner@demo.rollwise.dev"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo tenant (owner, pizzeria agent, menu, one past call)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, auth secret, LLM and calendar readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Issue a dashboard API token for an existing user")]
    Token {
        #[arg(long, help = "Email address of the user")]
        email: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Token { email } => commands::token::run(&email),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
