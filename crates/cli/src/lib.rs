pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "cotizador",
    about = "Cotizador operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness, render quotation previews and query the next folio.",
    after_help = "Examples:\n  cotizador doctor --json\n  cotizador preview cotizacion.json --output cotizacion.html\n  cotizador next-folio --user user-1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database, completion credentials and PDF tooling")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Validate a quotation JSON file and render its HTML document")]
    Preview {
        #[arg(help = "Path to the quotation JSON document")]
        file: PathBuf,
        #[arg(long, short, help = "Write the rendered HTML here instead of only reporting totals")]
        output: Option<PathBuf>,
    },
    #[command(about = "Show the folio the next new quotation of a user would receive")]
    NextFolio {
        #[arg(long, help = "Owner whose folio sequence is inspected")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Preview { file, output } => commands::preview::run(&file, output.as_deref()),
        Command::NextFolio { user } => commands::next_folio::run(&user),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
