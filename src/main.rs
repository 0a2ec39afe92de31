use clap::Parser;

use liveability::cli::{check, list, log, output, run, status, CheckCommand, Cli, Commands};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Run(args) => run::execute(args).await,
        Commands::List => {
            list::execute();
            Ok(())
        }
        Commands::Status(args) => status::execute(args),
        Commands::Check(command) => match command {
            CheckCommand::Config(args) => check::execute_config(&args.config),
            CheckCommand::Database(args) => check::execute_database(&args.config),
            CheckCommand::Network(args) => check::execute_network(&args.config),
        },
        Commands::Log(args) => log::execute(args),
    };

    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
