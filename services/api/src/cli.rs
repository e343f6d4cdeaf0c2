use crate::demo::{run_demo, run_rules, DemoArgs, RulesArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use salepath::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "salepath",
    about = "Run and inspect the property sale phase lifecycle engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a sample sale through the lifecycle against an in-memory store
    Demo(DemoArgs),
    /// Print the phase graph and the active permission matrix
    Rules(RulesArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Rules(args) => run_rules(args),
    }
}
