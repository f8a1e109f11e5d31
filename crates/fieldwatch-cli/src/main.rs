use clap::{CommandFactory, Parser, Subcommand};

mod commands;
mod common;

#[derive(Parser)]
#[command(name = "fieldwatch", version, about = "Worksite attendance monitoring CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attendance actions (clock in/out, breaks, trips)
    Attendance {
        #[command(subcommand)]
        action: commands::attendance::AttendanceAction,
    },
    /// Position submission and permission reporting
    Position {
        #[command(subcommand)]
        action: commands::position::PositionAction,
    },
    /// Show a worker's current status
    Status {
        #[command(subcommand)]
        action: commands::status::StatusAction,
    },
    /// Show the derived sampling policy for a worker
    Policy {
        #[command(subcommand)]
        action: commands::policy::PolicyAction,
    },
    /// Server-side violation sweeps
    Sweep {
        #[command(subcommand)]
        action: commands::sweep::SweepAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Attendance { action } => commands::attendance::run(action),
        Commands::Position { action } => commands::position::run(action),
        Commands::Status { action } => commands::status::run(action),
        Commands::Policy { action } => commands::policy::run(action),
        Commands::Sweep { action } => commands::sweep::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
