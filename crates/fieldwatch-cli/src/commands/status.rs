use clap::Subcommand;
use fieldwatch_core::ports::DeviceState;
use fieldwatch_core::storage::Database;

use crate::common;

#[derive(Subcommand)]
pub enum StatusAction {
    /// Print a worker's current status as JSON
    Show {
        /// Worker id
        user: String,
    },
    /// Print a worker's recent attendance events, newest first
    History {
        user: String,
        /// Maximum number of events
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// List all workers present in the event log with their statuses
    List,
}

pub fn run(action: StatusAction) -> Result<(), Box<dyn std::error::Error>> {
    let (monitor, db) = common::build_monitor(DeviceState::default())?;

    match action {
        StatusAction::Show { user } => {
            let status = monitor.current_status(&user)?;
            let out = serde_json::json!({ "user_id": user, "status": status });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        StatusAction::History { user, limit } => {
            let events = db.recent_events(&user, limit)?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        StatusAction::List => {
            let mut entries = Vec::new();
            for user in workers(db.as_ref())? {
                let status = monitor.current_status(&user)?;
                entries.push(serde_json::json!({ "user_id": user, "status": status }));
            }
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

fn workers(db: &Database) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut users = db.known_user_ids()?;
    users.sort();
    Ok(users)
}
