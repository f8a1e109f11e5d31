use clap::Subcommand;
use fieldwatch_core::ports::DeviceState;

use crate::commands::attendance::PositionArgs;
use crate::common;

#[derive(Subcommand)]
pub enum PositionAction {
    /// Submit a position sample for a worker
    Submit {
        /// Worker id
        user: String,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// Report location permission granted
    Enable {
        user: String,
    },
    /// Report location permission lost or disabled
    Disable {
        user: String,
    },
}

pub fn run(action: PositionAction) -> Result<(), Box<dyn std::error::Error>> {
    let (monitor, _db) = common::build_monitor(DeviceState::default())?;

    match action {
        PositionAction::Submit { user, position } => {
            let sample = common::sample(position.lat, position.lon, position.accuracy)?;
            monitor.submit_position(&user, sample)?;
            println!("ok");
        }
        PositionAction::Enable { user } => {
            monitor.report_positioning_state(&user, true)?;
            println!("ok");
        }
        PositionAction::Disable { user } => {
            monitor.report_positioning_state(&user, false)?;
            println!("ok");
        }
    }
    Ok(())
}
