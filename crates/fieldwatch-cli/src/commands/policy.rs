use clap::Subcommand;
use fieldwatch_core::ports::{DeviceClass, DeviceState};

use crate::common;

#[derive(Subcommand)]
pub enum PolicyAction {
    /// Derive and print the sampling policy for a worker
    Show {
        /// Worker id
        user: String,
        /// Reported battery percentage
        #[arg(long, default_value = "100")]
        battery: u8,
        /// Treat the device as low-end hardware
        #[arg(long)]
        low_end: bool,
    },
}

pub fn run(action: PolicyAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        PolicyAction::Show {
            user,
            battery,
            low_end,
        } => {
            let device = DeviceState {
                battery_pct: battery,
                device_class: if low_end {
                    DeviceClass::LowEnd
                } else {
                    DeviceClass::Standard
                },
            };
            let (monitor, _db) = common::build_monitor(device)?;
            let policy = monitor.current_sampling_policy(&user)?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
    }
    Ok(())
}
