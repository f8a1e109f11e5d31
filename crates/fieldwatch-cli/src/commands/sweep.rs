use clap::Subcommand;
use fieldwatch_core::ports::DeviceState;

use crate::common;

#[derive(Subcommand)]
pub enum SweepAction {
    /// Run the missing-clock-out and extended-break sweeps once
    Run,
    /// Run the sweeps on an interval until interrupted
    Watch {
        /// Seconds between sweep invocations
        #[arg(long, default_value = "300")]
        interval: u64,
    },
}

pub fn run(action: SweepAction) -> Result<(), Box<dyn std::error::Error>> {
    let (monitor, _db) = common::build_monitor(DeviceState::default())?;
    let runtime = tokio::runtime::Runtime::new()?;

    match action {
        SweepAction::Run => {
            let report = runtime.block_on(monitor.run_periodic_sweeps());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        SweepAction::Watch { interval } => {
            runtime.block_on(async {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));
                loop {
                    ticker.tick().await;
                    let report = monitor.run_periodic_sweeps().await;
                    match serde_json::to_string(&report) {
                        Ok(json) => println!("{json}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
            })
        }
    }
    Ok(())
}
