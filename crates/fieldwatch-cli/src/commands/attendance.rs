use clap::{Args, Subcommand, ValueEnum};
use fieldwatch_core::attendance::AttendanceAction as Action;
use fieldwatch_core::attendance::BreakKind;
use fieldwatch_core::ports::DeviceState;

use crate::common;

#[derive(Args)]
pub struct PositionArgs {
    /// Latitude in degrees
    #[arg(long)]
    pub lat: f64,
    /// Longitude in degrees
    #[arg(long)]
    pub lon: f64,
    /// Horizontal accuracy in meters
    #[arg(long, default_value = "10.0")]
    pub accuracy: f64,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BreakKindArg {
    Meal,
    Personal,
}

impl From<BreakKindArg> for BreakKind {
    fn from(arg: BreakKindArg) -> Self {
        match arg {
            BreakKindArg::Meal => BreakKind::Meal,
            BreakKindArg::Personal => BreakKind::Personal,
        }
    }
}

#[derive(Subcommand)]
pub enum AttendanceAction {
    /// Clock in at the worksite
    ClockIn {
        /// Worker id
        user: String,
        #[command(flatten)]
        position: PositionArgs,
        /// Site credential (QR payload or terminal code)
        #[arg(long)]
        code: String,
    },
    /// Clock out (allowed from any location)
    ClockOut {
        user: String,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// Start a break
    BreakStart {
        user: String,
        #[command(flatten)]
        position: PositionArgs,
        #[arg(long, value_enum, default_value = "meal")]
        kind: BreakKindArg,
    },
    /// End a break
    BreakEnd {
        user: String,
        #[command(flatten)]
        position: PositionArgs,
        #[arg(long, value_enum, default_value = "meal")]
        kind: BreakKindArg,
    },
    /// Start a business trip
    TripStart {
        user: String,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// End a business trip
    TripEnd {
        user: String,
        #[command(flatten)]
        position: PositionArgs,
    },
}

pub fn run(action: AttendanceAction) -> Result<(), Box<dyn std::error::Error>> {
    let (monitor, _db) = common::build_monitor(DeviceState::default())?;

    let (user, position, domain_action, code) = match action {
        AttendanceAction::ClockIn {
            user,
            position,
            code,
        } => (user, position, Action::ClockIn, Some(code)),
        AttendanceAction::ClockOut { user, position } => (user, position, Action::ClockOut, None),
        AttendanceAction::BreakStart {
            user,
            position,
            kind,
        } => (
            user,
            position,
            Action::BreakStart { kind: kind.into() },
            None,
        ),
        AttendanceAction::BreakEnd {
            user,
            position,
            kind,
        } => (
            user,
            position,
            Action::BreakEnd { kind: kind.into() },
            None,
        ),
        AttendanceAction::TripStart { user, position } => (user, position, Action::TripStart, None),
        AttendanceAction::TripEnd { user, position } => (user, position, Action::TripEnd, None),
    };

    let sample = common::sample(position.lat, position.lon, position.accuracy)?;
    let event = monitor.submit_action(&user, domain_action, sample, code.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}
