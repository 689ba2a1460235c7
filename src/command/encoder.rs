//! Command encoder - builds request documents for the device

use farmbot_shared::{limits, Command, Coordinate, RequestArgs, RpcRequest};

/// Build an absolute move, clamping each axis to the device envelope
pub fn encode_move(x: f64, y: f64, z: f64, speed: u32) -> Command {
    Command::MoveAbsolute {
        location: Coordinate::clamped(x, y, z).into(),
        offset: Coordinate::zero().into(),
        speed,
    }
}

/// Build an absolute move at the default speed
pub fn encode_move_default(x: f64, y: f64, z: f64) -> Command {
    encode_move(x, y, z, limits::DEFAULT_SPEED)
}

/// Build a photo capture
pub fn encode_photo() -> Command {
    Command::TakePhoto {}
}

/// Wrap commands into a request labelled with `label`
pub fn wrap(label: &str, commands: Vec<Command>) -> RpcRequest {
    RpcRequest {
        args: RequestArgs {
            label: label.to_string(),
        },
        body: commands,
    }
}
