//! Reply policy of the simulated device

use clap::ValueEnum;
use farmbot_shared::{Command, RpcReply, RpcRequest};

/// How the simulated device answers requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Execute and acknowledge
    Ok,
    /// Reject every request
    Error,
    /// Never answer
    Silent,
    /// Answer with a kind clients do not understand
    Unexpected,
}

pub struct Responder {
    mode: Mode,
    fail_first: u32,
    handled: u32,
}

impl Responder {
    /// `fail_first` requests are rejected before `mode` takes over
    pub fn new(mode: Mode, fail_first: u32) -> Self {
        Self {
            mode,
            fail_first,
            handled: 0,
        }
    }

    pub fn handled(&self) -> u32 {
        self.handled
    }

    /// Reply for `request`, or `None` to stay silent
    pub fn reply_for(&mut self, request: &RpcRequest) -> Option<RpcReply> {
        self.handled += 1;
        let label = request.label();

        if self.handled <= self.fail_first {
            return Some(RpcReply::error(label));
        }

        match self.mode {
            Mode::Silent => None,
            Mode::Error => Some(RpcReply::error(label)),
            Mode::Unexpected => Some(RpcReply::new("rpc_unknown", label)),
            Mode::Ok if request.body.iter().all(accepts) => Some(RpcReply::ok(label)),
            Mode::Ok => Some(RpcReply::error(label)),
        }
    }
}

/// Moves outside the gantry are refused, like the firmware does
fn accepts(command: &Command) -> bool {
    match command {
        Command::MoveAbsolute { location, .. } => location.coordinate().within_envelope(),
        Command::TakePhoto {} => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmbot_shared::{Coordinate, Location, Outcome, RequestArgs};

    fn request(label: &str, body: Vec<Command>) -> RpcRequest {
        RpcRequest {
            args: RequestArgs {
                label: label.to_string(),
            },
            body,
        }
    }

    fn photo(label: &str) -> RpcRequest {
        request(label, vec![Command::TakePhoto {}])
    }

    #[test]
    fn test_ok_echoes_label() {
        let mut responder = Responder::new(Mode::Ok, 0);
        let reply = responder.reply_for(&photo("a1")).unwrap();

        assert_eq!(reply.label(), Some("a1"));
        assert_eq!(reply.outcome(), Outcome::Ok);
        assert_eq!(responder.handled(), 1);
    }

    #[test]
    fn test_fail_first_then_mode() {
        let mut responder = Responder::new(Mode::Ok, 2);
        let outcomes: Vec<Outcome> = (0..3)
            .map(|i| responder.reply_for(&photo(&i.to_string())).unwrap().outcome())
            .collect();

        assert_eq!(outcomes, vec![Outcome::Error, Outcome::Error, Outcome::Ok]);
    }

    #[test]
    fn test_modes() {
        assert!(Responder::new(Mode::Silent, 0).reply_for(&photo("s")).is_none());
        assert_eq!(
            Responder::new(Mode::Error, 0).reply_for(&photo("e")).unwrap().outcome(),
            Outcome::Error
        );
        assert!(matches!(
            Responder::new(Mode::Unexpected, 0).reply_for(&photo("u")).unwrap().outcome(),
            Outcome::Unexpected(_)
        ));
    }

    #[test]
    fn test_rejects_move_outside_envelope() {
        let outside = Command::MoveAbsolute {
            location: Location::from(Coordinate::new(5000.0, 0.0, 0.0)),
            offset: Location::from(Coordinate::zero()),
            speed: 100,
        };
        let reply = Responder::new(Mode::Ok, 0)
            .reply_for(&request("m", vec![outside]))
            .unwrap();

        assert_eq!(reply.outcome(), Outcome::Error);
    }
}
