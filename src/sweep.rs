//! Bed sweep - zig-zag scan of the planting bed with a photo at each stop

use crate::client::FarmbotClient;
use crate::error::Result;
use crate::transport::BusTransport;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File the visited positions are written to
pub const LOCATIONS_FILE: &str = "location.txt";

/// Area and spacing of a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
    /// Step between stops on both axes
    pub delta: i64,
    /// Added to both coordinates of every stop
    pub offset: i64,
    /// Height the sweep runs at
    pub z: i64,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            min_x: 0,
            max_x: 1300,
            min_y: 0,
            max_y: 1000,
            delta: 1000,
            offset: 0,
            z: 0,
        }
    }
}

impl SweepPlan {
    /// Stops in visiting order.
    ///
    /// Columns advance along x; y alternates direction per column so the
    /// head never travels back across the bed.
    pub fn points(&self) -> Vec<(i64, i64)> {
        if self.delta <= 0 {
            return Vec::new();
        }

        let step = self.delta as usize;
        let ys: Vec<i64> = (self.min_y..self.max_y).step_by(step).collect();
        let mut pts = Vec::new();
        let mut descending = false;

        for x in (self.min_x..self.max_x).step_by(step) {
            let column: Box<dyn Iterator<Item = &i64>> = if descending {
                Box::new(ys.iter().rev())
            } else {
                Box::new(ys.iter())
            };
            pts.extend(column.map(|y| (x + self.offset, y + self.offset)));
            descending = !descending;
        }

        pts
    }
}

/// Summary of a finished sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub visited: Vec<(i64, i64)>,
    pub failed_moves: usize,
    pub failed_photos: usize,
}

/// Drive the device through `plan`, photographing every stop.
///
/// Moves and photos that come back false are counted and the sweep carries
/// on; connection timeouts and protocol violations abort it.
pub async fn run_sweep<T: BusTransport>(
    client: &FarmbotClient<T>,
    plan: &SweepPlan,
) -> Result<SweepReport> {
    let points = plan.points();
    let z = plan.z as f64;
    info!("Sweep of {} stops at z={}", points.len(), plan.z);

    let mut report = SweepReport::default();

    if !client.move_to(0.0, 0.0, z).await? {
        warn!("Could not reach sweep origin");
        report.failed_moves += 1;
    }

    for &(x, y) in &points {
        if !client.move_to(x as f64, y as f64, z).await? {
            report.failed_moves += 1;
            continue;
        }
        if !client.take_photo().await? {
            report.failed_photos += 1;
        }
        report.visited.push((x, y));
    }

    info!(
        "Sweep done: {} visited, {} failed moves, {} failed photos",
        report.visited.len(),
        report.failed_moves,
        report.failed_photos
    );
    Ok(report)
}

/// Writes sweep positions, one `x y z` line per stop
pub struct LocationLog;

impl LocationLog {
    /// Write `points` at height `z` to `dir/location.txt`, creating `dir` if needed
    pub fn write(dir: &Path, points: &[(i64, i64)], z: i64) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCATIONS_FILE);

        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        for (x, y) in points {
            writeln!(file, "{} {} {}", x, y, z)?;
        }
        file.flush()?;

        info!("Wrote {} locations to {}", points.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CorrelationTracker, ExecutorConfig, ReplyRouter};
    use crate::transport::{Delivery, LoopbackBus};
    use farmbot_shared::{Command, RpcReply, RpcRequest};
    use std::sync::Arc;

    fn read_log(path: &Path) -> Vec<(i64, i64, i64)> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| {
                let f: Vec<i64> = line.split_whitespace().map(|v| v.parse().unwrap()).collect();
                (f[0], f[1], f[2])
            })
            .collect()
    }

    #[test]
    fn test_default_plan_points() {
        assert_eq!(SweepPlan::default().points(), vec![(0, 0), (1000, 0)]);
    }

    #[test]
    fn test_zig_zag_order_with_offset() {
        let plan = SweepPlan {
            min_x: 0,
            max_x: 300,
            min_y: 0,
            max_y: 300,
            delta: 100,
            offset: 5,
            z: 0,
        };
        assert_eq!(
            plan.points(),
            vec![
                (5, 5),
                (5, 105),
                (5, 205),
                (105, 205),
                (105, 105),
                (105, 5),
                (205, 5),
                (205, 105),
                (205, 205),
            ]
        );
    }

    #[test]
    fn test_degenerate_plans() {
        let zero = SweepPlan {
            delta: 0,
            ..Default::default()
        };
        assert!(zero.points().is_empty());

        let empty = SweepPlan {
            max_x: 0,
            ..Default::default()
        };
        assert!(empty.points().is_empty());
    }

    #[test]
    fn test_location_log_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("locations");

        let path = LocationLog::write(&target, &[(0, 0), (100, 200)], 7).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0 0 7\n100 200 7\n");
        assert_eq!(read_log(&path), vec![(0, 0, 7), (100, 200, 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_moves_and_photographs_each_stop() {
        let tracker = Arc::new(CorrelationTracker::new());
        let router = ReplyRouter::new("d", tracker.clone());
        let topic = router.reply_topic().to_string();

        // Every photo fails; every move succeeds
        let bus = Arc::new(LoopbackBus::new(
            router,
            Box::new(move |request: &RpcRequest| {
                let reply = match request.body[0] {
                    Command::TakePhoto {} => RpcReply::error(request.label()),
                    _ => RpcReply::ok(request.label()),
                };
                vec![Delivery::reply(topic.clone(), &reply)]
            }),
        ));
        let config = ExecutorConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let client = FarmbotClient::with_transport(bus.clone(), tracker, "d", config);

        let report = run_sweep(&client, &SweepPlan::default()).await.unwrap();

        assert_eq!(report.visited, vec![(0, 0), (1000, 0)]);
        assert_eq!(report.failed_moves, 0);
        assert_eq!(report.failed_photos, 2);
        // origin + 2 x (move + photo)
        assert_eq!(bus.published().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_aborts_on_protocol_violation() {
        let tracker = Arc::new(CorrelationTracker::new());
        let bus = Arc::new(LoopbackBus::always(
            ReplyRouter::new("d", tracker.clone()),
            "rpc_weird",
        ));
        let client =
            FarmbotClient::with_transport(bus.clone(), tracker, "d", ExecutorConfig::default());

        assert!(run_sweep(&client, &SweepPlan::default()).await.is_err());
        assert_eq!(bus.published().await.len(), 1);
    }
}
