// Serial controller front-end: dual-channel duty-cycle lines aggregated
// into velocity commands at a fixed publish cadence.
//
// A single loop alternates between a short-timeout read and a monotonic
// clock check, so publishing is decoupled from line arrival. Absence of
// samples in a window publishes an explicit zero rather than repeating
// the last value; a stalled input source must not keep the robot moving.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::{BURST_SERIAL_SHUTDOWN, SERIAL_READ_TIMEOUT, SerialArgs, SerialConfig};
use crate::error::BridgeError;
use crate::link::{self, RobotLink};
use crate::messages::MotorCommand;

/// One parsed controller sample, clamped to the configured raw range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSample {
    pub left: i32,
    pub right: i32,
}

impl SerialSample {
    pub fn clamped(left: i64, right: i64, raw_max: i32) -> Self {
        let lo = -i64::from(raw_max);
        let hi = i64::from(raw_max);
        Self {
            left: left.clamp(lo, hi) as i32,
            right: right.clamp(lo, hi) as i32,
        }
    }
}

/// Parse one `L: <int> , R: <int>` line, whitespace-tolerant. Anything
/// else is line noise and yields None.
pub fn parse_line(line: &str) -> Option<(i64, i64)> {
    let rest = line.trim().strip_prefix("L:")?;
    let (left, rest) = rest.split_once(',')?;
    let right = rest.trim_start().strip_prefix("R:")?;
    Some((left.trim().parse().ok()?, right.trim().parse().ok()?))
}

/// Running sums between two publish ticks.
#[derive(Debug, Default)]
pub struct AggregationWindow {
    sum_l: f64,
    sum_r: f64,
    count: u32,
}

impl AggregationWindow {
    pub fn push(&mut self, sample: SerialSample) {
        self.sum_l += f64::from(sample.left);
        self.sum_r += f64::from(sample.right);
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Mean over the window, `(0.0, 0.0)` when no samples arrived.
    /// Consumes the window: sums and count reset.
    pub fn take_mean(&mut self) -> (f64, f64) {
        let mean = if self.count > 0 {
            let n = f64::from(self.count);
            (self.sum_l / n, self.sum_r / n)
        } else {
            (0.0, 0.0)
        };
        *self = Self::default();
        mean
    }
}

/// Window state plus the raw-to-velocity scaling into published commands.
pub struct Aggregator {
    window: AggregationWindow,
    raw_max: i32,
    max_mps: f64,
    unit: String,
    deadman_ms: u32,
    seq: u64,
}

impl Aggregator {
    pub fn new(cfg: &SerialConfig) -> Self {
        Self {
            window: AggregationWindow::default(),
            raw_max: cfg.raw_max,
            max_mps: cfg.max_mps,
            unit: cfg.unit.clone(),
            deadman_ms: cfg.deadman_ms,
            seq: 0,
        }
    }

    /// Fold one serial line into the current window. Returns false when
    /// the line was noise.
    pub fn ingest_line(&mut self, line: &str) -> bool {
        let Some((left, right)) = parse_line(line) else {
            return false;
        };
        let sample = SerialSample::clamped(left, right, self.raw_max);
        trace!(left = sample.left, right = sample.right, "serial sample");
        self.window.push(sample);
        true
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Consume the current window into one publish-tick command.
    pub fn flush(&mut self) -> MotorCommand {
        let limit = f64::from(self.raw_max);
        let (mean_l, mean_r) = self.window.take_mean();
        let mean_l = mean_l.clamp(-limit, limit);
        let mean_r = mean_r.clamp(-limit, limit);
        let v_l = mean_l / limit * self.max_mps;
        let v_r = mean_r / limit * self.max_mps;
        let seq = self.next_seq();
        MotorCommand::new(v_l, v_r, &self.unit, self.deadman_ms, seq)
    }

    pub fn stop_command(&mut self) -> MotorCommand {
        let seq = self.next_seq();
        MotorCommand::stop(&self.unit, self.deadman_ms, seq)
    }
}

/// What one short-timeout poll of the stream produced.
#[derive(Debug)]
pub enum SerialEvent {
    Line(String),
    Idle,
    Closed,
}

/// Line assembly over a reader with short read timeouts. Timeouts map to
/// `Idle`, a zero-length read means the stream closed.
pub struct LineReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Pull at most one complete line.
    pub fn poll(&mut self) -> io::Result<SerialEvent> {
        if let Some(line) = self.take_line() {
            return Ok(SerialEvent::Line(line));
        }
        let mut chunk = [0u8; 256];
        match self.inner.read(&mut chunk) {
            Ok(0) => Ok(SerialEvent::Closed),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(match self.take_line() {
                    Some(line) => SerialEvent::Line(line),
                    None => SerialEvent::Idle,
                })
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok(SerialEvent::Idle)
            }
            Err(e) => Err(e),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&raw[..pos]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Advance a publish schedule past `now` by whole intervals, so a stalled
/// loop catches up without emitting a burst of make-up publishes.
pub fn advance_schedule(mut next: Instant, now: Instant, interval: Duration) -> Instant {
    while next <= now {
        next += interval;
    }
    next
}

pub async fn run(args: SerialArgs) -> Result<(), BridgeError> {
    let cfg = SerialConfig::from_args(args)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    let zenoh_config = link::build_config(&cfg.zenoh)?;
    let robot_link = RobotLink::connect(zenoh_config, &cfg.robot_id).await?;
    let mut aggregator = Aggregator::new(&cfg);

    let result = match serialport::new(cfg.serial_port.as_str(), cfg.baud)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()
    {
        Ok(port) => {
            info!(
                port = %cfg.serial_port,
                baud = cfg.baud,
                hz = cfg.publish_hz,
                "serial bridge running"
            );
            pump(
                &robot_link,
                &cfg,
                &mut aggregator,
                LineReader::new(port),
                &shutdown,
            )
            .await;
            Ok(())
        }
        Err(e) => Err(BridgeError::from(e)),
    };

    // Best-effort teardown whatever happened above: burst first, then
    // release the session even if the burst already hit a dead transport.
    let sent = link::send_stop_burst(
        &robot_link,
        || aggregator.stop_command(),
        BURST_SERIAL_SHUTDOWN,
    )
    .await;
    debug!(sent, "shutdown stop burst");
    robot_link.close().await;

    result
}

async fn pump<R: Read>(
    robot_link: &RobotLink,
    cfg: &SerialConfig,
    aggregator: &mut Aggregator,
    mut reader: LineReader<R>,
    shutdown: &AtomicBool,
) {
    let interval = Duration::from_secs_f64(1.0 / cfg.publish_hz);
    let mut next_pub = Instant::now() + interval;

    while !shutdown.load(Ordering::SeqCst) {
        match reader.poll() {
            Ok(SerialEvent::Line(line)) => {
                if !aggregator.ingest_line(&line) {
                    trace!(line, "discarded serial noise");
                }
            }
            Ok(SerialEvent::Idle) => {}
            Ok(SerialEvent::Closed) => {
                warn!("serial stream closed");
                break;
            }
            Err(e) => {
                warn!("serial read failed: {e}");
                break;
            }
        }

        let now = Instant::now();
        if now < next_pub {
            continue;
        }

        let cmd = aggregator.flush();
        debug!(v_l = cmd.v_l, v_r = cmd.v_r, seq = cmd.seq, "publish motor command");
        if let Err(e) = robot_link.publish_motor(&cmd).await {
            warn!("motor publish failed, window dropped: {e}");
        }
        next_pub = advance_schedule(next_pub, now, interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_config() -> SerialConfig {
        use crate::config::ZenohOpts;
        SerialConfig {
            robot_id: "r1".to_string(),
            zenoh: ZenohOpts {
                config: None,
                mode: "peer".to_string(),
                connect: Vec::new(),
            },
            serial_port: "/dev/null".to_string(),
            baud: 115_200,
            raw_max: 2000,
            max_mps: 0.5,
            deadman_ms: 300,
            publish_hz: 10.0,
            unit: "mps".to_string(),
        }
    }

    #[test]
    fn test_parse_line_accepts_grammar() {
        assert_eq!(parse_line("L: 100, R: -100"), Some((100, -100)));
        assert_eq!(parse_line("L:0,R:0"), Some((0, 0)));
        assert_eq!(parse_line("  L:  -42 ,  R:  7  "), Some((-42, 7)));
    }

    #[test]
    fn test_parse_line_rejects_noise() {
        assert_eq!(parse_line("L:abc,R:5"), None);
        assert_eq!(parse_line("R: 1, L: 2"), None);
        assert_eq!(parse_line("L: 1"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("boot: controller v2.1"), None);
    }

    #[test]
    fn test_sample_clamps_to_raw_range() {
        let sample = SerialSample::clamped(5000, -5000, 2000);
        assert_eq!(sample.left, 2000);
        assert_eq!(sample.right, -2000);

        let sample = SerialSample::clamped(150, -20, 2000);
        assert_eq!(sample.left, 150);
        assert_eq!(sample.right, -20);
    }

    #[test]
    fn test_window_mean_and_reset() {
        let mut window = AggregationWindow::default();
        window.push(SerialSample { left: 100, right: -100 });
        window.push(SerialSample { left: 300, right: -300 });
        assert_eq!(window.count(), 2);
        assert_eq!(window.take_mean(), (200.0, -200.0));

        // consumed: the next window starts empty
        assert_eq!(window.count(), 0);
        assert_eq!(window.take_mean(), (0.0, 0.0));
    }

    #[test]
    fn test_flush_scales_window_mean() {
        let mut aggregator = Aggregator::new(&test_config());
        assert!(aggregator.ingest_line("L: 100, R: -100"));
        assert!(aggregator.ingest_line("L: 300, R: -300"));

        let cmd = aggregator.flush();
        assert!((cmd.v_l - 0.05).abs() < 1e-12);
        assert!((cmd.v_r + 0.05).abs() < 1e-12);
        assert_eq!(cmd.unit, "mps");
        assert_eq!(cmd.deadman_ms, 300);
    }

    #[test]
    fn test_empty_window_publishes_zero_not_last_value() {
        let mut aggregator = Aggregator::new(&test_config());
        aggregator.ingest_line("L: 2000, R: 2000");
        let moving = aggregator.flush();
        assert!(moving.v_l > 0.0);

        let idle = aggregator.flush();
        assert_eq!(idle.v_l, 0.0);
        assert_eq!(idle.v_r, 0.0);
    }

    #[test]
    fn test_noise_does_not_touch_the_window() {
        let mut aggregator = Aggregator::new(&test_config());
        assert!(aggregator.ingest_line("L: 100, R: 100"));
        assert!(!aggregator.ingest_line("L:abc,R:5"));
        assert_eq!(aggregator.window.count(), 1);

        let cmd = aggregator.flush();
        assert!((cmd.v_l - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_samples_clamp_before_averaging() {
        let mut aggregator = Aggregator::new(&test_config());
        aggregator.ingest_line("L: 5000, R: 5000");
        let cmd = aggregator.flush();
        assert!((cmd.v_l - 0.5).abs() < 1e-12, "5000 clamps to raw_max 2000");
    }

    #[test]
    fn test_flush_seq_increases() {
        let mut aggregator = Aggregator::new(&test_config());
        let a = aggregator.flush();
        let b = aggregator.flush();
        let stop = aggregator.stop_command();
        assert_eq!(b.seq, a.seq + 1);
        assert_eq!(stop.seq, b.seq + 1);
    }

    #[test]
    fn test_line_reader_splits_and_trims() {
        let mut reader = LineReader::new(Cursor::new(b"L: 1, R: 2\r\nnoise\nL: 3".to_vec()));
        assert!(matches!(reader.poll().unwrap(), SerialEvent::Line(l) if l == "L: 1, R: 2"));
        assert!(matches!(reader.poll().unwrap(), SerialEvent::Line(l) if l == "noise"));
        // trailing partial line is held until the stream ends
        assert!(matches!(reader.poll().unwrap(), SerialEvent::Closed));
    }

    #[test]
    fn test_advance_schedule_skips_missed_intervals() {
        let interval = Duration::from_millis(100);
        let start = Instant::now();
        let next = start + interval;

        // loop stalled for 3.5 intervals: schedule lands on the next
        // whole boundary, no make-up publishes
        let now = start + Duration::from_millis(350);
        let advanced = advance_schedule(next, now, interval);
        assert_eq!(advanced, start + Duration::from_millis(400));

        // on-time tick advances by exactly one interval
        let advanced = advance_schedule(next, next, interval);
        assert_eq!(advanced, next + interval);
    }
}
