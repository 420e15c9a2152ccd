// Keyboard teleop front-end: directional holds drive the deadman
// controller, telemetry comes back through the log surface.
//
// Keys: r/f left forward/reverse, u/j right forward/reverse, space stop
// burst, o resend the OLED banner, [ ] publish rate down/up, q or Esc
// quit. Terminals without key-release reporting fall back to expiring
// holds when their key repeat stops arriving.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{
    BURST_RELEASE, BURST_TELEOP_SHUTDOWN, HOLD_TIMEOUT, KEY_POLL_TIMEOUT, TeleopArgs, TeleopConfig,
};
use crate::deadman::{DeadmanController, Hold, Tick};
use crate::error::BridgeError;
use crate::link::{self, RobotLink};
use crate::messages;
use crate::serial::advance_schedule;
use crate::telemetry;

/// Gyro readout cadence on the log surface.
const GYRO_REPORT_EVERY: Duration = Duration::from_secs(1);

pub async fn run(args: TeleopArgs) -> Result<(), BridgeError> {
    let cfg = TeleopConfig::from_args(args)?;
    let zenoh_config = link::build_config(&cfg.zenoh)?;
    let mut robot_link = RobotLink::connect(zenoh_config, &cfg.robot_id).await?;
    robot_link.open_telemetry(&cfg.robot_id).await?;

    if let Err(e) = robot_link.publish_oled(&cfg.banner).await {
        warn!("oled publish failed: {e}");
    }

    let mut ctl = DeadmanController::new(cfg.step, cfg.deadman_ms, "mps");

    let result = session(&robot_link, &mut ctl, &cfg).await;

    // Shutdown stop burst runs on every exit path, then the ordered close.
    let sent = link::send_stop_burst(&robot_link, || ctl.stop_command(), BURST_TELEOP_SHUTDOWN).await;
    debug!(sent, "shutdown stop burst");
    robot_link.close().await;
    result
}

/// Raw-mode bracket around the drive loop: whatever happens inside, the
/// terminal is restored before the shutdown burst logs to it.
async fn session(
    robot_link: &RobotLink,
    ctl: &mut DeadmanController,
    cfg: &TeleopConfig,
) -> Result<(), BridgeError> {
    let release_events = supports_keyboard_enhancement().unwrap_or(false);
    enable_raw_mode()?;

    let result = match terminal_setup(release_events) {
        Ok(()) => {
            if !release_events {
                info!(
                    "terminal lacks key release reporting, holds expire after {:?}",
                    HOLD_TIMEOUT
                );
            }
            info!("teleop ready: r/f left, u/j right, space stop, [ ] rate, q quit");
            drive(robot_link, ctl, cfg, release_events).await
        }
        Err(e) => Err(e.into()),
    };

    terminal_restore(release_events);
    let _ = disable_raw_mode();
    result
}

fn terminal_setup(release_events: bool) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(stdout, EnableFocusChange)?;
    if release_events {
        execute!(
            stdout,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
        )?;
    }
    Ok(())
}

fn terminal_restore(release_events: bool) {
    let mut stdout = io::stdout();
    if release_events {
        let _ = execute!(stdout, PopKeyboardEnhancementFlags);
    }
    let _ = execute!(stdout, DisableFocusChange);
    let _ = stdout.flush();
}

enum KeyAction {
    Continue,
    Quit,
    Reschedule,
}

async fn drive(
    robot_link: &RobotLink,
    ctl: &mut DeadmanController,
    cfg: &TeleopConfig,
    release_events: bool,
) -> Result<(), BridgeError> {
    let mut hz = cfg.publish_hz;
    let mut interval = Duration::from_secs_f64(1.0 / hz);
    let mut next_tick = Instant::now() + interval;
    let mut view = TelemetryView::new(cfg.gyro_path.clone());
    let mut last_key_activity = Instant::now();

    loop {
        if event::poll(KEY_POLL_TIMEOUT)? {
            match event::read()? {
                Event::Key(key) => {
                    last_key_activity = Instant::now();
                    match handle_key(robot_link, ctl, cfg, key, &mut hz).await {
                        KeyAction::Continue => {}
                        KeyAction::Quit => return Ok(()),
                        KeyAction::Reschedule => {
                            interval = Duration::from_secs_f64(1.0 / hz);
                            next_tick = Instant::now() + interval;
                            info!(hz, "publish rate changed");
                        }
                    }
                }
                Event::FocusLost => {
                    if ctl.clear_holds() {
                        info!("focus lost, stopping");
                        link::send_stop_burst(robot_link, || ctl.stop_command(), BURST_RELEASE)
                            .await;
                    }
                }
                _ => {}
            }
        }

        // Fallback release detection: a hold dies when its key repeat
        // stops arriving.
        if !release_events && ctl.has_holds() && last_key_activity.elapsed() > HOLD_TIMEOUT {
            ctl.clear_holds();
            link::send_stop_burst(robot_link, || ctl.stop_command(), BURST_RELEASE).await;
        }

        drain_telemetry(robot_link, &mut view);

        let now = Instant::now();
        if now >= next_tick {
            match ctl.tick() {
                Tick::Command(cmd) => {
                    debug!(v_l = cmd.v_l, v_r = cmd.v_r, seq = cmd.seq, "motor command");
                    if let Err(e) = robot_link.publish_motor(&cmd).await {
                        warn!("motor publish failed: {e}");
                    }
                }
                Tick::Stop(cmd) => {
                    info!("holds released, idle");
                    if let Err(e) = robot_link.publish_motor(&cmd).await {
                        warn!("stop publish failed: {e}");
                    }
                }
                Tick::Idle => {}
            }
            next_tick = advance_schedule(next_tick, now, interval);
        }
    }
}

async fn handle_key(
    robot_link: &RobotLink,
    ctl: &mut DeadmanController,
    cfg: &TeleopConfig,
    key: KeyEvent,
    hz: &mut f64,
) -> KeyAction {
    // repeats only refresh hold liveness, handled by the caller
    if key.kind == KeyEventKind::Repeat {
        return KeyAction::Continue;
    }
    let pressed = key.kind == KeyEventKind::Press;

    if pressed && key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return KeyAction::Quit;
    }

    let hold = match key.code {
        KeyCode::Char('r') => Some(Hold::LeftForward),
        KeyCode::Char('f') => Some(Hold::LeftReverse),
        KeyCode::Char('u') => Some(Hold::RightForward),
        KeyCode::Char('j') => Some(Hold::RightReverse),
        _ => None,
    };
    if let Some(hold) = hold {
        if pressed {
            ctl.press(hold);
        } else if ctl.release(hold) {
            link::send_stop_burst(robot_link, || ctl.stop_command(), BURST_RELEASE).await;
        }
        return KeyAction::Continue;
    }

    if !pressed {
        return KeyAction::Continue;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char(' ') => {
            info!("operator stop");
            ctl.clear_holds();
            link::send_stop_burst(robot_link, || ctl.stop_command(), BURST_TELEOP_SHUTDOWN).await;
            KeyAction::Continue
        }
        KeyCode::Char('o') => {
            if let Err(e) = robot_link.publish_oled(&cfg.banner).await {
                warn!("oled publish failed: {e}");
            }
            KeyAction::Continue
        }
        KeyCode::Char('[') => {
            *hz = (*hz - 1.0).max(1.0);
            KeyAction::Reschedule
        }
        KeyCode::Char(']') => {
            *hz = (*hz + 1.0).min(60.0);
            KeyAction::Reschedule
        }
        _ => KeyAction::Continue,
    }
}

/// Telemetry shaping for the log surface: locates the gyro vector in each
/// IMU payload and throttles the readout.
struct TelemetryView {
    gyro_path: Option<String>,
    detected: Option<String>,
    last_report: Option<Instant>,
}

impl TelemetryView {
    fn new(gyro_path: Option<String>) -> Self {
        Self {
            gyro_path,
            detected: None,
            last_report: None,
        }
    }

    fn on_imu(&mut self, payload: &Value) {
        let located = match &self.gyro_path {
            Some(path) => telemetry::extract_vec3(payload, path).map(|v| (path.clone(), v)),
            None => telemetry::autodetect_vec3(payload),
        };
        let Some((path, (x, y, z))) = located else {
            debug!("no gyro vector in imu payload");
            return;
        };

        if self.detected.as_deref() != Some(path.as_str()) {
            info!(%path, "gyro vector located");
            self.detected = Some(path);
        }
        let due = self
            .last_report
            .is_none_or(|t| t.elapsed() >= GYRO_REPORT_EVERY);
        if due {
            info!("gyro x={x:+.4} y={y:+.4} z={z:+.4}");
            self.last_report = Some(Instant::now());
        }
    }
}

fn drain_telemetry(robot_link: &RobotLink, view: &mut TelemetryView) {
    while let Some(sample) = robot_link.try_recv_imu() {
        match messages::decode_value(&sample.payload().to_bytes()) {
            Ok(payload) => view.on_imu(&payload),
            Err(e) => warn!("imu decode failed: {e}"),
        }
    }
    while let Some(sample) = robot_link.try_recv_camera_meta() {
        // camera meta is diagnostic only; bad payloads are dropped quietly
        if let Ok(meta) = messages::decode_value(&sample.payload().to_bytes()) {
            debug!(%meta, "camera meta");
        }
    }
    while let Some(sample) = robot_link.try_recv_camera_jpeg() {
        debug!(bytes = sample.payload().len(), "camera frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_view_prefers_explicit_path() {
        let mut view = TelemetryView::new(Some("imu.angular_velocity".to_string()));
        view.on_imu(&json!({"imu": {"angular_velocity": [0.1, 0.2, 0.3]}, "gyro": {"x": 9, "y": 9, "z": 9}}));
        assert_eq!(view.detected.as_deref(), Some("imu.angular_velocity"));
    }

    #[test]
    fn test_view_autodetects_and_remembers_path() {
        let mut view = TelemetryView::new(None);
        view.on_imu(&json!({"gyro": {"x": 1, "y": 2, "z": 3}}));
        assert_eq!(view.detected.as_deref(), Some("gyro"));
    }

    #[test]
    fn test_view_survives_vectorless_payloads() {
        let mut view = TelemetryView::new(None);
        view.on_imu(&json!({"temp_c": 31.5}));
        assert_eq!(view.detected, None);
    }
}
