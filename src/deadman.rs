// Operator-intent state and the fixed-rate command tick.
//
// The controller is owned by the teleop loop: the input-capture path
// mutates the hold set, the tick reads it. Nothing else touches this
// state. While moving, every tick publishes; on the moving-to-idle
// transition exactly one explicit stop goes out; idle periods are silent.

use std::collections::HashSet;

use crate::messages::MotorCommand;

/// Velocities below this are treated as zero.
const VEL_EPSILON: f64 = 1e-9;

/// One directional hold. Each adds or subtracts one step of velocity on
/// one side of the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hold {
    LeftForward,
    LeftReverse,
    RightForward,
    RightReverse,
}

/// Outcome of one publish tick.
#[derive(Debug)]
pub enum Tick {
    /// Holds are active; publish this command.
    Command(MotorCommand),
    /// All holds just released; publish this single stop.
    Stop(MotorCommand),
    /// Already idle; publish nothing.
    Idle,
}

pub struct DeadmanController {
    holds: HashSet<Hold>,
    seq: u64,
    step: f64,
    deadman_ms: u32,
    unit: String,
    moving: bool,
}

impl DeadmanController {
    pub fn new(step: f64, deadman_ms: u32, unit: &str) -> Self {
        Self {
            holds: HashSet::new(),
            seq: 0,
            step,
            deadman_ms,
            unit: unit.to_string(),
            moving: false,
        }
    }

    pub fn press(&mut self, hold: Hold) {
        self.holds.insert(hold);
    }

    /// Returns true when this release left no active holds.
    pub fn release(&mut self, hold: Hold) -> bool {
        self.holds.remove(&hold);
        self.holds.is_empty()
    }

    /// Drops every active hold. Returns true if any were held.
    pub fn clear_holds(&mut self) -> bool {
        let had_holds = !self.holds.is_empty();
        self.holds.clear();
        had_holds
    }

    pub fn has_holds(&self) -> bool {
        !self.holds.is_empty()
    }

    /// Left/right velocity implied by the current holds.
    fn desired(&self) -> (f64, f64) {
        let mut v_l = 0.0;
        let mut v_r = 0.0;
        if self.holds.contains(&Hold::LeftForward) {
            v_l += self.step;
        }
        if self.holds.contains(&Hold::LeftReverse) {
            v_l -= self.step;
        }
        if self.holds.contains(&Hold::RightForward) {
            v_r += self.step;
        }
        if self.holds.contains(&Hold::RightReverse) {
            v_r -= self.step;
        }
        (v_l, v_r)
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// One fixed-rate publish tick.
    pub fn tick(&mut self) -> Tick {
        let (v_l, v_r) = self.desired();
        if v_l.abs() <= VEL_EPSILON && v_r.abs() <= VEL_EPSILON {
            if self.moving {
                self.moving = false;
                return Tick::Stop(self.stop_command());
            }
            return Tick::Idle;
        }
        self.moving = true;
        let seq = self.next_seq();
        Tick::Command(MotorCommand::new(v_l, v_r, &self.unit, self.deadman_ms, seq))
    }

    /// Fresh zero-velocity command with its own seq and timestamp, for
    /// stop bursts and the idle transition.
    pub fn stop_command(&mut self) -> MotorCommand {
        let seq = self.next_seq();
        MotorCommand::stop(&self.unit, self.deadman_ms, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> DeadmanController {
        DeadmanController::new(0.10, 300, "mps")
    }

    #[test]
    fn test_held_key_publishes_every_tick() {
        let mut ctl = controller();
        ctl.press(Hold::LeftForward);

        for _ in 0..3 {
            match ctl.tick() {
                Tick::Command(cmd) => {
                    assert!((cmd.v_l - 0.10).abs() < 1e-12);
                    assert_eq!(cmd.v_r, 0.0);
                    assert_eq!(cmd.deadman_ms, 300);
                }
                other => panic!("expected command while held, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_release_emits_exactly_one_stop_then_silence() {
        let mut ctl = controller();
        ctl.press(Hold::LeftForward);
        assert!(matches!(ctl.tick(), Tick::Command(_)));

        assert!(ctl.release(Hold::LeftForward));
        match ctl.tick() {
            Tick::Stop(cmd) => assert!(cmd.is_stop()),
            other => panic!("expected single stop, got {:?}", other),
        }
        for _ in 0..5 {
            assert!(matches!(ctl.tick(), Tick::Idle));
        }
    }

    #[test]
    fn test_idle_from_start_is_silent() {
        let mut ctl = controller();
        assert!(matches!(ctl.tick(), Tick::Idle));
        assert!(matches!(ctl.tick(), Tick::Idle));
    }

    #[test]
    fn test_opposite_holds_cancel_to_idle() {
        let mut ctl = controller();
        ctl.press(Hold::LeftForward);
        assert!(matches!(ctl.tick(), Tick::Command(_)));

        // opposing hold cancels the side exactly; counts as idle
        ctl.press(Hold::LeftReverse);
        assert!(matches!(ctl.tick(), Tick::Stop(_)));
        assert!(matches!(ctl.tick(), Tick::Idle));
    }

    #[test]
    fn test_both_sides_combine() {
        let mut ctl = controller();
        ctl.press(Hold::LeftForward);
        ctl.press(Hold::RightReverse);
        match ctl.tick() {
            Tick::Command(cmd) => {
                assert!((cmd.v_l - 0.10).abs() < 1e-12);
                assert!((cmd.v_r + 0.10).abs() < 1e-12);
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_seq_increases_across_ticks_and_stops() {
        let mut ctl = controller();
        ctl.press(Hold::RightForward);

        let mut last = None;
        for _ in 0..4 {
            if let Tick::Command(cmd) = ctl.tick() {
                if let Some(prev) = last {
                    assert!(cmd.seq > prev, "seq must increase within a session");
                }
                last = Some(cmd.seq);
            }
        }
        ctl.release(Hold::RightForward);
        if let Tick::Stop(cmd) = ctl.tick() {
            assert!(cmd.seq > last.unwrap());
        } else {
            panic!("expected stop");
        }
    }

    #[test]
    fn test_clear_holds_reports_whether_any_were_held() {
        let mut ctl = controller();
        assert!(!ctl.clear_holds());
        ctl.press(Hold::LeftReverse);
        assert!(ctl.clear_holds());
        assert!(!ctl.has_holds());
    }

    #[test]
    fn test_stop_command_mints_fresh_seq() {
        let mut ctl = controller();
        let a = ctl.stop_command();
        let b = ctl.stop_command();
        assert!(a.is_stop() && b.is_stop());
        assert_eq!(b.seq, a.seq + 1);
    }
}
