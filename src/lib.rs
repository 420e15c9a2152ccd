// Command-and-telemetry bridge between an operator input source and a
// dmc_robo robot over zenoh.
//
// Two front-ends publish onto the same motor/cmd topic shape: keyboard
// teleop (deadman controller) and the serial sample aggregator. Telemetry
// flows back over imu/state and the camera topics.

pub mod config;
pub mod deadman;
pub mod error;
pub mod link;
pub mod messages;
pub mod serial;
pub mod telemetry;
pub mod teleop;
pub mod topic;
