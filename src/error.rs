// Top-level error taxonomy. Configuration problems are fatal at startup;
// transport and decode failures in the steady state are handled at the
// call site and never unwind the front-end loops.

use thiserror::Error;

use crate::config::ConfigError;
use crate::link::LinkError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
