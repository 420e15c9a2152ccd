// Topic namespace for dmc_robo robots.
//
// Every channel is `dmc_robo/<robot_id>/<suffix>`. The robot id is user
// input and must not be able to escape its own namespace.

use thiserror::Error;

/// Constant namespace prefix shared by all robots.
pub const NAMESPACE: &str = "dmc_robo";

/// Separator used to build hierarchical topic keys.
pub const SEPARATOR: char = '/';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("robot_id must be non-empty and must not contain '{SEPARATOR}'")]
    InvalidRobotId,
}

/// Logical channels under one robot's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicSuffix {
    MotorCmd,
    OledCmd,
    ImuState,
    CameraMeta,
    CameraJpeg,
}

impl TopicSuffix {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicSuffix::MotorCmd => "motor/cmd",
            TopicSuffix::OledCmd => "oled/cmd",
            TopicSuffix::ImuState => "imu/state",
            TopicSuffix::CameraMeta => "camera/meta",
            TopicSuffix::CameraJpeg => "camera/image/jpeg",
        }
    }
}

/// Reject identities that are empty or would inject into another robot's
/// namespace.
pub fn validate_robot_id(robot_id: &str) -> Result<(), TopicError> {
    if robot_id.is_empty() || robot_id.contains(SEPARATOR) {
        return Err(TopicError::InvalidRobotId);
    }
    Ok(())
}

/// Compose the full topic key for one robot and one channel.
pub fn topic_key(robot_id: &str, suffix: TopicSuffix) -> Result<String, TopicError> {
    validate_robot_id(robot_id)?;
    Ok(format!("{NAMESPACE}/{robot_id}/{}", suffix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composes_with_namespace_prefix() {
        let key = topic_key("rasp-zero-01", TopicSuffix::MotorCmd).unwrap();
        assert_eq!(key, "dmc_robo/rasp-zero-01/motor/cmd");
        assert!(key.starts_with(NAMESPACE));
    }

    #[test]
    fn test_all_suffixes() {
        for (suffix, expected) in [
            (TopicSuffix::MotorCmd, "dmc_robo/r1/motor/cmd"),
            (TopicSuffix::OledCmd, "dmc_robo/r1/oled/cmd"),
            (TopicSuffix::ImuState, "dmc_robo/r1/imu/state"),
            (TopicSuffix::CameraMeta, "dmc_robo/r1/camera/meta"),
            (TopicSuffix::CameraJpeg, "dmc_robo/r1/camera/image/jpeg"),
        ] {
            assert_eq!(topic_key("r1", suffix).unwrap(), expected);
        }
    }

    #[test]
    fn test_distinct_ids_give_distinct_keys() {
        let a = topic_key("robot-a", TopicSuffix::MotorCmd).unwrap();
        let b = topic_key("robot-b", TopicSuffix::MotorCmd).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_id_rejected() {
        assert_eq!(
            topic_key("", TopicSuffix::MotorCmd),
            Err(TopicError::InvalidRobotId)
        );
    }

    #[test]
    fn test_separator_in_id_rejected() {
        // "a/b" would publish into robot "a"'s namespace
        assert_eq!(
            topic_key("a/b", TopicSuffix::MotorCmd),
            Err(TopicError::InvalidRobotId)
        );
    }
}
