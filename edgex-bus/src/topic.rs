//! EdgeX event topic layout.
//!
//! Device events are published on
//! `edgex/events/device/<service>/<profile>/<device>/<source>`. The bridge
//! subscribes per device with wildcards in every other position.

use crate::types::DeviceName;

/// Root of every device event topic.
pub const EVENTS_ROOT: &str = "edgex/events/device";

/// Path segment holding the device name.
pub const DEVICE_SEGMENT: usize = 5;

/// Build the subscription filter for a device.
pub fn device_topic(device: &DeviceName) -> String {
    format!("{EVENTS_ROOT}/+/+/{}/#", device.as_str())
}

/// Extract the device name from a concrete event topic.
pub fn device_from_topic(topic: &str) -> Option<DeviceName> {
    topic
        .split('/')
        .nth(DEVICE_SEGMENT)
        .filter(|segment| !segment.is_empty())
        .map(DeviceName::from)
}

/// Check a concrete topic against an MQTT-style filter.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level and
/// everything below it.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_device_topic() {
        assert_eq!(
            device_topic(&DeviceName::from("pump-1")),
            "edgex/events/device/+/+/pump-1/#"
        );
    }

    #[test]
    fn test_device_from_topic() {
        let topic = "edgex/events/device/device-modbus/pump-profile/pump-1/Voltage";
        assert_eq!(device_from_topic(topic), Some(DeviceName::from("pump-1")));
        assert_eq!(device_from_topic("edgex/events/device"), None);
        assert_eq!(device_from_topic("edgex/events/device/a/b//c"), None);
    }

    #[rstest]
    #[case("edgex/events/device/+/+/pump-1/#", "edgex/events/device/svc/prof/pump-1/Voltage", true)]
    #[case("edgex/events/device/+/+/pump-1/#", "edgex/events/device/svc/prof/pump-1", true)]
    #[case("edgex/events/device/+/+/pump-1/#", "edgex/events/device/svc/prof/pump-2/Voltage", false)]
    #[case("edgex/events/device/+/+/pump-1/#", "edgex/events/device/svc/pump-1/Voltage", false)]
    #[case("a/+/c", "a/b/c", true)]
    #[case("a/+/c", "a/b/c/d", false)]
    #[case("#", "anything/at/all", true)]
    fn test_topic_matches(#[case] filter: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(topic_matches(filter, topic), expected);
    }
}
