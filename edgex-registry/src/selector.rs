//! Selector configuration: which event source feeds which output slots.

use std::fmt;
use std::str::FromStr;

use edgex_bus::DeviceName;

use crate::error::{RegistryError, Result};

/// Maps an event source name to the first output slot its readings fill.
///
/// Parsed from `"<sourceLabel>:<basePosition>"`. The position is taken from
/// the text after the last `:` so labels may themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    /// Event `sourceName` this selector matches
    pub label: String,
    /// Output slot receiving the first reading
    pub base: usize,
}

impl Selector {
    /// Create a selector from its parts.
    pub fn new(label: impl Into<String>, base: usize) -> Self {
        Self {
            label: label.into(),
            base,
        }
    }

    /// Parse a list of selector strings, failing on the first invalid entry.
    pub fn parse_all<S: AsRef<str>>(items: &[S]) -> Result<Vec<Selector>> {
        items.iter().map(|s| s.as_ref().parse()).collect()
    }
}

impl FromStr for Selector {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let (label, position) = s
            .rsplit_once(':')
            .ok_or_else(|| RegistryError::InvalidSelector(s.to_string()))?;

        if label.is_empty() {
            return Err(RegistryError::InvalidSelector(s.to_string()));
        }

        let base = position
            .trim()
            .parse::<usize>()
            .map_err(|_| RegistryError::InvalidSelector(s.to_string()))?;

        Ok(Self::new(label, base))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.base)
    }
}

/// Everything the registry needs to bind one consumer to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Device whose events are wanted
    pub device: DeviceName,
    /// Ordered selectors; the first one matching an event's source wins
    pub selectors: Vec<Selector>,
    /// Length of every delivered output array
    pub arity: usize,
}

impl SubscriptionRequest {
    /// Create a request from already parsed selectors.
    pub fn new(device: impl Into<DeviceName>, selectors: Vec<Selector>, arity: usize) -> Self {
        Self {
            device: device.into(),
            selectors,
            arity,
        }
    }

    /// Create a request from selector strings as found in configuration.
    pub fn parse<S: AsRef<str>>(
        device: impl Into<DeviceName>,
        selectors: &[S],
        arity: usize,
    ) -> Result<Self> {
        Ok(Self::new(device, Selector::parse_all(selectors)?, arity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("voltage:2", "voltage", 2)]
    #[case("Int16:0", "Int16", 0)]
    #[case("urn:edgex:temp:3", "urn:edgex:temp", 3)]
    #[case("current: 1", "current", 1)]
    fn test_parse_selector(#[case] input: &str, #[case] label: &str, #[case] base: usize) {
        assert_eq!(input.parse::<Selector>().unwrap(), Selector::new(label, base));
    }

    #[rstest]
    #[case("voltage")]
    #[case("voltage:")]
    #[case("voltage:-1")]
    #[case(":3")]
    #[case("voltage:two")]
    fn test_reject_invalid_selector(#[case] input: &str) {
        assert_eq!(
            input.parse::<Selector>().unwrap_err(),
            RegistryError::InvalidSelector(input.to_string())
        );
    }

    #[test]
    fn test_request_parse_keeps_order() {
        let request =
            SubscriptionRequest::parse("pump-1", &["current:0", "voltage:2"], 4).unwrap();
        assert_eq!(request.device, DeviceName::from("pump-1"));
        assert_eq!(
            request.selectors,
            vec![Selector::new("current", 0), Selector::new("voltage", 2)]
        );
        assert_eq!(request.arity, 4);
    }

    #[test]
    fn test_selector_display_round_trip() {
        let selector = Selector::new("voltage", 2);
        assert_eq!(selector.to_string(), "voltage:2");
    }
}
