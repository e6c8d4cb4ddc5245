//! Compute device selection.
//!
//! The device is an explicit value handed to the engine and to matting
//! backends at construction. Nothing in the library consults process-global
//! state to pick one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Mps,
    Cuda(u32),
}

impl Device {
    pub fn is_cpu(self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Mps => f.write_str("mps"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for Device {
    type Err = DataError;

    /// Accepts `cpu`, `mps`, `cuda`, `cuda:N`, or a bare GPU index `N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        let parse_index = |raw: &str| {
            raw.parse::<u32>()
                .map_err(|_| DataError::Config(format!("invalid device '{}'", s)))
        };
        match value.as_str() {
            "cpu" => Ok(Device::Cpu),
            "mps" => Ok(Device::Mps),
            "cuda" => Ok(Device::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(index) => Ok(Device::Cuda(parse_index(index)?)),
                None => Ok(Device::Cuda(parse_index(other)?)),
            },
        }
    }
}

impl TryFrom<String> for Device {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selector_forms() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("MPS".parse::<Device>().unwrap(), Device::Mps);
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert_eq!("1".parse::<Device>().unwrap(), Device::Cuda(1));
    }

    #[test]
    fn rejects_unknown_selector() {
        assert!(matches!("tpu".parse::<Device>(), Err(DataError::Config(_))));
    }

    #[test]
    fn display_round_trips() {
        for device in [Device::Cpu, Device::Mps, Device::Cuda(3)] {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
    }
}
