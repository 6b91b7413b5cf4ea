//! dtype, device and log level values.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::PrecisionError;

/// Training precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dtype {
    Fp16,
    Bf16,
    #[default]
    Fp32,
    Fp64,
}

impl Dtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
            Self::Fp32 => "fp32",
            Self::Fp64 => "fp64",
        }
    }

    /// Size of one element in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            Self::Fp16 | Self::Bf16 => 2,
            Self::Fp32 => 4,
            Self::Fp64 => 8,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = PrecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fp16" => Ok(Self::Fp16),
            "bf16" => Ok(Self::Bf16),
            "fp32" => Ok(Self::Fp32),
            "fp64" => Ok(Self::Fp64),
            other => Err(PrecisionError::UnknownDtype {
                value: other.to_string(),
            }),
        }
    }
}

/// Accelerator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Mps,
    Xpu,
    Npu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Xpu => "xpu",
            Self::Npu => "npu",
        }
    }
}

/// A device string such as `cuda`, `cuda:1` or `cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub index: Option<u32>,
}

impl DeviceSpec {
    pub fn is_cuda(&self) -> bool {
        self.kind == DeviceKind::Cuda
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.kind.as_str(), index),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = PrecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || PrecisionError::UnknownDevice {
            value: s.to_string(),
        };
        let (name, index) = match s.trim().split_once(':') {
            Some((name, index)) => (name, Some(index.parse::<u32>().map_err(|_| unknown())?)),
            None => (s.trim(), None),
        };
        let kind = match name {
            "cpu" => DeviceKind::Cpu,
            "cuda" => DeviceKind::Cuda,
            "mps" => DeviceKind::Mps,
            "xpu" => DeviceKind::Xpu,
            "npu" => DeviceKind::Npu,
            _ => return Err(unknown()),
        };
        if index.is_some() && matches!(kind, DeviceKind::Cpu | DeviceKind::Mps) {
            return Err(unknown());
        }
        Ok(Self { kind, index })
    }
}

/// Log level names used by the harness (`INFO`, `WARNING`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Closest `tracing` level; `CRITICAL` folds into `ERROR`.
    pub fn to_tracing(&self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Critical => tracing::Level::ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = PrecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(PrecisionError::UnknownLogLevel {
                value: s.to_string(),
            }),
        }
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Dtype);
string_serde!(DeviceSpec);
string_serde!(LogLevel);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_parse() {
        assert_eq!("bf16".parse::<Dtype>().unwrap(), Dtype::Bf16);
        assert_eq!("fp32".parse::<Dtype>().unwrap(), Dtype::Fp32);
        assert!("float16".parse::<Dtype>().is_err());
        assert_eq!(Dtype::default(), Dtype::Fp32);
        assert_eq!(Dtype::Bf16.bytes(), 2);
    }

    #[test]
    fn test_device_parse() {
        let device: DeviceSpec = "cuda:1".parse().unwrap();
        assert!(device.is_cuda());
        assert_eq!(device.index, Some(1));
        assert_eq!(device.to_string(), "cuda:1");
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap().kind, DeviceKind::Cpu);
        assert!("cpu:0".parse::<DeviceSpec>().is_err());
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!(
            "WARNING".parse::<LogLevel>().unwrap().to_tracing(),
            tracing::Level::WARN
        );
        assert!("LOUD".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_serde_as_strings() {
        let dtype: Dtype = serde_yaml::from_str("bf16").unwrap();
        assert_eq!(dtype, Dtype::Bf16);
        assert_eq!(serde_json::to_string(&DeviceSpec { kind: DeviceKind::Cuda, index: None }).unwrap(), "\"cuda\"");
        assert!(serde_yaml::from_str::<Dtype>("int8").is_err());
    }
}
