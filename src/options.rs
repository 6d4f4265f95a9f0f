//! Typed, eagerly-validated settings for [`crate::session::ProfilerSession::start`].
//!
//! Mirrors the original's `read_arg`: every field is checked before any
//! session state is touched, so a bad `start()` call never leaves the
//! profiler half-armed.

use crate::error::{ProfileError, Result};

/// CPU instrumentation mode. `Profile` and `Sample` are mutually exclusive
/// per coroutine — `Profile` drives the call/return hook and builds the
/// call-path tree, `Sample` drives a count hook that walks the host's own
/// live stack instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Off,
    Profile,
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMode {
    Off,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub cpu: CpuMode,
    pub mem: MemMode,
    /// Expected number of VM instructions between samples in `CpuMode::Sample`.
    /// Unused in other CPU modes but always validated, matching the
    /// original's all-or-nothing argument check.
    pub sample_period: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            cpu: CpuMode::Profile,
            mem: MemMode::Off,
            sample_period: 10_000,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.sample_period == 0 {
            return Err(ProfileError::Configuration(
                "sample_period must be positive".to_string(),
            ));
        }
        if self.cpu == CpuMode::Off && self.mem == MemMode::Off {
            return Err(ProfileError::Configuration(
                "at least one of cpu or mem must be enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses the string enums a script-facing `start()` call would pass
    /// (`"off" | "profile" | "sample"`, `"off" | "profile"`), validating
    /// eagerly rather than leaving bad input to surface later as a panic.
    pub fn from_strs(cpu: &str, mem: &str, sample_period: u64) -> Result<Self> {
        let cpu = match cpu {
            "off" => CpuMode::Off,
            "profile" => CpuMode::Profile,
            "sample" => CpuMode::Sample,
            other => {
                return Err(ProfileError::Configuration(format!(
                    "unknown cpu mode: {other}"
                )))
            }
        };
        let mem = match mem {
            "off" => MemMode::Off,
            "profile" => MemMode::Profile,
            other => {
                return Err(ProfileError::Configuration(format!(
                    "unknown mem mode: {other}"
                )))
            }
        };
        let options = Options {
            cpu,
            mem,
            sample_period,
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn zero_sample_period_is_rejected() {
        let opts = Options {
            sample_period: 0,
            ..Options::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn both_modes_off_is_rejected() {
        let opts = Options {
            cpu: CpuMode::Off,
            mem: MemMode::Off,
            sample_period: 1,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn unknown_enum_string_is_rejected_before_anything_else() {
        assert!(Options::from_strs("bogus", "off", 100).is_err());
        assert!(Options::from_strs("profile", "bogus", 100).is_err());
    }

    #[test]
    fn valid_strings_parse_into_matching_variants() {
        let opts = Options::from_strs("sample", "profile", 5000).unwrap();
        assert_eq!(opts.cpu, CpuMode::Sample);
        assert_eq!(opts.mem, MemMode::Profile);
        assert_eq!(opts.sample_period, 5000);
    }
}
