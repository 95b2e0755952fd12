// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, ops::RangeInclusive, path::Path, time::Duration};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// UDP endpoint of the controller.
    pub endpoint: EndpointConfig,
    /// Station/client addresses advertised in every frame.
    pub identity: IdentityConfig,
    /// Shared secret keying the stream cipher and header checksum.
    pub security: SecurityConfig,
    /// Request timeout and enumeration pacing.
    pub timers: TimersConfig,
    /// Enumeration termination bounds and the accepted `wid` range.
    pub enumeration: EnumerationConfig,
    /// Implementation/runtime parameters that live outside the wire protocol.
    pub runtime: RuntimeConfig,
}

/// UDP destination of the controller.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EndpointConfig {
    #[serde(rename = "Host")]
    /// Hostname or literal IP address of the controller.
    pub host: String,
    #[serde(rename = "Port", default = "default_port")]
    /// UDP port, 59 on all controllers observed so far.
    pub port: u16,
}

fn default_port() -> u16 {
    59
}

/// Station addresses embedded in the outer envelope and inner frame.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IdentityConfig {
    #[serde(rename = "StationAddr", default = "default_station_addr")]
    /// Controller's station address (5 bits).
    pub station_addr: u8,
    #[serde(rename = "ClientAddr", default = "default_client_addr")]
    /// This client's station address (5 bits).
    pub client_addr: u8,
}

fn default_station_addr() -> u8 {
    4
}

fn default_client_addr() -> u8 {
    31
}

/// The shared secret keying the stream cipher and header checksum.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SecurityConfig {
    #[serde(rename = "Password", default)]
    pub password: u32,
}

/// Timing parameters for request/response exchanges and enumeration pacing.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimersConfig {
    #[serde(rename = "RequestTimeout", with = "serde_secs", default = "default_request_timeout")]
    /// How long to wait for a response before treating the exchange as timed out.
    pub request_timeout: Duration,
    #[serde(rename = "ProbePace", with = "serde_millis", default = "default_probe_pace")]
    /// Delay between successive descriptor-memory probes during enumeration.
    pub probe_pace: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_probe_pace() -> Duration {
    Duration::from_millis(20)
}

/// Bounds that terminate descriptor-region enumeration.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnumerationConfig {
    #[serde(rename = "MaxVariables", default = "default_max_variables")]
    /// Hard cap on the number of variables collected.
    pub max_variables: u32,
    #[serde(rename = "MaxConsecutiveFailures", default = "default_max_consecutive_failures")]
    /// Consecutive unreadable descriptors before enumeration gives up.
    pub max_consecutive_failures: u32,
    #[serde(rename = "WidMin", default = "default_wid_min")]
    pub wid_min: u16,
    #[serde(rename = "WidMax", default = "default_wid_max")]
    pub wid_max: u16,
}

fn default_max_variables() -> u32 {
    1500
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_wid_min() -> u16 {
    4000
}

fn default_wid_max() -> u16 {
    6000
}

impl EnumerationConfig {
    pub fn wid_range(&self) -> RangeInclusive<u16> {
        self.wid_min..=self.wid_max
    }
}

/// Settings that do not cross the wire at all.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "ScanInterval", with = "serde_secs", default = "default_scan_interval")]
    /// Suggested polling interval for a caller that scans variables on a
    /// schedule; the core itself never reads this field.
    pub scan_interval: Duration,
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates the invariants the wire protocol and enumeration loop rely on.
    pub fn validate_and_normalize(&self) -> Result<()> {
        ensure!(!self.endpoint.host.is_empty(), "Host must not be empty");
        ensure!(self.identity.station_addr <= 0x1F, "StationAddr must fit in 5 bits");
        ensure!(self.identity.client_addr <= 0x1F, "ClientAddr must fit in 5 bits");
        ensure!(
            self.enumeration.max_consecutive_failures >= 1,
            "MaxConsecutiveFailures must be >= 1"
        );
        ensure!(self.enumeration.max_variables >= 1, "MaxVariables must be >= 1");
        ensure!(
            self.enumeration.wid_min <= self.enumeration.wid_max,
            "WidMin must not exceed WidMax"
        );
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a whole number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helpers for representing `Duration` as a whole number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
