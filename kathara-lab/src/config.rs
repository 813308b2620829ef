// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! This module contains the code for reading the configuration.
//!
//! The configuration is read once from the TOML file named by the environment variable
//! `KATHARA_LAB_CONFIG`. Every key is optional. If the variable is not set, the defaults are used.
//!
//! ```toml
//! labs_dir = "/home/user/kathara-labs"
//! saves_dir = "/home/user/saves"
//! kathara_bin = "kathara"
//! docker_bin = "docker"
//! start_timeout_secs = 600
//! stop_timeout_secs = 300
//! exec_timeout_secs = 120
//! build_timeout_secs = 1800
//! compose_file = "containers/docker-compose.yaml"
//! management_subnet = "10.0.0.0/24"
//! ```

use std::{path::PathBuf, time::Duration};

use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer};

/// Environment variable pointing to the configuration file.
pub const ENV_CONFIG: &str = "KATHARA_LAB_CONFIG";

macro_rules! expect {
    ($result:expr, $($rest:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!("Error: {}: {}\n", format!($($rest)*), e);
            panic!()
        })
    };
}

lazy_static! {
    /// The global configuration, read once on first access.
    pub static ref CONFIG: Config = {
        match std::env::var(ENV_CONFIG) {
            Ok(path) => {
                let config_str = expect!(std::fs::read_to_string(&path), "Cannot read '{}'", path);
                expect!(Config::from_toml(&config_str), "Cannot parse '{}'", path)
            }
            Err(_) => Config::default(),
        }
    };
}

/// Runtime configuration of the lab driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that holds one working directory per lab, together with the lock files.
    pub labs_dir: PathBuf,
    /// Directory in which project bundles are stored.
    pub saves_dir: PathBuf,
    /// Name or path of the Kathara executable.
    pub kathara_bin: String,
    /// Name or path of the docker executable.
    pub docker_bin: String,
    /// Timeout for `kathara lstart`, in seconds.
    #[serde(deserialize_with = "deserialize_timeout")]
    pub start_timeout_secs: u64,
    /// Timeout for `kathara lclean`, in seconds.
    #[serde(deserialize_with = "deserialize_timeout")]
    pub stop_timeout_secs: u64,
    /// Timeout for commands executed inside containers, in seconds.
    #[serde(deserialize_with = "deserialize_timeout")]
    pub exec_timeout_secs: u64,
    /// Timeout for building an image, in seconds.
    #[serde(deserialize_with = "deserialize_timeout")]
    pub build_timeout_secs: u64,
    /// Compose file that describes how the device images are built.
    pub compose_file: PathBuf,
    /// Subnet from which the management (`eth0`) addresses are allocated. Must be a `/24`.
    #[serde(deserialize_with = "deserialize_management_subnet")]
    pub management_subnet: Ipv4Net,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        Self {
            labs_dir: home.join("kathara-labs"),
            saves_dir: PathBuf::from("saves"),
            kathara_bin: String::from("kathara"),
            docker_bin: String::from("docker"),
            start_timeout_secs: 600,
            stop_timeout_secs: 300,
            exec_timeout_secs: 120,
            build_timeout_secs: 1800,
            compose_file: PathBuf::from("containers/docker-compose.yaml"),
            management_subnet: "10.0.0.0/24".parse().unwrap(),
        }
    }
}

impl Config {
    /// Parse the configuration from a TOML string. Missing keys take their default value.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Timeout for starting a lab.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// Timeout for stopping a lab.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Timeout for executing a command inside a container.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    /// Timeout for building an image.
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

fn deserialize_timeout<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let x = u64::deserialize(de)?;
    if x == 0 {
        Err(serde::de::Error::custom("timeout must be at least one second"))
    } else {
        Ok(x)
    }
}

fn deserialize_management_subnet<'de, D>(de: D) -> Result<Ipv4Net, D::Error>
where
    D: Deserializer<'de>,
{
    let net = Ipv4Net::deserialize(de)?;
    if net.prefix_len() != 24 {
        return Err(serde::de::Error::custom(format!(
            "management subnet must be a /24, but was {net}"
        )));
    }
    Ok(net.trunc())
}
