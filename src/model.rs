// LabForge: Kathara lab compiler written in Rust
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
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

//! The data model of a topology: machines, their interfaces and their per-kind configuration.
//!
//! Projects are written by an editor that changed its format over time. All structures in this
//! module therefore deserialize leniently: numbers may be given as strings (and vice versa),
//! `null` is treated like a missing value, and unknown fields are ignored. A malformed value never
//! fails the entire project.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The pinned image of the attacker, used when no attack profile is loaded.
pub const DEFAULT_ATTACKER_IMAGE: &str =
    "kalilinux/kali-rolling@sha256:eb500810d9d44236e975291205bfd45e9e19b7f63859e3a72ba30ea548ddb1df";

/// Name of the lab if the lab info does not give one.
pub const DEFAULT_LAB_NAME: &str = "default-lab";

/// A machine in the topology. The type parameter `I` is the representation of the interfaces.
/// Machines read from a project carry [`InterfacesInput`] (see [`MachineInput`]), while every
/// other part of the compiler only sees the normalized [`Interfaces`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "I: Deserialize<'de> + Default"))]
pub struct Machine<I = Interfaces> {
    /// Opaque identifier, stable across edits.
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    /// Display name, also used as host name.
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    /// Kind of the device.
    #[serde(rename = "type", default)]
    pub kind: DeviceKind,
    /// Network interfaces.
    #[serde(default)]
    pub interfaces: I,
    /// Management address, assigned during compilation.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub computed_eth0_ip: Option<Ipv4Net>,
    /// Whether an attack profile is loaded onto this machine.
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub attack_loaded: bool,
    /// Image of the loaded attack.
    #[serde(default, deserialize_with = "lenient::string")]
    pub attack_image: String,
    /// Command of the loaded attack.
    #[serde(default, deserialize_with = "lenient::string")]
    pub attack_command: String,
    /// Arguments of the loaded attack.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub attack_command_args: Vec<String>,
    /// Configuration of industrial devices.
    #[serde(default, deserialize_with = "lenient::object")]
    pub industrial: Industrial,
    /// Configuration of the TLS termination proxy.
    #[serde(default, deserialize_with = "lenient::object")]
    pub tls: TlsConfig,
    /// User-authored scripts.
    #[serde(default, deserialize_with = "lenient::object")]
    pub scripts: Scripts,
    /// Routing daemon of routers (`frr` or `quagga`).
    #[serde(default, deserialize_with = "lenient::string")]
    pub routing_software: String,
}

/// A machine as it is stored in a project, before normalization.
pub type MachineInput = Machine<InterfacesInput>;

impl<I> Machine<I> {
    /// The host name of the machine: the sanitized name, or `node` if the name is empty. This name
    /// is used for the startup script, the `lab.conf` entries and the staged payloads.
    pub fn host_name(&self) -> String {
        if self.name.is_empty() {
            String::from("node")
        } else {
            sanitize_name(&self.name)
        }
    }

    /// The assigned management address (without prefix length).
    pub fn management_ip(&self) -> Option<Ipv4Addr> {
        self.computed_eth0_ip.map(|net| net.addr())
    }
}

impl Machine<Interfaces> {
    /// The free-text startup fragment of the user. `scripts.startup` is preferred, and the legacy
    /// `interfaces.free` is used if that is empty.
    pub fn user_script(&self) -> &str {
        match self.scripts.startup.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => self.interfaces.free.as_deref().unwrap_or_default(),
        }
    }

    /// The management interface (`eth0`).
    pub fn management_interface(&self) -> Option<&Interface> {
        self.interfaces.ifaces.iter().find(|i| i.eth.number == 0)
    }

    /// All user-defined interfaces (`eth1` and up).
    pub fn user_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.ifaces.iter().filter(|i| i.eth.number >= 1)
    }

    /// The address of the machine as seen by its neighbors: the management address if assigned,
    /// or the address of the first configured interface otherwise.
    pub fn reachable_ip(&self) -> Option<String> {
        if let Some(ip) = self.management_ip() {
            return Some(ip.to_string());
        }
        self.interfaces
            .ifaces
            .iter()
            .filter_map(|i| i.ip.as_deref())
            .map(|ip| ip.split('/').next().unwrap_or_default().trim())
            .find(|ip| !ip.is_empty())
            .map(String::from)
    }
}

/// Replace every character outside of `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The kind of a device. Unknown kinds are kept as [`DeviceKind::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// A plain host (`terminal` or `host`).
    #[default]
    Terminal,
    /// A web server (`ws`).
    WebServer,
    /// A name server (`ns`).
    NameServer,
    /// A router running FRR or Quagga.
    Router,
    /// A switch
    Switch,
    /// A controller
    Controller,
    /// The attacker
    Attacker,
    /// Industrial simulation engine
    Engine,
    /// Industrial fan
    Fan,
    /// Industrial temperature sensor
    TemperatureSensor,
    /// Industrial rejector
    Rejector,
    /// SCADA server
    Scada,
    /// Industrial APG
    Apg,
    /// Industrial laser
    Laser,
    /// Industrial conveyor
    Conveyor,
    /// Programmable logic controller
    Plc,
    /// TLS termination proxy
    TlsTerminationProxy,
    /// Next-generation firewall
    Ngfw,
    /// Any other kind.
    Other(String),
}

impl DeviceKind {
    /// Parse the kind from its name.
    pub fn from_name(s: &str) -> Self {
        match s {
            "terminal" | "host" => Self::Terminal,
            "ws" => Self::WebServer,
            "ns" => Self::NameServer,
            "router" => Self::Router,
            "switch" => Self::Switch,
            "controller" => Self::Controller,
            "attacker" => Self::Attacker,
            "engine" => Self::Engine,
            "fan" => Self::Fan,
            "temperature_sensor" => Self::TemperatureSensor,
            "rejector" => Self::Rejector,
            "scada" => Self::Scada,
            "apg" => Self::Apg,
            "laser" => Self::Laser,
            "conveyor" => Self::Conveyor,
            "plc" => Self::Plc,
            "tls_termination_proxy" => Self::TlsTerminationProxy,
            "ngfw" => Self::Ngfw,
            s => Self::Other(s.to_string()),
        }
    }

    /// The name of the kind, as it appears in a project.
    pub fn name(&self) -> &str {
        match self {
            Self::Terminal => "terminal",
            Self::WebServer => "ws",
            Self::NameServer => "ns",
            Self::Router => "router",
            Self::Switch => "switch",
            Self::Controller => "controller",
            Self::Attacker => "attacker",
            Self::Engine => "engine",
            Self::Fan => "fan",
            Self::TemperatureSensor => "temperature_sensor",
            Self::Rejector => "rejector",
            Self::Scada => "scada",
            Self::Apg => "apg",
            Self::Laser => "laser",
            Self::Conveyor => "conveyor",
            Self::Plc => "plc",
            Self::TlsTerminationProxy => "tls_termination_proxy",
            Self::Ngfw => "ngfw",
            Self::Other(s) => s,
        }
    }

    /// Lookup the profile of this kind.
    pub fn profile(&self) -> KindProfile {
        use ImageSelector::*;
        use StartupBlock as B;
        let (image, startup, env) = match self {
            Self::Terminal | Self::WebServer | Self::NameServer => {
                (Fixed("icr/kathara-base"), B::None, EnvBlock::None)
            }
            Self::Router => (Routing, B::None, EnvBlock::None),
            Self::Attacker => (Attack, B::None, EnvBlock::None),
            Self::Engine => (Fixed("icr/engine"), B::Engine, EnvBlock::None),
            Self::Fan => (Fixed("icr/fan"), B::None, EnvBlock::Fan),
            Self::TemperatureSensor => (
                Fixed("icr/temperature_sensor"),
                B::None,
                EnvBlock::TemperatureSensor,
            ),
            Self::Rejector => (Fixed("icr/rejector"), B::None, EnvBlock::None),
            Self::Scada => (Fixed("icr/scada"), B::Scada, EnvBlock::None),
            Self::Apg => (Fixed("icr/apg"), B::None, EnvBlock::None),
            Self::Laser => (Fixed("icr/laser"), B::None, EnvBlock::None),
            Self::Conveyor => (Fixed("icr/conveyor"), B::None, EnvBlock::None),
            Self::Plc => (Fixed("icr/plc"), B::Plc, EnvBlock::None),
            Self::TlsTerminationProxy => (
                Fixed("icr/tls_termination_proxy"),
                B::TlsProxy,
                EnvBlock::None,
            ),
            Self::Ngfw => (Fixed("ngfw_appliance"), B::None, EnvBlock::None),
            Self::Switch | Self::Controller | Self::Other(_) => {
                (BackendDefault, B::None, EnvBlock::None)
            }
        };
        KindProfile {
            image,
            startup,
            env,
        }
    }
}

impl Serialize for DeviceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DeviceKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => Self::from_name(&s),
            Some(v) => Self::Other(v.to_string()),
            None => Self::default(),
        })
    }
}

/// Everything the compiler needs to know about a kind of device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    /// How to select the container image.
    pub image: ImageSelector,
    /// The kind-specific block of the startup script.
    pub startup: StartupBlock,
    /// The environment variables injected in `lab.conf`.
    pub env: EnvBlock,
}

/// How the container image of a machine is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSelector {
    /// Always the same image.
    Fixed(&'static str),
    /// `kathara/frr` or `kathara/quagga`, depending on the routing software.
    Routing,
    /// The loaded attack image, or [`DEFAULT_ATTACKER_IMAGE`].
    Attack,
    /// No image line; the backend picks its default image.
    BackendDefault,
}

impl ImageSelector {
    /// Select the image for the machine, or `None` if the backend should use its default.
    pub fn select<I>(&self, machine: &Machine<I>) -> Option<String> {
        match self {
            Self::Fixed(image) => Some(image.to_string()),
            Self::Routing => match machine.routing_software.as_str() {
                "frr" => Some(String::from("kathara/frr")),
                "quagga" => Some(String::from("kathara/quagga")),
                other => {
                    log::warn!(
                        "[lab.conf] Router {} has unknown routing software {other:?}",
                        machine.name
                    );
                    None
                }
            },
            Self::Attack => {
                if machine.attack_loaded && !machine.attack_image.is_empty() {
                    Some(machine.attack_image.clone())
                } else {
                    Some(DEFAULT_ATTACKER_IMAGE.to_string())
                }
            }
            Self::BackendDefault => None,
        }
    }
}

/// The kind-specific block appended to (or replacing) the user script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupBlock {
    /// Nothing is added.
    None,
    /// Generate a certificate and start `stunnel`. Replaces the user script.
    TlsProxy,
    /// Launch the simulation engine (in engine mode).
    Engine,
    /// Register the monitored devices and the program, and start the PLC runtime.
    Plc,
    /// Start the SCADA server, and restart it with the uploaded project.
    Scada,
}

/// Environment variables injected in `lab.conf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvBlock {
    /// No environment variables.
    None,
    /// `ENDPOINT` and `CAPACITY`.
    Fan,
    /// `ENDPOINT`, and the `SINE_*` variables in sine-wave mode.
    TemperatureSensor,
}

/// The normalized interfaces of a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interfaces {
    /// All interfaces. After normalization, there is exactly one interface with number 0, and it
    /// is the first one.
    #[serde(rename = "if", default)]
    pub ifaces: Vec<Interface>,
    /// Legacy free-text startup fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<String>,
}

/// A normalized network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Interface number and collision domain.
    pub eth: Eth,
    /// Address in CIDR notation, or a bare address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Interface number and collision domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eth {
    /// `0` for the management interface, `1` and up for user interfaces.
    pub number: u32,
    /// The collision domain. Empty for unconnected interfaces.
    #[serde(default)]
    pub domain: String,
}

/// The interfaces of a machine as stored in a project. Older editors stored a flat list of
/// collision domains, newer ones the structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterfacesInput {
    /// `{"if": [{"eth": {"number": 1, "domain": "A"}, "ip": "..."}], "free": "..."}`
    Structured(StructuredInterfaces),
    /// `["A", {"domain": "B", "ip": "..."}]`
    Legacy(Vec<LegacyInterface>),
    /// Anything else, including `null`.
    Unrecognized(Value),
}

impl Default for InterfacesInput {
    fn default() -> Self {
        Self::Unrecognized(Value::Null)
    }
}

/// Structured interfaces, as stored in a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredInterfaces {
    /// The interfaces
    #[serde(rename = "if", default, deserialize_with = "lenient::list")]
    pub ifaces: Vec<InterfaceInput>,
    /// Legacy free-text startup fragment.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub free: Option<String>,
}

/// A structured interface, as stored in a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInput {
    /// Interface number and collision domain
    #[serde(default)]
    pub eth: EthInput,
    /// Address
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ip: Option<String>,
}

/// Interface number and collision domain, as stored in a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EthInput {
    /// The number, if given.
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub number: Option<u32>,
    /// The collision domain
    #[serde(default, deserialize_with = "lenient::string")]
    pub domain: String,
}

/// An entry of the legacy interface list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyInterface {
    /// Only the collision domain.
    Label(String),
    /// Collision domain and address.
    Object {
        /// The collision domain
        #[serde(default, deserialize_with = "lenient::string")]
        domain: String,
        /// The address
        #[serde(default, deserialize_with = "lenient::opt_string")]
        ip: Option<String>,
    },
    /// Anything else. Such an entry becomes an unconnected interface.
    Unknown(Value),
}

/// Configuration of industrial devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Industrial {
    /// Id of the engine a fan or temperature sensor is connected to.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub selected_engine_id: Option<String>,
    /// Capacity of a fan.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub capacity: Option<String>,
    /// Operational mode of a temperature sensor or engine.
    #[serde(deserialize_with = "lenient::mode")]
    pub mode: OperationalMode,
    /// Period of the sine wave.
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub sine_period: Option<f64>,
    /// Amplitude of the sine wave.
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub sine_amplitude: Option<f64>,
    /// Offset of the sine wave.
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub sine_offset: Option<f64>,
    /// Ids of the devices a PLC registers as modbus slaves.
    #[serde(
        rename = "monitored_machines",
        alias = "monitoredMachines",
        deserialize_with = "lenient::string_list"
    )]
    pub monitored_machines: Vec<String>,
    /// Uploaded PLC program, as base64 or data URI.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub plc_program_content: Option<String>,
    /// File name of the uploaded PLC program.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub plc_program_name: Option<String>,
    /// Uploaded SCADA project, as base64 or data URI.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub scada_project_content: Option<String>,
    /// File name of the uploaded SCADA project.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub scada_project_name: Option<String>,
    /// Temperature increase per step of the engine.
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub temperature_step: Option<f64>,
    /// Seconds between two steps of the engine.
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub interval_seconds: Option<f64>,
    /// Start temperature of the engine.
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub temperature_start: Option<f64>,
}

/// Operational mode of industrial devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OperationalMode {
    /// Values are driven by the simulation engine.
    #[default]
    Engine,
    /// Values follow a sine wave.
    SineWave,
    /// Any other mode.
    Other(String),
}

impl OperationalMode {
    /// The name of the mode, as it appears in a project.
    pub fn name(&self) -> &str {
        match self {
            Self::Engine => "engine",
            Self::SineWave => "sine_wave",
            Self::Other(s) => s,
        }
    }
}

impl Serialize for OperationalMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Configuration of the TLS termination proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Address the proxy listens on.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub in_addr: Option<String>,
    /// Address the proxy forwards to.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub out_addr: Option<String>,
    /// Verification level of `stunnel`.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub verify: Option<String>,
}

impl TlsConfig {
    /// The listen address, `0.0.0.0:50000` by default.
    pub fn in_addr(&self) -> &str {
        non_empty_or(&self.in_addr, "0.0.0.0:50000")
    }

    /// The forward address, `10.0.0.2:50001` by default.
    pub fn out_addr(&self) -> &str {
        non_empty_or(&self.out_addr, "10.0.0.2:50001")
    }

    /// The verification level, `0` by default.
    pub fn verify(&self) -> &str {
        non_empty_or(&self.verify, "0")
    }
}

fn non_empty_or<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => default,
    }
}

/// User-authored scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scripts {
    /// Free-text fragment appended to the startup script.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub startup: Option<String>,
}

/// Descriptive metadata of the lab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabInfo {
    /// Name of the lab, used for the working directory and the archive.
    #[serde(deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `LAB_DESCRIPTION`
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    /// `LAB_VERSION`
    #[serde(deserialize_with = "lenient::string")]
    pub version: String,
    /// `LAB_AUTHOR`
    #[serde(deserialize_with = "lenient::string")]
    pub author: String,
    /// `LAB_EMAIL`
    #[serde(deserialize_with = "lenient::string")]
    pub email: String,
    /// `LAB_WEB`
    #[serde(deserialize_with = "lenient::string")]
    pub web: String,
}

impl LabInfo {
    /// The sanitized name of the lab, or `default-lab`.
    pub fn lab_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && name != "." && name != ".." => sanitize_name(name),
            _ => DEFAULT_LAB_NAME.to_string(),
        }
    }
}

/// Deserializers that accept everything and fall back to defaults.
pub(crate) mod lenient {
    use serde::{de::DeserializeOwned, Deserialize, Deserializer};
    use serde_json::Value;

    use super::OperationalMode;

    fn value_to_string(v: Value) -> Option<String> {
        match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub(super) fn opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Value>::deserialize(de)?.and_then(value_to_string))
    }

    pub(super) fn string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        Ok(opt_string(de)?.unwrap_or_default())
    }

    pub(super) fn boolean<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
        Ok(match Option::<Value>::deserialize(de)? {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => s == "true",
            Some(Value::Number(n)) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
            _ => false,
        })
    }

    pub(super) fn opt_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<Value>::deserialize(de)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|x: &f64| x.is_finite()))
    }

    pub(super) fn opt_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
        Ok(match Option::<Value>::deserialize(de)? {
            Some(Value::Number(n)) => n.as_u64().and_then(|x| u32::try_from(x).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub(super) fn string_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(de)? {
            Some(Value::Array(xs)) => xs.into_iter().filter_map(value_to_string).collect(),
            Some(v) => value_to_string(v).into_iter().collect(),
            None => Vec::new(),
        })
    }

    /// A list where malformed elements are skipped. The list itself must be an array, so that
    /// untagged enums can tell the shapes apart.
    pub(super) fn list<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        match Value::deserialize(de)? {
            Value::Array(xs) => Ok(xs
                .into_iter()
                .filter_map(|x| serde_json::from_value(x).ok())
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(serde::de::Error::custom(format!(
                "expected a list of interfaces, found {other}"
            ))),
        }
    }

    /// A nested structure. Anything but a well-formed object yields the default.
    pub(crate) fn object<'de, D, T>(de: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(match Value::deserialize(de)? {
            v @ Value::Object(_) => serde_json::from_value(v).unwrap_or_else(|e| {
                log::warn!("[model] Ignoring malformed object: {e}");
                T::default()
            }),
            Value::Null => T::default(),
            other => {
                log::warn!("[model] Expected an object, found {other}");
                T::default()
            }
        })
    }

    pub(super) fn mode<'de, D: Deserializer<'de>>(de: D) -> Result<OperationalMode, D::Error> {
        Ok(match opt_string(de)?.as_deref() {
            None | Some("") | Some("engine") => OperationalMode::Engine,
            Some("sine_wave") => OperationalMode::SineWave,
            Some(other) => OperationalMode::Other(other.to_string()),
        })
    }
}
