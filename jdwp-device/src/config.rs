// Device configuration
//
// Serializable description of a simulated device, used to start the fake
// server from a JSON file and to snapshot a running device.

use crate::protocol::{JdwpError, JdwpResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Features an ART VM reports in its FEAT reply
pub const DEFAULT_VM_FEATURES: &[&str] = &[
    "method-trace-profiling",
    "method-trace-profiling-streaming",
    "method-sample-profiling",
    "hprof-heap-dump",
    "hprof-heap-dump-streaming",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub serial: String,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub features: FeatureConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub pid: i32,
    #[serde(default)]
    pub uid: i32,
    pub process_name: String,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default = "default_abi")]
    pub abi: String,
    #[serde(default = "default_vm_identifier")]
    pub vm_identifier: String,
    #[serde(default)]
    pub jvm_flags: String,
    #[serde(default)]
    pub native_debuggable: bool,
    /// Process is paused until a debugger attaches
    #[serde(default)]
    pub waiting: bool,
}

/// Feature lists returned by the FEAT handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_features")]
    pub default_features: Vec<String>,
    #[serde(default)]
    pub features_by_pid: BTreeMap<i32, Vec<String>>,
}

fn default_abi() -> String {
    "x86_64".to_string()
}

fn default_vm_identifier() -> String {
    "FakeVM".to_string()
}

fn default_features() -> Vec<String> {
    DEFAULT_VM_FEATURES.iter().map(|f| f.to_string()).collect()
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            default_features: default_features(),
            features_by_pid: BTreeMap::new(),
        }
    }
}

impl FeatureConfig {
    /// Feature list for a pid, falling back to the default list
    pub fn features_for(&self, pid: i32) -> &[String] {
        self.features_by_pid
            .get(&pid)
            .unwrap_or(&self.default_features)
    }
}

impl ClientConfig {
    pub fn new(pid: i32, process_name: impl Into<String>) -> Self {
        Self {
            pid,
            uid: 0,
            process_name: process_name.into(),
            package_name: None,
            abi: default_abi(),
            vm_identifier: default_vm_identifier(),
            jvm_flags: String::new(),
            native_debuggable: false,
            waiting: false,
        }
    }

    pub fn waiting(mut self, waiting: bool) -> Self {
        self.waiting = waiting;
        self
    }

    pub fn package_name(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn uid(mut self, uid: i32) -> Self {
        self.uid = uid;
        self
    }
}

impl DeviceConfig {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            clients: Vec::new(),
            features: FeatureConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> JdwpResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| JdwpError::Protocol(format!("Invalid device config: {}", e)))
    }

    pub fn load(path: &Path) -> JdwpResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> JdwpResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| JdwpError::Protocol(format!("Failed to serialize device config: {}", e)))
    }
}
