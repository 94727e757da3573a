//! Startup NPU diagnostics
//!
//! An explicit capability probe executed once before the listener starts.
//! The result is purely informational: it never gates startup and nothing
//! is ever installed on the host. The descriptor is also consulted when
//! bringing up the model runtime (no render node means init fails and the
//! server runs simulated).

use std::fs;
use std::path::PathBuf;

use tracing::info;

/// DRI device directory where the NPU exposes render nodes
const DRI_DIR: &str = "/dev/dri";
/// Loaded kernel module list
const PROC_MODULES: &str = "/proc/modules";
/// RKNPU driver version (debugfs, often unreadable without root)
const NPU_VERSION_PATH: &str = "/sys/kernel/debug/rknpu/version";
/// Kernel module name for the RK3588 NPU
const NPU_MODULE: &str = "rknpu";

/// Capability descriptor produced by [`probe`]
#[derive(Debug, Clone)]
pub struct NpuCapabilities {
    /// DRI render nodes found under /dev/dri (e.g. renderD128)
    pub render_nodes: Vec<PathBuf>,
    /// Whether the rknpu kernel module is loaded; None if /proc/modules
    /// could not be read
    pub kernel_module_loaded: Option<bool>,
    /// NPU driver version string, when debugfs exposes it
    pub driver_version: Option<String>,
}

impl NpuCapabilities {
    /// True when the host looks capable of real NPU inference
    pub fn has_npu(&self) -> bool {
        !self.render_nodes.is_empty() && self.kernel_module_loaded == Some(true)
    }
}

/// Probe the host for NPU hardware. Never fails; missing or unreadable
/// paths simply show up as absent capabilities.
pub fn probe() -> NpuCapabilities {
    let render_nodes = match fs::read_dir(DRI_DIR) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("renderD"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    let kernel_module_loaded = fs::read_to_string(PROC_MODULES)
        .ok()
        .map(|modules| modules.lines().any(|l| l.starts_with(NPU_MODULE)));

    let driver_version = fs::read_to_string(NPU_VERSION_PATH)
        .ok()
        .map(|v| v.trim().to_string());

    NpuCapabilities {
        render_nodes,
        kernel_module_loaded,
        driver_version,
    }
}

/// Log one line per probed capability
pub fn log_summary(caps: &NpuCapabilities) {
    if caps.render_nodes.is_empty() {
        info!("No DRI render nodes found");
    } else {
        info!(nodes = ?caps.render_nodes, "Found DRI render nodes");
    }

    match caps.kernel_module_loaded {
        Some(true) => info!("RKNPU kernel module loaded"),
        Some(false) => info!("RKNPU kernel module not loaded"),
        None => info!("Could not check kernel modules"),
    }

    match &caps.driver_version {
        Some(version) => info!(version = %version, "NPU driver version"),
        None => info!("NPU driver version not available"),
    }

    info!(npu_available = caps.has_npu(), "Hardware probe complete");
}
