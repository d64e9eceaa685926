//! Virtual Display Coordinator
//!
//! Decides whether a launch gets a driver-managed virtual display, derives
//! the display's identity, and creates/removes it through a
//! `VirtualDisplayDriver`. Platforms without a driver use
//! `NullDisplayDriver`, which reports itself as unavailable.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Lowest refresh rate handed to the driver, in millihertz.
pub const MIN_REFRESH_MILLIHERTZ: u32 = 1000;

/// Driver health as reported by the integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Ok,
    NotInstalled,
    Failed,
}

/// Parameters of a display creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRequest {
    /// Identity string shown by the driver (client or app name)
    pub identity: String,
    pub display_name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_millihertz: u32,
    pub guid: Uuid,
}

/// Device created by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    /// Output name the capture pipeline should use
    pub display_name: String,
}

/// Virtual display driver capability.
pub trait VirtualDisplayDriver: Send + Sync {
    fn status(&self) -> DriverStatus;
    fn create(&self, request: &DisplayRequest) -> Option<DeviceInfo>;
    fn remove(&self, guid: &Uuid) -> bool;
}

/// Driver for platforms without virtual display support.
#[derive(Debug, Default)]
pub struct NullDisplayDriver;

impl VirtualDisplayDriver for NullDisplayDriver {
    fn status(&self) -> DriverStatus {
        DriverStatus::NotInstalled
    }

    fn create(&self, _request: &DisplayRequest) -> Option<DeviceInfo> {
        None
    }

    fn remove(&self, _guid: &Uuid) -> bool {
        false
    }
}

/// The virtual display created for the current launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualDisplayRecord {
    pub guid: Uuid,
    pub active: bool,
}

/// How physical outputs must be arranged while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayPolicy {
    /// Leave physical outputs alone
    #[default]
    Default,
    /// The streamed output must be the only active physical display
    EnsureOnlyDisplay,
}

/// Inputs to the provision decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayDecision {
    pub headless: bool,
    pub app_requested: bool,
    pub session_requested: bool,
    pub physical_available: bool,
}

impl DisplayDecision {
    /// True when the launch should get a virtual display.
    ///
    /// A missing physical display forces one like an explicit request does.
    /// In every other case the physical path wins, which is also where
    /// `DisplayPolicy::EnsureOnlyDisplay` is enforced.
    pub fn use_virtual_display(&self) -> bool {
        self.headless || self.app_requested || self.session_requested || !self.physical_available
    }
}

/// Where a display's GUID comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// One persisted GUID for every launch
    Shared,
    /// The app's UUID, mixed with the client's when `per_client` is set
    AppIdentity { per_client: bool },
    /// The client's UUID
    Client,
}

impl IdentityMode {
    pub fn select(shared: bool, use_app_identity: bool, per_client: bool) -> Self {
        if shared {
            IdentityMode::Shared
        } else if use_app_identity {
            IdentityMode::AppIdentity { per_client }
        } else {
            IdentityMode::Client
        }
    }
}

fn xor_uuids(a: &Uuid, b: &Uuid) -> Uuid {
    let mut bytes = *a.as_bytes();
    for (byte, other) in bytes.iter_mut().zip(b.as_bytes()) {
        *byte ^= other;
    }
    Uuid::from_bytes(bytes)
}

/// Derive the display GUID for a launch. Same inputs, same GUID.
pub fn derive_display_guid(
    mode: IdentityMode,
    app_uuid: &Uuid,
    client_uuid: &Uuid,
    shared_guid: &Uuid,
) -> Uuid {
    match mode {
        IdentityMode::Shared => *shared_guid,
        IdentityMode::AppIdentity { per_client: true } => xor_uuids(app_uuid, client_uuid),
        IdentityMode::AppIdentity { per_client: false } => *app_uuid,
        IdentityMode::Client => *client_uuid,
    }
}

/// Refresh rate to request, in the driver's millihertz convention.
pub fn refresh_millihertz(fps: f64, double_refresh: bool) -> u32 {
    let mut millihertz = (fps * 1000.0).round().max(0.0) as u32;
    if double_refresh {
        millihertz = millihertz.saturating_mul(2);
    }
    millihertz.max(MIN_REFRESH_MILLIHERTZ)
}

/// Creates and removes the launch's virtual display.
pub struct VirtualDisplayCoordinator {
    driver: Box<dyn VirtualDisplayDriver>,
}

impl VirtualDisplayCoordinator {
    pub fn new(driver: Box<dyn VirtualDisplayDriver>) -> Self {
        Self { driver }
    }

    /// True when the driver is installed and healthy.
    pub fn available(&self) -> bool {
        self.driver.status() == DriverStatus::Ok
    }

    /// Ask the driver for a display. Failures are logged, never fatal.
    pub fn provision(&self, request: &DisplayRequest) -> Option<(VirtualDisplayRecord, DeviceInfo)> {
        let status = self.driver.status();
        if status != DriverStatus::Ok {
            warn!("Virtual display driver unavailable ({:?}), continuing without one", status);
            return None;
        }

        match self.driver.create(request) {
            Some(device) => {
                info!(
                    "Virtual display {} created as {:?} ({}x{} @ {} mHz)",
                    request.guid,
                    device.display_name,
                    request.width,
                    request.height,
                    request.refresh_millihertz
                );
                let record = VirtualDisplayRecord {
                    guid: request.guid,
                    active: true,
                };
                Some((record, device))
            }
            None => {
                warn!("Failed to create virtual display {}, continuing without one", request.guid);
                None
            }
        }
    }

    /// Remove a display created by `provision`. Failures only warn.
    pub fn teardown(&self, record: &mut VirtualDisplayRecord) {
        if !record.active {
            return;
        }
        if self.driver.remove(&record.guid) {
            info!("Virtual display {} removed", record.guid);
        } else {
            warn!("Failed to remove virtual display {}", record.guid);
        }
        record.active = false;
    }
}
