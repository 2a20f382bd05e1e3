use std::collections::BTreeMap;

pub mod config;
pub mod cycle;
pub mod error;
pub mod join;
pub mod lostik_usb;
pub mod moisture;
pub mod relay;
pub mod telemetry;

/// Tag key of the device identifier.
pub const TAG_DEV_EUI: &'static str = "devEUI";

/// Static tags attached to every point of a run.
pub fn device_tags(dev_eui: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(TAG_DEV_EUI.to_string(), dev_eui.to_string());
    tags
}
