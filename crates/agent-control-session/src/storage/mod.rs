//! Location history backends.

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub use file::JsonFileLocationStore;
#[cfg(feature = "memory")]
pub use memory::MemoryLocationStore;

use agent_control_core::StoreError;

/// Reject device ids that cannot safely name a storage directory.
///
/// # Errors
/// Returns `InvalidDeviceId` for blank ids, `.`/`..`, and ids containing path
/// separators or NUL.
pub fn validate_device_id(device_id: &str) -> Result<(), StoreError> {
    let invalid = device_id.trim().is_empty()
        || device_id == "."
        || device_id == ".."
        || device_id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidDeviceId(device_id.to_string()));
    }
    Ok(())
}
