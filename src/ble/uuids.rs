//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for multimeter communication.

use uuid::Uuid;

/// Vendor data service UUID.
pub const METER_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fff0_0000_1000_8000_00805f9b34fb);
/// Command characteristic UUID (write to meter).
pub const WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff1_0000_1000_8000_00805f9b34fb);
/// Response characteristic UUID (notifications from meter).
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_fff2_0000_1000_8000_00805f9b34fb);

/// Check if a service UUID is the meter's data service.
pub fn is_meter_service(uuid: &Uuid) -> bool {
    *uuid == METER_SERVICE_UUID
}
