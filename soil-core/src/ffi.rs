//! C ABI for linking soil-core as a static library into C firmware (e.g. a hub built on
//! the vendor SDK), so both ends share one codec.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::slice;

use crate::protocol::{Message, SensorReading, DEVICE_ID_LEN};
use crate::wire::{decode_frame, encode_ack, encode_data};

/// Wire format revision. Exported so the staticlib has a stable symbol to link against.
pub const WIRE_REVISION: u8 = 1;

/// Decoded Data frame, C layout. `device_id` is NUL-terminated.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SoilReadingC {
    pub device_id: [c_char; DEVICE_ID_LEN],
    pub timestamp_ms: u64,
    pub soil_voltage: f32,
    pub soil_moisture_pct: f32,
    pub soil_raw: i32,
    pub battery_voltage: f32,
    pub battery_pct: f32,
}

#[no_mangle]
pub extern "C" fn soil_link_wire_revision() -> u8 {
    WIRE_REVISION
}

/// Encode a Data frame into out_buf. Returns bytes written, or -1 on null pointer, invalid
/// UTF-8 device id, or short buffer.
///
/// # Safety
/// `device_id` must be a valid NUL-terminated string; `out_buf` must be valid for `out_len` bytes.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn soil_link_encode_data(
    device_id: *const c_char,
    timestamp_ms: u64,
    soil_voltage: f32,
    soil_moisture_pct: f32,
    soil_raw: i32,
    battery_voltage: f32,
    battery_pct: f32,
    out_buf: *mut u8,
    out_len: usize,
) -> c_int {
    if device_id.is_null() || out_buf.is_null() {
        return -1;
    }
    let Ok(id) = CStr::from_ptr(device_id).to_str() else {
        return -1;
    };
    let reading = SensorReading {
        device_id: id.to_string(),
        timestamp_ms,
        soil_voltage,
        soil_moisture_pct,
        soil_raw,
        battery_voltage,
        battery_pct,
    };
    let frame = match encode_data(&reading) {
        Ok(f) => f,
        Err(_) => return -1,
    };
    copy_out(&frame, out_buf, out_len)
}

/// Write the one-byte Ack frame. Returns 1, or -1 on null/short buffer.
///
/// # Safety
/// `out_buf` must be valid for `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn soil_link_encode_ack(out_buf: *mut u8, out_len: usize) -> c_int {
    if out_buf.is_null() {
        return -1;
    }
    copy_out(&encode_ack(), out_buf, out_len)
}

/// Decode a frame. Returns 0 for Data (fills `out_reading`), 1 for Ack, -1 on reject.
///
/// # Safety
/// `bytes` must be valid for `len` bytes; `out_reading` must point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn soil_link_decode_frame(
    bytes: *const u8,
    len: usize,
    out_reading: *mut SoilReadingC,
) -> c_int {
    if bytes.is_null() {
        return -1;
    }
    let frame = slice::from_raw_parts(bytes, len);
    match decode_frame(frame) {
        Ok(Message::Ack) => 1,
        Ok(Message::Data(reading)) => {
            if out_reading.is_null() {
                return -1;
            }
            let mut id = [0 as c_char; DEVICE_ID_LEN];
            for (dst, src) in id
                .iter_mut()
                .zip(reading.device_id.as_bytes().iter().take(DEVICE_ID_LEN - 1))
            {
                *dst = *src as c_char;
            }
            out_reading.write(SoilReadingC {
                device_id: id,
                timestamp_ms: reading.timestamp_ms,
                soil_voltage: reading.soil_voltage,
                soil_moisture_pct: reading.soil_moisture_pct,
                soil_raw: reading.soil_raw,
                battery_voltage: reading.battery_voltage,
                battery_pct: reading.battery_pct,
            });
            0
        }
        Err(_) => -1,
    }
}

unsafe fn copy_out(frame: &[u8], out_buf: *mut u8, out_len: usize) -> c_int {
    if frame.len() > out_len {
        return -1;
    }
    out_buf.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
    frame.len() as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DATA_FRAME_LEN;

    #[test]
    fn encode_then_decode_through_c_abi() {
        let id = b"SOIL_AABBCCDDEEFF\0";
        let mut buf = [0u8; 250];
        let n = unsafe {
            soil_link_encode_data(
                id.as_ptr() as *const c_char,
                42,
                1.5,
                55.0,
                2048,
                3.7,
                -1.0,
                buf.as_mut_ptr(),
                buf.len(),
            )
        };
        assert_eq!(n as usize, DATA_FRAME_LEN);

        let mut out = std::mem::MaybeUninit::<SoilReadingC>::uninit();
        let kind = unsafe { soil_link_decode_frame(buf.as_ptr(), n as usize, out.as_mut_ptr()) };
        assert_eq!(kind, 0);
        let out = unsafe { out.assume_init() };
        assert_eq!(out.timestamp_ms, 42);
        assert_eq!(out.soil_raw, 2048);
        assert_eq!(out.battery_pct, -1.0);
        let decoded_id = unsafe { CStr::from_ptr(out.device_id.as_ptr()) };
        assert_eq!(decoded_id.to_str().unwrap(), "SOIL_AABBCCDDEEFF");
    }

    #[test]
    fn short_buffer_rejected() {
        let id = b"x\0";
        let mut buf = [0u8; 10];
        let n = unsafe {
            soil_link_encode_data(
                id.as_ptr() as *const c_char,
                0,
                0.0,
                0.0,
                0,
                0.0,
                0.0,
                buf.as_mut_ptr(),
                buf.len(),
            )
        };
        assert_eq!(n, -1);
    }

    #[test]
    fn ack_through_c_abi() {
        let mut buf = [0u8; 1];
        assert_eq!(unsafe { soil_link_encode_ack(buf.as_mut_ptr(), 1) }, 1);
        let kind =
            unsafe { soil_link_decode_frame(buf.as_ptr(), 1, std::ptr::null_mut()) };
        assert_eq!(kind, 1);
        assert_eq!(unsafe { soil_link_decode_frame(buf.as_ptr(), 0, std::ptr::null_mut()) }, -1);
    }
}
