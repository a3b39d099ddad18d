//! Little-endian field access over byte buffers.
//!
//! Every on-heap layout is defined in terms of these helpers; nothing
//! reinterprets arena bytes as a Rust aggregate.

use crate::Ptr;

#[inline]
pub fn read_u8_at(buf: &[u8], offset: usize) -> u8 {
    buf[offset]
}

#[inline]
pub fn write_u8_at(buf: &mut [u8], offset: usize, value: u8) {
    buf[offset] = value;
}

#[inline]
pub fn read_u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(array_at(buf, offset))
}

#[inline]
pub fn write_u32_at(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn read_u64_at(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(array_at(buf, offset))
}

#[inline]
pub fn write_u64_at(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn read_i64_at(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(array_at(buf, offset))
}

#[inline]
pub fn write_i64_at(buf: &mut [u8], offset: usize, value: i64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn read_f64_at(buf: &[u8], offset: usize) -> f64 {
    f64::from_bits(read_u64_at(buf, offset))
}

#[inline]
pub fn write_f64_at(buf: &mut [u8], offset: usize, value: f64) {
    write_u64_at(buf, offset, value.to_bits());
}

#[inline]
pub fn read_ptr_at(buf: &[u8], offset: usize) -> Ptr {
    Ptr::from_raw(read_u64_at(buf, offset))
}

#[inline]
pub fn write_ptr_at(buf: &mut [u8], offset: usize, value: Ptr) {
    write_u64_at(buf, offset, value.raw());
}

#[inline]
fn array_at<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
