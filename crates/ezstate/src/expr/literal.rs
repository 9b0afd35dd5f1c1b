//! Literal encoders, for building replacement argument bytecode.

use crate::codec::write_utf16z;

pub const END_OF_LINE: u8 = 0xA1;

/// Smallest and largest values representable by the one-byte literal form.
pub const INLINE_MIN: i32 = 0x3F - 0x40;
pub const INLINE_MAX: i32 = 0x7F - 0x40;

pub fn push_int(out: &mut Vec<u8>, v: i32) {
    if (INLINE_MIN..=INLINE_MAX).contains(&v) {
        out.push((v + 0x40) as u8);
    } else {
        out.push(0x82);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn push_f32(out: &mut Vec<u8>, v: f32) {
    out.push(0x80);
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_f64(out: &mut Vec<u8>, v: f64) {
    out.push(0x81);
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_str(out: &mut Vec<u8>, s: &str) {
    out.push(0xA5);
    write_utf16z(out, s);
}

/// A complete one-value expression line: the literal followed by the end-of-line marker.
pub fn int_line(v: i32) -> Vec<u8> {
    let mut out = Vec::new();
    push_int(&mut out, v);
    out.push(END_OF_LINE);
    out
}

pub fn f32_line(v: f32) -> Vec<u8> {
    let mut out = Vec::new();
    push_f32(&mut out, v);
    out.push(END_OF_LINE);
    out
}
