//! A small hand-assembled ESD file.
//!
//! Two states, one machine. State 10 and state 20 both hold the same
//! condition (shared row 1), state 20 carries a nested condition, and the
//! file ends with a tail holding one UTF-16 name. State 10 stores register 0;
//! a guard in state 20 and a command argument both load it. Rows are laid out in the
//! order the repacker emits them, so an unmodified round trip is
//! byte-identical.

#![allow(dead_code)]

pub const HEADER: usize = 108;
pub const MACHINE_HEADER: i32 = 60;

pub const STATES: i32 = MACHINE_HEADER;
pub const CONDITIONS: i32 = STATES + 2 * 36;
pub const COMMANDS: i32 = CONDITIONS + 4 * 28;
pub const ARGS: i32 = COMMANDS + 3 * 16;
pub const PTRS: i32 = ARGS + 5 * 8;
pub const BLOB: i32 = PTRS + 5 * 4;

pub const NAME: &str = "t100000";

/// `(&GetPlayerDistance(5) < 3)`, storing the call in register 0 first.
pub const EXPR_X: &[u8] = &[0x41, 0x45, 0x85, 0xA7, 0xAF, 0x43, 0x93, 0xA1];
pub const EXPR_Y: &[u8] = &[0x41, 0xA1];
/// 161 as a wide literal; its payload contains the end-of-line byte.
pub const EXPR_W: &[u8] = &[0x82, 0xA1, 0, 0, 0, 0xA1];
/// `(& == 2)`: loads register 0, which state 20 never stores.
pub const EXPR_Z: &[u8] = &[0xAF, 0x42, 0x95, 0xA1];

pub const ARG_100: &[u8] = &[0x82, 100, 0, 0, 0, 0xA1];
pub const ARG_0: &[u8] = &[0x40, 0xA1];
pub const ARG_7: &[u8] = &[0x47, 0xA1];
/// Loads register 0. Arguments never see the condition registers.
pub const ARG_LOAD_R0: &[u8] = &[0xAF, 0xA1];
pub const ARG_NEG1: &[u8] = &[0x3F, 0xA1];

/// Data-region offset of row `i` of a table starting at `base`.
pub fn row(base: i32, width: i32, i: i32) -> i32 {
    base + i * width
}

/// File offset of the `field`th i32 of row `i`.
pub fn field_at(base: i32, width: i32, i: i32, field: usize) -> usize {
    HEADER + row(base, width, i) as usize + field * 4
}

pub fn patch_i32(file: &mut [u8], at: usize, v: i32) {
    file[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    fn put(&mut self, expr: &[u8]) -> [i32; 2] {
        let at = BLOB + self.bytes.len() as i32;
        self.bytes.extend_from_slice(expr);
        [at, expr.len() as i32]
    }
}

fn put_i32s(out: &mut Vec<u8>, values: &[i32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn fixture() -> Vec<u8> {
    let mut blob = Blob { bytes: Vec::new() };
    let arg0 = blob.put(ARG_100);
    let arg1 = blob.put(ARG_0);
    let x = blob.put(EXPR_X);
    let arg2 = blob.put(ARG_7);
    let arg3 = blob.put(ARG_LOAD_R0);
    let y = blob.put(EXPR_Y);
    let arg4 = blob.put(ARG_NEG1);
    let w = blob.put(EXPR_W);
    let z = blob.put(EXPR_Z);
    assert_eq!(blob.bytes.len(), 34);

    let tail_at = BLOB + blob.bytes.len() as i32;
    let mut tail = Vec::new();
    for unit in NAME.encode_utf16() {
        tail.extend_from_slice(&unit.to_le_bytes());
    }
    tail.extend_from_slice(&[0, 0]);
    let name_len = tail.len() as i32;
    tail.extend_from_slice(&[0xEE, 0xEE]);

    let state = |i| row(STATES, 36, i);
    let cond = |i| row(CONDITIONS, 28, i);
    let cmd = |i| row(COMMANDS, 16, i);
    let arg = |i| row(ARGS, 8, i);
    let ptr = |i| row(PTRS, 4, i);

    let mut out = Vec::new();
    put_i32s(
        &mut out,
        &[
            i32::from_le_bytes(*b"fSSL"),
            1,
            1,
            1,
            0x54,
            tail_at + tail.len() as i32,
            6,
            0x2C,
            1,
            0x10,
            1,
            36,
            2,
            28,
            4,
            16,
            3,
            8,
            5,
            PTRS,
            5,
            tail_at,
            name_len,
            -1,
            0,
            0,
            0,
        ],
    );
    assert_eq!(out.len(), HEADER);

    // Machine header: opaque prefix, then (id, offset, size, count).
    put_i32s(&mut out, &[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x42]);
    put_i32s(&mut out, &[0, STATES, 72, 2]);

    // States.
    put_i32s(&mut out, &[10, ptr(0), 2, cmd(0), 1, -1, 0, -1, 0]);
    put_i32s(&mut out, &[20, ptr(3), 2, -1, 0, cmd(2), 1, -1, 0]);

    // Conditions: X, Y (shared), W (nested), Z.
    put_i32s(&mut out, &[state(1), -1, 0, -1, 0, x[0], x[1]]);
    put_i32s(&mut out, &[state(0), cmd(1), 1, -1, 0, y[0], y[1]]);
    put_i32s(&mut out, &[state(0), -1, 0, -1, 0, w[0], w[1]]);
    put_i32s(&mut out, &[-1, -1, 0, ptr(2), 1, z[0], z[1]]);

    // Commands.
    put_i32s(&mut out, &[1, 1, arg(0), 2]);
    put_i32s(&mut out, &[1, 11, arg(2), 2]);
    put_i32s(&mut out, &[1, 6, arg(4), 1]);

    for a in [arg0, arg1, arg2, arg3, arg4] {
        put_i32s(&mut out, &a);
    }

    for c in [0, 1, 2, 1, 3] {
        put_i32s(&mut out, &[cond(c)]);
    }

    assert_eq!(out.len(), HEADER + BLOB as usize);
    out.extend_from_slice(&blob.bytes);
    out.extend_from_slice(&tail);
    out
}
