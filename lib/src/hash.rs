use std::num::Wrapping;

/// Multiplier stored in every SFAT header this crate writes.
pub const SARC_HASH_MULTIPLIER: u32 = 0x65;

/// CRC-32 (IEEE) of a canonical resource path. RSTB keys and AAMP names use it.
pub fn resource_hash(path: &str) -> u32 {
    crc32fast::hash(path.as_bytes())
}

/// SFAT filename hash. Bytes are sign-extended, as the console toolchain does.
pub fn sarc_name_hash(name: &str, multiplier: u32) -> u32 {
    let mut output = Wrapping(0u32);
    for byte in name.bytes() {
        output = Wrapping(byte as i8 as u32) + (output * Wrapping(multiplier));
    }
    output.0
}

/// MSBT LBL1 bucket for `label` in a table of `slots` buckets.
pub fn label_hash(label: &str, slots: u32) -> u32 {
    let mut output = Wrapping(0u32);
    for byte in label.bytes() {
        output = Wrapping(byte as u32) + (output * Wrapping(0x492));
    }
    match slots {
        0 => 0,
        slots => output.0 % slots,
    }
}
