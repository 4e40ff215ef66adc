//! Resource size estimation.
//!
//! Sizes for kinds with a fixed parser footprint are computed exactly from the file size.
//! Models and parameter archives have footprints that depend on their content, so those
//! are approximated by size-bracketed multipliers.

use binrw::Endian;
use serde::Serialize;

use crate::extensions::{extension, uncompressed_ext};
use crate::{decompress_if, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub size: u32,
    pub is_guess: bool,
}

impl Estimate {
    const UNKNOWN: Estimate = Estimate {
        size: 0,
        is_guess: true,
    };
}

/// Resource overhead added to every file, per platform.
const WIIU_OVERHEAD: u32 = 0xE4;
const SWITCH_OVERHEAD: u32 = 0x168;

/// Parser footprint per resource kind: (extension, Wii U, Switch).
const FACTORY_SIZES: &[(&str, u32, u32)] = &[
    ("sarc", 0x44, 0x68),
    ("pack", 0x44, 0x68),
    ("bactorpack", 0x44, 0x68),
    ("bmodelsh", 0x44, 0x68),
    ("beventpack", 0x44, 0x68),
    ("stera", 0x44, 0x68),
    ("stats", 0x44, 0x68),
    ("bgenv", 0x44, 0x68),
    ("blarc", 0x44, 0x68),
    ("bfarc", 0x44, 0x68),
    ("bkres", 0x44, 0x68),
    ("bcamanim", 0x2C, 0x50),
    ("batpl", 0x24, 0x40),
    ("bnfprl", 0x24, 0x40),
    ("bplacement", 0x28, 0x48),
    ("hks", 0x1C, 0x38),
    ("lua", 0x1C, 0x38),
    ("bactcapt", 0x3B4, 0x538),
    ("bitemico", 0x3C, 0x60),
    ("jpg", 0x50, 0x80),
    ("bmaptex", 0x3C, 0x60),
    ("bstftex", 0x3C, 0x60),
    ("bgdata", 0xCC, 0x140),
    ("bgsvdata", 0x1C, 0x38),
    ("hknm2", 0x28, 0x48),
    ("bmscdef", 0x1D4, 0x2A8),
    ("bars", 0x84, 0xB0),
    ("bmodellist", 0x508, 0x7D0),
    ("bphysics", 0x324, 0x470),
    ("bchemical", 0x27C, 0x3C0),
    ("batcllist", 0x2A4, 0x3F0),
    ("batcl", 0x2CC, 0x428),
    ("baischedule", 0x1A4, 0x2B8),
    ("brgconfiglist", 0x284, 0x3D0),
    ("brgconfig", 0x2E0C, 0x42D8),
    ("brgbw", 0x1D4, 0x2C0),
    ("bawareness", 0x7E4, 0xB38),
    ("blod", 0x27C, 0x3C0),
    ("bbonectrl", 0x5DC, 0x8D0),
    ("blifecondition", 0x334, 0x4B0),
    ("bumii", 0x1A4, 0x2B8),
    ("baniminfo", 0x1AC, 0x2C8),
    ("byml", 0x14, 0x20),
    ("bassetting", 0x174, 0x260),
    ("hkrb", 0x14, 0x20),
    ("hkrg", 0x14, 0x20),
    ("bphyssb", 0x3D4, 0x5B0),
    ("hkcl", 0x9C, 0xE8),
    ("hksc", 0xD8, 0x140),
    ("hktmrb", 0x28, 0x48),
    ("brgcon", 0x28, 0x48),
    ("esetlist", 0x1C, 0x38),
    ("bdemo", 0x7A4, 0xB20),
    ("bfevfl", 0x24, 0x40),
    ("bfevtm", 0x24, 0x40),
    ("msbt", 0x44, 0x68),
    ("bfstm", 0x24, 0x40),
    ("bfsar", 0x24, 0x40),
    ("bquestpack", 0x14, 0x20),
    ("mubin", 0x14, 0x20),
];

/// Kinds whose footprint depends on content: estimated, never computed.
const AAMP_GUESS_KINDS: &[&str] = &[
    "baiprog",
    "bgparamlist",
    "bdrop",
    "bxml",
    "brecipe",
    "bshop",
    "bas",
    "baslist",
    "bdmgparam",
];

fn factory_size(ext: &str, endian: Endian) -> Option<u32> {
    FACTORY_SIZES
        .iter()
        .find(|(kind, ..)| *kind == ext)
        .map(|(_, wiiu, switch)| match endian {
            Endian::Big => *wiiu,
            Endian::Little => *switch,
        })
}

/// Picks the multiplier of the first bracket whose upper bound covers `size`.
fn bracketed(size: u32, brackets: &[(u32, f64)], rest: f64) -> u32 {
    let factor = brackets
        .iter()
        .find(|(upper, _)| size <= *upper)
        .map_or(rest, |(_, factor)| *factor);
    (size as f64 * factor) as u32
}

pub fn guess_bfres_size(size: u32, name: &str) -> u32 {
    if name.contains(".Tex") {
        bracketed(
            size,
            &[
                (100, 9.0),
                (2000, 7.0),
                (3000, 5.0),
                (4000, 4.0),
                (8500, 3.0),
                (12000, 2.0),
                (17000, 1.75),
                (30000, 1.5),
                (45000, 1.3),
                (100_000, 1.2),
                (150_000, 1.1),
                (200_000, 1.07),
                (250_000, 1.045),
                (300_000, 1.035),
                (600_000, 1.03),
                (1_000_000, 1.015),
                (1_800_000, 1.009),
                (4_500_000, 1.005),
                (6_000_000, 1.002),
            ],
            1.0015,
        )
    } else {
        bracketed(
            size,
            &[
                (500, 7.0),
                (750, 4.0),
                (2000, 3.0),
                (400_000, 1.75),
                (600_000, 1.7),
                (1_500_000, 1.6),
                (3_000_000, 1.5),
            ],
            1.25,
        )
    }
}

/// Estimates a parameter archive. Kinds without a known curve yield 0.
pub fn guess_aamp_size(size: u32, ext: &str) -> u32 {
    match ext {
        "baiprog" => bracketed(
            size,
            &[(380, 7.0), (400, 6.0), (450, 5.5), (600, 5.0), (1000, 4.0), (1750, 3.5)],
            3.0,
        ),
        "bgparamlist" => bracketed(
            size,
            &[(100, 20.0), (150, 12.0), (250, 10.0), (350, 8.0), (450, 7.0)],
            6.0,
        ),
        "bdrop" => bracketed(
            size,
            &[(200, 8.5), (250, 7.0), (350, 6.0), (450, 5.25), (850, 4.5)],
            4.0,
        ),
        "bxml" => bracketed(
            size,
            &[(350, 6.0), (450, 5.0), (550, 4.5), (650, 4.0), (800, 3.5)],
            3.0,
        ),
        "brecipe" => bracketed(
            size,
            &[(100, 12.5), (160, 8.5), (200, 7.5), (215, 7.0)],
            6.5,
        ),
        "bshop" => bracketed(size, &[(200, 7.25), (400, 6.0), (500, 5.0)], 4.05),
        "bas" => bracketed(
            size,
            &[
                (100, 20.0),
                (200, 12.5),
                (300, 10.0),
                (600, 8.0),
                (1500, 6.0),
                (2000, 5.5),
                (15000, 5.0),
            ],
            4.5,
        ),
        "baslist" => bracketed(
            size,
            &[(100, 15.0), (200, 10.0), (300, 8.0), (500, 6.0), (800, 5.0), (4000, 4.0)],
            3.5,
        ),
        "bdmgparam" => bracketed(size, &[(1000, 8.0), (5000, 6.0)], 5.0),
        _ => 0,
    }
}

/// Estimates the RSTB size of `data`, a resource named `name`, for the platform `endian`.
pub fn calc_size(data: &[u8], name: &str, endian: Endian) -> Result<Estimate> {
    let data = decompress_if(data)?;
    let ext = uncompressed_ext(extension(name));
    let real_size = u32::try_from(data.len()).unwrap_or(u32::MAX);

    if ext == "bfres" {
        return Ok(Estimate {
            size: guess_bfres_size(real_size, name),
            is_guess: true,
        });
    }
    if AAMP_GUESS_KINDS.contains(&ext) {
        return Ok(Estimate {
            size: guess_aamp_size(real_size, ext),
            is_guess: true,
        });
    }
    let Some(parser) = factory_size(ext, endian) else {
        return Ok(Estimate::UNKNOWN);
    };
    let overhead = match endian {
        Endian::Big => WIIU_OVERHEAD,
        Endian::Little => SWITCH_OVERHEAD,
    };
    let size = real_size
        .checked_next_multiple_of(32)
        .and_then(|size| size.checked_add(overhead + parser))
        .unwrap_or(u32::MAX);
    Ok(Estimate {
        size,
        is_guess: false,
    })
}
