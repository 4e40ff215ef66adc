use std::io::Cursor;

use yaz0::{CompressionLevel, Yaz0Archive, Yaz0Writer};

pub mod aamp;
pub mod binary;
pub mod byml;
pub mod config;
pub mod document;
pub mod error;
pub mod extensions;
pub mod hash;
pub mod msbt;
pub mod rstb;
pub mod sarc;
pub mod session;
pub mod stock;
mod text;
pub mod workspace;

pub use binrw;
pub use yaz0;

pub use binary::Endianness;
pub use config::Config;
pub use document::Document;
pub use error::{Error, ErrorKind, Result};
pub use rstb::SizeTable;
pub use sarc::{Archive, ArchiveNode};
pub use workspace::{Request, Response, Workspace};

/// True when `buf` starts with a Yaz0 header.
pub fn is_yaz0<A: AsRef<[u8]>>(buf: A) -> bool {
    buf.as_ref().starts_with(b"Yaz0")
}

pub fn decompress_yaz0<A: AsRef<[u8]>>(buf: A) -> Result<Vec<u8>> {
    let reader = Cursor::new(buf.as_ref());
    let mut archive = Yaz0Archive::new(reader).map_err(|e| Error::Yaz0(format!("{e:?}")))?;
    archive.decompress().map_err(|e| Error::Yaz0(format!("{e:?}")))
}

/// Decompresses Yaz0 data and passes anything else through.
pub fn decompress_if<A: AsRef<[u8]>>(buf: A) -> Result<Vec<u8>> {
    if is_yaz0(&buf) {
        decompress_yaz0(buf)
    } else {
        Ok(Vec::from(buf.as_ref()))
    }
}

pub fn compress_yaz0<A: AsRef<[u8]>>(buf: A, level: CompressionLevel) -> Result<Vec<u8>> {
    let mut writer = Cursor::new(vec![]);
    let yaz0 = Yaz0Writer::new(&mut writer);
    yaz0.compress_and_write(buf.as_ref(), level)
        .map_err(|e| Error::Yaz0(format!("{e:?}")))?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaz0_round_trip() {
        let data = b"SARC SARC SARC SARC SARC SARC hello hello hello".repeat(8);
        let packed = compress_yaz0(&data, CompressionLevel::Lookahead { quality: 6 }).unwrap();
        assert!(is_yaz0(&packed));
        assert_eq!(decompress_if(&packed).unwrap(), data);
        assert_eq!(decompress_if(&data).unwrap(), data);
    }

    #[test]
    fn bad_yaz0_is_reported() {
        assert!(matches!(
            decompress_yaz0(b"Yaz0\0\0"),
            Err(Error::Yaz0(_))
        ));
    }
}
