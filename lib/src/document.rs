//! Structured documents: one decoded AAMP, BYML or MSBT file and its byte order.

use binrw::Endian;
use tracing::debug;

use crate::aamp::{self, AampNames, ParameterIO};
use crate::binary::Endianness;
use crate::byml::{self, Byml};
use crate::extensions::DocumentKind;
use crate::msbt::{self, Msbt};
use crate::{decompress_if, Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentData {
    Aamp(ParameterIO),
    Byml { root: Byml, version: u16 },
    Msbt(Msbt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub data: DocumentData,
    pub endianness: Endianness,
}

impl Document {
    /// Decodes a (possibly Yaz0-compressed) structured file, detecting its kind from the magic.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let data = decompress_if(data)?;
        let (data, endian) = match data.get(..8) {
            Some(b"MsgStdBn") => {
                let endian = Msbt::detect_endian(&data)?;
                (DocumentData::Msbt(Msbt::read(&data)?), endian)
            }
            Some(magic) if magic.starts_with(b"AAMP") => {
                let endian = ParameterIO::detect_endian(&data)?;
                (DocumentData::Aamp(ParameterIO::read(&data)?), endian)
            }
            Some(magic) if magic.starts_with(b"BY") || magic.starts_with(b"YB") => {
                let (endian, version) = Byml::detect(&data)?;
                let root = Byml::read(&data)?;
                (DocumentData::Byml { root, version }, endian)
            }
            _ => {
                return Err(Error::invalid(
                    "document",
                    "not an AAMP, BYML or MSBT file",
                ))
            }
        };
        let doc = Self {
            data,
            endianness: endian.into(),
        };
        debug!(kind = ?doc.kind(), endianness = ?doc.endianness, "decoded document");
        Ok(doc)
    }

    pub fn kind(&self) -> DocumentKind {
        match self.data {
            DocumentData::Aamp(_) => DocumentKind::Aamp,
            DocumentData::Byml { .. } => DocumentKind::Byml,
            DocumentData::Msbt(_) => DocumentKind::Msbt,
        }
    }

    pub fn to_text(&self, names: &AampNames) -> Result<String> {
        match &self.data {
            DocumentData::Aamp(pio) => aamp::text::to_text(pio, names),
            DocumentData::Byml { root, .. } => byml::text::to_text(root),
            DocumentData::Msbt(msbt) => msbt::text::to_text(msbt),
        }
    }

    /// Parses text of the given kind. New BYML documents use the default version.
    pub fn from_text(
        kind: DocumentKind,
        text: &str,
        endianness: Endianness,
        names: &mut AampNames,
    ) -> Result<Self> {
        let data = match kind {
            DocumentKind::Aamp => DocumentData::Aamp(aamp::text::from_text(text, names)?),
            DocumentKind::Byml => DocumentData::Byml {
                root: byml::text::from_text(text)?,
                version: byml::DEFAULT_VERSION,
            },
            DocumentKind::Msbt => DocumentData::Msbt(msbt::text::from_text(text)?),
        };
        Ok(Self { data, endianness })
    }

    /// Replaces the content with parsed `text`, keeping kind, byte order and BYML version.
    /// The document is untouched if parsing fails.
    pub fn update_text(&mut self, text: &str, names: &mut AampNames) -> Result<()> {
        let mut parsed = Self::from_text(self.kind(), text, self.endianness, names)?;
        if let (DocumentData::Byml { version, .. }, DocumentData::Byml { version: new, .. }) =
            (&self.data, &mut parsed.data)
        {
            *new = *version;
        }
        *self = parsed;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let endian = Endian::from(self.endianness);
        match &self.data {
            DocumentData::Aamp(pio) => pio.to_binary(endian),
            DocumentData::Byml { root, version } => root.to_binary(endian, *version),
            DocumentData::Msbt(msbt) => msbt.to_binary(endian),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compress_yaz0, ErrorKind};
    use pretty_assertions::assert_eq;

    fn documents() -> Vec<Document> {
        vec![
            Document {
                data: DocumentData::Aamp(crate::aamp::tests::sample()),
                endianness: Endianness::Little,
            },
            Document {
                data: DocumentData::Byml {
                    root: crate::byml::tests::sample(),
                    version: 3,
                },
                endianness: Endianness::Big,
            },
            Document {
                data: DocumentData::Msbt(crate::msbt::tests::sample()),
                endianness: Endianness::Little,
            },
        ]
    }

    #[test]
    fn binary_and_text_round_trips() {
        let mut names = AampNames::builtin();
        for doc in documents() {
            let bytes = doc.encode().unwrap();
            let decoded = Document::decode(&bytes).unwrap();
            assert_eq!(decoded, doc);

            let text = doc.to_text(&names).unwrap();
            let mut parsed = decoded.clone();
            parsed.update_text(&text, &mut names).unwrap();
            assert_eq!(parsed, doc);
        }
    }

    #[test]
    fn compressed_documents_decode() {
        let doc = documents().remove(1);
        let level = yaz0::CompressionLevel::Lookahead { quality: 4 };
        let packed = compress_yaz0(doc.encode().unwrap(), level).unwrap();
        assert_eq!(Document::decode(&packed).unwrap(), doc);
    }

    #[test]
    fn failed_update_keeps_document() {
        let mut names = AampNames::builtin();
        let mut doc = documents().remove(1);
        let before = doc.clone();
        let err = doc.update_text("a: [", &mut names).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSyntax);
        assert_eq!(doc, before);
    }

    #[test]
    fn unknown_data_is_rejected() {
        assert_eq!(
            Document::decode(b"not a document").unwrap_err().kind(),
            ErrorKind::InvalidFormat
        );
    }
}
