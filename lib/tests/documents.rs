//! Structured documents opened from disk or from inside an archive.

mod common;

use std::fs;

use libbits::aamp::AampNames;
use libbits::binrw::Endian;
use libbits::extensions::DocumentKind;
use libbits::workspace::Editor;
use libbits::{is_yaz0, Archive, Document, Endianness, ErrorKind};
use pretty_assertions::assert_eq;

use common::{archive, path_str, workspace, write_archive, yaz0};

const AAMP_TEXT: &str = "!io
version: 0
type: xml
param_root: !list
  objects:
    MyObject: !obj
      MyValue: !u 7
      Scale: !vec3 [1.0, 2.0, 3.0]
  lists: {}
";

const BYML_TEXT: &str = "name: Hyrule
count: 3
wide: !l 5000000000
items:
- !u 1
- 2.5
- !f64 0.25
";

const MSBT_TEXT: &str = "encoding: utf16
version: 3
sections: [LBL1, TXT2]
entries:
- label: Greeting
  contents:
  - !text Hello
  - !control {group: 0, type: 3, params: ffff}
";

fn encode(kind: DocumentKind, text: &str, endianness: Endianness) -> Vec<u8> {
    Document::from_text(kind, text, endianness, &mut AampNames::builtin())
        .unwrap()
        .encode()
        .unwrap()
}

#[test]
fn file_documents_round_trip_and_save_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Test.byml");
    fs::write(&path, encode(DocumentKind::Byml, BYML_TEXT, Endianness::Little)).unwrap();
    let ws = workspace(dir.path());

    let view = ws.open_structured_document(&path_str(&path)).unwrap();
    assert_eq!(view.format_kind, DocumentKind::Byml);
    assert_eq!(view.endianness, Endianness::Little);
    assert!(view.text.contains("wide: !l 5000000000"));

    let edited = view.text.replace("count: 3", "count: 4");
    ws.update_structured_document(&edited).unwrap();
    assert!(ws.is_dirty(Editor::Document));
    let err = ws.update_structured_document("count: [").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSyntax);

    let first = dir.path().join("first.byml");
    let second = dir.path().join("second.byml");
    for dest in [&first, &second] {
        ws.save_structured_document(&edited, DocumentKind::Byml, Endianness::Little, &path_str(dest))
            .unwrap();
    }
    assert!(!ws.is_dirty(Editor::Document));
    let bytes = fs::read(&first).unwrap();
    assert_eq!(bytes, fs::read(&second).unwrap());

    let reopened = Document::decode(&bytes).unwrap();
    let expected =
        Document::from_text(DocumentKind::Byml, &edited, Endianness::Little, &mut AampNames::builtin())
            .unwrap();
    assert_eq!(reopened.data, expected.data);
}

#[test]
fn archive_documents_save_back_into_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let aamp = encode(DocumentKind::Aamp, AAMP_TEXT, Endianness::Big);
    let inner = archive(Endian::Big, &[("Actor/Link.bxml", &aamp)]);
    let path = write_archive(
        dir.path(),
        "Pack.sarc",
        &[
            ("Actor/Link.bxml", &aamp),
            ("Inner.sbactorpack", &yaz0(inner.to_binary().unwrap())),
        ],
    );
    let ws = workspace(dir.path());
    ws.open_archive(&path_str(&path)).unwrap();
    assert!(ws.get_entry_info("Actor/Link.bxml").unwrap().is_structured_document);

    let view = ws.open_structured_document("ARCHIVE:Actor/Link.bxml").unwrap();
    assert_eq!(view.path, "ARCHIVE:Actor/Link.bxml");
    assert_eq!(view.format_kind, DocumentKind::Aamp);
    assert_eq!(view.endianness, Endianness::Big);
    assert!(view.text.contains("!u 7"));
    let edited = view.text.replace("!u 7", "!u 8");

    let saved = ws
        .save_structured_document(&edited, DocumentKind::Aamp, Endianness::Big, "ARCHIVE:Actor/Link.bxml")
        .unwrap();
    assert_eq!(saved.modified_set.unwrap(), ["Actor/Link.bxml"]);
    assert_eq!(saved.rstb_updated, Some(false));
    assert!(ws.is_dirty(Editor::Archive));

    let nested = "ARCHIVE:Inner.sbactorpack//Actor/Link.bxml";
    let saved = ws
        .save_structured_document(&edited, DocumentKind::Aamp, Endianness::Big, nested)
        .unwrap();
    assert_eq!(
        saved.modified_set.unwrap(),
        [
            "Actor/Link.bxml",
            "Inner.sbactorpack",
            "Inner.sbactorpack//Actor/Link.bxml"
        ]
    );

    ws.save_archive(None).unwrap();
    let outer = Archive::read(&fs::read(&path).unwrap()).unwrap();
    let top = Document::decode(&outer.get_file("Actor/Link.bxml").unwrap().data).unwrap();
    let inner = Archive::read(&outer.get_file("Inner.sbactorpack").unwrap().data).unwrap();
    let nested_doc = Document::decode(&inner.get_file("Actor/Link.bxml").unwrap().data).unwrap();
    let expected = Document::from_text(
        DocumentKind::Aamp,
        &AAMP_TEXT.replace("!u 7", "!u 8"),
        Endianness::Big,
        &mut AampNames::builtin(),
    )
    .unwrap();
    assert_eq!(top.data, expected.data);
    assert_eq!(nested_doc.data, expected.data);
}

#[test]
fn failed_saves_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), "Pack.sarc", &[("Map/A.byml", b"x")]);
    let ws = workspace(dir.path());
    ws.open_archive(&path_str(&path)).unwrap();

    let err = ws
        .save_structured_document("42\n", DocumentKind::Byml, Endianness::Big, "ARCHIVE:Map/A.byml")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    assert!(!ws.is_dirty(Editor::Archive));

    let err = ws
        .save_structured_document(BYML_TEXT, DocumentKind::Byml, Endianness::Big, "ARCHIVE:")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    ws.close(Editor::Archive);
    let err = ws
        .save_structured_document(BYML_TEXT, DocumentKind::Byml, Endianness::Big, "ARCHIVE:Map/A.byml")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotOpen);
}

#[test]
fn messages_and_compressed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(dir.path());

    let msbt = dir.path().join("Msg.msbt");
    ws.save_structured_document(MSBT_TEXT, DocumentKind::Msbt, Endianness::Little, &path_str(&msbt))
        .unwrap();
    let view = ws.open_structured_document(&path_str(&msbt)).unwrap();
    assert_eq!(view.format_kind, DocumentKind::Msbt);
    assert!(view.text.contains("label: Greeting"));
    assert!(view.text.contains("params: ffff"));

    let packed = dir.path().join("Data.sbyml");
    ws.save_structured_document(BYML_TEXT, DocumentKind::Byml, Endianness::Big, &path_str(&packed))
        .unwrap();
    assert!(is_yaz0(fs::read(&packed).unwrap()));
    let view = ws.open_structured_document(&path_str(&packed)).unwrap();
    assert_eq!(view.format_kind, DocumentKind::Byml);
    assert_eq!(view.endianness, Endianness::Big);
    assert!(view.text.contains("name: Hyrule"));
}
