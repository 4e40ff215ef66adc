//! RSTB sessions, the name table and size estimation.

mod common;

use std::fs;

use libbits::binrw::Endian;
use libbits::hash::resource_hash;
use libbits::{ErrorKind, SizeTable};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use common::{path_str, workspace, write_archive};

fn write_table(dir: &std::path::Path, table: &SizeTable) -> std::path::PathBuf {
    let path = dir.join("ResourceSizeTable.product.rsizetable");
    fs::write(&path, table.to_binary().unwrap()).unwrap();
    path
}

#[test]
fn set_get_delete_through_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_table(dir.path(), &SizeTable::new(Endian::Big));
    let archive = write_archive(dir.path(), "Pack.sarc", &[("Actor/Test.bxml", b"data")]);
    let ws = workspace(dir.path());
    ws.open_rstb(&path_str(&path)).unwrap();
    ws.open_archive(&path_str(&archive)).unwrap();

    ws.set_rstb_entry("Actor/Test.bxml", 1024).unwrap();
    assert_eq!(ws.get_rstb_entry("Actor/Test.bxml").unwrap().size, Some(1024));
    let entries = ws.rstb_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "Actor/Test.bxml");
    assert_eq!(entries[0].size, 1024);
    // Setting by hash does not invent a name.
    let hash = resource_hash("Actor/Other.bxml");
    ws.set_rstb_entry(&hash.to_string(), 8).unwrap();
    assert!(ws.rstb_entries().unwrap().iter().any(|e| e.key == hash.to_string()));
    ws.delete_rstb_entry(&hash.to_string()).unwrap();
    // The path is remembered across restarts.
    let restarted = workspace(dir.path());
    restarted.open_rstb(&path_str(&path)).unwrap();
    restarted.set_rstb_entry(&resource_hash("Actor/Test.bxml").to_string(), 16).unwrap();
    assert_eq!(restarted.rstb_entries().unwrap()[0].key, "Actor/Test.bxml");

    let info = ws.get_entry_info("Actor/Test.bxml").unwrap();
    assert_eq!(info.current_rstb_size, Some(1024));

    ws.delete_rstb_entry("Actor/Test.bxml").unwrap();
    assert_eq!(ws.get_rstb_entry("Actor/Test.bxml").unwrap().size, None);
    assert_eq!(ws.get_entry_info("Actor/Test.bxml").unwrap().current_rstb_size, None);
    // Deleting again is not an error.
    ws.delete_rstb_entry("Actor/Test.bxml").unwrap();

    let err = ws.set_rstb_entry("Actor/Test.bxml", 1 << 40).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOutOfRange);
}

#[test]
fn hash_keys_resolve_after_adding_the_name() {
    let dir = tempfile::tempdir().unwrap();
    let hash = resource_hash("Actor/Unknown.bxml");
    let mut table = SizeTable::new(Endian::Little);
    table.set(&hash.to_string(), 4096).unwrap();
    let path = write_table(dir.path(), &table);

    let ws = workspace(dir.path());
    let view = ws.open_rstb(&path_str(&path)).unwrap();
    assert_eq!(view.entries[0].key, hash.to_string());

    assert_eq!(ws.add_name("Actor/Unknown.bxml").unwrap().hash, hash);
    let entries = ws.rstb_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "Actor/Unknown.bxml");
    assert_eq!(entries[0].size, 4096);

    // The name survives a restart.
    let ws = workspace(dir.path());
    ws.open_rstb(&path_str(&path)).unwrap();
    assert_eq!(ws.rstb_entries().unwrap()[0].key, "Actor/Unknown.bxml");
}

#[test]
fn saving_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = SizeTable::new(Endian::Big);
    table.set("Actor/Link.bxml", 100).unwrap();
    table.set("Map/A-1.mubin", 200).unwrap();
    let path = write_table(dir.path(), &table);

    let ws = workspace(dir.path());
    ws.open_rstb(&path_str(&path)).unwrap();
    ws.set_rstb_entry("Actor/Zelda.bxml", 300).unwrap();
    let first = dir.path().join("a.rsizetable");
    let second = dir.path().join("b.rsizetable");
    ws.save_rstb(Some(&path_str(&first))).unwrap();
    ws.save_rstb(Some(&path_str(&second))).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());

    let packed = dir.path().join("c.srsizetable");
    ws.save_rstb(Some(&path_str(&packed))).unwrap();
    let reread = SizeTable::read(&fs::read(&packed).unwrap()).unwrap();
    assert_eq!(reread.get("Actor/Zelda.bxml"), Some(300));

    let json = dir.path().join("table.json");
    ws.export_rstb_json(&path_str(&json)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(value["hash_map"].as_object().unwrap().len(), 3);
}

#[test]
fn archive_edits_update_known_rstb_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = SizeTable::new(Endian::Big);
    table.set("Map/A-1.mubin", 1).unwrap();
    let rstb = write_table(dir.path(), &table);
    let archive = write_archive(dir.path(), "Pack.sarc", &[("Map/A-1.mubin", b"old")]);
    let source = dir.path().join("A-1.mubin");
    fs::write(&source, vec![0u8; 40]).unwrap();

    let ws = workspace(dir.path());
    ws.open_rstb(&path_str(&rstb)).unwrap();
    ws.open_archive(&path_str(&archive)).unwrap();

    let update = ws.replace_entry("Map/A-1.mubin", &path_str(&source)).unwrap();
    assert_eq!(update.rstb_updated, Some(true));
    assert_eq!(
        ws.get_rstb_entry("Map/A-1.mubin").unwrap().size,
        Some(64 + 0xE4 + 0x14)
    );

    // Added files with exact estimates are inserted; guesses are not.
    let update = ws.add_file(&path_str(&source), "Map/B-2.mubin").unwrap();
    assert_eq!(update.rstb_updated, Some(true));
    let update = ws.add_file(&path_str(&source), "Actor/New.bxml").unwrap();
    assert_eq!(update.rstb_updated, Some(false));
    assert_eq!(ws.get_rstb_entry("Actor/New.bxml").unwrap().size, None);
}

#[test]
fn calc_size_of_empty_file_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(dir.path());
    let empty = dir.path().join("content").join("Map").join("A-1.mubin");
    fs::create_dir_all(empty.parent().unwrap()).unwrap();
    fs::write(&empty, b"").unwrap();

    let first = ws.calc_size(&path_str(&empty)).unwrap();
    let second = ws.calc_size(&path_str(&empty)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.size, 0xE4 + 0x14);
    assert!(!first.is_guess);

    let unknown = dir.path().join("notes.txt");
    fs::write(&unknown, b"").unwrap();
    let estimate = ws.calc_size(&path_str(&unknown)).unwrap();
    assert_eq!(estimate.size, 0);
    assert!(estimate.is_guess);
}

#[test]
fn scan_reports_inserted_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let rstb = write_table(dir.path(), &SizeTable::new(Endian::Big));
    let content = dir.path().join("mod").join("content").join("Map");
    fs::create_dir_all(&content).unwrap();
    fs::write(content.join("A-1.mubin"), vec![0u8; 10]).unwrap();
    fs::write(content.join("readme.txt"), b"hi").unwrap();

    let ws = workspace(dir.path());
    ws.open_rstb(&path_str(&rstb)).unwrap();
    let report = ws
        .scan_mod_directory(&path_str(&dir.path().join("mod")))
        .unwrap();
    assert_eq!(report.inserted_count, 1);
    assert_eq!(report.inserted, ["Map/A-1.mubin"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(ws.get_rstb_entry("Map/A-1.mubin").unwrap().size, Some(32 + 0xE4 + 0x14));
    assert!(dir.path().join("data").join("names.json").exists());
}

proptest! {
    #[test]
    fn entries_stay_sorted_after_any_edits(
        ops in prop::collection::vec((any::<bool>(), 0usize..16, 0u32..100_000), 0..64)
    ) {
        let mut table = SizeTable::new(Endian::Big);
        for (set, idx, size) in ops {
            let key = format!("Actor/Pack/Actor{idx}.bactorpack");
            if set {
                table.set(&key, size as u64).unwrap();
            } else {
                table.delete(&key);
            }
        }
        let bytes = table.to_binary().unwrap();
        let count = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let keys: Vec<u32> = bytes[12..12 + count * 8]
            .chunks(8)
            .map(|entry| u32::from_be_bytes(entry[..4].try_into().unwrap()))
            .collect();
        prop_assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(SizeTable::read(&bytes).unwrap(), table);
    }
}
