//! File kinds recognized by extension, and canonical resource names.

use std::path::Path;

pub const SARC_EXTS: &[&str] = &[
    "sarc", "pack", "bactorpack", "bmodelsh", "beventpack", "stera", "stats", "ssarc", "spack",
    "sbactorpack", "sbmodelsh", "sbeventpack", "sstera", "sstats", "blarc", "sblarc", "bgenv",
    "sbgenv", "genvb", "sgenvb", "bfarc", "sbfarc", "bfsarc", "sbfsarc", "bkres", "sbkres",
];

pub const AAMP_EXTS: &[&str] = &[
    "bxml", "sbxml", "bas", "sbas", "baglblm", "sbaglblm", "baglccr", "sbaglccr", "baglclwd",
    "sbaglclwd", "baglcube", "sbaglcube", "bagldof", "sbagldof", "baglenv", "sbaglenv",
    "baglenvset", "sbaglenvset", "baglfila", "sbaglfila", "bagllmap", "sbagllmap", "bagllref",
    "sbagllref", "baglmf", "sbaglmf", "baglshpp", "sbaglshpp", "baiprog", "sbaiprog", "baslist",
    "sbaslist", "bassetting", "sbassetting", "batcl", "sbatcl", "batcllist", "sbatcllist",
    "bawareness", "sbawareness", "bawntable", "sbawntable", "bbonectrl", "sbbonectrl",
    "bchemical", "sbchemical", "bchmres", "sbchmres", "bdemo", "sbdemo", "bdgnenv", "sbdgnenv",
    "bdmgparam", "sbdmgparam", "bdrop", "sbdrop", "bgapkginfo", "sbgapkginfo", "bgapkglist",
    "sbgapkglist", "bglght", "sbglght", "bgmsconf", "sbgmsconf", "bgparamlist",
    "sbgparamlist", "bgsdw", "sbgsdw", "bksky", "sbksky", "blifecondition", "sblifecondition",
    "blod", "sblod", "bmodellist", "sbmodellist", "bmscdef", "sbmscdef", "bmscinfo",
    "sbmscinfo", "bnetfp", "sbnetfp", "bphyscharcon", "sbphyscharcon", "bphyscontact",
    "sbphyscontact", "bphysics", "sbphysics", "bphyslayer", "sbphyslayer", "bphysmaterial",
    "sbphysmaterial", "bphyssb", "sbphyssb", "bphyssubmat", "sbphyssubmat", "bptclconf",
    "sbptclconf", "brecipe", "sbrecipe", "brgbw", "sbrgbw", "brgcon", "sbrgcon", "brgconfig",
    "sbrgconfig", "brgconfiglist", "sbrgconfiglist", "bsfbt", "sbsfbt", "bsft", "sbsft", "bshop",
    "sbshop", "bumii", "sbumii", "bvege", "sbvege", "bactcapt", "sbactcapt",
];

pub const BYML_EXTS: &[&str] = &[
    "bgdata", "sbgdata", "bquestpack", "sbquestpack", "byml", "sbyml", "mubin", "smubin",
    "baischedule", "sbaischedule", "baniminfo", "sbaniminfo", "bgsvdata", "sbgsvdata",
];

pub const MSBT_EXTS: &[&str] = &["msbt"];

/// The kind of structured document a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Aamp,
    Byml,
    Msbt,
}

/// Extension of the final path component, without the dot.
pub fn extension(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map_or("", |idx| &name[idx + 1..])
}

pub fn is_archive_ext(ext: &str) -> bool {
    SARC_EXTS.contains(&ext)
}

pub fn document_kind(ext: &str) -> Option<DocumentKind> {
    if AAMP_EXTS.contains(&ext) {
        Some(DocumentKind::Aamp)
    } else if BYML_EXTS.contains(&ext) {
        Some(DocumentKind::Byml)
    } else if MSBT_EXTS.contains(&ext) {
        Some(DocumentKind::Msbt)
    } else {
        None
    }
}

/// Detects the document kind from the data, falling back to the extension.
pub fn sniff_document(path: &str, data: &[u8]) -> Option<DocumentKind> {
    match data.get(..8) {
        Some(b"MsgStdBn") => Some(DocumentKind::Msbt),
        Some(magic) if &magic[..4] == b"AAMP" => Some(DocumentKind::Aamp),
        Some(magic) if &magic[..2] == b"BY" || &magic[..2] == b"YB" => Some(DocumentKind::Byml),
        _ => document_kind(extension(path)),
    }
}

/// True when a file is conventionally stored Yaz0-compressed.
pub fn should_compress(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.starts_with('s') && ext != "sarc")
}

/// Maps a compressed-form extension to its uncompressed form (`sbactorpack` to `bactorpack`).
pub fn uncompressed_ext(ext: &str) -> &str {
    match ext.strip_prefix('s') {
        Some(rest) if !rest.is_empty() && ext != "sarc" && ext != "stera" && ext != "stats" => {
            rest
        }
        _ => ext,
    }
}

fn uncompress_name(name: &str) -> String {
    let ext = extension(name);
    if ext.is_empty() {
        return name.to_string();
    }
    let stem = &name[..name.len() - ext.len()];
    format!("{stem}{}", uncompressed_ext(ext))
}

/// Canonical resource name of a member path inside an archive.
pub fn canonical_member_name(name: &str) -> String {
    uncompress_name(name.trim_start_matches('/'))
}

/// Canonical resource name of a file inside a dumped game or mod tree. Returns
/// `None` when the path has no `content`, `romfs` or `aoc` root.
pub fn canonical_name(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref().to_string_lossy().replace('\\', "/");
    let rel = if let Some(idx) = path.find("aoc/") {
        let rest = &path[idx + 4..];
        let rest = rest.strip_prefix("content/").unwrap_or(rest);
        let rest = rest.strip_prefix("0010/").unwrap_or(rest);
        let rest = rest.strip_prefix("romfs/").unwrap_or(rest);
        format!("Aoc/0010/{rest}")
    } else if let Some(idx) = path.find("content/") {
        path[idx + "content/".len()..].to_string()
    } else if let Some(idx) = path.find("romfs/") {
        path[idx + "romfs/".len()..].to_string()
    } else {
        return None;
    };
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() || rel.ends_with('/') || rel == "Aoc/0010/" {
        return None;
    }
    Some(uncompress_name(rel))
}
