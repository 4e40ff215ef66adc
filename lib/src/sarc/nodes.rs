use serde::Serialize;

use crate::extensions;
use crate::{Error, Result};

/// A file within an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    /// Full path inside the archive, without the leading slash of rooted archives.
    pub path: String,
    pub data: Vec<u8>,
    /// Stored hash of an entry that has no name. Such files live at the root as `0x<hash>`.
    pub unnamed_hash: Option<u32>,
}

impl File {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
            unnamed_hash: None,
        }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// True for data the archive can open as a nested directory.
    pub fn is_archive(&self) -> bool {
        is_archive_data(&self.path, &self.data)
    }
}

pub fn is_archive_data(path: &str, data: &[u8]) -> bool {
    data.starts_with(b"SARC")
        || (data.starts_with(b"Yaz0") && data.get(0x11..0x15) == Some(b"SARC"))
        || extensions::is_archive_ext(extensions::extension(path))
}

/// A directory. Children keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub children: Vec<(String, ArchiveNode)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveNode {
    Directory(Directory),
    File(File),
}

impl ArchiveNode {
    pub const fn is_file(&self) -> bool {
        matches!(self, ArchiveNode::File(_))
    }

    pub const fn is_dir(&self) -> bool {
        matches!(self, ArchiveNode::Directory(_))
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

impl Directory {
    fn child(&self, name: &str) -> Option<&ArchiveNode> {
        self.children
            .iter()
            .find(|(child, _)| child == name)
            .map(|(_, node)| node)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut ArchiveNode> {
        self.children
            .iter_mut()
            .find(|(child, _)| child == name)
            .map(|(_, node)| node)
    }

    pub fn get(&self, path: &str) -> Option<&ArchiveNode> {
        let parts = components(path);
        let (last, parents) = parts.split_last()?;
        let mut dir = self;
        for part in parents {
            match dir.child(part)? {
                ArchiveNode::Directory(next) => dir = next,
                ArchiveNode::File(_) => return None,
            }
        }
        dir.child(last)
    }

    pub fn get_file(&self, path: &str) -> Option<&File> {
        match self.get(path)? {
            ArchiveNode::File(file) => Some(file),
            ArchiveNode::Directory(_) => None,
        }
    }

    fn get_file_mut(&mut self, path: &str) -> Option<&mut File> {
        let parts = components(path);
        let (last, parents) = parts.split_last()?;
        let mut dir = self;
        for part in parents {
            match dir.child_mut(part)? {
                ArchiveNode::Directory(next) => dir = next,
                ArchiveNode::File(_) => return None,
            }
        }
        match dir.child_mut(last)? {
            ArchiveNode::File(file) => Some(file),
            ArchiveNode::Directory(_) => None,
        }
    }

    /// Walks to the directory at `parts`, creating missing ones. Fails if a file is in the way.
    fn make_dirs(&mut self, parts: &[&str], full: &str) -> Result<&mut Directory> {
        let mut dir = self;
        for part in parts {
            if dir.child(part).is_none() {
                dir.children.push((
                    part.to_string(),
                    ArchiveNode::Directory(Directory::default()),
                ));
            }
            match dir.child_mut(part) {
                Some(ArchiveNode::Directory(next)) => dir = next,
                _ => return Err(Error::DuplicatePath(full.to_string())),
            }
        }
        Ok(dir)
    }

    /// Inserts `file` at its path. Errors if anything already occupies the path.
    pub fn insert(&mut self, mut file: File) -> Result<()> {
        let path = file.path.clone();
        let parts = components(&path);
        let Some((last, parents)) = parts.split_last() else {
            return Err(Error::NotFound(path));
        };
        // Fail before creating any directory.
        let mut cursor = Some(&*self);
        for part in parents {
            cursor = match cursor.and_then(|dir| dir.child(part)) {
                Some(ArchiveNode::File(_)) => return Err(Error::DuplicatePath(path)),
                Some(ArchiveNode::Directory(next)) => Some(next),
                None => None,
            };
        }
        if cursor.and_then(|dir| dir.child(last)).is_some() {
            return Err(Error::DuplicatePath(path));
        }
        file.path = parts.join("/");
        let dir = self.make_dirs(parents, &path)?;
        dir.children.push((last.to_string(), ArchiveNode::File(file)));
        Ok(())
    }

    /// Removes and returns the node at `path`.
    pub fn remove(&mut self, path: &str) -> Result<ArchiveNode> {
        let parts = components(path);
        let not_found = || Error::NotFound(path.to_string());
        let (last, parents) = parts.split_last().ok_or_else(not_found)?;
        let mut dir = self;
        for part in parents {
            match dir.child_mut(part) {
                Some(ArchiveNode::Directory(next)) => dir = next,
                _ => return Err(not_found()),
            }
        }
        let idx = dir
            .children
            .iter()
            .position(|(name, _)| name == last)
            .ok_or_else(not_found)?;
        Ok(dir.children.remove(idx).1)
    }

    /// Swaps the data of an existing file and returns the old data.
    pub fn replace(&mut self, path: &str, data: Vec<u8>) -> Result<Vec<u8>> {
        let file = self
            .get_file_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(std::mem::replace(&mut file.data, data))
    }

    /// Moves a file or directory subtree to a new path.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.get(old).is_none() {
            return Err(Error::NotFound(old.to_string()));
        }
        let new_parts = components(new);
        if new_parts.is_empty() {
            return Err(Error::NotFound(new.to_string()));
        }
        if self.get(new).is_some() || self.has_file_on_chain(&new_parts) {
            return Err(Error::DuplicatePath(new.to_string()));
        }
        let old_parts = components(old);
        if new_parts.len() > old_parts.len() && new_parts[..old_parts.len()] == old_parts[..] {
            return Err(Error::DuplicatePath(new.to_string()));
        }
        let node = self.remove(old)?;
        let new_path = new_parts.join("/");
        let files = match node {
            ArchiveNode::File(file) => vec![(String::new(), file)],
            ArchiveNode::Directory(dir) => dir
                .into_files()
                .into_iter()
                .map(|file| {
                    let rel = file.path[old_parts.join("/").len()..].to_string();
                    (rel, file)
                })
                .collect(),
        };
        if files.is_empty() {
            let (last, parents) = new_parts.split_last().ok_or_else(|| Error::NotFound(new.into()))?;
            let dir = self.make_dirs(parents, new)?;
            dir.children
                .push((last.to_string(), ArchiveNode::Directory(Directory::default())));
            return Ok(());
        }
        for (rel, mut file) in files {
            file.path = format!("{new_path}{rel}");
            file.unnamed_hash = None;
            self.insert(file)?;
        }
        Ok(())
    }

    fn has_file_on_chain(&self, parts: &[&str]) -> bool {
        let mut dir = self;
        for part in parts.iter().take(parts.len().saturating_sub(1)) {
            match dir.child(part) {
                Some(ArchiveNode::Directory(next)) => dir = next,
                Some(ArchiveNode::File(_)) => return true,
                None => return false,
            }
        }
        false
    }

    /// Files of this subtree, depth first in insertion order.
    pub fn files(&self) -> Vec<&File> {
        let mut out = vec![];
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a File>) {
        for (_, node) in &self.children {
            match node {
                ArchiveNode::File(file) => out.push(file),
                ArchiveNode::Directory(dir) => dir.collect_files(out),
            }
        }
    }

    pub fn into_files(self) -> Vec<File> {
        let mut out = vec![];
        for (_, node) in self.children {
            match node {
                ArchiveNode::File(file) => out.push(file),
                ArchiveNode::Directory(dir) => out.extend(dir.into_files()),
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Serializable view handed to the UI. `modded` is asked about every file, with
    /// its full path.
    pub fn tree(&self, prefix: &str, modded: &dyn Fn(&str, &File) -> bool) -> Vec<TreeEntry> {
        self.children
            .iter()
            .map(|(name, node)| {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                match node {
                    ArchiveNode::Directory(dir) => TreeEntry::Directory {
                        name: name.clone(),
                        children: dir.tree(&path, modded),
                        path,
                    },
                    ArchiveNode::File(file) => TreeEntry::File {
                        name: name.clone(),
                        size: file.data.len(),
                        is_archive: file.is_archive(),
                        modded: modded(&path, file),
                        path,
                    },
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TreeEntry {
    Directory {
        name: String,
        path: String,
        children: Vec<TreeEntry>,
    },
    File {
        name: String,
        path: String,
        size: usize,
        is_archive: bool,
        /// Differs from the stock game file, or is not a game file at all.
        modded: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Directory {
        let mut root = Directory::default();
        root.insert(File::new("Actor/Link.bxml", vec![1])).unwrap();
        root.insert(File::new("Actor/Zelda.bxml", vec![2])).unwrap();
        root.insert(File::new("Model/Link.bfres", vec![3])).unwrap();
        root
    }

    #[test]
    fn insert_keeps_order_and_rejects_duplicates() {
        let mut root = sample();
        let paths: Vec<_> = root.files().iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, ["Actor/Link.bxml", "Actor/Zelda.bxml", "Model/Link.bfres"]);
        assert!(matches!(
            root.insert(File::new("Actor/Link.bxml", vec![])),
            Err(Error::DuplicatePath(_))
        ));
        assert!(matches!(
            root.insert(File::new("Actor/Link.bxml/inner", vec![])),
            Err(Error::DuplicatePath(_))
        ));
        assert_eq!(root.len(), 3);
    }

    #[test]
    fn remove_directory_takes_subtree() {
        let mut root = sample();
        assert!(root.remove("Actor").unwrap().is_dir());
        assert_eq!(root.len(), 1);
        assert!(matches!(root.remove("Actor/Link.bxml"), Err(Error::NotFound(_))));
    }

    #[test]
    fn rename_moves_files_and_subtrees() {
        let mut root = sample();
        root.rename("Actor/Link.bxml", "Actor/Link2.bxml").unwrap();
        assert_eq!(root.get_file("Actor/Link2.bxml").unwrap().data, vec![1]);
        root.rename("Actor", "Pack/Actor").unwrap();
        assert_eq!(root.get_file("Pack/Actor/Zelda.bxml").unwrap().path, "Pack/Actor/Zelda.bxml");
        assert!(matches!(
            root.rename("Model/Link.bfres", "Pack/Actor/Zelda.bxml"),
            Err(Error::DuplicatePath(_))
        ));
        assert!(matches!(root.rename("Nope", "Other"), Err(Error::NotFound(_))));
    }

    #[test]
    fn replace_swaps_data() {
        let mut root = sample();
        assert_eq!(root.replace("Model/Link.bfres", vec![9, 9]).unwrap(), vec![3]);
        assert_eq!(root.get_file("Model/Link.bfres").unwrap().data, vec![9, 9]);
        assert!(matches!(root.replace("Model", vec![]), Err(Error::NotFound(_))));
    }

    #[test]
    fn tree_view_has_full_paths() {
        let root = sample();
        let tree = root.tree("", &|path, _| path.ends_with("Zelda.bxml"));
        match &tree[0] {
            TreeEntry::Directory { path, children, .. } => {
                assert_eq!(path, "Actor");
                assert!(matches!(
                    &children[1],
                    TreeEntry::File { path, modded: true, .. } if path == "Actor/Zelda.bxml"
                ));
                assert!(matches!(&children[0], TreeEntry::File { modded: false, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
