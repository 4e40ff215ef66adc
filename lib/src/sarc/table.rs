use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;

use crate::binary::Writer;
use crate::Result;

/// SFNT name data keyed by byte offset. Every name is NUL-terminated and padded to 4.
#[derive(Debug, Default, Clone)]
pub struct NameTable {
    table: BTreeMap<u32, String>,
    lookup: HashMap<String, u32>,
}

impl NameTable {
    fn entry_size(name: &str) -> u32 {
        (name.len() as u32 + 1).next_multiple_of(4)
    }

    /// Adds `item` if needed and returns its offset.
    pub fn add<A: AsRef<str>>(&mut self, item: A) -> u32 {
        let item = item.as_ref();
        if let Some(off) = self.lookup.get(item) {
            return *off;
        }
        let off = self
            .table
            .iter()
            .next_back()
            .map_or(0, |(off, last)| off + Self::entry_size(last));
        self.table.insert(off, item.to_string());
        self.lookup.insert(item.to_string(), off);
        off
    }

    pub fn total_size(&self) -> u32 {
        self.table.values().map(|name| Self::entry_size(name)).sum()
    }

    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        for name in self.table.values() {
            writer.null_string(name)?;
            writer.align(4)?;
        }
        Ok(())
    }
}

impl Deref for NameTable {
    type Target = BTreeMap<u32, String>;
    fn deref(&self) -> &Self::Target {
        &self.table
    }
}
