//! The three-level resource directory: type → name → language, plus the
//! shared string pool and leaf data entries (§4.6).
//!
//! Follows the crate's established texture for codecs: bounds-checked
//! `ByteCursor` reads, a `Result`-returning parse paired with a
//! `write_to`-style serialize.

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::cursor::{strings, ByteCursor};
use crate::error::{Error, Result};

pub const RESOURCE_DIRECTORY_SIZE: usize = 16;
pub const RESOURCE_ENTRY_SIZE: usize = 8;
pub const RESOURCE_DATA_ENTRY_SIZE: usize = 16;

const HIGH_BIT: u32 = 0x8000_0000;

pub const RT_ICON: u32 = 3;
pub const RT_VERSION: u32 = 16;
pub const RT_GROUP_ICON: u32 = 14;

/// A type/name/language identifier: either a 16-bit ordinal or an embedded
/// string (§4.6 "If the high bit of `id_or_name` is set...").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Id(u32),
    Name(String),
}

impl ResourceId {
    pub fn as_id(&self) -> Option<u32> {
        match self {
            ResourceId::Id(v) => Some(*v),
            ResourceId::Name(_) => None,
        }
    }
}

impl PartialOrd for ResourceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Strings sort lexically before ordinals, ordinals sort by integer value
/// (§4.6 serialize: "strings lexically first and ordinals by integer value").
impl Ord for ResourceId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ResourceId::Name(a), ResourceId::Name(b)) => a.cmp(b),
            (ResourceId::Id(a), ResourceId::Id(b)) => a.cmp(b),
            (ResourceId::Name(_), ResourceId::Id(_)) => Ordering::Less,
            (ResourceId::Id(_), ResourceId::Name(_)) => Ordering::Greater,
        }
    }
}

/// The 16-byte directory-node header, inherited by every resource reachable
/// through that node (§3 "inherited directory metadata").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryMetadata {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
}

/// A leaf of the resource tree, identified by `(type_id, name_id, language_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub type_id: ResourceId,
    pub name_id: ResourceId,
    pub language_id: ResourceId,
    pub type_meta: DirectoryMetadata,
    pub name_meta: DirectoryMetadata,
    pub lang_meta: DirectoryMetadata,
    pub codepage: u32,
    pub reserved: u32,
    pub data: Vec<u8>,
}

/// Per-call parse state: the resource section's virtual address, needed to
/// turn a leaf's `data_rva` into an intra-section offset. Threaded through
/// the recursive directory walk explicitly instead of a thread-local, per
/// the REDESIGN FLAGS.
pub struct ParseContext<'a> {
    pub cursor: ByteCursor<'a>,
    pub section_virtual_address: u32,
}

#[derive(Clone)]
struct LevelInfo {
    id: ResourceId,
    meta: DirectoryMetadata,
}

/// Fallback for a level skipped by a malformed tree (a leaf reached before
/// the language level). Real inputs never hit this; see `parse_level`.
static DEFAULT_LEVEL: LevelInfo = LevelInfo {
    id: ResourceId::Id(0),
    meta: DirectoryMetadata {
        characteristics: 0,
        time_date_stamp: 0,
        major_version: 0,
        minor_version: 0,
    },
};

/// Owns the flat set of parsed resources. Higher-level interpretations
/// (`VersionInfo`, `IconGroup`) are cached alongside it by the facade.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    pub resources: Vec<Resource>,
}

impl ResourceTable {
    pub fn new() -> ResourceTable {
        ResourceTable {
            resources: Vec::new(),
        }
    }

    pub fn count_by_type_id(&self, type_id: u32) -> usize {
        self.resources
            .iter()
            .filter(|r| r.type_id.as_id() == Some(type_id))
            .count()
    }

    pub fn get_by_type_id(&self, type_id: u32) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.type_id.as_id() == Some(type_id))
            .collect()
    }

    pub fn delete(&mut self, index: usize) -> Resource {
        self.resources.remove(index)
    }

    /// § 4.6 parse: walks the tree starting at the type directory (depth 0).
    pub fn parse(ctx: &ParseContext) -> Result<ResourceTable> {
        let mut out = Vec::new();
        parse_level(ctx, 0, 0, None, None, &mut out)?;
        Ok(ResourceTable { resources: out })
    }

    /// § 4.6 serialize: rebuilds the tree from the flat resource set and
    /// emits it as a self-contained byte buffer relative to the resource
    /// section's own base (offset 0 of the returned buffer is the root
    /// directory).
    pub fn write_to(&self, section_virtual_address: u32) -> Result<Vec<u8>> {
        if self.resources.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = TreeBuilder {
            resources: &self.resources,
            arena: Vec::new(),
            leaves: Vec::new(),
        };
        let indices: Vec<usize> = (0..self.resources.len()).collect();
        builder.build_directory(&indices, 0);
        let TreeBuilder {
            arena, leaves, ..
        } = builder;

        // Directory zone: contiguous, offsets assigned in arena (DFS
        // pre-order) order.
        let mut dir_offsets = Vec::with_capacity(arena.len());
        let mut cursor = 0usize;
        for node in &arena {
            dir_offsets.push(cursor);
            cursor += RESOURCE_DIRECTORY_SIZE + RESOURCE_ENTRY_SIZE * node.entries.len();
        }
        let directory_zone_size = cursor;

        // String pool: first-occurrence order, deduplicated, each string
        // stored once as length-prefixed UTF-16LE (§4.6 zone 2).
        let mut string_pool: IndexMap<String, usize> = IndexMap::new();
        for node in &arena {
            for entry in &node.entries {
                if let ResourceId::Name(name) = &entry.key {
                    string_pool.entry(name.clone()).or_insert(0);
                }
            }
        }
        let mut running = directory_zone_size;
        let names: Vec<String> = string_pool.keys().cloned().collect();
        for name in &names {
            let size = 2 + name.encode_utf16().count() * 2;
            string_pool.insert(name.clone(), running);
            running += size;
        }
        let string_pool_end = running;

        let leaf_entries_offset = align_up_usize(string_pool_end, 4);
        let leaf_entries_size = leaves.len() * RESOURCE_DATA_ENTRY_SIZE;
        let leaf_entries_end = leaf_entries_offset + leaf_entries_size;

        let blobs_start = align_up_usize(leaf_entries_end, 8);
        let mut blob_offsets = Vec::with_capacity(leaves.len());
        let mut running = blobs_start;
        for &resource_index in &leaves {
            blob_offsets.push(running);
            let len = self.resources[resource_index].data.len();
            running += align_up_usize(len, 8);
        }
        let total_size = running;

        if total_size > u32::MAX as usize
            || leaf_entries_offset > u32::MAX as usize
            || directory_zone_size > u32::MAX as usize
        {
            return Err(Error::ResourceOverflow);
        }

        let mut out = vec![0u8; total_size];

        // Directory nodes + entries.
        let mut leaf_position: IndexMap<usize, usize> = IndexMap::new();
        for (i, &resource_index) in leaves.iter().enumerate() {
            leaf_position.insert(resource_index, i);
        }

        for (node_index, node) in arena.iter().enumerate() {
            let base = dir_offsets[node_index];
            write_u32(&mut out, base, node.meta.characteristics);
            write_u32(&mut out, base + 4, node.meta.time_date_stamp);
            write_u16(&mut out, base + 8, node.meta.major_version);
            write_u16(&mut out, base + 10, node.meta.minor_version);
            let n_name = node
                .entries
                .iter()
                .filter(|e| matches!(e.key, ResourceId::Name(_)))
                .count() as u16;
            let n_id = node.entries.len() as u16 - n_name;
            write_u16(&mut out, base + 12, n_name);
            write_u16(&mut out, base + 14, n_id);

            for (i, entry) in node.entries.iter().enumerate() {
                let entry_offset = base + RESOURCE_DIRECTORY_SIZE + i * RESOURCE_ENTRY_SIZE;
                let id_or_name = match &entry.key {
                    ResourceId::Id(v) => *v,
                    ResourceId::Name(name) => {
                        let offset = *string_pool.get(name).expect("collected above");
                        if offset > 0x7FFF_FFFF {
                            return Err(Error::ResourceOverflow);
                        }
                        offset as u32 | HIGH_BIT
                    }
                };
                let child = match entry.target {
                    DirEntryTarget::Directory(child_index) => {
                        let child_offset = dir_offsets[child_index];
                        if child_offset > 0x7FFF_FFFF {
                            return Err(Error::ResourceOverflow);
                        }
                        child_offset as u32 | HIGH_BIT
                    }
                    DirEntryTarget::Leaf(resource_index) => {
                        let position = leaf_position[&resource_index];
                        let data_entry_offset = leaf_entries_offset + position * RESOURCE_DATA_ENTRY_SIZE;
                        if data_entry_offset > 0x7FFF_FFFF {
                            return Err(Error::ResourceOverflow);
                        }
                        data_entry_offset as u32
                    }
                };
                write_u32(&mut out, entry_offset, id_or_name);
                write_u32(&mut out, entry_offset + 4, child);
            }
        }

        // String pool.
        for (name, offset) in string_pool.iter() {
            let bytes = strings::write_length_prefixed(name);
            out[*offset..*offset + bytes.len()].copy_from_slice(&bytes);
        }

        // Leaf data entries + blobs.
        for (i, &resource_index) in leaves.iter().enumerate() {
            let resource = &self.resources[resource_index];
            let entry_offset = leaf_entries_offset + i * RESOURCE_DATA_ENTRY_SIZE;
            let blob_offset = blob_offsets[i];
            let data_rva = section_virtual_address
                .checked_add(blob_offset as u32)
                .ok_or(Error::ResourceOverflow)?;
            write_u32(&mut out, entry_offset, data_rva);
            write_u32(&mut out, entry_offset + 4, resource.data.len() as u32);
            write_u32(&mut out, entry_offset + 8, resource.codepage);
            write_u32(&mut out, entry_offset + 12, resource.reserved);
            out[blob_offset..blob_offset + resource.data.len()].copy_from_slice(&resource.data);
        }

        Ok(out)
    }
}

fn write_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u16(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn align_up_usize(value: usize, alignment: usize) -> usize {
    let remainder = value % alignment;
    if remainder == 0 {
        value
    } else {
        value + (alignment - remainder)
    }
}

fn level_key(resource: &Resource, depth: u32) -> ResourceId {
    match depth {
        0 => resource.type_id.clone(),
        1 => resource.name_id.clone(),
        _ => resource.language_id.clone(),
    }
}

fn level_meta(resource: &Resource, depth: u32) -> DirectoryMetadata {
    match depth {
        0 => resource.type_meta,
        1 => resource.name_meta,
        _ => resource.lang_meta,
    }
}

enum DirEntryTarget {
    Directory(usize),
    Leaf(usize),
}

struct DirEntry {
    key: ResourceId,
    target: DirEntryTarget,
}

struct DirNode {
    meta: DirectoryMetadata,
    entries: Vec<DirEntry>,
}

struct TreeBuilder<'a> {
    resources: &'a [Resource],
    arena: Vec<DirNode>,
    leaves: Vec<usize>,
}

impl<'a> TreeBuilder<'a> {
    /// Builds the directory whose entries are keyed at `depth`
    /// (0=type, 1=name, 2=language), returning its arena index. Reserves
    /// the node's slot before recursing so arena order stays DFS pre-order,
    /// matching the zone layout in §4.6.
    fn build_directory(&mut self, indices: &[usize], depth: u32) -> usize {
        let node_index = self.arena.len();
        self.arena.push(DirNode {
            meta: DirectoryMetadata::default(),
            entries: Vec::new(),
        });

        let meta = level_meta(&self.resources[indices[0]], depth);

        let mut groups: IndexMap<ResourceId, Vec<usize>> = IndexMap::new();
        for &i in indices {
            groups
                .entry(level_key(&self.resources[i], depth))
                .or_default()
                .push(i);
        }
        let mut keys: Vec<ResourceId> = groups.keys().cloned().collect();
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let group_indices = &groups[&key];
            let target = if depth < 2 {
                let child_index = self.build_directory(group_indices, depth + 1);
                DirEntryTarget::Directory(child_index)
            } else {
                let resource_index = group_indices[0];
                self.leaves.push(resource_index);
                DirEntryTarget::Leaf(resource_index)
            };
            entries.push(DirEntry { key, target });
        }

        self.arena[node_index] = DirNode { meta, entries };
        node_index
    }
}

/// Reads the directory at `offset` whose entries are at `depth` (0=type,
/// 1=name, 2=language), recursing into child directories and appending
/// assembled resources to `out` as language-level leaves are reached.
fn parse_level(
    ctx: &ParseContext,
    offset: usize,
    depth: u32,
    type_info: Option<&LevelInfo>,
    name_info: Option<&LevelInfo>,
    out: &mut Vec<Resource>,
) -> Result<()> {
    let cursor = &ctx.cursor;
    let characteristics = cursor.read_u32(offset)?;
    let time_date_stamp = cursor.read_u32(offset + 4)?;
    let major_version = cursor.read_u16(offset + 8)?;
    let minor_version = cursor.read_u16(offset + 10)?;
    let n_name = cursor.read_u16(offset + 12)? as usize;
    let n_id = cursor.read_u16(offset + 14)? as usize;
    let meta = DirectoryMetadata {
        characteristics,
        time_date_stamp,
        major_version,
        minor_version,
    };

    let entries_base = offset + RESOURCE_DIRECTORY_SIZE;
    for i in 0..(n_name + n_id) {
        let entry_offset = entries_base + i * RESOURCE_ENTRY_SIZE;
        let id_or_name = cursor.read_u32(entry_offset)?;
        let child = cursor.read_u32(entry_offset + 4)?;

        let id = if id_or_name & HIGH_BIT != 0 {
            let name_offset = (id_or_name & 0x7FFF_FFFF) as usize;
            let (s, _) = strings::read_length_prefixed(cursor, name_offset)?;
            ResourceId::Name(s)
        } else {
            ResourceId::Id(id_or_name)
        };
        let this_level = LevelInfo { id, meta };

        if child & HIGH_BIT != 0 {
            let child_offset = (child & 0x7FFF_FFFF) as usize;
            if depth >= 2 {
                return Err(Error::ResourceTooDeep(depth + 1));
            }
            match depth {
                0 => parse_level(ctx, child_offset, 1, Some(&this_level), None, out)?,
                1 => parse_level(ctx, child_offset, 2, type_info, Some(&this_level), out)?,
                _ => unreachable!(),
            }
        } else {
            let leaf_offset = (child & 0x7FFF_FFFF) as usize;
            let data_rva = cursor.read_u32(leaf_offset)?;
            let data_size = cursor.read_u32(leaf_offset + 4)? as usize;
            let codepage = cursor.read_u32(leaf_offset + 8)?;
            let reserved = cursor.read_u32(leaf_offset + 12)?;
            let data_offset = data_rva
                .checked_sub(ctx.section_virtual_address)
                .ok_or(Error::RvaOutOfRange { rva: data_rva })? as usize;
            let data = cursor.slice(data_offset, data_size)?.to_vec();

            let type_level = if depth == 0 { &this_level } else { type_info.unwrap_or(&DEFAULT_LEVEL) };
            let name_level = if depth == 1 { &this_level } else { name_info.unwrap_or(&DEFAULT_LEVEL) };
            let lang_level = if depth == 2 { &this_level } else { &DEFAULT_LEVEL };

            out.push(Resource {
                type_id: type_level.id.clone(),
                name_id: name_level.id.clone(),
                language_id: lang_level.id.clone(),
                type_meta: type_level.meta,
                name_meta: name_level.meta,
                lang_meta: lang_level.meta,
                codepage,
                reserved,
                data,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resource(type_id: u32, name: &str, lang: u32, data: Vec<u8>) -> Resource {
        Resource {
            type_id: ResourceId::Id(type_id),
            name_id: ResourceId::Name(name.to_string()),
            language_id: ResourceId::Id(lang),
            type_meta: DirectoryMetadata::default(),
            name_meta: DirectoryMetadata::default(),
            lang_meta: DirectoryMetadata::default(),
            codepage: 1200,
            reserved: 0,
            data,
        }
    }

    #[test]
    fn serialize_then_parse_round_trips_single_resource() {
        let table = ResourceTable {
            resources: vec![sample_resource(RT_VERSION, "MAINICON", 0x0409, vec![1, 2, 3, 4, 5])],
        };
        let bytes = table.write_to(0x2000).unwrap();
        let cursor = ByteCursor::new(&bytes);
        let ctx = ParseContext {
            cursor,
            section_virtual_address: 0x2000,
        };
        let parsed = ResourceTable::parse(&ctx).unwrap();
        assert_eq!(parsed.resources.len(), 1);
        assert_eq!(parsed.resources[0].type_id, ResourceId::Id(RT_VERSION));
        assert_eq!(parsed.resources[0].name_id, ResourceId::Name("MAINICON".to_string()));
        assert_eq!(parsed.resources[0].language_id, ResourceId::Id(0x0409));
        assert_eq!(parsed.resources[0].data, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn serialize_shares_duplicate_strings() {
        let table = ResourceTable {
            resources: vec![
                sample_resource(RT_ICON, "SHARED", 0x0409, vec![1]),
                sample_resource(RT_ICON, "SHARED", 0x040C, vec![2]),
            ],
        };
        let bytes = table.write_to(0x3000).unwrap();
        let cursor = ByteCursor::new(&bytes);
        let ctx = ParseContext {
            cursor,
            section_virtual_address: 0x3000,
        };
        let parsed = ResourceTable::parse(&ctx).unwrap();
        assert_eq!(parsed.resources.len(), 2);
    }

    #[test]
    fn resource_id_ordering_puts_names_before_ids() {
        let mut ids = vec![ResourceId::Id(1), ResourceId::Name("A".to_string())];
        ids.sort();
        assert_eq!(ids[0], ResourceId::Name("A".to_string()));
    }
}
