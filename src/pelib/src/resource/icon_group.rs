//! `RT_GROUP_ICON` / `RT_ICON` pairing and PNG/DIB classification (§4.8).

use crate::cursor::ByteCursor;
use crate::error::Result;
use crate::resource::tree::{ResourceId, ResourceTable, RT_ICON};

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const ICONDIRENTRY_SIZE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconPayloadType {
    Png,
    Dib,
}

fn classify(data: &[u8]) -> IconPayloadType {
    if data.len() >= PNG_MAGIC.len() && data[..PNG_MAGIC.len()] == PNG_MAGIC {
        IconPayloadType::Png
    } else {
        IconPayloadType::Dib
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub kind: IconPayloadType,
    pub width: u8,
    pub height: u8,
    pub color_count: u8,
    pub reserved: u8,
    pub planes: u16,
    pub bpp: u16,
    pub data: Vec<u8>,
    /// Index into `ResourceTable::resources` of the backing `RT_ICON`.
    pub resource_ref: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconGroup {
    pub icons: Vec<Icon>,
    /// Index into `ResourceTable::resources` of the `RT_GROUP_ICON` itself.
    pub resource_ref: usize,
}

/// § 4.8: parses the `RT_GROUP_ICON` body at `resources.resources[group_ref]`
/// and cross-references each `ICONDIRENTRY` against the matching `RT_ICON`,
/// preferring the group's own language and falling back to any language.
pub fn parse(resources: &ResourceTable, group_ref: usize) -> Result<IconGroup> {
    let group = &resources.resources[group_ref];
    let cursor = ByteCursor::new(&group.data);
    let _reserved = cursor.read_u16(0)?;
    let _kind = cursor.read_u16(2)?;
    let count = cursor.read_u16(4)? as usize;

    let mut icons = Vec::with_capacity(count);
    for i in 0..count {
        let entry_offset = 6 + i * ICONDIRENTRY_SIZE;
        let width = cursor.read_u8(entry_offset)?;
        let height = cursor.read_u8(entry_offset + 1)?;
        let color_count = cursor.read_u8(entry_offset + 2)?;
        let reserved = cursor.read_u8(entry_offset + 3)?;
        let planes = cursor.read_u16(entry_offset + 4)?;
        let bpp = cursor.read_u16(entry_offset + 6)?;
        let _bytes_in_res = cursor.read_u32(entry_offset + 8)?;
        let icon_id = cursor.read_u16(entry_offset + 12)?;

        if let Some((resource_ref, data)) = find_icon(resources, icon_id, &group.language_id) {
            icons.push(Icon {
                kind: classify(&data),
                width,
                height,
                color_count,
                reserved,
                planes,
                bpp,
                data,
                resource_ref,
            });
        }
    }

    sort_icons(&mut icons);

    Ok(IconGroup {
        icons,
        resource_ref: group_ref,
    })
}

fn find_icon(
    resources: &ResourceTable,
    icon_id: u16,
    preferred_language: &ResourceId,
) -> Option<(usize, Vec<u8>)> {
    let mut fallback = None;
    for (index, resource) in resources.resources.iter().enumerate() {
        if resource.type_id.as_id() != Some(RT_ICON) {
            continue;
        }
        if resource.name_id.as_id() != Some(icon_id as u32) {
            continue;
        }
        if &resource.language_id == preferred_language {
            return Some((index, resource.data.clone()));
        }
        if fallback.is_none() {
            fallback = Some((index, resource.data.clone()));
        }
    }
    fallback
}

/// § 4.8: "Sort icons by (bpp desc, pixel-area desc) — two stable sorts
/// composed."
fn sort_icons(icons: &mut [Icon]) {
    icons.sort_by_key(|icon| {
        let area = icon.width as u32 * icon.height as u32;
        std::cmp::Reverse(area)
    });
    icons.sort_by_key(|icon| std::cmp::Reverse(icon.bpp));
}

/// External collaborator interface for DIB->PNG transcoding (§1 "the
/// icon-DIB-to-PNG transcoder is out of scope except for the interface it
/// presents to the resource layer").
pub trait IconTranscoder {
    fn dib_to_png(&self, dib: &[u8]) -> Option<Vec<u8>>;
}

/// Replaces each DIB-classified icon's backing `RT_ICON` data with the
/// transcoder's PNG output, leaving the original bytes untouched on
/// failure (§4.8).
pub fn transcode_to_png(
    group: &mut IconGroup,
    resources: &mut ResourceTable,
    transcoder: &dyn IconTranscoder,
) {
    for icon in &mut group.icons {
        if icon.kind != IconPayloadType::Dib {
            continue;
        }
        if let Some(png) = transcoder.dib_to_png(&icon.data) {
            if let Some(resource) = resources.resources.get_mut(icon.resource_ref) {
                resource.data = png.clone();
            }
            icon.data = png;
            icon.kind = IconPayloadType::Png;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tree::{DirectoryMetadata, Resource, RT_GROUP_ICON};

    fn icon_resource(id: u32, language: u32, data: Vec<u8>) -> Resource {
        Resource {
            type_id: ResourceId::Id(RT_ICON),
            name_id: ResourceId::Id(id),
            language_id: ResourceId::Id(language),
            type_meta: DirectoryMetadata::default(),
            name_meta: DirectoryMetadata::default(),
            lang_meta: DirectoryMetadata::default(),
            codepage: 0,
            reserved: 0,
            data,
        }
    }

    fn group_icon_body(entries: &[(u8, u8, u16, u16, u16)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for &(w, h, planes, bpp, icon_id) in entries {
            data.push(w);
            data.push(h);
            data.push(0);
            data.push(0);
            data.extend_from_slice(&planes.to_le_bytes());
            data.extend_from_slice(&bpp.to_le_bytes());
            data.extend_from_slice(&0u32.to_le_bytes());
            data.extend_from_slice(&icon_id.to_le_bytes());
        }
        data
    }

    #[test]
    fn classifies_png_and_dib_payloads() {
        let mut png_data = PNG_MAGIC.to_vec();
        png_data.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(classify(&png_data), IconPayloadType::Png);
        assert_eq!(classify(&[0x28, 0, 0, 0]), IconPayloadType::Dib);
    }

    #[test]
    fn parse_cross_references_matching_icon_by_id_and_language() {
        let group = Resource {
            type_id: ResourceId::Id(RT_GROUP_ICON),
            name_id: ResourceId::Id(1),
            language_id: ResourceId::Id(0x0409),
            type_meta: DirectoryMetadata::default(),
            name_meta: DirectoryMetadata::default(),
            lang_meta: DirectoryMetadata::default(),
            codepage: 0,
            reserved: 0,
            data: group_icon_body(&[(32, 32, 1, 32, 101), (16, 16, 1, 8, 102)]),
        };
        let table = ResourceTable {
            resources: vec![
                group,
                icon_resource(101, 0x0409, vec![0x28, 0, 0, 0]),
                icon_resource(102, 0x0409, PNG_MAGIC.to_vec()),
            ],
        };
        let parsed = parse(&table, 0).unwrap();
        assert_eq!(parsed.icons.len(), 2);
        // bpp desc: 32 before 8.
        assert_eq!(parsed.icons[0].bpp, 32);
        assert_eq!(parsed.icons[0].kind, IconPayloadType::Dib);
        assert_eq!(parsed.icons[1].kind, IconPayloadType::Png);
    }
}
