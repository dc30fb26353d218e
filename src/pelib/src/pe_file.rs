//! The `PeFile` facade: composes every codec into the end-to-end load and
//! write pipelines described in §4.9.

use std::fs;
use std::path::Path;

use crate::characteristics::FileCharacteristics;
use crate::cursor::ByteCursor;
use crate::data_directory::{DataDirectoryKind, DataDirectoryTable, NUM_STANDARD_DATA_DIRECTORIES};
use crate::error::{Error, Result};
use crate::header::{CoffHeader, OptionalHeader, WindowsFields, COFF_HEADER_SIZE};
use crate::layout::{EntryPoint, LayoutRecalculator};
use crate::resource::icon_group::{self, IconGroup};
use crate::resource::tree::{ParseContext, Resource, ResourceTable, RT_GROUP_ICON, RT_VERSION};
use crate::resource::versioninfo::{self, VersionInfo};
use crate::section::SectionTable;

const MZ_SIGNATURE: u16 = 0x5A4D;
const PE_SIGNATURE: u32 = 0x0000_4550;
const PE_HEADER_OFFSET_FIELD: usize = 0x3C;

/// Root aggregate owning every PE sub-entity exclusively (§3).
#[derive(Debug)]
pub struct PeFile {
    pub dos_stub: Vec<u8>,
    pub coff_header: CoffHeader,
    pub optional_header: OptionalHeader,
    pub data_directories: DataDirectoryTable,
    pub sections: SectionTable,
    pub resource_table: ResourceTable,
    pub version_infos: Vec<VersionInfo>,
    pub icon_groups: Vec<IconGroup>,
    pub overlay: Vec<u8>,
    pub entry_point: Option<EntryPoint>,
    resource_section: Option<usize>,
    last_error: Option<Error>,
}

impl PeFile {
    /// Minimal empty PE32: no sections, no data directories, no resources.
    pub fn new() -> PeFile {
        PeFile {
            dos_stub: vec![0u8; 0x40],
            coff_header: CoffHeader {
                machine: 0x014C,
                number_of_sections: 0,
                time_date_stamp: 0,
                pointer_to_symbol_table: 0,
                number_of_symbols: 0,
                size_of_optional_header: OptionalHeader::PE32_SIZE as u16
                    + NUM_STANDARD_DATA_DIRECTORIES as u16 * 8,
                characteristics: FileCharacteristics::new(FileCharacteristics::EXECUTABLE_IMAGE),
            },
            optional_header: OptionalHeader::Pe32 {
                major_linker_version: 0,
                minor_linker_version: 0,
                size_of_code: 0,
                size_of_initialized_data: 0,
                size_of_uninitialized_data: 0,
                address_of_entry_point: 0,
                base_of_code: 0,
                base_of_data: 0,
                windows: WindowsFields {
                    image_base: 0x0040_0000,
                    section_alignment: 0x1000,
                    file_alignment: 0x200,
                    major_os_version: 6,
                    minor_os_version: 0,
                    major_image_version: 0,
                    minor_image_version: 0,
                    major_subsystem_version: 6,
                    minor_subsystem_version: 0,
                    win32_version_value: 0,
                    size_of_image: 0,
                    size_of_headers: 0,
                    checksum: 0,
                    subsystem: 3,
                    dll_characteristics: Default::default(),
                    stack_reserve: 0x10_0000,
                    stack_commit: 0x1000,
                    heap_reserve: 0x10_0000,
                    heap_commit: 0x1000,
                    loader_flags: 0,
                    number_of_rva_and_sizes: NUM_STANDARD_DATA_DIRECTORIES as u32,
                },
            },
            data_directories: DataDirectoryTable::default(),
            sections: SectionTable::new(),
            resource_table: ResourceTable::new(),
            version_infos: Vec::new(),
            icon_groups: Vec::new(),
            overlay: Vec::new(),
            entry_point: None,
            resource_section: None,
            last_error: None,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<PeFile> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// § 4.9 load pipeline, steps 1-12.
    pub fn parse(input: &[u8]) -> Result<PeFile> {
        let cursor = ByteCursor::new(input);

        // Step 1: MZ signature.
        let mz = cursor.read_u16(0)?;
        if mz != MZ_SIGNATURE {
            return Err(Error::NotPe("missing MZ signature"));
        }

        // Step 2: dos_stub.
        let pe_header_offset = cursor.read_u32(PE_HEADER_OFFSET_FIELD)? as usize;
        let dos_stub = cursor.slice(0, pe_header_offset)?.to_vec();

        // Step 3: PE signature.
        let pe_signature = cursor.read_u32(pe_header_offset)?;
        if pe_signature != PE_SIGNATURE {
            return Err(Error::NotPe("missing PE signature"));
        }

        // Step 4: COFF + optional header.
        let coff_offset = pe_header_offset + 4;
        let coff_header = CoffHeader::parse(&cursor, coff_offset)?;
        let optional_header_offset = coff_offset + COFF_HEADER_SIZE;
        let optional_header_bytes = cursor.slice(
            optional_header_offset,
            coff_header.size_of_optional_header as usize,
        )?;
        let mut optional_header = OptionalHeader::parse(optional_header_bytes)?;

        // Step 5: clamp number_of_rva_and_sizes.
        let n_data_directories = optional_header
            .number_of_rva_and_sizes()
            .min(NUM_STANDARD_DATA_DIRECTORIES as u32);
        optional_header.set_number_of_rva_and_sizes(n_data_directories);

        // Step 6: section headers + contents.
        let section_headers_offset = optional_header_offset + coff_header.size_of_optional_header as usize;
        let raw_sections = SectionTable::parse_headers(
            &cursor,
            section_headers_offset,
            coff_header.number_of_sections,
        )?;
        let mut sections = SectionTable { sections: raw_sections };
        sections.load_contents(input)?;

        // Step 7: section-data anchors used by the LayoutRecalculator.
        let end_of_section_data = sections
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data as u64 + s.size_of_raw_data as u64)
            .max()
            .unwrap_or(0);

        // Step 8: entry-point section.
        let entry_point_rva = match &optional_header {
            OptionalHeader::Pe32 { address_of_entry_point, .. } => *address_of_entry_point,
            OptionalHeader::Pe32Plus { address_of_entry_point, .. } => *address_of_entry_point,
        };
        let entry_point = sections
            .find_by_virtual_address(entry_point_rva)
            .map(|section_index| EntryPoint {
                section: section_index,
                offset: entry_point_rva - sections.sections[section_index].virtual_address,
            });

        // Step 9: data directories.
        let data_directories_offset = optional_header_offset + optional_header.fixed_size();
        let data_directories = DataDirectoryTable::parse(
            &cursor,
            data_directories_offset,
            n_data_directories,
            &sections,
            end_of_section_data,
        )?;

        // Step 10: overlay.
        let overlay = if (input.len() as u64) > end_of_section_data {
            input[end_of_section_data as usize..].to_vec()
        } else {
            Vec::new()
        };

        // Step 11: resource tree.
        let mut resource_table = ResourceTable::new();
        let mut resource_section = None;
        let mut last_error = None;
        if let Some(resource_dir) = data_directories.get(DataDirectoryKind::ResourceTable) {
            if let Some(section_index) = resource_dir.section {
                resource_section = Some(section_index);
                let section = &sections.sections[section_index];
                let section_cursor = ByteCursor::new(&section.contents);
                let parse_ctx = ParseContext {
                    cursor: section_cursor,
                    section_virtual_address: section.virtual_address,
                };
                match ResourceTable::parse(&parse_ctx) {
                    Ok(table) => resource_table = table,
                    Err(e) => {
                        log::warn!("resource tree parse failed, treating image as resourceless: {e}");
                        last_error = Some(e);
                    }
                }
            }
        }

        // Step 12: version-info and icon-group views; errors logged and reset.
        let mut version_infos = Vec::new();
        for (index, resource) in resource_table.resources.iter().enumerate() {
            if resource.type_id.as_id() == Some(RT_VERSION) {
                match versioninfo::parse(&resource.data, index) {
                    Ok(info) => version_infos.push(info),
                    Err(e) => {
                        log::warn!("versioninfo parse failed for resource {index}: {e}");
                        last_error = Some(e);
                    }
                }
            }
        }
        let mut icon_groups = Vec::new();
        for index in 0..resource_table.resources.len() {
            if resource_table.resources[index].type_id.as_id() == Some(RT_GROUP_ICON) {
                match icon_group::parse(&resource_table, index) {
                    Ok(group) => icon_groups.push(group),
                    Err(e) => {
                        log::warn!("icon group parse failed for resource {index}: {e}");
                        last_error = Some(e);
                    }
                }
            }
        }

        Ok(PeFile {
            dos_stub,
            coff_header,
            optional_header,
            data_directories,
            sections,
            resource_table,
            version_infos,
            icon_groups,
            overlay,
            entry_point,
            resource_section,
            last_error,
        })
    }

    /// § 4.5: explicit re-layout, callable independently of a write.
    pub fn recalculate(&mut self) -> Result<()> {
        let result = self.recalculate_inner();
        if let Err(e) = &result {
            self.last_error = Some(e.clone());
        }
        result
    }

    fn recalculate_inner(&mut self) -> Result<()> {
        let resource_bytes = if self.resource_table.resources.is_empty() {
            None
        } else {
            let base = self
                .resource_section
                .and_then(|idx| self.sections.get(idx))
                .map(|s| s.virtual_address)
                .unwrap_or(0);
            Some(self.resource_table.write_to(base)?)
        };

        let resource_section = LayoutRecalculator::recalculate_header(
            &mut self.optional_header,
            self.coff_header.machine,
            self.dos_stub.len(),
            self.data_directories.entries.len() as u32,
            &mut self.sections,
            resource_bytes.as_deref(),
        )?;
        self.resource_section = resource_section;

        LayoutRecalculator::recalculate_sections(
            &mut self.optional_header,
            &mut self.sections,
            self.resource_section,
            self.entry_point,
        )?;

        if let Some(index) = self.resource_section {
            if let Some(section) = self.sections.get(index) {
                if let Some(entry) = self.data_directories.get_mut(DataDirectoryKind::ResourceTable) {
                    entry.section = Some(index);
                    entry.offset = 0;
                    entry.size = section.contents_size();
                }
            }
        }

        self.coff_header.number_of_sections = self.sections.len() as u16;
        Ok(())
    }

    /// § 6: recalculate, then re-emit the resource bytes into the backing
    /// section (the recalculate pass above already does this as a side
    /// effect of measuring layout; this is the explicit public entry point
    /// for callers who mutated `resource_table` directly).
    pub fn update_resource_table(&mut self) -> Result<()> {
        self.recalculate()
    }

    /// § 4.9 write pipeline.
    pub fn write_to_buffer(&self, out: Option<&mut [u8]>) -> Result<usize> {
        let mut header = Vec::new();
        header.extend_from_slice(&self.dos_stub);
        header.extend_from_slice(&PE_SIGNATURE.to_le_bytes());
        self.coff_header.write_to(&mut header);
        self.optional_header.write_to(&mut header);
        self.data_directories
            .write_to(&mut header, &self.sections, self.end_of_section_data());
        for section in &self.sections.sections {
            section.write_header(&mut header);
        }

        let furthest_section_end = self
            .sections
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data as u64 + s.size_of_raw_data as u64)
            .max()
            .unwrap_or(0);
        let total_size = (header.len() as u64)
            .max(furthest_section_end)
            .saturating_add(self.overlay.len() as u64);

        match out {
            None => Ok(total_size as usize),
            Some(buffer) => {
                if (buffer.len() as u64) < total_size {
                    return Err(Error::BufferTooSmall {
                        needed: total_size as usize,
                        have: buffer.len(),
                    });
                }
                for byte in buffer.iter_mut() {
                    *byte = 0;
                }
                buffer[..header.len()].copy_from_slice(&header);
                for section in &self.sections.sections {
                    let start = section.pointer_to_raw_data as usize;
                    let end = start + section.contents.len();
                    if end <= buffer.len() {
                        buffer[start..end].copy_from_slice(&section.contents);
                    }
                }
                let overlay_start = self.end_of_section_data() as usize;
                let overlay_end = overlay_start + self.overlay.len();
                if overlay_end <= buffer.len() {
                    buffer[overlay_start..overlay_end].copy_from_slice(&self.overlay);
                }
                Ok(total_size as usize)
            }
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let size = self.write_to_buffer(None)?;
        let mut buffer = vec![0u8; size];
        let written = self.write_to_buffer(Some(&mut buffer))?;
        fs::write(path, &buffer)?;
        Ok(written)
    }

    fn end_of_section_data(&self) -> u64 {
        self.sections
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data as u64 + s.size_of_raw_data as u64)
            .max()
            .unwrap_or(0)
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn count_by_type_id(&self, type_id: u32) -> usize {
        self.resource_table.count_by_type_id(type_id)
    }

    pub fn get_by_type_id(&self, type_id: u32) -> Vec<&Resource> {
        self.resource_table.get_by_type_id(type_id)
    }

    pub fn create_section(
        &mut self,
        name: &str,
        virtual_size: u32,
        size_of_raw_data: u32,
        characteristics: crate::characteristics::SectionCharacteristics,
        data: Option<Vec<u8>>,
    ) -> Result<usize> {
        let index = self
            .sections
            .create(name, virtual_size, size_of_raw_data, characteristics, data)?;
        self.coff_header.number_of_sections = self.sections.len() as u16;
        Ok(index)
    }
}

impl Default for PeFile {
    fn default() -> PeFile {
        PeFile::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristics::SectionCharacteristics;

    /// § 8 scenario: minimal PE32 with no sections, no overlay.
    fn minimal_pe32() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x40 + 4 + 20 + 224];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[0x3C..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        bytes[0x40..0x44].copy_from_slice(&PE_SIGNATURE.to_le_bytes());
        let coff = 0x44;
        bytes[coff..coff + 2].copy_from_slice(&0x014Cu16.to_le_bytes()); // machine
        bytes[coff + 2..coff + 4].copy_from_slice(&0u16.to_le_bytes()); // n_sections
        bytes[coff + 16..coff + 18].copy_from_slice(&224u16.to_le_bytes()); // sizeof_opt_hdr
        let opt = coff + 20;
        bytes[opt..opt + 2].copy_from_slice(&0x10Bu16.to_le_bytes()); // magic
        bytes[opt + 36..opt + 40].copy_from_slice(&512u32.to_le_bytes()); // file_alignment
        bytes[opt + 32..opt + 36].copy_from_slice(&0x1000u32.to_le_bytes()); // section_alignment
        bytes[opt + 92..opt + 96].copy_from_slice(&16u32.to_le_bytes()); // n_rva_and_sizes
        bytes
    }

    #[test]
    fn loads_minimal_pe32() {
        let bytes = minimal_pe32();
        let pe = PeFile::parse(&bytes).unwrap();
        assert_eq!(pe.coff_header.machine, 0x014C);
        assert_eq!(pe.sections.len(), 0);
        assert!(pe.overlay.is_empty());
    }

    #[test]
    fn truncated_at_one_byte_fails() {
        assert!(matches!(PeFile::parse(&[0x4D]), Err(Error::NotPe(_))));
    }

    #[test]
    fn bad_pe_signature_fails() {
        let mut bytes = minimal_pe32();
        bytes[0x40..0x44].copy_from_slice(b"PX\0\0");
        assert!(matches!(PeFile::parse(&bytes), Err(Error::NotPe(_))));
    }

    #[test]
    fn clamps_huge_rva_and_sizes_count() {
        let mut bytes = minimal_pe32();
        let opt = 0x44 + 20;
        bytes[opt + 92..opt + 96].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        let pe = PeFile::parse(&bytes).unwrap();
        assert_eq!(pe.optional_header.number_of_rva_and_sizes(), 16);
    }

    #[test]
    fn write_to_buffer_size_query_matches_actual_write() {
        let bytes = minimal_pe32();
        let pe = PeFile::parse(&bytes).unwrap();
        let size = pe.write_to_buffer(None).unwrap();
        let mut buf = vec![0u8; size];
        let written = pe.write_to_buffer(Some(&mut buf)).unwrap();
        assert_eq!(size, written);
    }

    #[test]
    fn section_resize_preserves_prefix_and_zero_fills_tail() {
        let mut pe = PeFile::new();
        let index = pe
            .create_section(
                ".data",
                0x10,
                0x200,
                SectionCharacteristics::new(SectionCharacteristics::CNT_INITIALIZED_DATA),
                Some(vec![0xAB; 0x10]),
            )
            .unwrap();
        pe.sections.resize(index, 0x20).unwrap();
        pe.recalculate().unwrap();
        let section = pe.sections.get(index).unwrap();
        assert_eq!(&section.contents[..0x10], &[0xABu8; 0x10][..]);
        assert_eq!(&section.contents[0x10..0x20], &[0u8; 0x10][..]);
    }
}
