//! Alignment-driven layout recomputation, run before every serialize.
//!
//! Follows the same per-field, no-magic-numbers-without-a-name style as
//! `header.rs` and `section.rs`, applied to the read-modify-write pass
//! §4.5 describes.

use crate::characteristics::SectionCharacteristics;
use crate::error::{Error, Result};
use crate::header::OptionalHeader;
use crate::section::{Section, SectionTable};

/// IA64 and Alpha images default to a 0x2000 section/page granularity;
/// everything else defaults to 0x1000 (§4.5 step 4).
const MACHINE_IA64: u16 = 0x0200;
const MACHINE_ALPHA: u16 = 0x0184;
const MACHINE_ALPHA64: u16 = 0x0284;

const DEFAULT_PAGE_SIZE: u32 = 0x1000;
const LARGE_PAGE_SIZE: u32 = 0x2000;

const COFF_SIGNATURE_SIZE: usize = 4;
const RESOURCE_SECTION_NAME: &str = ".rscs";

fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    let remainder = value % alignment;
    if remainder == 0 {
        value
    } else {
        value + (alignment - remainder)
    }
}

fn next_power_of_two(value: u32) -> u32 {
    if value <= 1 {
        1
    } else {
        value.next_power_of_two()
    }
}

fn page_size_for_machine(machine: u16) -> u32 {
    match machine {
        MACHINE_IA64 | MACHINE_ALPHA | MACHINE_ALPHA64 => LARGE_PAGE_SIZE,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Resolved entry point, carried as a section index + intra-section offset
/// per the REDESIGN FLAGS (no raw pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub section: usize,
    pub offset: u32,
}

pub struct LayoutRecalculator;

impl LayoutRecalculator {
    /// § 4.5 `recalculate_header`. `resource_bytes` is the already-serialized
    /// resource tree (or `None` if the image carries no resources); the
    /// facade measures this off-buffer before calling in, since the
    /// resource codec lives above this module in the dependency graph.
    pub fn recalculate_header(
        optional_header: &mut OptionalHeader,
        machine: u16,
        dos_stub_len: usize,
        n_data_directories: u32,
        sections: &mut SectionTable,
        resource_bytes: Option<&[u8]>,
    ) -> Result<Option<usize>> {
        // Step 3: clamp file_alignment.
        let mut file_alignment = optional_header.file_alignment();
        file_alignment = file_alignment.clamp(512, u16::MAX as u32);
        if file_alignment > 512 && (file_alignment & (file_alignment - 1)) != 0 {
            file_alignment = next_power_of_two(file_alignment);
        }
        optional_header.set_file_alignment(file_alignment);

        // Step 4: clamp section_alignment.
        let page_size = page_size_for_machine(machine);
        let mut section_alignment = optional_header.section_alignment();
        if section_alignment < file_alignment {
            section_alignment = page_size;
        }
        section_alignment = section_alignment.clamp(file_alignment, u16::MAX as u32);
        if section_alignment > page_size {
            section_alignment = next_power_of_two(section_alignment);
        }
        optional_header.set_section_alignment(section_alignment);

        // Step 2: ensure a resource-backing section exists.
        let resource_section = match resource_bytes {
            Some(bytes) => Some(Self::ensure_resource_section(sections, bytes)?),
            None => None,
        };

        // Step 6: size_of_optional_header.
        let size_of_optional_header =
            n_data_directories as usize * 8 + optional_header.fixed_size();
        optional_header.set_number_of_rva_and_sizes(n_data_directories);

        // Step 5: size_of_headers, with the explicit overflow-to-zero quirk.
        let total_header_bytes = dos_stub_len
            + COFF_SIGNATURE_SIZE
            + crate::header::COFF_HEADER_SIZE
            + size_of_optional_header
            + sections.len() * crate::section::SECTION_HEADER_SIZE;
        let size_of_headers = if total_header_bytes > u32::MAX as usize {
            0
        } else {
            align_up(total_header_bytes as u32, file_alignment)
        };
        optional_header.set_size_of_headers(size_of_headers);

        Ok(resource_section)
    }

    /// Reuses the existing `.rscs` section if it exclusively holds the
    /// resource blob, otherwise creates a fresh one (§4.5 step 2).
    fn ensure_resource_section(sections: &mut SectionTable, resource_bytes: &[u8]) -> Result<usize> {
        if let Some(index) = sections.find_index(RESOURCE_SECTION_NAME) {
            sections.get_mut(index).unwrap().contents = resource_bytes.to_vec();
            Ok(index)
        } else {
            sections.create(
                RESOURCE_SECTION_NAME,
                resource_bytes.len() as u32,
                resource_bytes.len() as u32,
                SectionCharacteristics::resource_section_default(),
                Some(resource_bytes.to_vec()),
            )
        }
    }

    /// § 4.5 `recalculate_sections`. Sweeps sections in on-disk order,
    /// reassigning physical and virtual placement and re-accumulating the
    /// header's size/base summary fields.
    pub fn recalculate_sections(
        optional_header: &mut OptionalHeader,
        sections: &mut SectionTable,
        resource_section: Option<usize>,
        entry_point: Option<EntryPoint>,
    ) -> Result<()> {
        let file_alignment = optional_header.file_alignment();
        let section_alignment = optional_header.section_alignment();
        let is_pe32_plus = optional_header.is_pe32_plus();

        let mut next_physical = optional_header.file_alignment().max(512);
        // The header region itself occupies [0, size_of_headers); sections
        // start immediately after, aligned to file_alignment.
        next_physical = align_up(next_physical, file_alignment);
        let mut next_virtual = section_alignment;

        let mut size_of_code: u32 = 0;
        let mut size_of_initialized_data: u32 = 0;
        let mut size_of_uninitialized_data: u32 = 0;
        let mut base_of_code: Option<u32> = None;
        let mut base_of_data: Option<u32> = None;

        let count = sections.len();
        for index in 0..count {
            let is_resource = resource_section == Some(index);

            // Relocate the resource section first if it overlaps the next
            // section's virtual range (§4.5, "special handling").
            if is_resource {
                let section = sections.get_mut(index).unwrap();
                let contents_size = section.contents_size();
                section.virtual_size = contents_size;
                section.size_of_raw_data = align_up(contents_size, file_alignment);
                if section.virtual_address < next_virtual {
                    section.virtual_address = align_up(next_virtual, section_alignment);
                }
            }

            let section = sections.get_mut(index).unwrap();
            let contents_size = section.contents_size();

            if section.size_of_raw_data < align_up(contents_size, file_alignment) {
                section.size_of_raw_data = align_up(contents_size, file_alignment);
            }

            if contents_size > 0 {
                let aligned_physical = align_up(next_physical, file_alignment);
                section.pointer_to_raw_data = aligned_physical;
                next_physical = aligned_physical
                    .checked_add(align_up(section.size_of_raw_data, file_alignment))
                    .ok_or(Error::SectionSizeOverflow { index })?;
            } else {
                section.pointer_to_raw_data = 0;
            }

            if section.virtual_address < next_virtual || section.virtual_address == 0 {
                section.virtual_address = next_virtual;
            }
            next_virtual = section
                .virtual_address
                .checked_add(align_up(section.virtual_size.max(contents_size), section_alignment))
                .ok_or(Error::SectionSizeOverflow { index })?;

            if section.characteristics.is_code() {
                if section.name_str() != ".bind" {
                    size_of_code = size_of_code.saturating_add(section.size_of_raw_data);
                }
                base_of_code.get_or_insert(section.virtual_address);
            } else {
                base_of_data.get_or_insert(section.virtual_address);
            }

            if section.characteristics.is_initialized_data() {
                let contribution = if is_pe32_plus {
                    align_up(section.size_of_raw_data, file_alignment)
                } else {
                    align_up(section.virtual_size, file_alignment).max(section.size_of_raw_data)
                };
                size_of_initialized_data = size_of_initialized_data.saturating_add(contribution);
            }
            if section.characteristics.is_uninitialized_data() {
                size_of_uninitialized_data =
                    size_of_uninitialized_data.saturating_add(section.virtual_size);
            }
        }

        optional_header.set_size_of_code(size_of_code);
        optional_header.set_size_of_initialized_data(size_of_initialized_data);
        optional_header.set_size_of_uninitialized_data(size_of_uninitialized_data);
        if let Some(base) = base_of_code {
            optional_header.set_base_of_code(base);
        }
        if let Some(base) = base_of_data {
            optional_header.set_base_of_data(base);
        }

        if let Some(entry) = entry_point {
            let section = sections
                .get(entry.section)
                .ok_or(Error::RvaOutOfRange { rva: entry.offset })?;
            optional_header
                .set_address_of_entry_point(section.virtual_address + entry.offset);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{OptionalHeader, WindowsFields};

    fn pe32_header() -> OptionalHeader {
        OptionalHeader::Pe32 {
            major_linker_version: 0,
            minor_linker_version: 0,
            size_of_code: 0,
            size_of_initialized_data: 0,
            size_of_uninitialized_data: 0,
            address_of_entry_point: 0,
            base_of_code: 0,
            base_of_data: 0,
            windows: WindowsFields {
                image_base: 0x400000,
                section_alignment: 0x1000,
                file_alignment: 0x200,
                major_os_version: 0,
                minor_os_version: 0,
                major_image_version: 0,
                minor_image_version: 0,
                major_subsystem_version: 0,
                minor_subsystem_version: 0,
                win32_version_value: 0,
                size_of_image: 0,
                size_of_headers: 0,
                checksum: 0,
                subsystem: 0,
                dll_characteristics: Default::default(),
                stack_reserve: 0,
                stack_commit: 0,
                heap_reserve: 0,
                heap_commit: 0,
                loader_flags: 0,
                number_of_rva_and_sizes: 16,
            },
        }
    }

    #[test]
    fn clamps_file_alignment_to_power_of_two() {
        let mut header = pe32_header();
        header.set_file_alignment(600);
        let mut sections = SectionTable::new();
        LayoutRecalculator::recalculate_header(&mut header, 0x014C, 0x40, 16, &mut sections, None)
            .unwrap();
        assert_eq!(header.file_alignment(), 1024);
    }

    #[test]
    fn size_of_headers_is_aligned() {
        let mut header = pe32_header();
        let mut sections = SectionTable::new();
        LayoutRecalculator::recalculate_header(&mut header, 0x014C, 0x40, 16, &mut sections, None)
            .unwrap();
        if let OptionalHeader::Pe32 { windows, .. } = &header {
            assert_eq!(windows.size_of_headers % header.file_alignment(), 0);
        }
    }

    #[test]
    fn creates_rscs_section_for_resource_bytes() {
        let mut header = pe32_header();
        let mut sections = SectionTable::new();
        let resource_bytes = vec![1u8, 2, 3, 4];
        let resource_index = LayoutRecalculator::recalculate_header(
            &mut header,
            0x014C,
            0x40,
            16,
            &mut sections,
            Some(&resource_bytes),
        )
        .unwrap();
        assert_eq!(resource_index, Some(0));
        assert_eq!(sections.get(0).unwrap().name_str(), ".rscs");
        assert_eq!(sections.get(0).unwrap().contents, resource_bytes);
    }

    #[test]
    fn recalculate_sections_assigns_physical_and_virtual_addresses() {
        let mut header = pe32_header();
        let mut sections = SectionTable::new();
        sections
            .create(
                ".text",
                0x50,
                0x200,
                SectionCharacteristics::new(SectionCharacteristics::CNT_CODE | SectionCharacteristics::MEM_EXECUTE),
                Some(vec![0xAAu8; 0x50]),
            )
            .unwrap();
        LayoutRecalculator::recalculate_sections(&mut header, &mut sections, None, None).unwrap();
        let section = sections.get(0).unwrap();
        assert!(section.pointer_to_raw_data > 0);
        assert_eq!(section.pointer_to_raw_data % header.file_alignment(), 0);
        assert!(section.virtual_address > 0);
        assert_eq!(section.virtual_address % header.section_alignment(), 0);
    }
}
