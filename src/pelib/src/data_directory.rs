//! The optional header's data-directory array: fixed-index RVA+size pairs
//! bound to the section that physically backs each one.
//!
//! The optional header stores up to 16 `(u32, u32)` pairs at a fixed
//! 128-byte slice; this module keeps an index-to-meaning mapping
//! (`DataDirectoryKind`) over an indexed `Vec<DataDirectory>` so arbitrary
//! `number_of_rva_and_sizes` counts and the CERTIFICATE_TABLE file-offset
//! special case (§4.4) can be modeled.

use crate::cursor::ByteCursor;
use crate::error::Result;
use crate::section::SectionTable;

pub const DATA_DIRECTORY_ENTRY_SIZE: usize = 8;
pub const NUM_STANDARD_DATA_DIRECTORIES: usize = 16;

/// # §4.4 DataDirectoryTable — index meaning
///
/// | Index | Field                   |
/// | ----- | ----------------------- |
/// | 0     | Export Table            |
/// | 1     | Import Table            |
/// | 2     | Resource Table          |
/// | 3     | Exception Table         |
/// | 4     | Certificate Table       |
/// | 5     | Base Relocation Table   |
/// | 6     | Debug                   |
/// | 7     | Architecture            |
/// | 8     | Global Ptr              |
/// | 9     | TLS Table               |
/// | 10    | Load Config Table       |
/// | 11    | Bound Import            |
/// | 12    | IAT                     |
/// | 13    | Delay Import Descriptor |
/// | 14    | CLR Runtime Header      |
/// | 15    | Reserved                |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum DataDirectoryKind {
    ExportTable = 0,
    ImportTable = 1,
    ResourceTable = 2,
    ExceptionTable = 3,
    CertificateTable = 4,
    BaseRelocationTable = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    TlsTable = 9,
    LoadConfigTable = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImportDescriptor = 13,
    ClrRuntimeHeader = 14,
    Reserved = 15,
    Other(u32),
}

impl DataDirectoryKind {
    pub const CERTIFICATE_TABLE_INDEX: u32 = 4;
    pub const RESOURCE_TABLE_INDEX: u32 = 2;

    pub fn from_index(index: u32) -> DataDirectoryKind {
        match index {
            0 => DataDirectoryKind::ExportTable,
            1 => DataDirectoryKind::ImportTable,
            2 => DataDirectoryKind::ResourceTable,
            3 => DataDirectoryKind::ExceptionTable,
            4 => DataDirectoryKind::CertificateTable,
            5 => DataDirectoryKind::BaseRelocationTable,
            6 => DataDirectoryKind::Debug,
            7 => DataDirectoryKind::Architecture,
            8 => DataDirectoryKind::GlobalPtr,
            9 => DataDirectoryKind::TlsTable,
            10 => DataDirectoryKind::LoadConfigTable,
            11 => DataDirectoryKind::BoundImport,
            12 => DataDirectoryKind::Iat,
            13 => DataDirectoryKind::DelayImportDescriptor,
            14 => DataDirectoryKind::ClrRuntimeHeader,
            15 => DataDirectoryKind::Reserved,
            other => DataDirectoryKind::Other(other),
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            DataDirectoryKind::ExportTable => 0,
            DataDirectoryKind::ImportTable => 1,
            DataDirectoryKind::ResourceTable => 2,
            DataDirectoryKind::ExceptionTable => 3,
            DataDirectoryKind::CertificateTable => 4,
            DataDirectoryKind::BaseRelocationTable => 5,
            DataDirectoryKind::Debug => 6,
            DataDirectoryKind::Architecture => 7,
            DataDirectoryKind::GlobalPtr => 8,
            DataDirectoryKind::TlsTable => 9,
            DataDirectoryKind::LoadConfigTable => 10,
            DataDirectoryKind::BoundImport => 11,
            DataDirectoryKind::Iat => 12,
            DataDirectoryKind::DelayImportDescriptor => 13,
            DataDirectoryKind::ClrRuntimeHeader => 14,
            DataDirectoryKind::Reserved => 15,
            DataDirectoryKind::Other(i) => *i,
        }
    }
}

/// A single data-directory entry, bound to its backing section where one
/// exists (§3 "DataDirectory").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectory {
    pub id: DataDirectoryKind,
    /// Index into `PeFile::sections`, or `None` for an empty entry or for
    /// the CERTIFICATE_TABLE's file-offset special case.
    pub section: Option<usize>,
    /// Offset relative to `section.virtual_address` when bound, or a raw
    /// file offset relative to `end_of_section_data` for the
    /// CERTIFICATE_TABLE case.
    pub offset: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.section.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataDirectoryTable {
    pub entries: Vec<DataDirectory>,
}

impl DataDirectoryTable {
    pub fn get(&self, kind: DataDirectoryKind) -> Option<&DataDirectory> {
        self.entries.iter().find(|e| e.id == kind)
    }

    pub fn get_mut(&mut self, kind: DataDirectoryKind) -> Option<&mut DataDirectory> {
        self.entries.iter_mut().find(|e| e.id == kind)
    }

    /// § 4.4: parses the fixed-width `{u32 dir_va, u32 dir_size}` array and
    /// binds each entry to a section, with the CERTIFICATE_TABLE
    /// file-offset special case.
    pub fn parse(
        cursor: &ByteCursor,
        offset: usize,
        count: u32,
        sections: &SectionTable,
        end_of_section_data: u64,
    ) -> Result<DataDirectoryTable> {
        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let entry_offset = offset + i as usize * DATA_DIRECTORY_ENTRY_SIZE;
            let dir_va = cursor.read_u32(entry_offset)?;
            let dir_size = cursor.read_u32(entry_offset + 4)?;
            let kind = DataDirectoryKind::from_index(i);

            let entry = if i == DataDirectoryKind::CERTIFICATE_TABLE_INDEX {
                if dir_size > 0 {
                    DataDirectory {
                        id: kind,
                        section: None,
                        offset: (dir_va as u64).saturating_sub(end_of_section_data) as u32,
                        size: dir_size,
                    }
                } else {
                    DataDirectory {
                        id: kind,
                        section: None,
                        offset: 0,
                        size: 0,
                    }
                }
            } else if let Some(section_index) = sections.find_by_virtual_address(dir_va) {
                let section = &sections.sections[section_index];
                DataDirectory {
                    id: kind,
                    section: Some(section_index),
                    offset: dir_va - section.virtual_address,
                    size: dir_size,
                }
            } else if dir_size > 0 {
                DataDirectory {
                    id: kind,
                    section: None,
                    offset: (dir_va as u64).saturating_sub(end_of_section_data) as u32,
                    size: dir_size,
                }
            } else {
                DataDirectory {
                    id: kind,
                    section: None,
                    offset: 0,
                    size: 0,
                }
            };
            entries.push(entry);
        }
        Ok(DataDirectoryTable { entries })
    }

    /// § 4.4 serialize: reconstructs `dir_va` symmetrically with `parse`.
    pub fn write_to(
        &self,
        out: &mut Vec<u8>,
        sections: &SectionTable,
        end_of_section_data: u64,
    ) {
        for entry in &self.entries {
            let dir_va: u32 = if entry.id.index() == DataDirectoryKind::CERTIFICATE_TABLE_INDEX {
                if entry.size > 0 {
                    (end_of_section_data + entry.offset as u64) as u32
                } else {
                    0
                }
            } else if let Some(section_index) = entry.section {
                sections
                    .get(section_index)
                    .map(|s| s.virtual_address + entry.offset)
                    .unwrap_or(0)
            } else if entry.size > 0 {
                (end_of_section_data + entry.offset as u64) as u32
            } else {
                0
            };
            out.extend_from_slice(&dir_va.to_le_bytes());
            out.extend_from_slice(&entry.size.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristics::SectionCharacteristics;
    use crate::section::Section;

    fn section_table() -> SectionTable {
        let mut table = SectionTable::new();
        table.sections.push(Section {
            name: *b".rscs\0\0\0",
            virtual_size: 0x100,
            virtual_address: 0x2000,
            size_of_raw_data: 0x200,
            pointer_to_raw_data: 0x400,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: SectionCharacteristics::new(0),
            contents: vec![0; 0x100],
        });
        table
    }

    #[test]
    fn binds_to_covering_section() {
        let sections = section_table();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x2010u32.to_le_bytes());
        bytes.extend_from_slice(&0x40u32.to_le_bytes());
        let cursor = ByteCursor::new(&bytes);
        let table = DataDirectoryTable::parse(&cursor, 0, 1, &sections, 0x600).unwrap();
        let entry = &table.entries[0];
        assert_eq!(entry.section, Some(0));
        assert_eq!(entry.offset, 0x10);
        assert_eq!(entry.size, 0x40);
    }

    #[test]
    fn certificate_table_is_file_offset() {
        let sections = section_table();
        let mut bytes = vec![0u8; 8 * 5];
        let cert_va = 0x600u32 + 0x100;
        bytes[32..36].copy_from_slice(&cert_va.to_le_bytes());
        bytes[36..40].copy_from_slice(&0x10u32.to_le_bytes());
        let cursor = ByteCursor::new(&bytes);
        let table = DataDirectoryTable::parse(&cursor, 0, 5, &sections, 0x600).unwrap();
        let cert = table.get(DataDirectoryKind::CertificateTable).unwrap();
        assert_eq!(cert.section, None);
        assert_eq!(cert.offset, 0x100);

        let mut out = Vec::new();
        table.write_to(&mut out, &sections, 0x600);
        let round = DataDirectoryTable::parse(&ByteCursor::new(&out), 0, 5, &sections, 0x600).unwrap();
        let cert2 = round.get(DataDirectoryKind::CertificateTable).unwrap();
        assert_eq!(cert2.offset, 0x100);
        assert_eq!(cert2.size, 0x10);
    }
}
