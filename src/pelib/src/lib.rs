//! PE/COFF parsing, mutation, and rewriting.
//!
//! `PeFile` (see [`pe_file`]) is the entry point: `PeFile::open`/`parse` load
//! an image, the public fields expose the COFF header, optional header,
//! section table, data directories, and resource tree for direct mutation,
//! and `write_to_buffer`/`write_to_file` re-serialize after recalculating
//! layout.

pub mod characteristics;
pub mod cursor;
pub mod data_directory;
pub mod error;
pub mod header;
pub mod layout;
pub mod pe_file;
pub mod resource;
pub mod section;

pub use data_directory::{DataDirectory, DataDirectoryKind, DataDirectoryTable};
pub use error::{Error, Result};
pub use header::{CoffHeader, OptionalHeader, WindowsFields};
pub use layout::{EntryPoint, LayoutRecalculator};
pub use pe_file::PeFile;
pub use resource::{
    IconGroup, IconPayloadType, IconTranscoder, Resource, ResourceId, ResourceTable, VersionInfo,
};
pub use section::{Section, SectionTable};
