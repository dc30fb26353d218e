/// Errors surfaced by every fallible operation in this crate.
///
/// This replaces the thread-local "last error" slot that a C library in
/// this problem space would use: every constructor and mutator returns a
/// `Result<_, Error>` instead, per the REDESIGN FLAGS.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Missing MZ or `"PE\0\0"` signature.
    #[error("not a PE image: {0}")]
    NotPe(&'static str),

    /// A bounds check failed while reading a fixed-size structure.
    #[error("truncated input: expected at least {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// The optional header `magic` field was neither `0x10B` nor `0x20B`.
    #[error("unknown optional header magic: {0:#06x}")]
    UnknownMagic(u16),

    /// An RVA did not resolve to any live section, or resolved past its contents.
    #[error("RVA {rva:#010x} out of range")]
    RvaOutOfRange { rva: u32 },

    /// A section's raw-data range fell outside the input buffer.
    #[error("section {index} raw data range [{start:#x}, {end:#x}) exceeds input length {len}")]
    SectionOutOfRange {
        index: usize,
        start: u64,
        end: u64,
        len: usize,
    },

    /// A section name was empty or not NUL-padded correctly.
    #[error("invalid section name: {0:?}")]
    NameInvalid(Vec<u8>),

    /// A section's raw or virtual size overflowed `u32`.
    #[error("section size overflow for section {index}")]
    SectionSizeOverflow { index: usize },

    /// A resource-tree offset (directory, data entry, or string) exceeded `u32::MAX`.
    #[error("resource tree layout overflowed 32-bit offsets")]
    ResourceOverflow,

    /// The resource directory nested past type → name → language.
    #[error("resource directory nested too deep (depth {0})")]
    ResourceTooDeep(u32),

    /// A UTF-8 <-> UTF-16LE string conversion failed.
    #[error("string transcode failed: {0}")]
    TranscodeFailed(String),

    /// The caller-supplied output buffer was smaller than the required size.
    #[error("buffer too small: need {needed}, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// A file-system operation failed.
    #[error("I/O error: {0}")]
    IoFailed(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::IoFailed(e.to_string())
    }
}

impl Error {
    pub fn truncated(offset: usize, needed: usize, len: usize) -> Error {
        Error::Truncated {
            offset,
            needed,
            len,
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Error {
        Error::TranscodeFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
