//! `VS_VERSION_INFO`: the nested, padded, UTF-16LE-keyed dictionary embedded
//! inside an `RT_VERSION` resource (§4.7).
//!
//! Fault-tolerant by design — real-world version resources are frequently
//! slightly malformed, and the salvage heuristics below are load-bearing,
//! not incidental; do not "clean them up" into strict parsing.

use indexmap::IndexMap;

use crate::cursor::{strings, ByteCursor};
use crate::error::{Error, Result};

const FIXED_FILE_INFO_SIGNATURE: u32 = 0xFEEF_04BD;
const FIXED_FILE_INFO_SIZE: usize = 52;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedFileInfo {
    pub struct_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

/// One `StringTable` keyed by `(language, codepage)`, holding ordered
/// `(key, value)` string entries (§4.7 "StringFileInfo -> StringTable").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    pub language: u16,
    pub codepage: u16,
    pub entries: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub fixed: FixedFileInfo,
    pub dictionaries: Vec<Dictionary>,
    /// `VarFileInfo -> Translation` pairs.
    pub languages: Vec<(u16, u16)>,
    /// The resource this was parsed from, by index into `ResourceTable::resources`.
    pub resource_ref: usize,
}

struct Node {
    total_length: usize,
    value_length: usize,
    node_type: u16,
    key: String,
    value_start: usize,
}

fn find_next_non_zero(cursor: &ByteCursor, mut offset: usize, limit: usize) -> Result<usize> {
    while offset < limit {
        if cursor.read_u8(offset)? != 0 {
            return Ok(offset);
        }
        offset += 1;
    }
    Ok(limit)
}

/// Reads one node header (`{total_length, value_length, type}` + NUL-terminated
/// UTF-16LE key, 4-byte padded). `limit` bounds the scan for the key's NUL.
fn read_node(cursor: &ByteCursor, offset: usize) -> Result<Node> {
    let total_length = cursor.read_u16(offset)? as usize;
    let value_length = cursor.read_u16(offset + 2)? as usize;
    let node_type = cursor.read_u16(offset + 4)?;
    let (key, key_bytes) = strings::read_nul_terminated(cursor, offset + 6)?;
    let value_start = align4(offset + 6 + key_bytes);
    Ok(Node {
        total_length,
        value_length,
        node_type,
        key,
        value_start,
    })
}

fn parse_fixed_file_info(cursor: &ByteCursor, offset: usize) -> Result<FixedFileInfo> {
    let signature = cursor.read_u32(offset)?;
    if signature != FIXED_FILE_INFO_SIGNATURE {
        return Err(Error::TranscodeFailed(format!(
            "VS_FIXEDFILEINFO signature mismatch: {:#010x}",
            signature
        )));
    }
    Ok(FixedFileInfo {
        struct_version: cursor.read_u32(offset + 4)?,
        file_version_ms: cursor.read_u32(offset + 8)?,
        file_version_ls: cursor.read_u32(offset + 12)?,
        product_version_ms: cursor.read_u32(offset + 16)?,
        product_version_ls: cursor.read_u32(offset + 20)?,
        file_flags_mask: cursor.read_u32(offset + 24)?,
        file_flags: cursor.read_u32(offset + 28)?,
        file_os: cursor.read_u32(offset + 32)?,
        file_type: cursor.read_u32(offset + 36)?,
        file_subtype: cursor.read_u32(offset + 40)?,
        file_date_ms: cursor.read_u32(offset + 44)?,
        file_date_ls: cursor.read_u32(offset + 48)?,
    })
}

/// Parses one `StringTable` child of `StringFileInfo`: an 8-hex-digit
/// `lang_codepage` key followed by `{key, value}` string entries.
fn parse_string_table(cursor: &ByteCursor, offset: usize, parent_end: usize) -> Result<Dictionary> {
    let node = read_node(cursor, offset)?;
    let lang_codepage = u32::from_str_radix(&node.key, 16).unwrap_or(0);
    let language = (lang_codepage >> 16) as u16;
    let codepage = lang_codepage as u16;

    let end = (offset + node.total_length).min(parent_end);
    let mut entries = IndexMap::new();
    let mut pos = node.value_start;
    while pos < end {
        pos = find_next_non_zero(cursor, pos, end)?;
        if pos >= end {
            break;
        }
        let entry = read_node(cursor, pos)?;
        let (value, _) = strings::read_nul_terminated(cursor, entry.value_start)?;
        entries.insert(entry.key.clone(), value);
        pos = align4(pos + entry.total_length.max(1));
    }

    Ok(Dictionary {
        language,
        codepage,
        entries,
    })
}

/// Salvage heuristic (§4.7 "Robustness"): a `StringTable` header that looks
/// implausible is skipped two bytes at a time rather than treated as fatal.
fn string_table_header_plausible(node: &Node, parent_length: usize) -> bool {
    if node.total_length == 0 {
        return false;
    }
    if node.total_length > parent_length {
        return false;
    }
    if node.value_length > parent_length {
        return false;
    }
    if node.node_type > 1 {
        return false;
    }
    if node.total_length == node.value_length {
        return false;
    }
    true
}

fn parse_string_file_info(cursor: &ByteCursor, offset: usize, parent_end: usize, out: &mut Vec<Dictionary>) -> Result<()> {
    let node = read_node(cursor, offset)?;
    let end = (offset + node.total_length).min(parent_end);
    let mut pos = node.value_start;
    // A shortfall here is accepted silently per §4.7 as long as at least one
    // StringTable elsewhere parsed successfully; the caller never treats an
    // empty `out` as fatal.
    while pos + 6 <= end {
        let candidate = match read_node(cursor, pos) {
            Ok(n) => n,
            Err(_) => break,
        };
        if !string_table_header_plausible(&candidate, node.total_length) {
            pos += 2;
            continue;
        }
        match parse_string_table(cursor, pos, end) {
            Ok(dict) => {
                out.push(dict);
                pos = align4(pos + candidate.total_length.max(1));
            }
            Err(_) => {
                pos += 2;
            }
        }
    }
    Ok(())
}

fn parse_var_file_info(cursor: &ByteCursor, offset: usize, parent_end: usize) -> Result<Vec<(u16, u16)>> {
    let node = read_node(cursor, offset)?;
    let end = (offset + node.total_length).min(parent_end);
    let mut languages = Vec::new();
    let mut pos = node.value_start;
    while pos + 6 <= end {
        let child = match read_node(cursor, pos) {
            Ok(n) => n,
            Err(_) => break,
        };
        if child.key == "Translation" {
            let child_end = (pos + child.total_length).min(end);
            let mut lang_pos = child.value_start;
            while lang_pos + 4 <= child_end {
                let language = cursor.read_u16(lang_pos)?;
                let codepage = cursor.read_u16(lang_pos + 2)?;
                languages.push((language, codepage));
                lang_pos += 4;
            }
            break;
        }
        if child.total_length == 0 {
            break;
        }
        pos = align4(pos + child.total_length);
    }
    Ok(languages)
}

/// § 4.7 top-level parse: `VS_VERSION_INFO` node whose value is the fixed
/// struct and whose children are `StringFileInfo` / `VarFileInfo` blocks.
pub fn parse(data: &[u8], resource_ref: usize) -> Result<VersionInfo> {
    let cursor = ByteCursor::new(data);
    let root = read_node(&cursor, 0)?;
    let fixed = if root.value_length >= FIXED_FILE_INFO_SIZE {
        parse_fixed_file_info(&cursor, root.value_start)?
    } else {
        FixedFileInfo::default()
    };

    let children_start = align4(root.value_start + root.value_length);
    let root_end = root.total_length.min(data.len());

    let mut dictionaries = Vec::new();
    let mut languages = Vec::new();
    let mut pos = children_start;
    while pos + 6 <= root_end {
        pos = find_next_non_zero(&cursor, pos, root_end)?;
        if pos + 6 > root_end {
            break;
        }
        let child = match read_node(&cursor, pos) {
            Ok(n) => n,
            Err(_) => break,
        };
        match child.key.as_str() {
            "StringFileInfo" => {
                parse_string_file_info(&cursor, pos, root_end, &mut dictionaries)?;
            }
            "VarFileInfo" => {
                languages = parse_var_file_info(&cursor, pos, root_end)?;
            }
            // Unknown top-level children terminate the walk rather than
            // erroring (§4.7 "treats unknown top-level children as
            // terminators rather than errors").
            _ => break,
        }
        if child.total_length == 0 {
            break;
        }
        pos = align4(pos + child.total_length);
    }

    Ok(VersionInfo {
        fixed,
        dictionaries,
        languages,
        resource_ref,
    })
}

fn write_fixed_file_info(out: &mut Vec<u8>, fixed: &FixedFileInfo) {
    out.extend_from_slice(&FIXED_FILE_INFO_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&fixed.struct_version.to_le_bytes());
    out.extend_from_slice(&fixed.file_version_ms.to_le_bytes());
    out.extend_from_slice(&fixed.file_version_ls.to_le_bytes());
    out.extend_from_slice(&fixed.product_version_ms.to_le_bytes());
    out.extend_from_slice(&fixed.product_version_ls.to_le_bytes());
    out.extend_from_slice(&fixed.file_flags_mask.to_le_bytes());
    out.extend_from_slice(&fixed.file_flags.to_le_bytes());
    out.extend_from_slice(&fixed.file_os.to_le_bytes());
    out.extend_from_slice(&fixed.file_type.to_le_bytes());
    out.extend_from_slice(&fixed.file_subtype.to_le_bytes());
    out.extend_from_slice(&fixed.file_date_ms.to_le_bytes());
    out.extend_from_slice(&fixed.file_date_ls.to_le_bytes());
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn write_node(out: &mut Vec<u8>, key: &str, node_type: u16, value_length_units: u16, value: impl FnOnce(&mut Vec<u8>)) {
    let header_pos = out.len();
    out.extend_from_slice(&0u16.to_le_bytes()); // total_length, patched below
    out.extend_from_slice(&value_length_units.to_le_bytes());
    out.extend_from_slice(&node_type.to_le_bytes());
    out.extend_from_slice(&strings::write_nul_terminated(key));
    pad4(out);
    value(out);
    pad4(out);
    let total_length = (out.len() - header_pos) as u16;
    out[header_pos..header_pos + 2].copy_from_slice(&total_length.to_le_bytes());
}

/// § 4.7 serialize: strict well-formed output (4-byte alignment after every
/// node, inclusive length fields, value_length in 16-bit units including
/// the NUL terminator for string values).
pub fn write(info: &VersionInfo) -> Vec<u8> {
    // The root node's value (FixedFileInfo) and its children are both
    // written before the closing pad/length patch, so it is built by hand
    // here rather than through `write_node`'s single-value closure.
    let mut out = Vec::new();
    let header_pos = out.len();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(FIXED_FILE_INFO_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&strings::write_nul_terminated("VS_VERSION_INFO"));
    pad4(&mut out);
    write_fixed_file_info(&mut out, &info.fixed);
    pad4(&mut out);

    if !info.dictionaries.is_empty() {
        write_node(&mut out, "StringFileInfo", 1, 0, |out| {
            for dict in &info.dictionaries {
                let lang_codepage = format!("{:04X}{:04X}", dict.language, dict.codepage);
                write_node(out, &lang_codepage, 1, 0, |out| {
                    for (key, value) in &dict.entries {
                        let value_units = (value.encode_utf16().count() + 1) as u16;
                        write_node(out, key, 1, value_units, |out| {
                            out.extend_from_slice(&strings::write_nul_terminated(value));
                        });
                    }
                });
            }
        });
    }

    if !info.languages.is_empty() {
        write_node(&mut out, "VarFileInfo", 1, 0, |out| {
            write_node(out, "Translation", 0, (info.languages.len() * 2) as u16, |out| {
                for (language, codepage) in &info.languages {
                    out.extend_from_slice(&language.to_le_bytes());
                    out.extend_from_slice(&codepage.to_le_bytes());
                }
            });
        });
    }

    pad4(&mut out);
    let total_length = out.len() as u16;
    out[header_pos..header_pos + 2].copy_from_slice(&total_length.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> VersionInfo {
        let mut entries = IndexMap::new();
        entries.insert("CompanyName".to_string(), "ACME".to_string());
        VersionInfo {
            fixed: FixedFileInfo {
                struct_version: 0x1_0000,
                file_version_ms: 0x0001_0000,
                file_version_ls: 0x0000_0001,
                ..Default::default()
            },
            dictionaries: vec![Dictionary {
                language: 0x0409,
                codepage: 1200,
                entries,
            }],
            languages: vec![(0x0409, 1200)],
            resource_ref: 0,
        }
    }

    #[test]
    fn round_trips_string_table_entry() {
        let info = sample_info();
        let bytes = write(&info);
        let parsed = parse(&bytes, 0).unwrap();
        assert_eq!(parsed.fixed.struct_version, info.fixed.struct_version);
        assert_eq!(parsed.dictionaries.len(), 1);
        assert_eq!(
            parsed.dictionaries[0].entries.get("CompanyName"),
            Some(&"ACME".to_string())
        );
        assert_eq!(parsed.languages, vec![(0x0409, 1200)]);
    }

    #[test]
    fn salvage_skips_implausible_string_table_header() {
        let info = sample_info();
        let mut bytes = write(&info);
        // Corrupt the StringTable's total_length field to zero, which
        // should be rejected by string_table_header_plausible and salvaged
        // by scanning forward rather than aborting the whole parse.
        let string_file_info_needle = b"S\0t\0r\0i\0n\0g\0F\0i\0l\0e\0I\0n\0f\0o\0";
        if let Some(pos) = bytes
            .windows(string_file_info_needle.len())
            .position(|w| w == string_file_info_needle)
        {
            let table_header = pos + string_file_info_needle.len() + 2;
            if table_header + 2 <= bytes.len() {
                bytes[table_header] = 0;
                bytes[table_header + 1] = 0;
            }
        }
        // Should not panic or error fatally even if salvage can't recover
        // the corrupted table.
        assert!(parse(&bytes, 0).is_ok());
    }
}
