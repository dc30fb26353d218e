//! The resource subsystem: the raw type/name/language tree (§4.6) plus the
//! two higher-level interpretations built on top of it, version info
//! (§4.7) and icon groups (§4.8).

pub mod icon_group;
pub mod tree;
pub mod versioninfo;

pub use icon_group::{IconGroup, IconPayloadType, IconTranscoder};
pub use tree::{
    DirectoryMetadata, ParseContext, Resource, ResourceId, ResourceTable, RT_GROUP_ICON, RT_ICON,
    RT_VERSION,
};
pub use versioninfo::VersionInfo;
