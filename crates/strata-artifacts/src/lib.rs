//! On-disk artifact store for strata indexes.
//!
//! ## Layout
//! An index directory holds a pieces manifest (`pieces/manifest.json`) and the pieces it lists.
//! One logical artifact is realized as one of:
//! - a single JSON or JSONL file
//! - byte-budgeted JSONL parts plus a `<name>.meta.json` sidecar
//! - binary-columnar sidecars (`<name>.binary-columnar.*`)
//!
//! Every file may also exist as a `.gz`, `.zst`, or `.bak` sibling. Readers try the primary
//! first and walk the fallback chain; see [`reader`].
//!
//! ## Budgets
//! All reads are bounded. Files larger than the caller's budget fail with
//! [`ArtifactError::SizeExceeded`] before they are read, and decompression stops as soon as the
//! decoded size crosses the budget.

pub mod assemble;
pub mod chunk_meta;
pub mod codec;
pub mod columnar;
mod error;
pub mod kind;
pub mod manifest;
pub mod meta_v2;
pub mod path;
pub mod presence;
pub mod reader;
pub mod shards;
pub mod stable;
mod util;

pub use assemble::{assemble_pieces, AssembleOptions, AssembleSummary};
pub use chunk_meta::{load_chunk_meta, ChunkMetaLoad, ChunkMetaSource};
pub use codec::{ChecksumAlgo, Compression};
pub use error::{ArtifactError, Result};
pub use kind::{ArtifactKind, ArtifactLayout, PieceName, PieceRole};
pub use manifest::{
    load_manifest, sum_manifest_counts, Manifest, ManifestLoadOptions, ManifestPiece, PieceFormat,
};
pub use path::{RelativeSafePath, UnsafePathReason};
pub use presence::{resolve_presence, Presence, PresenceCache, PresenceFormat, ResolveOptions};
pub use shards::{write_sharded_jsonl, Emptiness, ShardBudget, ShardMeta, ShardWriteOptions};
pub use util::{atomic_write, read_file_limited, DEFAULT_MAX_JSON_BYTES};
