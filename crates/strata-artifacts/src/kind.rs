//! Closed registry of artifact names.

use std::fmt;

/// Every artifact the store knows how to decode and validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    ChunkMeta,
    FileMeta,
    RepoMap,
    FileRelations,
    TokenPostings,
    FieldPostings,
    FieldTokens,
    MinhashSignatures,
    PhraseNgrams,
    ChargramPostings,
    FilterIndex,
    GraphRelations,
    DenseVectors,
    DenseVectorsDoc,
    DenseVectorsCode,
    IndexState,
    Filelists,
    PiecesManifest,
    RiskSummaries,
    RiskFlows,
    CallSites,
    RiskInterproceduralStats,
}

/// Physical layout an artifact is normally written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactLayout {
    /// One JSON document.
    Document,
    /// A sequence of rows (JSON array, JSONL, shards, or binary-columnar).
    Rows,
}

/// Names that may appear in a manifest without having a loader here.
pub const MANIFEST_ONLY_ALLOWLIST: &[&str] = &[
    "dense_vectors_hnsw",
    "dense_vectors_hnsw_meta",
    "dense_vectors_lancedb",
    "dense_vectors_doc_lancedb",
    "dense_vectors_code_lancedb",
    "vocab_order",
    "api_contracts",
    "import_resolution_graph",
    "chunk_meta_cold",
    "extraction_report",
];

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 22] = [
        Self::ChunkMeta,
        Self::FileMeta,
        Self::RepoMap,
        Self::FileRelations,
        Self::TokenPostings,
        Self::FieldPostings,
        Self::FieldTokens,
        Self::MinhashSignatures,
        Self::PhraseNgrams,
        Self::ChargramPostings,
        Self::FilterIndex,
        Self::GraphRelations,
        Self::DenseVectors,
        Self::DenseVectorsDoc,
        Self::DenseVectorsCode,
        Self::IndexState,
        Self::Filelists,
        Self::PiecesManifest,
        Self::RiskSummaries,
        Self::RiskFlows,
        Self::CallSites,
        Self::RiskInterproceduralStats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChunkMeta => "chunk_meta",
            Self::FileMeta => "file_meta",
            Self::RepoMap => "repo_map",
            Self::FileRelations => "file_relations",
            Self::TokenPostings => "token_postings",
            Self::FieldPostings => "field_postings",
            Self::FieldTokens => "field_tokens",
            Self::MinhashSignatures => "minhash_signatures",
            Self::PhraseNgrams => "phrase_ngrams",
            Self::ChargramPostings => "chargram_postings",
            Self::FilterIndex => "filter_index",
            Self::GraphRelations => "graph_relations",
            Self::DenseVectors => "dense_vectors",
            Self::DenseVectorsDoc => "dense_vectors_doc",
            Self::DenseVectorsCode => "dense_vectors_code",
            Self::IndexState => "index_state",
            Self::Filelists => "filelists",
            Self::PiecesManifest => "pieces_manifest",
            Self::RiskSummaries => "risk_summaries",
            Self::RiskFlows => "risk_flows",
            Self::CallSites => "call_sites",
            Self::RiskInterproceduralStats => "risk_interprocedural_stats",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn layout(self) -> ArtifactLayout {
        match self {
            Self::ChunkMeta
            | Self::FileMeta
            | Self::RepoMap
            | Self::FileRelations
            | Self::FieldTokens
            | Self::RiskSummaries
            | Self::RiskFlows
            | Self::CallSites => ArtifactLayout::Rows,
            Self::TokenPostings
            | Self::FieldPostings
            | Self::MinhashSignatures
            | Self::PhraseNgrams
            | Self::ChargramPostings
            | Self::FilterIndex
            | Self::GraphRelations
            | Self::DenseVectors
            | Self::DenseVectorsDoc
            | Self::DenseVectorsCode
            | Self::IndexState
            | Self::Filelists
            | Self::PiecesManifest
            | Self::RiskInterproceduralStats => ArtifactLayout::Document,
        }
    }

    /// Value written to the manifest `type` field for pieces of this artifact.
    pub fn piece_type(self) -> &'static str {
        match self {
            Self::ChunkMeta | Self::FileMeta => "chunks",
            Self::TokenPostings
            | Self::FieldPostings
            | Self::FieldTokens
            | Self::MinhashSignatures
            | Self::PhraseNgrams
            | Self::ChargramPostings
            | Self::FilterIndex => "postings",
            Self::RepoMap | Self::FileRelations | Self::GraphRelations => "relations",
            Self::DenseVectors | Self::DenseVectorsDoc | Self::DenseVectorsCode => "embeddings",
            Self::RiskSummaries
            | Self::RiskFlows
            | Self::CallSites
            | Self::RiskInterproceduralStats => "risk",
            Self::IndexState | Self::Filelists | Self::PiecesManifest => "stats",
        }
    }

    /// File stem probed when no manifest describes the artifact.
    pub fn legacy_stem(self) -> &'static str {
        match self {
            Self::Filelists => ".filelists",
            Self::DenseVectors => "dense_vectors_uint8",
            Self::DenseVectorsDoc => "dense_vectors_doc_uint8",
            Self::DenseVectorsCode => "dense_vectors_code_uint8",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a manifest piece name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceRole {
    Data,
    ShardMeta,
    ColumnarMeta,
    ColumnarOffsets,
    ColumnarLengths,
}

impl PieceRole {
    fn suffix(self) -> &'static str {
        match self {
            Self::Data => "",
            Self::ShardMeta => "_meta",
            Self::ColumnarMeta => "_binary_columnar_meta",
            Self::ColumnarOffsets => "_binary_columnar_offsets",
            Self::ColumnarLengths => "_binary_columnar_lengths",
        }
    }
}

/// A fully classified piece name such as `chunk_meta_meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceName {
    pub kind: ArtifactKind,
    pub role: PieceRole,
}

impl PieceName {
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(kind) = ArtifactKind::from_name(name) {
            return Some(Self {
                kind,
                role: PieceRole::Data,
            });
        }
        // Longest suffixes first so `_binary_columnar_meta` is not read as `_meta`.
        for role in [
            PieceRole::ColumnarMeta,
            PieceRole::ColumnarOffsets,
            PieceRole::ColumnarLengths,
            PieceRole::ShardMeta,
        ] {
            if let Some(base) = name.strip_suffix(role.suffix()) {
                if let Some(kind) = ArtifactKind::from_name(base) {
                    return Some(Self { kind, role });
                }
            }
        }
        None
    }

    pub fn render(kind: ArtifactKind, role: PieceRole) -> String {
        format!("{}{}", kind.as_str(), role.suffix())
    }
}

/// Whether `name` may legitimately appear in a strict manifest.
pub fn is_known_piece_name(name: &str) -> bool {
    PieceName::parse(name).is_some() || MANIFEST_ONLY_ALLOWLIST.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in ArtifactKind::ALL {
            assert_eq!(ArtifactKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ArtifactKind::from_name("symbols"), None);
    }

    #[test]
    fn piece_names_classify_sidecars() {
        assert_eq!(
            PieceName::parse("chunk_meta_meta"),
            Some(PieceName {
                kind: ArtifactKind::ChunkMeta,
                role: PieceRole::ShardMeta
            })
        );
        assert_eq!(
            PieceName::parse("chunk_meta_binary_columnar_meta"),
            Some(PieceName {
                kind: ArtifactKind::ChunkMeta,
                role: PieceRole::ColumnarMeta
            })
        );
        assert_eq!(
            PieceName::render(ArtifactKind::ChunkMeta, PieceRole::ColumnarOffsets),
            "chunk_meta_binary_columnar_offsets"
        );
        assert!(is_known_piece_name("dense_vectors_hnsw"));
        assert!(!is_known_piece_name("mystery_blob"));
    }
}
