//! Crate-wide error types.
//!
//! One top-level enum wraps a per-subsystem error enum per component, the
//! way `core::error` does it upstream. Nothing here panics its way out of a
//! cycle; stage failures are folded into `CycleError` and carried as data in
//! `CycleComplete`, not just as an `Err`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema model errors (§4.A).
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Write state engine errors (§4.B).
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Blob framing errors (§4.E).
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    /// Cycle orchestrator errors (§4.F / §7).
    #[error("cycle error: {0}")]
    Cycle(#[from] CycleError),

    /// Metrics registration errors.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error bubbled up from config loading or a harness blob store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that doesn't fit a narrower variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a configuration error from anything stringy.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build an internal error from anything stringy.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Schema model errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Unknown type tag while parsing a schema header.
    #[error("unknown schema type tag: {0:#x}")]
    UnknownTag(u8),

    /// A REFERENCE field or element names a schema not present in the set.
    #[error("unresolved schema reference: {0}")]
    UnresolvedReference(String),

    /// A var-int length prefix overflowed while parsing.
    #[error("var-int overflow while parsing schema")]
    VarIntOverflow,

    /// Two schemas in the same set share a name.
    #[error("duplicate schema name: {0}")]
    DuplicateName(String),

    /// A hash-key or primary-key field path did not resolve to a non-reference leaf.
    #[error("invalid key field path: {0}")]
    InvalidKeyPath(String),

    /// Bytes ran out mid-structure.
    #[error("truncated schema bytes")]
    Truncated,
}

/// Write state engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// `add`/`remove` called after `populateComplete` fired for this cycle.
    #[error("write state is sealed for this cycle")]
    SealedForCycle,

    /// Referenced a type name the schema set doesn't have.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Primary key fields didn't resolve against the record shape supplied.
    #[error("invalid primary key projection on type {0}")]
    InvalidPrimaryKey(String),
}

/// Blob framing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// Magic tag or a length-prefixed section ran past the end of the buffer.
    #[error("truncated blob")]
    TruncatedBlob,

    /// The magic tag at the front of the blob wasn't `HOLW`.
    #[error("bad magic tag")]
    BadMagic,

    /// `formatVersion` isn't one this reader understands.
    #[error("unknown format version: {0}")]
    UnknownFormatVersion(u32),

    /// The schema header embedded in the blob doesn't match the schema set in hand.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Cycle orchestrator errors, one variant per failing stage (§7).
#[derive(Error, Debug)]
pub enum CycleError {
    /// The user population task raised.
    #[error("populate failed: {0}")]
    PopulateFailure(String),

    /// The publisher rejected one or more blobs.
    #[error("publish failed: {0}")]
    PublishFailure(String),

    /// Round-trip of the just-published snapshot/deltas didn't match the write state.
    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    /// At least one validator returned a non-PASSED result.
    #[error("validation failed: {0} validator(s) did not pass")]
    ValidationFailure(usize),

    /// The announcer rejected the new version.
    #[error("announce failed: {0}")]
    AnnounceFailure(String),
}
