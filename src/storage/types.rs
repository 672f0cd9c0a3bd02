//! Storage types

/// Metadata about a storage object
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub size: i64,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub keys: Vec<String>,
    pub prefixes: Vec<String>,
}

/// Options for listing objects
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub max_keys: Option<i32>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }
}

/// One part of a multipart upload that the backend has accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,

    /// Content tag (ETag) issued by the backend
    pub etag: String,

    /// Part length in bytes
    pub size: u64,
}
