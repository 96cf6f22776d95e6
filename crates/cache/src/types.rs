//! Shared vocabulary for the cache subsystem
//!
//! Priorities, artifact kinds, cached payloads with their size estimators,
//! and the search types carried by the result caches.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed overhead added to payloads whose true size cannot be measured
/// cheaply (search results, annotation blobs).
pub const CONSERVATIVE_OVERHEAD_BYTES: usize = 1024;

/// Estimated bytes per character for cached text.
///
/// Text is sized as if stored two bytes per character, which stays close
/// to the in-memory footprint of typical document text.
pub const BYTES_PER_CHAR: usize = 2;

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Timestamps are coarse by design; ties are broken deterministically
/// where ordering matters.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Retention priority of a cached artifact
///
/// `Critical` entries are pinned: they are never removed by automatic
/// eviction, aging, or memory pressure. Only an explicit `remove`,
/// `clear`, or a priority downgrade can drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CachePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl CachePriority {
    /// Numeric rank, ascending with retention strength
    pub fn rank(&self) -> u8 {
        match self {
            CachePriority::Low => 0,
            CachePriority::Normal => 1,
            CachePriority::High => 2,
            CachePriority::Critical => 3,
        }
    }

    pub(crate) fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(CachePriority::Low),
            1 => Some(CachePriority::Normal),
            2 => Some(CachePriority::High),
            3 => Some(CachePriority::Critical),
            _ => None,
        }
    }
}

impl Default for CachePriority {
    fn default() -> Self {
        CachePriority::Normal
    }
}

/// Kind of artifact held by the artifact cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    RenderedPage,
    Thumbnail,
    TextContent,
    PageImage,
    SearchResults,
    Annotations,
}

impl ArtifactKind {
    /// Short stable tag used in composed keys and snapshot files
    pub fn tag(&self) -> &'static str {
        match self {
            ArtifactKind::RenderedPage => "page",
            ArtifactKind::Thumbnail => "thumb",
            ArtifactKind::TextContent => "text",
            ArtifactKind::PageImage => "image",
            ArtifactKind::SearchResults => "search",
            ArtifactKind::Annotations => "annot",
        }
    }

    /// Stable numeric code for the snapshot format
    pub(crate) fn code(&self) -> u8 {
        match self {
            ArtifactKind::RenderedPage => 0,
            ArtifactKind::Thumbnail => 1,
            ArtifactKind::TextContent => 2,
            ArtifactKind::PageImage => 3,
            ArtifactKind::SearchResults => 4,
            ArtifactKind::Annotations => 5,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ArtifactKind::RenderedPage),
            1 => Some(ArtifactKind::Thumbnail),
            2 => Some(ArtifactKind::TextContent),
            3 => Some(ArtifactKind::PageImage),
            4 => Some(ArtifactKind::SearchResults),
            5 => Some(ArtifactKind::Annotations),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Axis-aligned rectangle in page coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectF {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A single search match
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Page the match was found on
    pub page_number: u32,

    /// The matched text itself
    pub text: String,

    /// Surrounding text snippet used for display and incremental reuse
    pub context: String,

    /// Match bounds in page coordinates
    pub bounds: RectF,

    /// Character offset of the match within the page text
    pub start_index: usize,

    /// Match length in characters
    pub length: usize,
}

impl SearchHit {
    pub fn new(page_number: u32, text: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            context: context.into(),
            bounds: RectF::default(),
            start_index: 0,
            length: 0,
        }
    }

    /// Estimated memory footprint of this hit
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<SearchHit>()
            + self.text.chars().count() * BYTES_PER_CHAR
            + self.context.chars().count() * BYTES_PER_CHAR
    }
}

/// Options a search was executed with
///
/// Two searches are cache-equivalent only when all options match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub whole_words: bool,
    pub use_regex: bool,
    pub search_backward: bool,
}

/// Payload stored in the artifact cache
///
/// Each variant carries its own size estimator so byte accounting never
/// depends on the producer.
#[derive(Debug, Clone)]
pub enum CachePayload {
    /// Rendered RGBA bitmap
    Bitmap {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },

    /// Extracted page text
    Text(String),

    /// Search hits for a page
    Results(Vec<SearchHit>),

    /// Opaque serialized annotation data
    Annotations(Vec<u8>),
}

impl CachePayload {
    /// Estimated memory footprint in bytes
    ///
    /// Bitmaps are sized as four bytes per pixel regardless of the backing
    /// buffer. Results and annotations add a fixed conservative overhead.
    pub fn size_bytes(&self) -> usize {
        match self {
            CachePayload::Bitmap { width, height, .. } => {
                (*width as usize) * (*height as usize) * 4
            }
            CachePayload::Text(text) => text.chars().count() * BYTES_PER_CHAR,
            CachePayload::Results(hits) => {
                hits.iter().map(SearchHit::estimated_size).sum::<usize>()
                    + CONSERVATIVE_OVERHEAD_BYTES
            }
            CachePayload::Annotations(blob) => blob.len() + CONSERVATIVE_OVERHEAD_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_size_uses_dimensions() {
        let payload = CachePayload::Bitmap {
            width: 100,
            height: 50,
            pixels: Vec::new(),
        };
        assert_eq!(payload.size_bytes(), 100 * 50 * 4);
    }

    #[test]
    fn test_text_size_counts_chars() {
        let payload = CachePayload::Text("hello".to_string());
        assert_eq!(payload.size_bytes(), 5 * BYTES_PER_CHAR);

        // Multi-byte characters count once each
        let payload = CachePayload::Text("héllo".to_string());
        assert_eq!(payload.size_bytes(), 5 * BYTES_PER_CHAR);
    }

    #[test]
    fn test_results_size_includes_overhead() {
        let hits = vec![SearchHit::new(1, "term", "context around term")];
        let expected: usize = hits.iter().map(SearchHit::estimated_size).sum();
        let payload = CachePayload::Results(hits);
        assert_eq!(
            payload.size_bytes(),
            expected + CONSERVATIVE_OVERHEAD_BYTES
        );
    }

    #[test]
    fn test_annotations_size_includes_overhead() {
        let payload = CachePayload::Annotations(vec![0u8; 64]);
        assert_eq!(payload.size_bytes(), 64 + CONSERVATIVE_OVERHEAD_BYTES);
    }

    #[test]
    fn test_priority_rank_ordering() {
        assert!(CachePriority::Low.rank() < CachePriority::Normal.rank());
        assert!(CachePriority::Normal.rank() < CachePriority::High.rank());
        assert!(CachePriority::High.rank() < CachePriority::Critical.rank());
    }

    #[test]
    fn test_kind_code_round_trip() {
        for kind in [
            ArtifactKind::RenderedPage,
            ArtifactKind::Thumbnail,
            ArtifactKind::TextContent,
            ArtifactKind::PageImage,
            ArtifactKind::SearchResults,
            ArtifactKind::Annotations,
        ] {
            assert_eq!(ArtifactKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ArtifactKind::from_code(99), None);
    }
}
