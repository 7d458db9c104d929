//! Feed items as the pool sees them.
//!
//! `position` is only an index into the currently loaded sequence and shifts
//! when the feed is refreshed. `VideoId` is the stable key used for all pool
//! and trace bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Telemetry backends cap attribute values, keep the tail of long paths.
const MAX_ATTRIBUTE_LENGTH: usize = 90;

/// Stable identity of a video across feed refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VideoId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One entry of the ordered feed sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub video_id: VideoId,
    /// Index in the currently loaded sequence (not a database key)
    pub position: usize,
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl FeedItem {
    pub fn new(
        video_id: impl Into<VideoId>,
        position: usize,
        video_url: impl Into<String>,
        thumbnail_url: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            position,
            video_url: video_url.into(),
            thumbnail_url: thumbnail_url.into(),
        }
    }

    pub fn format(&self) -> MediaFormat {
        MediaFormat::from_url(&self.video_url)
    }
}

/// Delivery format, reported with every trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Hls,
    #[default]
    Progressive,
}

impl MediaFormat {
    /// HLS when the URL path ends in `.m3u8` (query and fragment ignored).
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".m3u8") {
            MediaFormat::Hls
        } else {
            MediaFormat::Progressive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Hls => "hls",
            MediaFormat::Progressive => "progressive",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short identifier for telemetry attributes, derived from a media URL.
///
/// Takes the URL path without scheme, host, leading slash and query. Paths
/// longer than the attribute limit keep their last characters; an empty path
/// falls back to the tail of the raw URL.
pub fn attribute_id(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = match without_query.find("://") {
        Some(scheme_end) => {
            let rest = &without_query[scheme_end + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("")
        }
        None => without_query,
    };
    let path = path.trim_start_matches('/');

    if path.is_empty() {
        tail_chars(url, MAX_ATTRIBUTE_LENGTH)
    } else {
        tail_chars(path, MAX_ATTRIBUTE_LENGTH)
    }
}

fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(MediaFormat::from_url("https://cdn.example/v/1/master.m3u8"), MediaFormat::Hls);
        assert_eq!(MediaFormat::from_url("https://cdn.example/v/1/index.M3U8?token=x"), MediaFormat::Hls);
        assert_eq!(MediaFormat::from_url("https://cdn.example/v/1.mp4"), MediaFormat::Progressive);
        assert_eq!(MediaFormat::from_url(""), MediaFormat::Progressive);
    }

    #[test]
    fn test_attribute_id_strips_host_and_query() {
        assert_eq!(attribute_id("https://cdn.example/videos/abc/master.m3u8?sig=1"), "videos/abc/master.m3u8");
        assert_eq!(attribute_id("relative/path.mp4"), "relative/path.mp4");
    }

    #[test]
    fn test_attribute_id_truncates_from_front() {
        let long = format!("https://cdn.example/{}", "a".repeat(120));
        let id = attribute_id(&long);
        assert_eq!(id.len(), MAX_ATTRIBUTE_LENGTH);
        assert!(id.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_attribute_id_empty_path_falls_back_to_url() {
        assert_eq!(attribute_id("https://cdn.example"), "https://cdn.example");
    }
}
