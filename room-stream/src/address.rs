use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::StreamError;

const ROOM_PAGE_BASE: &str = "https://www.douyu.com/";

static PLATFORM_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:[^/]*?\.)?douyu\.com/").expect("valid regex"));

/**
    Numeric room identifier assigned by the platform.

    Always non-empty and made of ASCII digits only. Used as the signature
    cache key and in both upstream endpoints.
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomAddress(String);

impl RoomAddress {
    pub fn parse(s: &str) -> Result<Self, StreamError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StreamError::InvalidAddress(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public web page for this room.
    pub fn page_url(&self) -> String {
        format!("{ROOM_PAGE_BASE}{}", self.0)
    }
}

impl FromStr for RoomAddress {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RoomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/**
    Check whether a URL points somewhere on the platform's web site.

    Only answers the question; turning such a page into a [`RoomAddress`]
    requires scraping and is left to callers.
*/
pub fn is_platform_url(url: &str) -> bool {
    PLATFORM_URL.is_match(url.trim())
}
