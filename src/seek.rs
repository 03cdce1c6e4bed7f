//! Seek targets for queries.
//!
//! A target is either a relative flag (an edge plus the strict modifier) or
//! a bookmark. Flags can be given by name (`"first"`, `"last"`,
//! `"current"`, optionally joined with `"strict"` as in `"last|strict"`) or
//! as a raw bitmask of the `SEEK_*` constants.

use crate::bookmark::Bookmark;
use crate::error::{EventLogError, Result};
use crate::provider::{SeekOrigin, SeekRequest};
use crate::types::BookmarkToken;
use std::fmt;

pub const SEEK_RELATIVE_TO_FIRST: u32 = 1;
pub const SEEK_RELATIVE_TO_LAST: u32 = 2;
pub const SEEK_RELATIVE_TO_CURRENT: u32 = 3;
pub const SEEK_RELATIVE_TO_BOOKMARK: u32 = 4;
pub const SEEK_ORIGIN_MASK: u32 = 7;
pub const SEEK_STRICT: u32 = 0x10000;

/// Which end a relative seek counts from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    First,
    Last,
    /// The last delivered record.
    Current,
}

const EDGE_NAMES: &[(&str, Edge)] = &[
    ("first", Edge::First),
    ("last", Edge::Last),
    ("current", Edge::Current),
];

/// An edge with its strictness modifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelativeFlag {
    pub edge: Edge,
    /// Fail rather than clamp when the offset is out of range.
    pub strict: bool,
}

impl RelativeFlag {
    pub fn new(edge: Edge) -> Self {
        Self {
            edge,
            strict: false,
        }
    }

    pub fn strict(edge: Edge) -> Self {
        Self { edge, strict: true }
    }
}

/// Where [`Query::seek`](crate::Query::seek) moves the cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeekTarget {
    Relative(RelativeFlag),
    Bookmark(BookmarkToken),
}

impl SeekTarget {
    pub(crate) fn into_request(self, offset: i64) -> SeekRequest {
        match self {
            SeekTarget::Relative(flag) => SeekRequest {
                origin: match flag.edge {
                    Edge::First => SeekOrigin::First,
                    Edge::Last => SeekOrigin::Last,
                    Edge::Current => SeekOrigin::Current,
                },
                offset,
                strict: flag.strict,
            },
            SeekTarget::Bookmark(token) => SeekRequest {
                origin: SeekOrigin::Bookmark(token),
                offset,
                strict: false,
            },
        }
    }
}

fn unknown(value: impl fmt::Display) -> EventLogError {
    EventLogError::invalid_argument(format!("Unknown seek flag: {}", value))
}

impl From<Edge> for SeekTarget {
    fn from(edge: Edge) -> Self {
        SeekTarget::Relative(RelativeFlag::new(edge))
    }
}

impl From<RelativeFlag> for SeekTarget {
    fn from(flag: RelativeFlag) -> Self {
        SeekTarget::Relative(flag)
    }
}

impl From<&Bookmark> for SeekTarget {
    fn from(bookmark: &Bookmark) -> Self {
        SeekTarget::Bookmark(bookmark.token().clone())
    }
}

impl From<Bookmark> for SeekTarget {
    fn from(bookmark: Bookmark) -> Self {
        SeekTarget::Bookmark(bookmark.into_token())
    }
}

impl TryFrom<&str> for SeekTarget {
    type Error = EventLogError;

    fn try_from(value: &str) -> Result<Self> {
        let mut edge = None;
        let mut strict = false;
        for part in value.split('|').map(str::trim) {
            if part.eq_ignore_ascii_case("strict") && !strict {
                strict = true;
                continue;
            }
            match EDGE_NAMES.iter().find(|(name, _)| part.eq_ignore_ascii_case(name)) {
                Some((_, e)) if edge.is_none() => edge = Some(*e),
                _ => return Err(unknown(value)),
            }
        }
        match edge {
            Some(edge) => Ok(SeekTarget::Relative(RelativeFlag { edge, strict })),
            None => Err(unknown(value)),
        }
    }
}

impl TryFrom<String> for SeekTarget {
    type Error = EventLogError;

    fn try_from(value: String) -> Result<Self> {
        SeekTarget::try_from(value.as_str())
    }
}

impl TryFrom<&String> for SeekTarget {
    type Error = EventLogError;

    fn try_from(value: &String) -> Result<Self> {
        SeekTarget::try_from(value.as_str())
    }
}

impl TryFrom<u32> for SeekTarget {
    type Error = EventLogError;

    /// Bookmark-relative masks are rejected here; seek with a
    /// [`Bookmark`] instead.
    fn try_from(value: u32) -> Result<Self> {
        if value & !(SEEK_ORIGIN_MASK | SEEK_STRICT) != 0 {
            return Err(unknown(value));
        }
        let edge = match value & SEEK_ORIGIN_MASK {
            SEEK_RELATIVE_TO_FIRST => Edge::First,
            SEEK_RELATIVE_TO_LAST => Edge::Last,
            SEEK_RELATIVE_TO_CURRENT => Edge::Current,
            _ => return Err(unknown(value)),
        };
        Ok(SeekTarget::Relative(RelativeFlag {
            edge,
            strict: value & SEEK_STRICT != 0,
        }))
    }
}
