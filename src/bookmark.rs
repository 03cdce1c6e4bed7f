//! Resumable position tokens.

use crate::types::{BookmarkToken, CursorId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Something a [`Bookmark`] can capture a position from.
///
/// Implemented by [`Query`](crate::Query) and [`Subscribe`](crate::Subscribe)
/// only. Other types cannot implement it:
///
/// ```compile_fail
/// use evtlog::{Bookmark, BookmarkToken, CursorId, Positioned};
///
/// struct NotACursor;
///
/// impl Positioned for NotACursor {
///     fn cursor_id(&self) -> CursorId {
///         CursorId(0)
///     }
///
///     fn position(&self) -> BookmarkToken {
///         BookmarkToken::new("garbage")
///     }
/// }
///
/// Bookmark::new().update(&NotACursor);
/// ```
pub trait Positioned: sealed::Sealed {
    fn cursor_id(&self) -> CursorId;

    /// Token for the current position (the initial position if the cursor
    /// has not advanced yet).
    fn position(&self) -> BookmarkToken;
}

/// A serializable snapshot of a cursor position.
///
/// The token is stored and replayed verbatim. Persist [`Bookmark::render`]
/// and restore it with [`Bookmark::from_token`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    token: BookmarkToken,
    #[serde(skip)]
    source: Option<CursorId>,
}

impl Bookmark {
    /// An empty bookmark.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: BookmarkToken::new(token),
            source: None,
        }
    }

    /// Capture the current position of `source`.
    pub fn update<P: Positioned + ?Sized>(&mut self, source: &P) {
        self.token = source.position();
        self.source = Some(source.cursor_id());
    }

    pub fn render(&self) -> String {
        self.token.as_str().to_string()
    }

    pub fn token(&self) -> &BookmarkToken {
        &self.token
    }

    pub fn into_token(self) -> BookmarkToken {
        self.token
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }

    /// The query or subscription last passed to [`update`](Self::update).
    pub fn source(&self) -> Option<CursorId> {
        self.source
    }
}

impl fmt::Debug for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bookmark")
            .field("token", &self.token)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token.as_str())
    }
}
