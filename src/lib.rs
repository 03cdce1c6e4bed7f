//! # evtlog
//!
//! Read, tail and checkpoint structured event logs.
//!
//! ## Core Concepts
//!
//! - **Query**: bounded pull cursor over the events of a channel matching a filter
//! - **Subscribe**: live cursor with backlog draining, tail mode and rate limiting
//! - **Bookmark**: opaque position token for resuming after a restart
//! - **Provider**: the event source behind both cursors ([`provider::EventProvider`])
//!
//! ## Example
//!
//! ```
//! use evtlog::provider::{LogProvider, MemoryStore, NewEvent};
//! use evtlog::{Bookmark, Subscribe};
//! use std::sync::Arc;
//!
//! let store = MemoryStore::with_channels(["Application"]);
//! store.append("Application", NewEvent::new("App", 1).message("Error %1 at %2").inserts(["404", "/index"]))?;
//! let provider = Arc::new(LogProvider::new(store));
//!
//! let mut sub = Subscribe::new(provider.clone());
//! sub.set_read_existing_events(true);
//! sub.subscribe("Application", "*", None, None)?;
//! while sub.next()? {
//!     assert_eq!(sub.render()?.message, "Error 404 at /index");
//!     sub.close_handle();
//! }
//!
//! // Persist the position, resume later.
//! let saved = sub.bookmark().render();
//! let mut resumed = Subscribe::new(provider);
//! resumed.subscribe("Application", "*", Some(&Bookmark::from_token(saved)), None)?;
//! assert!(resumed.query_error().is_none());
//! # Ok::<(), evtlog::EventLogError>(())
//! ```

pub mod bookmark;
pub mod channels;
pub mod cursor;
pub mod error;
pub mod locale;
pub mod provider;
pub mod query;
pub mod rate_limit;
pub mod render;
pub mod seek;
pub mod session;
pub mod subscribe;
pub mod types;

// Re-exports
pub use bookmark::{Bookmark, Positioned};
pub use channels::Channels;
pub use cursor::Records;
pub use error::{EventLogError, QueryError, Result};
pub use locale::Locale;
pub use query::Query;
pub use rate_limit::{RateLimit, RateLimitPolicy, RATE_INFINITE};
pub use render::{mask_placeholders, render_message, try_render_message};
pub use seek::{Edge, RelativeFlag, SeekTarget};
pub use session::{AuthFlag, Session};
pub use subscribe::{SubscribeConfig, Subscribe};
pub use types::{
    BookmarkToken, CursorId, CursorState, DeliveryMode, EventRecord, RenderOptions,
    SubscriptionState,
};
