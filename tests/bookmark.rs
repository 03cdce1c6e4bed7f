//! Bookmark capture and resume across queries and subscriptions.

use evtlog::provider::{LogProvider, MemoryStore, NewEvent};
use evtlog::{Bookmark, BookmarkToken, Query, Subscribe};
use std::sync::Arc;

fn provider(count: u16) -> Arc<LogProvider<MemoryStore>> {
    let store = MemoryStore::with_channels(["Security"]);
    for i in 1..=count {
        store
            .append(
                "Security",
                NewEvent::new("Microsoft-Windows-Security-Auditing", 4624)
                    .message("Logon %1")
                    .insert(format!("user{}", i)),
            )
            .unwrap();
    }
    Arc::new(LogProvider::new(store))
}

#[test]
fn test_empty_bookmark_rendering() {
    let bookmark = Bookmark::new();
    assert_eq!(bookmark.render(), BookmarkToken::EMPTY);
    assert_eq!(bookmark.to_string(), "<BookmarkList>\r\n</BookmarkList>");
}

#[test]
fn test_token_format() {
    let provider = provider(3);
    let mut query = Query::new(provider, "Security", "*", None).unwrap();
    query.next().unwrap();
    query.next().unwrap();

    let mut bookmark = Bookmark::new();
    bookmark.update(&query);
    assert_eq!(
        bookmark.render(),
        "<BookmarkList>\r\n  <Bookmark Channel='Security' RecordId='2' IsCurrent='true'/>\r\n</BookmarkList>"
    );
}

#[test]
fn test_update_reflects_current_position() {
    let provider = provider(3);
    let mut query = Query::new(provider, "Security", "*", None).unwrap();
    let mut bookmark = Bookmark::new();

    query.next().unwrap();
    bookmark.update(&query);
    let after_first = bookmark.render();

    query.next().unwrap();
    bookmark.update(&query);
    assert_ne!(bookmark.render(), after_first);
    assert!(bookmark.render().contains("RecordId='2'"));
}

#[test]
fn test_bookmark_outlives_source() {
    let provider = provider(2);
    let mut bookmark = Bookmark::new();
    {
        let mut query = Query::new(provider.clone(), "Security", "*", None).unwrap();
        query.next().unwrap();
        bookmark.update(&query);
    }
    assert!(bookmark.source().is_some());

    let mut query = Query::new(provider, "Security", "*", None).unwrap();
    assert!(query.seek(&bookmark).unwrap());
    assert!(query.next().unwrap());
    assert_eq!(query.render().unwrap().message, "Logon user1");
}

#[test]
fn test_query_bookmark_resumes_subscription() {
    let provider = provider(4);
    let mut query = Query::new(provider.clone(), "Security", "*", None).unwrap();
    query.next().unwrap();
    query.next().unwrap();

    let mut bookmark = Bookmark::new();
    bookmark.update(&query);

    let mut sub = Subscribe::new(provider);
    sub.subscribe("Security", "*", Some(&bookmark), None).unwrap();
    assert!(sub.query_error().is_none());

    let messages: Vec<String> = sub.each().map(|r| r.unwrap().message).collect();
    assert_eq!(messages, vec!["Logon user3", "Logon user4"]);
}

#[test]
fn test_subscription_bookmark_seeks_query() {
    let provider = provider(4);
    let mut sub = Subscribe::new(provider.clone());
    sub.set_read_existing_events(true);
    sub.subscribe("Security", "*", None, None).unwrap();
    sub.next().unwrap();
    sub.next().unwrap();
    sub.next().unwrap();
    let expected = sub.render().unwrap();

    let mut bookmark = Bookmark::new();
    bookmark.update(&sub);

    let mut query = Query::new(provider, "Security", "*", None).unwrap();
    assert!(query.seek(&bookmark).unwrap());
    assert!(query.next().unwrap());
    assert_eq!(query.render().unwrap(), expected);
}

#[test]
fn test_persisted_bookmark_serde() {
    let provider = provider(2);
    let mut query = Query::new(provider, "Security", "*", None).unwrap();
    query.next().unwrap();
    let mut bookmark = Bookmark::new();
    bookmark.update(&query);

    let json = serde_json::to_string(&bookmark).unwrap();
    let restored: Bookmark = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.render(), bookmark.render());
    assert_eq!(restored.source(), None);
}
