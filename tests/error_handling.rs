//! Error handling and edge case tests.

use evtlog::provider::{codes, LogProvider, MemoryStore, NewEvent};
use evtlog::{AuthFlag, EventLogError, Query, Session, Subscribe};
use std::sync::Arc;

fn provider() -> Arc<LogProvider<MemoryStore>> {
    let store = MemoryStore::with_channels(["Application"]);
    store
        .append("Application", NewEvent::new("App", 1).message("%1"))
        .unwrap();
    Arc::new(LogProvider::new(store))
}

// --- Query Construction ---

#[test]
fn test_unknown_channel() {
    let err = Query::new(provider(), "NoSuchChannel", "*", None).unwrap_err();
    assert!(matches!(err, EventLogError::ChannelNotFound(ref c) if c == "NoSuchChannel"));
    assert_eq!(err.to_string(), "Channel not found: NoSuchChannel");
}

#[test]
fn test_invalid_filter_carries_code() {
    for filter in ["", "*[System[Level=", "SELECT * FROM Application"] {
        match Query::new(provider(), "Application", filter, None).unwrap_err() {
            EventLogError::InvalidFilter(e) => {
                assert_eq!(e.code, codes::INVALID_QUERY);
                assert!(e.to_string().starts_with("ErrorCode: 15001\nError: "));
                assert!(e.to_string().ends_with('\n'));
            }
            other => panic!("unexpected error for {:?}: {}", filter, other),
        }
    }
}

#[test]
fn test_deeply_nested_filter_is_rejected() {
    let depth = 200_000;
    let filter = format!("*[System[{}Level=1{}]]", "(".repeat(depth), ")".repeat(depth));
    match Query::new(provider(), "Application", &filter, None).unwrap_err() {
        EventLogError::InvalidFilter(e) => assert_eq!(e.code, codes::INVALID_QUERY),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unreachable_session() {
    let session = Session::new("eventlog.example.invalid").with_credentials(
        Some("CORP"),
        Some("svc"),
        Some("secret"),
    );
    let err = Query::new(provider(), "Application", "*", Some(&session)).unwrap_err();
    match err {
        EventLogError::RemoteConnect { server, .. } => {
            assert_eq!(server, "eventlog.example.invalid")
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_local_session_is_accepted() {
    let session = Session::new("localhost");
    assert!(Query::new(provider(), "Application", "*", Some(&session)).is_ok());

    let provider = Arc::new(
        LogProvider::new(MemoryStore::with_channels(["Application"]))
            .with_reachable_hosts(["collector01"]),
    );
    let session = Session::new("COLLECTOR01");
    let mut sub = Subscribe::new(provider);
    sub.subscribe("Application", "*", None, Some(&session))
        .unwrap();
}

// --- Session Values ---

#[test]
fn test_session_sentinels_and_flags() {
    let mut session = Session::new("localhost");
    assert_eq!(session.domain(), "(NULL)");
    assert_eq!(session.username(), "(NULL)");
    assert_eq!(session.password(), "(NULL)");
    assert_eq!(session.flags(), AuthFlag::Default);

    session.set_flags("ntlm").unwrap();
    assert_eq!(session.flags(), AuthFlag::Ntlm);
    session.set_flags("AuthKerberos").unwrap();
    assert_eq!(session.flags(), AuthFlag::Kerberos);
    session.set_flags(AuthFlag::Negotiate).unwrap();
    assert_eq!(session.flags(), AuthFlag::Negotiate);

    let err = session.set_flags("basic").unwrap_err();
    assert!(matches!(err, EventLogError::InvalidArgument(_)));
    assert_eq!(session.flags(), AuthFlag::Negotiate);
}

// --- Rendering Never Fails ---

#[test]
fn test_unsatisfied_template_masks() {
    let mut query = Query::new(provider(), "Application", "*", None).unwrap();
    let record = query.each().next().unwrap().unwrap();
    assert_eq!(record.message, "?");
}

// --- Closed Instances ---

#[test]
fn test_closed_query_rejects_operations() {
    let mut query = Query::new(provider(), "Application", "*", None).unwrap();
    query.close();
    assert!(matches!(query.next(), Err(EventLogError::Closed)));
    assert!(matches!(query.render(), Err(EventLogError::Closed)));
    assert!(matches!(query.seek("first"), Err(EventLogError::Closed)));
    // Bad flags are still reported as such.
    assert!(matches!(query.seek("hoge"), Err(EventLogError::InvalidArgument(_))));
}

#[test]
fn test_closed_subscription_rejects_operations() {
    let mut sub = Subscribe::new(provider());
    sub.subscribe("Application", "*", None, None).unwrap();
    sub.close();
    assert!(matches!(sub.next(), Err(EventLogError::Closed)));
    assert!(matches!(sub.render(), Err(EventLogError::Closed)));
    assert!(matches!(
        sub.subscribe("Application", "*", None, None),
        Err(EventLogError::InvalidState(_))
    ));
    assert!(!sub.cancel());
}

#[test]
fn test_render_before_next() {
    let mut sub = Subscribe::new(provider());
    sub.set_read_existing_events(true);
    sub.subscribe("Application", "*", None, None).unwrap();
    assert!(matches!(sub.render(), Err(EventLogError::NoCurrentEvent)));
    assert!(sub.next().unwrap());
    sub.close_handle();
    assert!(matches!(sub.render(), Err(EventLogError::NoCurrentEvent)));
}

#[test]
fn test_failed_locale_keeps_previous() {
    let mut sub = Subscribe::new(provider());
    assert_eq!(sub.locale(), "neutral");
    sub.set_locale("de_DE").unwrap();
    assert!(sub.set_locale("xx_XX").is_err());
    assert_eq!(sub.locale(), "de_DE");
}
