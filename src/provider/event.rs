//! Stored event representation, rendering, and position tokens.

use super::{ProviderError, ProviderResult};
use crate::locale::Locale;
use crate::types::{BookmarkToken, RenderOptions};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const EVENT_NAMESPACE: &str = "http://schemas.microsoft.com/win/2004/08/events/event";

/// The `System` section of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFields {
    pub provider_name: String,
    pub provider_guid: Option<String>,
    pub event_id: u16,
    pub qualifiers: Option<u16>,
    pub version: u8,
    pub level: u8,
    pub task: u16,
    pub opcode: u8,
    pub keywords: u64,
    /// Microseconds since Unix epoch.
    pub time_created: i64,
    pub process_id: u32,
    pub thread_id: u32,
    pub computer: String,
    pub user_sid: Option<String>,
    /// Account name resolved from `user_sid`, when known.
    pub user_name: Option<String>,
}

impl SystemFields {
    /// `EventID` with qualifiers folded into the high word.
    pub fn combined_event_id(&self) -> u32 {
        (u32::from(self.qualifiers.unwrap_or(0)) << 16) | u32::from(self.event_id)
    }
}

/// Input for appending an event (before a record id is assigned).
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub system: SystemFields,
    /// Message templates keyed by locale code (`"neutral"` is the fallback).
    pub messages: BTreeMap<String, String>,
    pub inserts: Vec<String>,
}

impl NewEvent {
    pub fn new(provider_name: impl Into<String>, event_id: u16) -> Self {
        Self {
            system: SystemFields {
                provider_name: provider_name.into(),
                provider_guid: None,
                event_id,
                qualifiers: None,
                version: 0,
                level: 4,
                task: 0,
                opcode: 0,
                keywords: 0x0080_0000_0000_0000,
                time_created: Utc::now().timestamp_micros(),
                process_id: std::process::id(),
                thread_id: 0,
                computer: "localhost".to_string(),
                user_sid: None,
                user_name: None,
            },
            messages: BTreeMap::new(),
            inserts: Vec::new(),
        }
    }

    pub fn level(mut self, level: u8) -> Self {
        self.system.level = level;
        self
    }

    pub fn qualifiers(mut self, qualifiers: u16) -> Self {
        self.system.qualifiers = Some(qualifiers);
        self
    }

    pub fn task(mut self, task: u16) -> Self {
        self.system.task = task;
        self
    }

    pub fn opcode(mut self, opcode: u8) -> Self {
        self.system.opcode = opcode;
        self
    }

    pub fn keywords(mut self, keywords: u64) -> Self {
        self.system.keywords = keywords;
        self
    }

    pub fn computer(mut self, computer: impl Into<String>) -> Self {
        self.system.computer = computer.into();
        self
    }

    pub fn time_created(mut self, micros: i64) -> Self {
        self.system.time_created = micros;
        self
    }

    pub fn user(mut self, sid: impl Into<String>, name: Option<&str>) -> Self {
        self.system.user_sid = Some(sid.into());
        self.system.user_name = name.map(str::to_string);
        self
    }

    /// Neutral message template.
    pub fn message(self, template: impl Into<String>) -> Self {
        self.localized_message("neutral", template)
    }

    pub fn localized_message(mut self, locale: &str, template: impl Into<String>) -> Self {
        self.messages.insert(locale.to_string(), template.into());
        self
    }

    pub fn insert(mut self, value: impl Into<String>) -> Self {
        self.inserts.push(value.into());
        self
    }

    pub fn inserts<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inserts.extend(values.into_iter().map(Into::into));
        self
    }
}

/// An event as held by a store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub record_id: u64,
    pub channel: String,
    pub system: SystemFields,
    pub messages: BTreeMap<String, String>,
    pub inserts: Vec<String>,
}

impl StoredEvent {
    pub fn from_new(record_id: u64, channel: &str, event: NewEvent) -> Self {
        Self {
            record_id,
            channel: channel.to_string(),
            system: event.system,
            messages: event.messages,
            inserts: event.inserts,
        }
    }

    /// Template for `locale`, falling back to the neutral one, then to any.
    pub fn template_for(&self, locale: &Locale) -> Option<&str> {
        self.messages
            .get(locale.code())
            .or_else(|| self.messages.get("neutral"))
            .or_else(|| self.messages.values().next())
            .map(String::as_str)
    }

    pub fn render(&self, options: &RenderOptions) -> ProviderResult<String> {
        if options.render_as_xml {
            Ok(self.to_xml())
        } else {
            self.to_system_json(options)
        }
    }

    pub fn to_xml(&self) -> String {
        let s = &self.system;
        let mut xml = String::with_capacity(512);
        let _ = write!(xml, "<Event xmlns='{}'><System>", EVENT_NAMESPACE);
        let _ = write!(xml, "<Provider Name='{}'", escape(&s.provider_name));
        if let Some(guid) = &s.provider_guid {
            let _ = write!(xml, " Guid='{}'", escape(guid));
        }
        xml.push_str("/>");
        match s.qualifiers {
            Some(q) => {
                let _ = write!(xml, "<EventID Qualifiers='{}'>{}</EventID>", q, s.event_id);
            }
            None => {
                let _ = write!(xml, "<EventID>{}</EventID>", s.event_id);
            }
        }
        let _ = write!(
            xml,
            "<Version>{}</Version><Level>{}</Level><Task>{}</Task><Opcode>{}</Opcode>\
             <Keywords>0x{:x}</Keywords><TimeCreated SystemTime='{}'/>\
             <EventRecordID>{}</EventRecordID><Correlation/>\
             <Execution ProcessID='{}' ThreadID='{}'/><Channel>{}</Channel>\
             <Computer>{}</Computer>",
            s.version,
            s.level,
            s.task,
            s.opcode,
            s.keywords,
            format_time(s.time_created),
            self.record_id,
            s.process_id,
            s.thread_id,
            escape(&self.channel),
            escape(&s.computer),
        );
        match &s.user_sid {
            Some(sid) => {
                let _ = write!(xml, "<Security UserID='{}'/>", escape(sid));
            }
            None => xml.push_str("<Security/>"),
        }
        xml.push_str("</System><EventData>");
        for value in &self.inserts {
            let _ = write!(xml, "<Data>{}</Data>", escape(value));
        }
        xml.push_str("</EventData></Event>");
        xml
    }

    fn to_system_json(&self, options: &RenderOptions) -> ProviderResult<String> {
        let s = &self.system;
        let (event_id, qualifiers) = if options.preserve_qualifiers {
            (u32::from(s.event_id), s.qualifiers)
        } else {
            (s.combined_event_id(), None)
        };
        let user_id = if options.preserve_sid {
            s.user_sid.clone()
        } else {
            s.user_name.clone().or_else(|| s.user_sid.clone())
        };
        let value = serde_json::json!({
            "ProviderName": s.provider_name,
            "ProviderGuid": s.provider_guid,
            "EventID": event_id,
            "Qualifiers": qualifiers,
            "Level": s.level,
            "Task": s.task,
            "Opcode": s.opcode,
            "Keywords": format!("0x{:x}", s.keywords),
            "TimeCreated": format_time(s.time_created),
            "EventRecordID": self.record_id,
            "ProcessID": s.process_id,
            "ThreadID": s.thread_id,
            "Channel": self.channel,
            "Computer": s.computer,
            "UserID": user_id,
            "Version": s.version,
        });
        serde_json::to_string(&value).map_err(|e| {
            ProviderError::new(
                super::ProviderErrorKind::QueryFailed,
                super::codes::CORRUPTION,
                e.to_string(),
            )
        })
    }
}

fn format_time(micros: i64) -> String {
    match DateTime::<Utc>::from_timestamp_micros(micros) {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => micros.to_string(),
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Token for "positioned at `record_id` in `channel`".
pub(crate) fn encode_position(channel: &str, record_id: u64) -> BookmarkToken {
    BookmarkToken::new(format!(
        "<BookmarkList>\r\n  <Bookmark Channel='{}' RecordId='{}' IsCurrent='true'/>\r\n</BookmarkList>",
        escape(channel),
        record_id
    ))
}

fn attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{}='", name);
    let start = element.find(&key)? + key.len();
    let len = element[start..].find('\'')?;
    Some(&element[start..start + len])
}

/// Parse a token produced by [`encode_position`].
///
/// Returns `None` for the empty bookmark.
pub(crate) fn decode_position(token: &BookmarkToken) -> ProviderResult<Option<(String, u64)>> {
    if token.is_empty() {
        return Ok(None);
    }
    let text = token.as_str().trim();
    if !text.starts_with("<BookmarkList>") || !text.ends_with("</BookmarkList>") {
        return Err(ProviderError::invalid_bookmark("Bookmark is not a bookmark list"));
    }
    let element = match text.find("<Bookmark ") {
        Some(i) => &text[i..],
        None => return Ok(None),
    };
    let channel = attribute(element, "Channel")
        .ok_or_else(|| ProviderError::invalid_bookmark("Bookmark has no channel"))?;
    let record_id = attribute(element, "RecordId")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| ProviderError::invalid_bookmark("Bookmark has no valid record id"))?;
    Ok(Some((unescape(channel), record_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredEvent {
        StoredEvent::from_new(
            42,
            "Application",
            NewEvent::new("Test<Source>", 1000)
                .qualifiers(1)
                .user("S-1-5-18", Some("SYSTEM"))
                .time_created(0)
                .message("Value %1")
                .localized_message("ja_JP", "値 %1")
                .insert("a&b"),
        )
    }

    #[test]
    fn test_xml_rendering() {
        let xml = sample().to_xml();
        assert!(xml.starts_with("<Event xmlns="));
        assert!(xml.contains("<Provider Name='Test&lt;Source&gt;'/>"));
        assert!(xml.contains("<EventID Qualifiers='1'>1000</EventID>"));
        assert!(xml.contains("<EventRecordID>42</EventRecordID>"));
        assert!(xml.contains("<TimeCreated SystemTime='1970-01-01T00:00:00.000000Z'/>"));
        assert!(xml.contains("<Data>a&amp;b</Data>"));
        assert!(xml.contains("<Security UserID='S-1-5-18'/>"));
    }

    #[test]
    fn test_system_json_qualifiers() {
        let event = sample();

        let plain = event
            .render(&RenderOptions {
                render_as_xml: false,
                ..Default::default()
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&plain).unwrap();
        assert_eq!(value["EventID"], (1u32 << 16) | 1000);
        assert!(value["Qualifiers"].is_null());
        assert_eq!(value["UserID"], "SYSTEM");

        let preserved = event
            .render(&RenderOptions {
                render_as_xml: false,
                preserve_qualifiers: true,
                preserve_sid: true,
                ..Default::default()
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&preserved).unwrap();
        assert_eq!(value["EventID"], 1000);
        assert_eq!(value["Qualifiers"], 1);
        assert_eq!(value["UserID"], "S-1-5-18");
    }

    #[test]
    fn test_template_fallback() {
        let event = sample();
        let ja = Locale::lookup("ja_JP").unwrap();
        let de = Locale::lookup("de_DE").unwrap();
        assert_eq!(event.template_for(&ja), Some("値 %1"));
        assert_eq!(event.template_for(&de), Some("Value %1"));
    }

    #[test]
    fn test_position_token() {
        let token = encode_position("Microsoft-Windows-Sysmon/Operational", 1234);
        assert_eq!(
            token.as_str(),
            "<BookmarkList>\r\n  <Bookmark Channel='Microsoft-Windows-Sysmon/Operational' RecordId='1234' IsCurrent='true'/>\r\n</BookmarkList>"
        );
        assert_eq!(
            decode_position(&token).unwrap(),
            Some(("Microsoft-Windows-Sysmon/Operational".to_string(), 1234))
        );
        assert_eq!(decode_position(&BookmarkToken::empty()).unwrap(), None);
    }

    #[test]
    fn test_bad_tokens() {
        for bad in [
            "garbage",
            "<BookmarkList><Bookmark RecordId='1'/></BookmarkList>",
            "<BookmarkList><Bookmark Channel='A' RecordId='x'/></BookmarkList>",
        ] {
            let err = decode_position(&BookmarkToken::new(bad)).unwrap_err();
            assert!(err.is_bookmark_rejection(), "{}", bad);
        }
    }
}
