//! Wire protocol types for parent-method communication.
//!
//! Every message is a status line `"<code> <text>\n"`, zero or more
//! `"<Tag>: <value>\n"` header lines and a terminating blank line.
//!
//! - **Inbound** (method stdout): [`Message`], dispatched on [`StatusCode`]
//! - **Outbound** (method stdin): [`Request`], encoded by the codec

/// Canonical header tag names.
pub mod tag {
    pub const URI: &str = "URI";
    pub const SIZE: &str = "Size";
    pub const MD5_HASH: &str = "MD5-Hash";
    pub const IMS_HIT: &str = "IMS-Hit";
    pub const ALT_IMS_HIT: &str = "Alt-IMS-Hit";
    pub const MEDIA: &str = "Media";
    pub const DRIVE: &str = "Drive";
    pub const MESSAGE: &str = "Message";
    pub const VERSION: &str = "Version";
    pub const SINGLE_INSTANCE: &str = "Single-Instance";
    pub const PIPELINE: &str = "Pipeline";
    pub const SEND_CONFIG: &str = "Send-Config";
    pub const LOCAL_ONLY: &str = "Local-Only";
    pub const CONFIG_ITEM: &str = "Config-Item";
    pub const FILENAME: &str = "Filename";
    pub const FAILED: &str = "Failed";
}

/// Status codes sent by a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Capabilities,
    Log,
    Status,
    UriStart,
    UriDone,
    UriFailure,
    GeneralFailure,
    MediaChange,
    /// Anything else. Tolerated so newer methods keep working.
    Unknown(u32),
}

impl StatusCode {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Capabilities => 100,
            Self::Log => 101,
            Self::Status => 102,
            Self::UriStart => 200,
            Self::UriDone => 201,
            Self::UriFailure => 400,
            Self::GeneralFailure => 401,
            Self::MediaChange => 403,
            Self::Unknown(code) => *code,
        }
    }
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        match code {
            100 => Self::Capabilities,
            101 => Self::Log,
            102 => Self::Status,
            200 => Self::UriStart,
            201 => Self::UriDone,
            400 => Self::UriFailure,
            401 => Self::GeneralFailure,
            403 => Self::MediaChange,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// One framed inbound message, without its terminating blank line.
///
/// The raw text is kept intact; item hooks receive the whole message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    raw: String,
}

impl Message {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Leading decimal number of the status line, `None` when the message does
    /// not start with one.
    pub fn code(&self) -> Option<StatusCode> {
        let line = self.raw.trim_start();
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        line[..digits].parse::<u32>().ok().map(StatusCode::from)
    }

    /// Free text following the status code on the first line.
    pub fn text(&self) -> &str {
        let line = self.raw.lines().next().unwrap_or_default().trim_start();
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        line[digits..].trim()
    }

    /// Value of the first header line named `name` (ASCII case-insensitive).
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.raw.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name)
                .then(|| value.trim_start_matches([' ', '\t']))
        })
    }

    pub fn tag_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.tag(name).unwrap_or(default)
    }

    pub fn tag_bool(&self, name: &str, default: bool) -> bool {
        self.tag(name)
            .map_or(default, |value| string_to_bool(value, default))
    }

    /// Leading digits of the tag parsed as a count, 0 when absent or malformed.
    pub fn tag_u64(&self, name: &str) -> u64 {
        let Some(value) = self.tag(name) else {
            return 0;
        };
        let value = value.trim_start();
        let digits = value.bytes().take_while(u8::is_ascii_digit).count();
        value[..digits].parse().unwrap_or(0)
    }
}

/// Interpret the usual spellings of a boolean; anything else yields `default`.
pub fn string_to_bool(text: &str, default: bool) -> bool {
    let text = text.trim();
    match text {
        "0" => return false,
        "1" => return true,
        _ => {}
    }

    const NEGATIVE: [&str; 5] = ["no", "false", "without", "off", "disable"];
    const POSITIVE: [&str; 5] = ["yes", "true", "with", "on", "enable"];

    if NEGATIVE.iter().any(|word| text.eq_ignore_ascii_case(word)) {
        false
    } else if POSITIVE.iter().any(|word| text.eq_ignore_ascii_case(word)) {
        true
    } else {
        default
    }
}

/// Requests from parent to method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// 600: fetch `uri` into `filename`.
    ///
    /// `headers` is appended verbatim after the `Filename` line; each extra
    /// header must be introduced by its own leading newline.
    Acquire {
        uri: String,
        filename: String,
        headers: String,
    },

    /// 601: configuration push, one `(dotted-key, raw value)` per item.
    Configuration { items: Vec<(String, String)> },

    /// 603: reply to a 403 Media Change.
    MediaChanged { failed: bool },
}

impl Request {
    pub fn code(&self) -> u32 {
        match self {
            Self::Acquire { .. } => 600,
            Self::Configuration { .. } => 601,
            Self::MediaChanged { .. } => 603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_code_and_text() {
        let msg = Message::new("200 URI Start\nURI: http://x/a.deb\nSize: 10");
        assert_eq!(msg.code(), Some(StatusCode::UriStart));
        assert_eq!(msg.text(), "URI Start");
    }

    #[test]
    fn non_numeric_status_line_has_no_code() {
        assert_eq!(Message::new("URI Start\nURI: x").code(), None);
        assert_eq!(Message::new("").code(), None);
    }

    #[test]
    fn unknown_code_is_preserved() {
        let msg = Message::new("250 Something New");
        assert_eq!(msg.code(), Some(StatusCode::Unknown(250)));
        assert_eq!(msg.code().map(|c| c.as_u32()), Some(250));
    }

    #[test]
    fn tag_lookup_is_case_insensitive_and_skips_status_line() {
        let msg = Message::new("102 Status\nmessage: Connecting to host\nURI: a");
        assert_eq!(msg.tag("Message"), Some("Connecting to host"));
        assert_eq!(msg.tag("uri"), Some("a"));
        assert_eq!(msg.tag("Status"), None);
    }

    #[test]
    fn tag_value_keeps_inner_colons() {
        let msg = Message::new("200 URI Start\nURI: http://host:80/a.deb");
        assert_eq!(msg.tag(tag::URI), Some("http://host:80/a.deb"));
    }

    #[test]
    fn tag_u64_follows_leading_digits() {
        let msg = Message::new("200 URI Start\nSize: 1234 bytes\nBad: x");
        assert_eq!(msg.tag_u64("Size"), 1234);
        assert_eq!(msg.tag_u64("Bad"), 0);
        assert_eq!(msg.tag_u64("Missing"), 0);
    }

    #[test]
    fn string_to_bool_spellings() {
        for yes in ["yes", "TRUE", "with", "on", "Enable", "1"] {
            assert!(string_to_bool(yes, false), "{yes}");
        }
        for no in ["no", "False", "without", "OFF", "disable", "0"] {
            assert!(!string_to_bool(no, true), "{no}");
        }
        assert!(string_to_bool("maybe", true));
        assert!(!string_to_bool("", false));
    }

    #[test]
    fn request_codes() {
        let acquire = Request::Acquire {
            uri: String::new(),
            filename: String::new(),
            headers: String::new(),
        };
        assert_eq!(acquire.code(), 600);
        assert_eq!(Request::Configuration { items: vec![] }.code(), 601);
        assert_eq!(Request::MediaChanged { failed: true }.code(), 603);
    }
}
