//! `%xx` escaping for values that must stay on a single protocol line.

/// Escape `text` so it contains no whitespace, control or non-ASCII bytes.
///
/// Every byte `<= 0x20`, `>= 0x7F`, `%` itself and any byte listed in `bad` is
/// written as `%` followed by two lowercase hex digits.
pub fn quote(text: &str, bad: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &byte in text.as_bytes() {
        if byte <= 0x20 || byte >= 0x7F || byte == b'%' || bad.as_bytes().contains(&byte) {
            out.push_str(&format!("%{byte:02x}"));
        } else {
            out.push(byte as char);
        }
    }
    out
}

/// Invert [`quote`]. Malformed escapes are kept literally.
pub fn dequote(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(byte) = bytes
                .get(i + 1..i + 3)
                .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(quote("/var/cache/apt/archives/", "\n"), "/var/cache/apt/archives/");
    }

    #[test]
    fn escapes_line_breaks_spaces_and_percent() {
        assert_eq!(quote("a b\nc%d\r", "\n"), "a%20b%0ac%25d%0d");
    }

    #[test]
    fn escapes_caller_supplied_bytes() {
        assert_eq!(quote("k=v", "="), "k%3dv");
    }

    #[test]
    fn embedded_newlines_round_trip() {
        let value = "first line\nsecond line\n\n100% done\ttab";
        let quoted = quote(value, "\n");
        assert!(!quoted.contains('\n'));
        assert_eq!(dequote(&quoted), value);
    }

    #[test]
    fn non_ascii_round_trips() {
        let value = "Grüße, 世界";
        assert_eq!(dequote(&quote(value, "")), value);
    }

    #[test]
    fn malformed_escapes_pass_through() {
        assert_eq!(dequote("50%"), "50%");
        assert_eq!(dequote("%zz%4"), "%zz%4");
        assert_eq!(dequote("%41%42"), "AB");
    }
}
