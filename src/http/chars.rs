//! RFC 2616 character classes.

pub fn is_ctl(c: u8) -> bool {
    c < 32 || c == 127
}

pub fn is_separator(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'[' | b']' | b'?'
            | b'=' | b'{' | b'}' | b' ' | b'\t'
    )
}

/// Any CHAR except CTLs or separators.
pub fn is_token(c: u8) -> bool {
    c < 128 && !is_ctl(c) && !is_separator(c)
}

/// Any octet except CTLs, but including SP and HT.
pub fn is_text(c: u8) -> bool {
    !is_ctl(c) || c == b' ' || c == b'\t'
}

pub fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Linear whitespace, including the CR and LF of a folded line.
pub fn is_lws(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n')
}

pub fn is_hex(c: u8) -> bool {
    c.is_ascii_hexdigit()
}

pub fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

pub fn is_mark(c: u8) -> bool {
    matches!(c, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

pub fn is_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || is_mark(c)
}

pub fn is_reserved(c: u8) -> bool {
    matches!(c, b';' | b'/' | b'?' | b':' | b'@' | b'&' | b'=' | b'+' | b'$' | b',')
}

/// Path character, excluding the '%' of an escape sequence.
pub fn is_pchar(c: u8) -> bool {
    is_unreserved(c) || matches!(c, b':' | b'@' | b'&' | b'=' | b'+' | b'$' | b',')
}

/// URI character, excluding the '%' of an escape sequence.
pub fn is_uric(c: u8) -> bool {
    is_reserved(c) || is_unreserved(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_excludes_separators_and_controls() {
        assert!(is_token(b'a'));
        assert!(is_token(b'-'));
        assert!(!is_token(b':'));
        assert!(!is_token(b' '));
        assert!(!is_token(0x7f));
        assert!(!is_token(0xc3));
    }

    #[test]
    fn text_admits_high_octets_and_tabs() {
        assert!(is_text(0xe9));
        assert!(is_text(b'\t'));
        assert!(!is_text(b'\r'));
    }

    #[test]
    fn uri_classes() {
        assert!(is_pchar(b'@'));
        assert!(!is_pchar(b'/'));
        assert!(is_uric(b'/'));
        assert!(is_uric(b'?'));
        assert!(!is_uric(b'#'));
        assert_eq!(hex_value(b'F'), Some(15));
        assert_eq!(hex_value(b'g'), None);
    }
}
