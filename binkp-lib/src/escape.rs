/// escape a file name for the `M_FILE`, `M_GET`, `M_GOT` and `M_SKIP` arguments
///
/// spaces and backslashes would break the space separated arguments so
/// they are always escaped as `\xHH`. Control characters and every byte
/// outside of the printable ASCII range are escaped too.
///
/// ```
/// # use binkp_lib::escape;
/// assert_eq!(escape("my file.pkt"), "my\\x20file.pkt");
/// ```
pub fn escape(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());

    for byte in name.bytes() {
        if needs_escaping(byte) {
            escaped.push_str(&format!("\\x{:02x}", byte));
        } else {
            escaped.push(byte as char);
        }
    }

    escaped
}

/// reverse of [`escape`]
///
/// also accepts the legacy `\20` (space) and `\09` (tab) forms. Escape
/// sequences that are not recognised are kept verbatim. The unescaped
/// bytes are read as UTF-8 when they are valid, otherwise every byte is
/// taken as the character of the same code (Latin-1).
///
/// ```
/// # use binkp_lib::unescape;
/// assert_eq!(unescape("caf\\xc3\\xa9.pkt"), "café.pkt");
/// assert_eq!(unescape("caf\\xe9.pkt"), "café.pkt");
/// ```
pub fn unescape(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut unescaped = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte != b'\\' {
            unescaped.push(byte);
            i += 1;
            continue;
        }

        let rest = &bytes[i + 1..];
        match rest {
            [b'x', h, l, ..] if h.is_ascii_hexdigit() && l.is_ascii_hexdigit() => {
                unescaped.push(hex_value(*h) << 4 | hex_value(*l));
                i += 4;
            }
            [b'2', b'0', ..] => {
                unescaped.push(b' ');
                i += 3;
            }
            [b'0', b'9', ..] => {
                unescaped.push(b'\t');
                i += 3;
            }
            _ => {
                unescaped.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8(unescaped)
        .unwrap_or_else(|error| error.into_bytes().into_iter().map(char::from).collect())
}

fn needs_escaping(byte: u8) -> bool {
    byte == b' ' || byte == b'\\' || byte < 0x20 || byte >= 0x7F
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}
