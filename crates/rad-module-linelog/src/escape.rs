//! Escaping applied to values substituted into lines and filenames.

/// Escapes a value for a single log line: backslashes are doubled, newline
/// and carriage return become `\n` and `\r`, and any other control
/// character becomes a three-digit octal escape.
pub fn escape_line(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            control if u32::from(control) < 0x20 => {
                out.push('\\');
                push_digits(out, u32::from(control), 3, 3);
            }
            other => out.push(other),
        }
    }
}

/// Replaces path separators and control characters with `_`, so a value
/// can never add directories to a filename.
pub fn make_filename_safe(value: &str, out: &mut String) {
    out.extend(
        value
            .chars()
            .map(|c| if c == '/' || c.is_control() { '_' } else { c }),
    );
}

/// Encodes every byte outside `[A-Za-z0-9_.]` as `-XX` (lowercase hex).
/// `-` is encoded as well, so the mapping stays reversible.
pub fn escape_filename(value: &str, out: &mut String) {
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' {
            out.push(char::from(byte));
        } else {
            out.push('-');
            push_digits(out, u32::from(byte), 4, 2);
        }
    }
}

/// Appends the low `count` digits of `value` in base `2^bits`.
fn push_digits(out: &mut String, value: u32, bits: u32, count: u32) {
    let mask = (1 << bits) - 1;
    for place in (0..count).rev() {
        out.extend(char::from_digit((value >> (place * bits)) & mask, 1 << bits));
    }
}
