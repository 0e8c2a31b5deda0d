// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for wslsetup.

/// Mask a sensitive string (like a license key) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
///
/// # Examples
///
/// ```
/// use wslsetup::utils::mask_sensitive;
///
/// assert_eq!(mask_sensitive("ABCD-1234-EFGH", 4), "ABCD...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        return "...".to_string();
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Decode output from `wsl.exe`, which writes UTF-16LE for its own messages
/// and UTF-8 for whatever runs inside the distribution.
pub fn decode_wsl_output(bytes: &[u8]) -> String {
    let looks_utf16 = bytes.len() >= 2
        && bytes.len() % 2 == 0
        && (bytes.starts_with(&[0xFF, 0xFE]) || bytes.iter().skip(1).step_by(2).all(|b| *b == 0));

    let text = if looks_utf16 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };

    text.trim_start_matches('\u{feff}').replace('\0', "")
}

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Quote a value for a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a value for a Windows command line (used for the autostart entry).
///
/// Follows the `CommandLineToArgvW` rules: backslashes are literal unless
/// they precede a quote, where 2n become n and 2n+1 escape the quote.
pub fn windows_quote(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\t', '"']) {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in value.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat_n('\\', backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat_n('\\', backslashes * 2));
    quoted.push('"');
    quoted
}

/// Last `n` non-empty lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("ABCD-1234-EFGH", 4), "ABCD...");
        assert_eq!(mask_sensitive("abc", 4), "...");
        assert_eq!(mask_sensitive("", 4), "...");
    }

    #[test]
    fn test_decode_utf16_distribution_list() {
        let utf16: Vec<u8> = "Ubuntu\r\nedge\r\n"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let decoded = decode_wsl_output(&utf16);
        let names: Vec<&str> = decoded.lines().map(str::trim).collect();
        assert_eq!(names, vec!["Ubuntu", "edge"]);
    }

    #[test]
    fn test_decode_plain_utf8() {
        assert_eq!(decode_wsl_output(b"ready\n"), "ready\n");
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/file.deb"), "/tmp/file.deb");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_windows_quote() {
        assert_eq!(windows_quote("install"), "install");
        assert_eq!(windows_quote(r"C:\Program Files\x.exe"), r#""C:\Program Files\x.exe""#);
    }

    #[test]
    fn test_windows_quote_backslashes_before_quotes() {
        assert_eq!(windows_quote(r"C:\My Dir\"), r#""C:\My Dir\\""#);
        assert_eq!(windows_quote(r#"a\"b c"#), r#""a\\\"b c""#);
        assert_eq!(windows_quote(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(windows_quote(""), r#""""#);
    }

    #[test]
    fn test_tail_lines() {
        let text = "one\n\ntwo\nthree\n";
        assert_eq!(tail_lines(text, 2), vec!["two", "three"]);
        assert_eq!(tail_lines(text, 10).len(), 3);
    }
}
