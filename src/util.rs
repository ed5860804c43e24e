use anyhow::Result;
use anyhow::bail;
use bstr::BString;
use sha1::Digest as _;

/// Hex SHA-1 of the upstream URL, used to key the per-remote state
/// directory under `$GIT_DIR/hg/`.
///
/// Hashing the URL instead of the remote alias means `git remote rename`
/// keeps pointing at the same clone and marks files.
pub fn url_digest(url: &str) -> String {
    hex::encode(sha1::Sha1::digest(url.as_bytes()))
}

/// Removes trailing LF or CRLF from a string.
///
/// # Examples
/// ```
/// use git_remote_hg::util::trim_newline_suffix;
///
/// assert_eq!(trim_newline_suffix("foo"), "foo");
/// assert_eq!(trim_newline_suffix("foo\n"), "foo");
/// assert_eq!(trim_newline_suffix("foo\r\n"), "foo");
/// assert_eq!(trim_newline_suffix("foo\nbar\n"), "foo\nbar");
///
/// assert_eq!(trim_newline_suffix("foo\n\r"), "foo\n\r");
/// ```
pub fn trim_newline_suffix(line: &str) -> &str {
    let Some(line) = line.strip_suffix('\n') else {
        return line;
    };
    let Some(line) = line.strip_suffix('\r') else {
        return line;
    };
    line
}

/// Strips leading slashes so that fast-import and Mercurial manifest paths
/// stay repository relative.
///
/// # Examples
/// ```
/// use git_remote_hg::util::relative_path;
///
/// assert_eq!(relative_path(b"dir/file"), b"dir/file");
/// assert_eq!(relative_path(b"/dir/file"), b"dir/file");
/// assert_eq!(relative_path(b"//file"), b"file");
/// ```
pub fn relative_path(path: &[u8]) -> &[u8] {
    let mut path = path;
    while let Some(rest) = path.strip_prefix(b"/") {
        path = rest;
    }
    path
}

/// Decodes the C-style quoted form that git-fast-export uses for paths
/// containing spaces, quotes or control characters. Unquoted input is
/// returned as is.
pub fn unquote_git_path(raw: &[u8]) -> Result<BString> {
    let Some(quoted) = raw.strip_prefix(b"\"") else {
        return Ok(BString::from(raw));
    };
    let Some(quoted) = quoted.strip_suffix(b"\"") else {
        bail!("Unterminated quoted path {:?}", BString::from(raw));
    };
    let mut out = Vec::with_capacity(quoted.len());
    let mut iter = quoted.iter().copied();
    while let Some(byte) = iter.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'\\') => out.push(b'\\'),
            Some(b'"') => out.push(b'"'),
            Some(digit @ b'0'..=b'7') => {
                // Up to three octal digits, the first one already consumed.
                let mut value = (digit - b'0') as u32;
                let mut lookahead = iter.clone();
                for _ in 0..2 {
                    match lookahead.next() {
                        Some(digit @ b'0'..=b'7') => {
                            value = value * 8 + (digit - b'0') as u32;
                            iter.next();
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            other => bail!("Bad escape {other:?} in quoted path {:?}", BString::from(raw)),
        }
    }
    Ok(BString::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote_plain_path_is_untouched() {
        assert_eq!(unquote_git_path(b"a/b c.txt").unwrap(), "a/b c.txt");
    }

    #[test]
    fn test_unquote_escapes() {
        assert_eq!(
            unquote_git_path(b"\"sp ace/\\\"quoted\\\"\\n\\t\\\\\"").unwrap(),
            BString::from(b"sp ace/\"quoted\"\n\t\\".as_slice())
        );
        assert_eq!(
            unquote_git_path(b"\"\\303\\244\"").unwrap(),
            BString::from(b"\xc3\xa4".as_slice())
        );
    }

    #[test]
    fn test_unquote_rejects_unterminated() {
        assert!(unquote_git_path(b"\"open").is_err());
        assert!(unquote_git_path(b"\"bad\\q\"").is_err());
    }

    #[test]
    fn test_url_digest_is_stable() {
        // Renaming the remote must not change the digest, only the URL does.
        assert_eq!(url_digest("http://hg.example.com/repo"), url_digest("http://hg.example.com/repo"));
        assert_ne!(url_digest("http://hg.example.com/repo"), url_digest("http://hg.example.com/other"));
        assert_eq!(url_digest("").len(), 40);
    }
}
