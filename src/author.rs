use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use bstr::BString;
use bstr::ByteSlice as _;

/// Substituted when a Mercurial user string carries neither a name nor an
/// email.
const UNKNOWN_NAME: &[u8] = b"Unknown";

/// Normalizes a free-form Mercurial user string to the `name <email>` form
/// that git-fast-import demands.
///
/// Mercurial places no constraints on the user string, so this deals with
/// missing emails, missing names, bare addresses and stray angle brackets.
/// The result never contains `<` or `>` inside either component, and the
/// name is only empty when an email is present (`<addr>` with no leading
/// space).
pub fn sanitize_author(raw: &[u8]) -> BString {
    let cleaned: Vec<u8> = raw.iter().copied().filter(|&b| b != b'"').collect();

    let (name, email) = match cleaned.find_byteset(b"<>") {
        Some(bracket) => {
            // "Name <addr>", "Name<addr>", or bracket soup like "a >>> b <<<".
            // Everything before the first bracket is the name, the rest minus
            // brackets is the email.
            let name = cleaned[..bracket].trim();
            let email: Vec<u8> = cleaned[bracket..]
                .iter()
                .copied()
                .filter(|&b| b != b'<' && b != b'>')
                .collect();
            (BString::from(name), BString::from(email.trim()))
        }
        None => match last_space_before_address(&cleaned) {
            Some(space) => {
                // "Some Name addr@host": the trailing word is the address.
                (
                    BString::from(cleaned[..space].trim()),
                    BString::from(cleaned[space + 1..].trim()),
                )
            }
            None => {
                let bare = cleaned.trim();
                if bare.contains(&b'@') {
                    (BString::default(), BString::from(bare))
                } else {
                    (BString::from(bare), BString::default())
                }
            }
        },
    };

    let name = if name.is_empty() && email.is_empty() {
        BString::from(UNKNOWN_NAME)
    } else {
        name
    };
    let mut out = BString::default();
    if !name.is_empty() {
        out.extend_from_slice(&name);
        out.push(b' ');
    }
    out.push(b'<');
    out.extend_from_slice(&email);
    out.push(b'>');
    out
}

/// Finds the last space that is directly followed by a word containing `@`,
/// i.e. the split point of `Name addr@host`.
fn last_space_before_address(s: &[u8]) -> Option<usize> {
    s.iter()
        .enumerate()
        .rev()
        .filter(|&(_, &b)| b == b' ')
        .map(|(idx, _)| idx)
        .find(|&idx| {
            s[idx + 1..]
                .iter()
                .take_while(|&&b| b != b' ')
                .any(|&b| b == b'@')
        })
}

/// Formats a Mercurial timezone offset (seconds west of UTC) as the
/// `±HHMM` form used on git author and committer lines.
pub fn gittz(tz_seconds_west: i64) -> String {
    let east = -tz_seconds_west;
    let sign = if east < 0 { '-' } else { '+' };
    let abs = east.abs();
    format!("{sign}{:02}{:02}", abs / 3600, abs % 3600 / 60)
}

/// Parses a git `±HHMM` timezone into seconds west of UTC, the convention
/// Mercurial stores in changeset dates.
pub fn hgtz(git_tz: &str) -> Result<i64> {
    let raw: i64 = git_tz
        .parse()
        .with_context(|| format!("Bad timezone {git_tz:?}"))?;
    // ±HHMM packed as a decimal number: -530 is five and a half hours east.
    Ok(-((raw / 100) * 3600 + (raw % 100) * 60))
}

/// Splits the `committer` changeset extra, `<user> <seconds> <tz-west>`,
/// written by the export side when the Git committer differed from the
/// author.
pub fn parse_committer_extra(extra: &[u8]) -> Result<(BString, i64, i64)> {
    let mut fields = extra.rsplitn_str(3, b" ");
    let (Some(tz), Some(secs), Some(user)) = (fields.next(), fields.next(), fields.next()) else {
        bail!("Bad committer extra {:?}", BString::from(extra));
    };
    let secs: i64 = secs
        .to_str()
        .ok()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("Bad committer timestamp in {:?}", BString::from(extra)))?;
    let tz: i64 = tz
        .to_str()
        .ok()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("Bad committer timezone in {:?}", BString::from(extra)))?;
    Ok((BString::from(user), secs, tz))
}
