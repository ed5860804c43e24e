use crate::author::hgtz;
use crate::marks::Mark;
use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use bstr::BStr;
use bstr::BString;
use bstr::ByteSlice as _;
use std::io::BufRead;
use std::io::Write;

/// Line parser shared by the remote-helper stream and the fast-export
/// stream.
///
/// Keeps one current line plus a one-slot peek buffer: a peeked line is
/// pushed back and returned by the next `read_line`. End of file reads as
/// an empty line, which doubles as the block sentinel for a graceful
/// shutdown.
pub struct RemoteParser<R> {
    reader: R,
    line: BString,
    peeked: Option<BString>,
}

impl<R: BufRead> RemoteParser<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut parser = RemoteParser {
            reader,
            line: BString::default(),
            peeked: None,
        };
        parser.read_line()?;
        Ok(parser)
    }

    /// The line most recently returned by [`RemoteParser::read_line`].
    pub fn line(&self) -> &BStr {
        self.line.as_bstr()
    }

    pub fn read_line(&mut self) -> Result<&BStr> {
        self.line = match self.peeked.take() {
            Some(line) => line,
            None => self.read_raw_line()?,
        };
        log::debug!("INPUT: {}", self.line);
        Ok(self.line.as_bstr())
    }

    /// Returns the next line without consuming it. Repeated peeks see the
    /// same line until it is read.
    pub fn peek(&mut self) -> Result<&BStr> {
        if self.peeked.is_none() {
            self.peeked = Some(self.read_raw_line()?);
        }
        Ok(self.peeked.as_ref().expect("just filled").as_bstr())
    }

    fn read_raw_line(&mut self) -> Result<BString> {
        let mut raw = Vec::new();
        self.reader
            .read_until(b'\n', &mut raw)
            .context("Failed to read protocol line")?;
        Ok(BString::from(raw.trim()))
    }

    /// Reads the mark number from lines like `mark :17` or `from :17`.
    pub fn read_mark(&mut self) -> Result<Mark> {
        self.read_line()?;
        let (_, after) = self
            .line
            .split_once_str(b":")
            .with_context(|| format!("Expected a mark line, got {:?}", self.line))?;
        after
            .trim()
            .to_str()?
            .parse()
            .with_context(|| format!("Bad mark in {:?}", self.line))
    }

    /// Reads a `data <n>` framing line followed by exactly `n` raw bytes,
    /// without decoding them.
    pub fn read_data(&mut self) -> Result<BString> {
        assert!(
            self.peeked.is_none(),
            "data blocks cannot follow a peeked line"
        );
        self.read_line()?;
        let size: usize = self
            .line
            .strip_prefix(b"data ")
            .with_context(|| format!("Expected a data line, got {:?}", self.line))?
            .to_str()?
            .parse()
            .with_context(|| format!("Bad data length in {:?}", self.line))?;
        let mut data = vec![0u8; size];
        self.reader
            .read_exact(&mut data)
            .context("Data block ended early")?;
        Ok(BString::from(data))
    }

    /// Reads an `author`/`committer`/`tagger` line and returns the user in
    /// `name <email>` form, the unix timestamp, and the timezone offset in
    /// seconds west of UTC (Mercurial's sign convention).
    pub fn read_author(&mut self) -> Result<(BString, i64, i64)> {
        self.read_line()?;
        let malformed = || format!("Malformed author line {:?}", self.line);

        let rest = ["author ", "committer ", "tagger "]
            .iter()
            .find_map(|keyword| self.line.strip_prefix(keyword.as_bytes()))
            .with_context(malformed)?;
        let open = rest.rfind_byte(b'<').with_context(malformed)?;
        let close = rest[open..]
            .find_byte(b'>')
            .map(|idx| open + idx)
            .with_context(malformed)?;
        let name = rest[..open].trim();
        let email = &rest[open + 1..close];

        let mut user = BString::from(name);
        if !user.is_empty() {
            user.push(b' ');
        }
        user.push(b'<');
        user.extend_from_slice(email);
        user.push(b'>');

        let mut date_fields = rest[close + 1..].trim().split_str(b" ");
        let (Some(secs), Some(tz), None) =
            (date_fields.next(), date_fields.next(), date_fields.next())
        else {
            bail!(malformed());
        };
        let secs: i64 = secs.to_str()?.parse().with_context(malformed)?;
        let tz_seconds_west = hgtz(tz.to_str()?).with_context(malformed)?;
        Ok((user, secs, tz_seconds_west))
    }
}

/// The one true protocol writer.
///
/// Everything the helper says to Git goes through this handle; subprocess
/// output is always captured so nothing else can write to the stream. The
/// driver deadlocks on unflushed output, so each response block ends with
/// an explicit [`Output::flush`].
pub struct Output<W> {
    writer: W,
}

impl<W: Write> Output<W> {
    pub fn new(writer: W) -> Self {
        Output { writer }
    }

    pub fn line(&mut self, text: impl AsRef<[u8]>) -> Result<()> {
        let text = text.as_ref();
        log::debug!("OUT: {}", text.as_bstr());
        self.writer.write_all(text)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn blank(&mut self) -> Result<()> {
        self.line(b"")
    }

    /// A `data <n>` frame carrying raw bytes. The trailing newline is
    /// optional in the fast-import grammar and keeps the stream readable.
    pub fn data(&mut self, bytes: &[u8]) -> Result<()> {
        self.line(format!("data {}", bytes.len()))?;
        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// The underlying writer, mainly so tests can inspect what was sent.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parser(input: &str) -> RemoteParser<Cursor<Vec<u8>>> {
        RemoteParser::new(Cursor::new(input.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_read_line_strips_and_signals_eof_as_empty() {
        let mut p = parser("first\nsecond\r\n");
        assert_eq!(p.line(), "first");
        assert_eq!(p.read_line().unwrap(), "second");
        assert_eq!(p.read_line().unwrap(), "");
        assert_eq!(p.read_line().unwrap(), "");
    }

    #[test]
    fn test_peek_pushes_back() {
        let mut p = parser("one\ntwo\nthree\n");
        assert_eq!(p.peek().unwrap(), "two");
        assert_eq!(p.peek().unwrap(), "two");
        assert_eq!(p.line(), "one");
        assert_eq!(p.read_line().unwrap(), "two");
        assert_eq!(p.read_line().unwrap(), "three");
    }

    #[test]
    fn test_read_mark_variants() {
        let mut p = parser("start\nmark :42\nfrom :7\n");
        assert_eq!(p.read_mark().unwrap(), 42);
        assert_eq!(p.read_mark().unwrap(), 7);
    }

    #[test]
    fn test_read_mark_rejects_garbage() {
        let mut p = parser("start\nnot a mark\n");
        assert!(p.read_mark().is_err());
    }

    #[test]
    fn test_read_data_is_binary_safe() {
        let mut p = parser("start\ndata 11\nhej\x00\nworld\nnext\n");
        assert_eq!(
            p.read_data().unwrap(),
            BString::from(b"hej\x00\nworld\n".as_slice())
        );
        assert_eq!(p.read_line().unwrap(), "next");
    }

    #[test]
    fn test_read_data_rejects_short_input() {
        let mut p = parser("start\ndata 100\nshort\n");
        assert!(p.read_data().is_err());
    }

    #[test]
    fn test_read_author_with_name() {
        let mut p = parser("x\nauthor Jane Doe <jane@example.com> 1386372042 +0100\n");
        let (user, secs, tz) = p.read_author().unwrap();
        assert_eq!(user, "Jane Doe <jane@example.com>");
        assert_eq!(secs, 1386372042);
        assert_eq!(tz, -3600);
    }

    #[test]
    fn test_read_author_without_name() {
        let mut p = parser("x\ncommitter <auto@host> 12 -0700\n");
        let (user, secs, tz) = p.read_author().unwrap();
        assert_eq!(user, "<auto@host>");
        assert_eq!(secs, 12);
        assert_eq!(tz, 25200);
    }

    #[test]
    fn test_read_author_tagger() {
        let mut p = parser("x\ntagger Tag Ger <t@g> 99 +0000\n");
        let (user, _, tz) = p.read_author().unwrap();
        assert_eq!(user, "Tag Ger <t@g>");
        assert_eq!(tz, 0);
    }

    #[test]
    fn test_read_author_rejects_other_lines() {
        let mut p = parser("x\ndata 3\n");
        assert!(p.read_author().is_err());
    }

    #[test]
    fn test_output_lines_and_data() {
        let mut buffer = Vec::new();
        {
            let mut out = Output::new(&mut buffer);
            out.line("feature done").unwrap();
            out.data(b"a\nb").unwrap();
            out.blank().unwrap();
            out.flush().unwrap();
        }
        assert_eq!(buffer, b"feature done\ndata 3\na\nb\n\n");
    }
}
