use crate::hg::CommandExtension as _;
use crate::hg::abort_message;
use crate::hg::hg_command;
use crate::hg::hg_command_bare;
use crate::util::url_digest;
use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use bstr::BStr;
use bstr::BString;
use bstr::ByteSlice as _;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

pub const NULL_HEX: &str = "0000000000000000000000000000000000000000";

/// A Mercurial changeset identity: the 40 character lowercase hex form of
/// the 20 byte node hash. The local revision number is only used for
/// ordering within one clone; the node is the canonical identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HgNode(String);

impl HgNode {
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            bail!("Bad changeset node {hex:?}");
        }
        Ok(HgNode(hex.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 12 character abbreviation Mercurial prints in log output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    pub fn is_null(&self) -> bool {
        self.0 == NULL_HEX
    }
}

impl fmt::Display for HgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for HgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HgNode({})", self.short())
    }
}

/// Local (per-clone) revision number, monotonically assigned by Mercurial.
pub type RevNumber = u64;

/// The decoded header of one changeset, as read from the changelog.
#[derive(Debug, Clone)]
pub struct Changeset {
    pub node: HgNode,
    pub rev: RevNumber,
    pub branch: String,
    pub user: BString,
    /// Seconds since the epoch.
    pub date_secs: i64,
    /// Timezone offset in seconds west of UTC, Mercurial's convention.
    pub tz_seconds_west: i64,
    pub message: BString,
    /// One or two parent revisions; the null parent is already filtered out.
    pub parent_revs: Vec<RevNumber>,
    /// The `committer` entry of the changeset extras, when present.
    pub committer_extra: Option<BString>,
}

/// File modes that exist on both sides of the translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Executable,
    Symlink,
}

impl FileMode {
    /// Decodes the flag column of `hg manifest -v` output.
    pub fn from_manifest_flag(flag: u8) -> Result<Self> {
        match flag {
            b' ' => Ok(FileMode::Regular),
            b'*' => Ok(FileMode::Executable),
            b'@' => Ok(FileMode::Symlink),
            other => bail!("Unknown manifest flag {:?}", other as char),
        }
    }

    pub fn from_git_mode(mode: &str) -> Result<Self> {
        match mode {
            "100644" | "644" => Ok(FileMode::Regular),
            "100755" | "755" => Ok(FileMode::Executable),
            "120000" => Ok(FileMode::Symlink),
            other => bail!("Unsupported git file mode {other:?}"),
        }
    }

    pub fn git_mode(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
        }
    }
}

/// One row of a manifest listing, enough to diff two manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: BString,
    pub filenode: String,
    pub mode: FileMode,
}

/// A file operation inside an export commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    Write { mode: FileMode, data: BString },
    Delete,
    /// Synthesized for merges: the file keeps the first parent's content.
    /// Mercurial diffs a merge manifest against both parents, so files Git
    /// considers unchanged still need an entry.
    InheritFromParent,
}

/// An in-memory changeset to be committed to the local clone.
#[derive(Debug, Clone)]
pub struct MemChangeset {
    /// Named branch to commit on; `None` keeps the first parent's branch.
    pub branch: Option<String>,
    pub user: BString,
    pub date_secs: i64,
    pub tz_seconds_west: i64,
    pub message: BString,
    pub parents: (Option<HgNode>, Option<HgNode>),
    pub committer_extra: Option<BString>,
    pub files: Vec<(BString, FileAction)>,
}

/// Result of pushing to the upstream peer.
#[derive(Debug)]
pub enum PushOutcome {
    Pushed,
    /// Exit code 1: every outgoing changeset already exists upstream.
    NothingToPush,
    /// The peer refused because the push would create a new remote head.
    /// Carries the abort text for diagnostics.
    NewRemoteHead(String),
}

/// Read and write access to the local working clone.
///
/// This is the seam towards the Mercurial repository format: the
/// translation core only ever talks to these methods, the production
/// implementation shells out to the `hg` binary.
pub trait LocalRepo {
    fn is_empty(&self) -> Result<bool>;
    fn current_branch(&self) -> Result<String>;
    fn active_bookmark(&self) -> Result<Option<String>>;
    fn bookmarks(&self) -> Result<Vec<(String, HgNode)>>;
    /// Branch names with their heads, newest head first.
    fn branch_heads(&self, include_closed: bool) -> Result<Vec<(String, Vec<HgNode>)>>;
    fn branch_tip(&self, branch: &str) -> Result<HgNode>;
    fn tags(&self) -> Result<Vec<(String, HgNode)>>;
    fn rev_of(&self, node: &HgNode) -> Result<RevNumber>;
    fn changeset(&self, rev: RevNumber) -> Result<Changeset>;
    fn manifest(&self, rev: RevNumber) -> Result<Vec<ManifestEntry>>;
    fn file_data(&self, rev: RevNumber, path: &BStr) -> Result<Vec<u8>>;
    /// The `.hgtags` blob at the given changeset, empty when absent.
    fn hgtags_content(&self, node: &HgNode) -> Result<Vec<u8>>;
    fn commit(&mut self, changeset: &MemChangeset) -> Result<HgNode>;
    /// Moves a bookmark if it still points at `expected_old`; returns false
    /// when the precondition fails and the ref should be skipped.
    fn update_bookmark(
        &mut self,
        name: &str,
        expected_old: Option<&HgNode>,
        new: &HgNode,
    ) -> Result<bool>;
    /// Removes the given changesets and their descendants from the clone.
    fn strip(&mut self, nodes: &[HgNode]) -> Result<()>;
}

/// The upstream Mercurial peer, reached through the wire protocol.
pub trait HgPeer {
    fn push(&mut self, new_branch: bool) -> Result<PushOutcome>;
    /// Replays a bookmark move upstream; `old_hex` is empty for a new
    /// bookmark. Returns whether the peer accepted the key.
    fn pushkey_bookmark(&mut self, name: &str, old_hex: &str, new: &HgNode) -> Result<bool>;
}

/// On-disk layout of the per-remote state under `$GIT_DIR/hg/<uuid>/`.
#[derive(Debug, Clone)]
pub struct RemotePaths {
    pub uuid: String,
    pub remote_dir: PathBuf,
    pub clone_dir: PathBuf,
    pub marks_hg: PathBuf,
    pub marks_git: PathBuf,
}

impl RemotePaths {
    pub fn new(git_dir: &Path, url: &str) -> Self {
        let uuid = url_digest(url);
        let remote_dir = git_dir.join("hg").join(&uuid);
        RemotePaths {
            clone_dir: remote_dir.join("clone"),
            marks_hg: remote_dir.join("marks-hg"),
            marks_git: remote_dir.join("marks-git"),
            remote_dir,
            uuid,
        }
    }
}

const CHANGESET_TEMPLATE: &str = r"{node}\x00{rev}\x00{branch}\x00{p1rev}\x00{p2rev}\x00{date|hgdate}\x00{user}\x00{extras % '{key}\x1f{value}\x1e'}\x00{desc}";

/// [`LocalRepo`] over the `hg` binary.
pub struct CliRepo {
    dir: PathBuf,
}

impl CliRepo {
    /// Opens the cached clone for `url`, creating it on first use and
    /// pulling new upstream changesets otherwise.
    pub fn open_or_clone(paths: &RemotePaths, url: &str) -> Result<CliRepo> {
        if !paths.clone_dir.exists() {
            std::fs::create_dir_all(&paths.remote_dir).with_context(|| {
                format!("Failed to create {}", paths.remote_dir.display())
            })?;
            let output = hg_command_bare()
                .arg("clone")
                .arg("--noupdate")
                .arg("--pull")
                .arg(url)
                .arg(&paths.clone_dir)
                .capture()?;
            if !output.status.success() {
                bail!("abort: {}", abort_message(&output.stderr));
            }
            // Keep local commits in the draft phase so a failed push can
            // still be stripped.
            let hgrc = paths.clone_dir.join(".hg").join("hgrc");
            let mut config = std::fs::read_to_string(&hgrc).unwrap_or_default();
            config.push_str("\n[phases]\npublish = False\n");
            std::fs::write(&hgrc, config)
                .with_context(|| format!("Failed to write {}", hgrc.display()))?;
        } else {
            let output = hg_command(&paths.clone_dir)
                .arg("pull")
                .arg("--force")
                .arg(url)
                .capture()?;
            if !output.status.success() {
                bail!("abort: {}", abort_message(&output.stderr));
            }
        }
        Ok(CliRepo {
            dir: paths.clone_dir.clone(),
        })
    }

    fn log_template(&self, rev_or_node: &str, template: &str) -> Result<Vec<u8>> {
        let output = hg_command(&self.dir)
            .args(["log", "--rev", rev_or_node, "--template", template])
            .check_output()?;
        Ok(output.stdout)
    }

    fn parse_name_node_lines(stdout: &[u8]) -> Result<Vec<(String, HgNode)>> {
        let mut entries = Vec::new();
        for line in stdout.lines() {
            let Some((name, node)) = line.split_once_str(b"\x00") else {
                bail!("Bad name/node line {:?}", BString::from(line));
            };
            entries.push((
                name.to_str()?.to_owned(),
                HgNode::from_hex(node.to_str()?)?,
            ));
        }
        Ok(entries)
    }
}

impl LocalRepo for CliRepo {
    fn is_empty(&self) -> Result<bool> {
        let output = hg_command(&self.dir)
            .args(["log", "--limit", "1", "--template", r"{rev}"])
            .check_output()?;
        Ok(output.stdout.trim().is_empty())
    }

    fn current_branch(&self) -> Result<String> {
        let output = hg_command(&self.dir).arg("branch").check_output()?;
        Ok(output.stdout.to_str()?.trim().to_owned())
    }

    fn active_bookmark(&self) -> Result<Option<String>> {
        for ((name, _), active) in self.bookmark_rows()? {
            if active {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    fn bookmarks(&self) -> Result<Vec<(String, HgNode)>> {
        Ok(self
            .bookmark_rows()?
            .into_iter()
            .map(|(row, _)| (row.0, row.1))
            .collect())
    }

    fn branch_heads(&self, include_closed: bool) -> Result<Vec<(String, Vec<HgNode>)>> {
        let mut cmd = hg_command(&self.dir);
        cmd.arg("heads");
        if include_closed {
            cmd.arg("--closed");
        }
        cmd.args(["--template", r"{branch}\x00{node}\n"]);
        // Exit code 1 means no heads exist, i.e. an empty repository.
        let output = cmd.check_output_allowing(&[1])?;
        let mut branches: Vec<(String, Vec<HgNode>)> = Vec::new();
        for (name, node) in Self::parse_name_node_lines(&output.stdout)? {
            match branches.iter_mut().find(|(branch, _)| *branch == name) {
                Some((_, heads)) => heads.push(node),
                None => branches.push((name, vec![node])),
            }
        }
        Ok(branches)
    }

    fn branch_tip(&self, branch: &str) -> Result<HgNode> {
        let output = hg_command(&self.dir)
            .args(["branches", "--closed", "--template", r"{branch}\x00{node}\n"])
            .check_output()?;
        Self::parse_name_node_lines(&output.stdout)?
            .into_iter()
            .find(|(name, _)| name == branch)
            .map(|(_, node)| node)
            .with_context(|| format!("Unknown branch {branch:?}"))
    }

    fn tags(&self) -> Result<Vec<(String, HgNode)>> {
        let output = hg_command(&self.dir)
            .args(["tags", "--template", r"{tag}\x00{node}\n"])
            .check_output()?;
        Self::parse_name_node_lines(&output.stdout)
    }

    fn rev_of(&self, node: &HgNode) -> Result<RevNumber> {
        let stdout = self.log_template(node.as_str(), r"{rev}")?;
        stdout
            .to_str()?
            .trim()
            .parse()
            .with_context(|| format!("Bad revision number for {node}"))
    }

    fn changeset(&self, rev: RevNumber) -> Result<Changeset> {
        let stdout = self.log_template(&rev.to_string(), CHANGESET_TEMPLATE)?;
        let fields: Vec<&[u8]> = stdout.splitn_str(9, b"\x00").collect();
        let [node, cs_rev, branch, p1rev, p2rev, date, user, extras, message] = fields[..] else {
            bail!("Bad changeset listing for revision {rev}");
        };
        let node = HgNode::from_hex(node.to_str()?)?;
        let cs_rev: RevNumber = cs_rev.to_str()?.parse()?;
        if cs_rev != rev {
            bail!("Changelog returned revision {cs_rev} instead of {rev}");
        }
        let (date_secs, tz_seconds_west) = parse_hgdate(date)?;
        let mut parent_revs = Vec::new();
        for parent in [p1rev, p2rev] {
            let parent: i64 = parent.to_str()?.parse()?;
            if parent >= 0 {
                parent_revs.push(parent as RevNumber);
            }
        }
        let committer_extra = extras
            .split_str(b"\x1e")
            .filter_map(|entry| entry.split_once_str(b"\x1f"))
            .find(|(key, _)| *key == b"committer")
            .map(|(_, value)| BString::from(value));
        Ok(Changeset {
            node,
            rev,
            branch: branch.to_str()?.to_owned(),
            user: BString::from(user),
            date_secs,
            tz_seconds_west,
            message: BString::from(message),
            parent_revs,
            committer_extra,
        })
    }

    fn manifest(&self, rev: RevNumber) -> Result<Vec<ManifestEntry>> {
        let output = hg_command(&self.dir)
            .args(["manifest", "--verbose", "--debug", "--rev", &rev.to_string()])
            .check_output()?;
        let mut entries = Vec::new();
        for line in output.stdout.lines() {
            // <filenode:40> SP <perm:3> SP <flag:1> SP <path>
            if line.len() < 47 || line[40] != b' ' || line[44] != b' ' || line[46] != b' ' {
                bail!("Bad manifest line {:?}", BString::from(line));
            }
            entries.push(ManifestEntry {
                filenode: line[..40].to_str()?.to_owned(),
                mode: FileMode::from_manifest_flag(line[45])?,
                path: BString::from(&line[47..]),
            });
        }
        Ok(entries)
    }

    fn file_data(&self, rev: RevNumber, path: &BStr) -> Result<Vec<u8>> {
        let output = hg_command(&self.dir)
            .args(["cat", "--rev", &rev.to_string(), "--"])
            .arg(pattern_arg(path)?)
            .check_output()
            .with_context(|| format!("Failed to read {path:?} at revision {rev}"))?;
        Ok(output.stdout)
    }

    fn hgtags_content(&self, node: &HgNode) -> Result<Vec<u8>> {
        let output = hg_command(&self.dir)
            .args(["cat", "--rev", node.as_str(), "--", "path:.hgtags"])
            .check_output_allowing(&[1])?;
        if !output.status.success() {
            // No .hgtags yet at this revision.
            return Ok(Vec::new());
        }
        Ok(output.stdout)
    }

    fn commit(&mut self, changeset: &MemChangeset) -> Result<HgNode> {
        let parent_arg = match &changeset.parents.0 {
            Some(node) => node.as_str().to_owned(),
            None => "null".to_owned(),
        };
        hg_command(&self.dir)
            .args(["update", "--clean", "--rev", &parent_arg])
            .check_output()?;
        if let (Some(p1), Some(p2)) = (&changeset.parents.0, &changeset.parents.1) {
            hg_command(&self.dir)
                .args(["debugsetparents", p1.as_str(), p2.as_str()])
                .check_output()?;
        }
        if let Some(branch) = &changeset.branch {
            hg_command(&self.dir)
                .args(["branch", "--force", branch])
                .check_output()?;
        }

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for (path, action) in &changeset.files {
            let target = self.dir.join(
                path.to_path()
                    .with_context(|| format!("Bad file path {path:?}"))?,
            );
            match action {
                FileAction::Write { mode, data } => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    remove_if_exists(&target)?;
                    write_mode_file(&target, *mode, data.as_ref())?;
                    added.push(path);
                }
                FileAction::Delete => {
                    remove_if_exists(&target)?;
                    removed.push(path);
                }
                FileAction::InheritFromParent => {
                    // Already materialized by the update to the first parent.
                }
            }
        }
        if !added.is_empty() {
            let mut cmd = hg_command(&self.dir);
            cmd.args(["add", "--"]);
            for path in added {
                cmd.arg(pattern_arg(path.as_bstr())?);
            }
            // Exit code 1 only flags files that were already tracked.
            cmd.check_output_allowing(&[1])?;
        }
        if !removed.is_empty() {
            let mut cmd = hg_command(&self.dir);
            cmd.args(["remove", "--after", "--"]);
            for path in removed {
                cmd.arg(pattern_arg(path.as_bstr())?);
            }
            cmd.check_output_allowing(&[1])?;
        }

        // The message can be arbitrary bytes, so it goes through a file
        // instead of the command line.
        let message_file = self.dir.join(".hg").join("remote-helper-message");
        std::fs::write(&message_file, &changeset.message)?;
        let mut cmd = hg_command(&self.dir);
        cmd.arg("commit")
            .arg("--logfile")
            .arg(&message_file)
            .arg("--user")
            .arg(
                changeset
                    .user
                    .to_os_str()
                    .context("Bad user string")?,
            )
            .arg("--date")
            .arg(format!(
                "{} {}",
                changeset.date_secs, changeset.tz_seconds_west
            ));
        if let Some(committer) = &changeset.committer_extra {
            let mut extra = BString::from("committer=");
            extra.extend_from_slice(committer);
            cmd.arg("--extra")
                .arg(extra.to_os_str().context("Bad committer extra")?);
        }
        cmd.check_output()?;
        let _ = std::fs::remove_file(&message_file);

        // The commit just created is the newest revision in the clone.
        let stdout = self.log_template("tip", r"{node}")?;
        HgNode::from_hex(stdout.to_str()?.trim())
    }

    fn update_bookmark(
        &mut self,
        name: &str,
        expected_old: Option<&HgNode>,
        new: &HgNode,
    ) -> Result<bool> {
        let current = self
            .bookmarks()?
            .into_iter()
            .find(|(bookmark, _)| bookmark == name)
            .map(|(_, node)| node);
        if current.as_ref() != expected_old {
            return Ok(false);
        }
        hg_command(&self.dir)
            .args(["bookmark", "--force", "--rev", new.as_str(), "--", name])
            .check_output()?;
        Ok(true)
    }

    fn strip(&mut self, nodes: &[HgNode]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        // Strip removes descendants, so the minimum revision is enough.
        let mut min: Option<(RevNumber, &HgNode)> = None;
        for node in nodes {
            let rev = self.rev_of(node)?;
            if min.is_none_or(|(min_rev, _)| rev < min_rev) {
                min = Some((rev, node));
            }
        }
        let (_, node) = min.expect("nodes is non-empty");
        hg_command(&self.dir)
            .args(["--config", "extensions.strip=", "strip", node.as_str()])
            .check_output()?;
        Ok(())
    }
}

impl CliRepo {
    fn bookmark_rows(&self) -> Result<Vec<((String, HgNode), bool)>> {
        let output = hg_command(&self.dir)
            .args(["bookmarks", "--template", r"{bookmark}\x00{node}\x00{active}\n"])
            .check_output()?;
        let mut rows = Vec::new();
        for line in output.stdout.lines() {
            let fields: Vec<&[u8]> = line.splitn_str(3, b"\x00").collect();
            let [name, node, active] = fields[..] else {
                bail!("Bad bookmark line {:?}", BString::from(line));
            };
            rows.push((
                (
                    name.to_str()?.to_owned(),
                    HgNode::from_hex(node.to_str()?)?,
                ),
                active == b"True",
            ));
        }
        Ok(rows)
    }
}

/// [`HgPeer`] over `hg push` and `hg debugpushkey` against the upstream URL.
pub struct CliPeer {
    clone_dir: PathBuf,
    url: String,
}

impl CliPeer {
    pub fn new(paths: &RemotePaths, url: &str) -> CliPeer {
        CliPeer {
            clone_dir: paths.clone_dir.clone(),
            url: url.to_owned(),
        }
    }
}

impl HgPeer for CliPeer {
    fn push(&mut self, new_branch: bool) -> Result<PushOutcome> {
        let mut cmd = hg_command(&self.clone_dir);
        cmd.arg("push");
        if new_branch {
            cmd.arg("--new-branch");
        }
        cmd.arg(&self.url);
        let output = cmd.capture()?;
        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }
        if output.status.code() == Some(1) {
            return Ok(PushOutcome::NothingToPush);
        }
        let abort = abort_message(&output.stderr);
        if abort.starts_with("push creates new remote head") {
            return Ok(PushOutcome::NewRemoteHead(abort));
        }
        bail!("Push to {} failed: {abort}", self.url);
    }

    fn pushkey_bookmark(&mut self, name: &str, old_hex: &str, new: &HgNode) -> Result<bool> {
        let output = hg_command(&self.clone_dir)
            .args(["debugpushkey", &self.url, "bookmarks", name, old_hex])
            .arg(new.as_str())
            .capture()?;
        Ok(output.status.success())
    }
}

/// Turns a repository relative path into an exact-match `hg` pattern, so
/// that glob characters in file names are not interpreted.
fn pattern_arg(path: &BStr) -> Result<std::ffi::OsString> {
    let mut arg = BString::from("path:");
    arg.extend_from_slice(path);
    Ok(arg
        .to_os_str()
        .with_context(|| format!("Bad path {path:?}"))?
        .to_owned())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn write_mode_file(path: &Path, mode: FileMode, data: &BStr) -> Result<()> {
    use std::os::unix::ffi::OsStrExt as _;
    use std::os::unix::fs::OpenOptionsExt as _;
    use std::io::Write as _;
    match mode {
        FileMode::Symlink => {
            let target = std::ffi::OsStr::from_bytes(data);
            std::os::unix::fs::symlink(target, path)?;
        }
        FileMode::Regular | FileMode::Executable => {
            let unix_mode = if mode == FileMode::Executable { 0o755 } else { 0o644 };
            let mut options = std::fs::OpenOptions::new();
            options.create(true).write(true).truncate(true).mode(unix_mode);
            let mut file = options.open(path)?;
            file.write_all(data)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_mode_file(path: &Path, mode: FileMode, data: &BStr) -> Result<()> {
    if mode == FileMode::Symlink {
        bail!("Symlinks are not supported on this platform");
    }
    std::fs::write(path, data)?;
    Ok(())
}

fn parse_hgdate(date: &[u8]) -> Result<(i64, i64)> {
    let text = date.to_str()?;
    let (secs, tz) = text
        .split_once(' ')
        .with_context(|| format!("Bad hgdate {text:?}"))?;
    // hgdate prints a float timestamp for some old changesets.
    let secs = secs.split('.').next().unwrap_or(secs);
    Ok((
        secs.parse().with_context(|| format!("Bad timestamp {secs:?}"))?,
        tz.parse().with_context(|| format!("Bad timezone {tz:?}"))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_validation() {
        let hex = "1234567890abcdef1234567890abcdef12345678";
        let node = HgNode::from_hex(hex).unwrap();
        assert_eq!(node.as_str(), hex);
        assert_eq!(node.short(), "1234567890ab");
        assert!(!node.is_null());
        assert!(HgNode::from_hex(NULL_HEX).unwrap().is_null());

        assert!(HgNode::from_hex("123").is_err());
        assert!(HgNode::from_hex("1234567890ABCDEF1234567890abcdef12345678").is_err());
        assert!(HgNode::from_hex("zzzz567890abcdef1234567890abcdef12345678").is_err());
    }

    #[test]
    fn test_file_mode_mapping() {
        assert_eq!(FileMode::from_manifest_flag(b' ').unwrap().git_mode(), "100644");
        assert_eq!(FileMode::from_manifest_flag(b'*').unwrap().git_mode(), "100755");
        assert_eq!(FileMode::from_manifest_flag(b'@').unwrap().git_mode(), "120000");
        assert!(FileMode::from_manifest_flag(b'x').is_err());

        assert_eq!(FileMode::from_git_mode("100644").unwrap(), FileMode::Regular);
        assert_eq!(FileMode::from_git_mode("100755").unwrap(), FileMode::Executable);
        assert_eq!(FileMode::from_git_mode("120000").unwrap(), FileMode::Symlink);
        assert!(FileMode::from_git_mode("160000").is_err());
    }

    #[test]
    fn test_remote_paths_layout() {
        let paths = RemotePaths::new(Path::new("/repo/.git"), "http://hg.example.com/repo");
        assert_eq!(paths.remote_dir, Path::new("/repo/.git/hg").join(&paths.uuid));
        assert_eq!(paths.clone_dir, paths.remote_dir.join("clone"));
        assert_eq!(paths.marks_hg, paths.remote_dir.join("marks-hg"));
        assert_eq!(paths.marks_git, paths.remote_dir.join("marks-git"));
        assert_eq!(paths.uuid.len(), 40);
    }

    #[test]
    fn test_parse_hgdate() {
        assert_eq!(parse_hgdate(b"1386372042 -3600").unwrap(), (1386372042, -3600));
        assert_eq!(parse_hgdate(b"1386372042.0 25200").unwrap(), (1386372042, 25200));
        assert!(parse_hgdate(b"oops").is_err());
    }
}
