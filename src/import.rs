use crate::author::gittz;
use crate::author::parse_committer_extra;
use crate::author::sanitize_author;
use crate::gitref::GitifyNamespace;
use crate::gitref::RefType;
use crate::gitref::git_to_hg_spaces;
use crate::gitref::hg_to_git_spaces;
use crate::gitref::ref_to_name_reftype;
use crate::marks::HgMarks;
use crate::protocol::Output;
use crate::protocol::RemoteParser;
use crate::repo::HgNode;
use crate::repo::LocalRepo;
use crate::repo::ManifestEntry;
use crate::repo::RevNumber;
use crate::session::ListSnapshot;
use crate::util::relative_path;
use anyhow::Context as _;
use anyhow::Result;
use bstr::BString;
use bstr::ByteSlice as _;
use std::collections::HashMap;
use std::io::BufRead;
use std::io::Write;
use std::path::Path;

/// How often a `progress` record is interleaved into the stream.
const PROGRESS_INTERVAL: usize = 100;

/// Generates the fast-import stream for `import` requests: walks the
/// requested refs' changesets in revision order and realizes each as a Git
/// commit, followed by a notes commit mapping new marks back to changeset
/// nodes.
pub struct HgImporter<'a, W> {
    repo: &'a dyn LocalRepo,
    marks: &'a mut HgMarks,
    git_marks_path: &'a Path,
    namespace: &'a GitifyNamespace,
    snapshot: &'a ListSnapshot,
    uuid: &'a str,
    url: &'a str,
    out: &'a mut Output<W>,
    commit_count: usize,
}

impl<'a, W: Write> HgImporter<'a, W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: &'a dyn LocalRepo,
        marks: &'a mut HgMarks,
        git_marks_path: &'a Path,
        namespace: &'a GitifyNamespace,
        snapshot: &'a ListSnapshot,
        uuid: &'a str,
        url: &'a str,
        out: &'a mut Output<W>,
    ) -> Self {
        HgImporter {
            repo,
            marks,
            git_marks_path,
            namespace,
            snapshot,
            uuid,
            url,
            out,
            commit_count: 0,
        }
    }

    /// Handles one batch of consecutive `import <ref>` lines and emits the
    /// terminating `done`.
    pub fn process<R: BufRead>(&mut self, parser: &mut RemoteParser<R>) -> Result<()> {
        self.out.line("feature done")?;
        if self.git_marks_path.exists() {
            self.out
                .line(format!("feature import-marks={}", self.git_marks_path.display()))?;
        }
        self.out
            .line(format!("feature export-marks={}", self.git_marks_path.display()))?;
        self.out.line("feature notes")?;

        while parser.line().starts_with(b"import") {
            let requested = parser
                .line()
                .strip_prefix(b"import ")
                .map(|r| r.to_str().map(str::to_owned))
                .transpose()?
                .with_context(|| format!("Bad import line {:?}", parser.line()))?;

            if requested == "HEAD" {
                let (name, node) = self
                    .snapshot
                    .head
                    .as_ref()
                    .context("Cannot import HEAD of an empty repository")?
                    .clone();
                self.process_ref(&hg_to_git_spaces(&name), RefType::Bookmark, node)?;
            } else {
                let (name, reftype) = ref_to_name_reftype(&requested)?;
                let hg_name = git_to_hg_spaces(&name);
                let head = match reftype {
                    RefType::Branch => self
                        .snapshot
                        .branch_head(self.repo, &hg_name)?
                        .with_context(|| format!("Unknown branch {hg_name:?}"))?,
                    RefType::Bookmark => self
                        .snapshot
                        .bookmark(&hg_name)
                        .with_context(|| format!("Unknown bookmark {hg_name:?}"))?
                        .clone(),
                    RefType::Tag => self
                        .repo
                        .tags()?
                        .into_iter()
                        .find(|(tag, _)| *tag == hg_name)
                        .map(|(_, node)| node)
                        .with_context(|| format!("Unknown tag {hg_name:?}"))?,
                };
                self.process_ref(&name, reftype, head)?;
            }

            self.process_notes()?;
            parser.read_line()?;
        }

        self.out.line("done")?;
        self.out.flush()?;
        Ok(())
    }

    /// Emits every changeset from the persisted tip up to `head` that has
    /// no mark yet, then resets the destination ref to the head mark so the
    /// mirror advances even on a no-op run.
    fn process_ref(&mut self, git_name: &str, reftype: RefType, head: HgNode) -> Result<()> {
        let gitify_ref = self.namespace.gitify_ref(git_name, reftype);
        let tip = self.marks.tip_for(&gitify_ref).unwrap_or(0);
        let head_rev = self.repo.rev_of(&head)?;
        let total = (head_rev + 1).saturating_sub(tip);

        let mut count = 0;
        for rev in tip..=head_rev {
            let changeset = self.repo.changeset(rev)?;
            if self.marks.is_marked(&changeset.node) {
                // An earlier run already produced this commit.
                continue;
            }

            let author = author_field(
                sanitize_author(&changeset.user),
                changeset.date_secs,
                changeset.tz_seconds_west,
            );
            let committer = match &changeset.committer_extra {
                Some(extra) => {
                    let (user, secs, tz) = parse_committer_extra(extra)?;
                    author_field(sanitize_author(&user), secs, tz)
                }
                None => author.clone(),
            };

            let (modified, removed) = match changeset.parent_revs.first() {
                Some(&parent) => manifest_diff(self.repo, parent, rev)?,
                None => (self.repo.manifest(rev)?, Vec::new()),
            };

            if changeset.parent_revs.is_empty() && rev > 0 {
                self.out.line(format!("reset {gitify_ref}"))?;
            }
            self.out.line(format!("commit {gitify_ref}"))?;
            let mark = self.marks.get_or_assign_mark(&changeset.node);
            self.out.line(format!("mark :{mark}"))?;
            self.out.line(prefixed(b"author ", &author))?;
            self.out.line(prefixed(b"committer ", &committer))?;
            self.out.data(&changeset.message)?;

            for (idx, &parent_rev) in changeset.parent_revs.iter().enumerate() {
                let parent_node = self.repo.changeset(parent_rev)?.node;
                let parent_mark = self.marks.node_to_mark(&parent_node).with_context(|| {
                    format!("Parent {parent_node} of revision {rev} has no mark")
                })?;
                let keyword: &[u8] = if idx == 0 { b"from" } else { b"merge" };
                self.out
                    .line(format!("{} :{parent_mark}", keyword.as_bstr()))?;
            }

            for entry in &modified {
                let data = self.repo.file_data(rev, entry.path.as_bstr())?;
                let mut line = BString::from(format!("M {} inline ", entry.mode.git_mode()));
                line.extend_from_slice(relative_path(&entry.path));
                self.out.line(line)?;
                self.out.data(&data)?;
            }
            for path in &removed {
                let mut line = BString::from("D ");
                line.extend_from_slice(relative_path(path));
                self.out.line(line)?;
            }
            self.out.blank()?;

            count += 1;
            if count % PROGRESS_INTERVAL == 0 {
                self.out.line(format!(
                    "progress revision {rev} '{git_name}' ({count}/{total})"
                ))?;
                self.out.line("#".repeat(61))?;
            }
        }

        // Move the destination even when every changeset was already
        // marked, otherwise a resumed import leaves the mirror behind.
        let head_mark = self
            .marks
            .node_to_mark(&head)
            .with_context(|| format!("Head {head} of {gitify_ref} has no mark"))?;
        self.out.line(format!("reset {gitify_ref}"))?;
        self.out.line(format!("from :{head_mark}"))?;
        self.out.blank()?;

        self.marks.set_tip(&gitify_ref, head_rev);
        self.commit_count += count;
        Ok(())
    }

    /// Appends `refs/notes/hg-<uuid>` entries for every mark above the
    /// persisted notes high-water line, so each Git commit can be traced
    /// back to its changeset node. Skipped when this import produced no
    /// commits, to avoid empty notes commits on no-op fetches.
    fn process_notes(&mut self) -> Result<()> {
        let last_notes_mark = self.marks.notes_mark().unwrap_or(0);
        let pairs = self.marks.marks_after(last_notes_mark);
        if pairs.is_empty() || self.commit_count < 1 {
            return Ok(());
        }

        self.out.line(format!("commit refs/notes/hg-{}", self.uuid))?;
        self.out
            .line(format!("mark :{}", self.marks.new_notes_mark()))?;
        self.out.line(format!(
            "committer <git-remote-hg> {}",
            chrono::Local::now().format("%s %z")
        ))?;
        let message = format!("hg from {} ({})\n", self.namespace.prefix(), self.url);
        self.out.data(message.as_bytes())?;
        if last_notes_mark > 0 {
            self.out.line(format!("from :{last_notes_mark}"))?;
        }
        for (mark, node) in pairs {
            self.out.line(format!("N inline :{mark}"))?;
            self.out.data(node.as_str().as_bytes())?;
        }
        self.out.blank()?;
        Ok(())
    }
}

fn author_field(user: BString, secs: i64, tz_seconds_west: i64) -> BString {
    let mut field = user;
    field.extend_from_slice(format!(" {secs} {}", gittz(tz_seconds_west)).as_bytes());
    field
}

fn prefixed(prefix: &[u8], field: &BString) -> BString {
    let mut line = BString::from(prefix);
    line.extend_from_slice(field);
    line
}

/// The files that changed between a changeset and its first parent,
/// compared by filenode and flags the way the changelog sees them.
fn manifest_diff(
    repo: &dyn LocalRepo,
    parent_rev: RevNumber,
    rev: RevNumber,
) -> Result<(Vec<ManifestEntry>, Vec<BString>)> {
    let mut previous: HashMap<BString, (String, crate::repo::FileMode)> = repo
        .manifest(parent_rev)?
        .into_iter()
        .map(|entry| (entry.path, (entry.filenode, entry.mode)))
        .collect();
    let mut modified = Vec::new();
    for entry in repo.manifest(rev)? {
        match previous.remove(&entry.path) {
            Some((filenode, mode)) if filenode == entry.filenode && mode == entry.mode => {}
            _ => modified.push(entry),
        }
    }
    let mut removed: Vec<BString> = previous.into_keys().collect();
    removed.sort();
    Ok((modified, removed))
}
