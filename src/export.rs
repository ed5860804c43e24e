use crate::error::ProtocolError;
use crate::gitref::git_to_hg_spaces;
use crate::gitref::ref_to_name_reftype;
use crate::gitref::GitifyNamespace;
use crate::marks::GitMarks;
use crate::marks::HgMarks;
use crate::marks::Mark;
use crate::protocol::Output;
use crate::protocol::RemoteParser;
use crate::repo::FileAction;
use crate::repo::FileMode;
use crate::repo::HgNode;
use crate::repo::HgPeer;
use crate::repo::LocalRepo;
use crate::repo::MemChangeset;
use crate::repo::PushOutcome;
use crate::session::ListSnapshot;
use crate::util::relative_path;
use crate::util::unquote_git_path;
use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use bstr::BString;
use bstr::ByteSlice as _;
use itertools::Itertools as _;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::BufRead;
use std::io::Write;

/// Consumes one fast-export stream: materializes every commit on the local
/// clone, stages branch/bookmark/tag updates, pushes to the upstream peer
/// and acknowledges each ref. A push refused for creating a new remote
/// head is rolled back so no trace of the rejected commits survives.
pub struct GitExporter<'a, W> {
    repo: &'a mut dyn LocalRepo,
    peer: &'a mut dyn HgPeer,
    marks: &'a mut HgMarks,
    git_marks: &'a GitMarks,
    namespace: &'a GitifyNamespace,
    snapshot: &'a ListSnapshot,
    out: &'a mut Output<W>,
    blob_marks: HashMap<Mark, BString>,
    /// Ref updates in stream order; a ref updated twice keeps its last node.
    parsed_refs: Vec<(String, HgNode)>,
    /// Tagger and message per tag name, buffered for the `.hgtags` commit.
    parsed_tags: HashMap<String, (BString, i64, i64, BString)>,
    processed_marks: HashSet<Mark>,
    processed_nodes: Vec<HgNode>,
}

impl<'a, W: Write> GitExporter<'a, W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: &'a mut dyn LocalRepo,
        peer: &'a mut dyn HgPeer,
        marks: &'a mut HgMarks,
        git_marks: &'a GitMarks,
        namespace: &'a GitifyNamespace,
        snapshot: &'a ListSnapshot,
        out: &'a mut Output<W>,
    ) -> Self {
        GitExporter {
            repo,
            peer,
            marks,
            git_marks,
            namespace,
            snapshot,
            out,
            blob_marks: HashMap::new(),
            parsed_refs: Vec::new(),
            parsed_tags: HashMap::new(),
            processed_marks: HashSet::new(),
            processed_nodes: Vec::new(),
        }
    }

    pub fn process<R: BufRead>(mut self, parser: &mut RemoteParser<R>) -> Result<()> {
        // Checkpoint: the rollback path restores the store from disk.
        self.marks.store()?;

        parser.read_line()?;
        while parser.line() != "done" {
            let keyword = parser
                .line()
                .split_str(b" ")
                .next()
                .unwrap_or_default()
                .to_owned();
            match keyword.as_slice() {
                b"blob" => self.read_blob(parser)?,
                b"commit" => self.read_commit(parser)?,
                b"reset" => self.read_reset(parser)?,
                b"tag" => self.read_tag(parser)?,
                b"feature" => {}
                other => {
                    return Err(ProtocolError::UnhandledCommand(
                        other.as_bstr().to_string(),
                    )
                    .into());
                }
            }
            parser.read_line()?;
        }

        self.finish()
    }

    fn read_blob<R: BufRead>(&mut self, parser: &mut RemoteParser<R>) -> Result<()> {
        let mark = parser.read_mark()?;
        let data = parser.read_data()?;
        self.blob_marks.insert(mark, data);
        parser.read_line()?;
        Ok(())
    }

    /// A `reset` followed by `from` records a ref position; without `from`
    /// it announces the branch of an upcoming commit and is skipped.
    fn read_reset<R: BufRead>(&mut self, parser: &mut RemoteParser<R>) -> Result<()> {
        let git_ref = ref_of_line(parser.line(), b"reset ")?;
        if !parser.peek()?.starts_with(b"from") {
            return Ok(());
        }
        let from_mark = parser.read_mark()?;
        let node = self.marks.mark_to_node(from_mark)?;
        self.record_ref(git_ref, node);
        parser.read_line()?;
        Ok(())
    }

    fn read_commit<R: BufRead>(&mut self, parser: &mut RemoteParser<R>) -> Result<()> {
        let git_ref = ref_of_line(parser.line(), b"commit ")?;

        let commit_mark = parser.read_mark()?;
        let author = parser.read_author()?;
        let committer = parser.read_author()?;
        let message = parser.read_data()?;
        let mut from_mark = None;
        let mut merge_mark = None;
        if parser.peek()?.starts_with(b"from") {
            from_mark = Some(parser.read_mark()?);
        }
        if parser.peek()?.starts_with(b"merge") {
            merge_mark = Some(parser.read_mark()?);
            if parser.peek()?.starts_with(b"merge") {
                return Err(ProtocolError::OctopusMerge.into());
            }
        }

        let mut files: Vec<(BString, FileAction)> = Vec::new();
        parser.read_line()?;
        while !parser.line().is_empty() {
            let line = parser.line().to_owned();
            if let Some(rest) = line.strip_prefix(b"M ") {
                // filemodify: 'M' SP <mode> SP :<blob-mark> SP <path> LF
                let (mode, blob_ref, path) = rest
                    .splitn_str(3, b" ")
                    .collect_tuple()
                    .with_context(|| format!("Bad filemodify line {:?}", line.as_bstr()))?;
                let mode = FileMode::from_git_mode(mode.to_str()?)?;
                let blob_mark: Mark = blob_ref
                    .strip_prefix(b":")
                    .with_context(|| format!("Bad blob reference in {:?}", line.as_bstr()))?
                    .to_str()?
                    .parse()?;
                let data = self
                    .blob_marks
                    .get(&blob_mark)
                    .with_context(|| format!("Unknown blob mark :{blob_mark}"))?
                    .clone();
                upsert_file(
                    &mut files,
                    normalize_path(path)?,
                    FileAction::Write { mode, data },
                );
            } else if let Some(path) = line.strip_prefix(b"D ") {
                upsert_file(&mut files, normalize_path(path)?, FileAction::Delete);
            } else {
                bail!("Bad file change line {:?}", line.as_bstr());
            }
            parser.read_line()?;
        }

        let parent_from = from_mark.map(|mark| self.marks.mark_to_node(mark)).transpose()?;
        let parent_merge = merge_mark.map(|mark| self.marks.mark_to_node(mark)).transpose()?;

        // Mercurial needs entries for files that changed against either
        // parent; Git only lists changes against the first. Let untouched
        // first-parent files explicitly keep their content.
        if parent_merge.is_some() {
            if let Some(parent) = &parent_from {
                let parent_rev = self.repo.rev_of(parent)?;
                for entry in self.repo.manifest(parent_rev)? {
                    if !files.iter().any(|(path, _)| *path == entry.path) {
                        files.push((entry.path, FileAction::InheritFromParent));
                    }
                }
            }
        }

        let (user, date_secs, tz_seconds_west) = author.clone();
        let committer_extra = (committer != author).then(|| {
            let (user, secs, tz) = &committer;
            let mut extra = user.clone();
            extra.extend_from_slice(format!(" {secs} {tz}").as_bytes());
            extra
        });
        let branch = git_ref
            .strip_prefix("refs/heads/branches/")
            .map(git_to_hg_spaces);

        let changeset = MemChangeset {
            branch,
            user,
            date_secs,
            tz_seconds_west,
            message,
            parents: (parent_from, parent_merge),
            committer_extra,
            files,
        };
        let node = self.repo.commit(&changeset)?;

        self.record_ref(git_ref, node.clone());
        self.marks.new_mark(&node, commit_mark);
        self.processed_marks.insert(commit_mark);
        self.processed_nodes.push(node);
        Ok(())
    }

    fn read_tag<R: BufRead>(&mut self, parser: &mut RemoteParser<R>) -> Result<()> {
        let name = ref_of_line(parser.line(), b"tag ")?;
        parser.read_mark()?;
        let (user, secs, tz) = parser.read_author()?;
        let message = parser.read_data()?;
        parser.read_line()?;
        self.parsed_tags
            .insert(git_to_hg_spaces(&name), (user, secs, tz, message));
        Ok(())
    }

    fn record_ref(&mut self, git_ref: String, node: HgNode) {
        match self
            .parsed_refs
            .iter_mut()
            .find(|(existing, _)| *existing == git_ref)
        {
            Some((_, existing_node)) => *existing_node = node,
            None => self.parsed_refs.push((git_ref, node)),
        }
    }

    /// Stage, push, acknowledge: everything after the `done` sentinel.
    fn finish(mut self) -> Result<()> {
        let mut new_branch = false;
        let mut push_bookmarks: Vec<(String, String, HgNode)> = Vec::new();
        let mut updated_refs: Vec<(String, HgNode)> = Vec::new();

        for (git_ref, node) in std::mem::take(&mut self.parsed_refs) {
            if let Some(branch) = git_ref.strip_prefix("refs/heads/branches/") {
                let hg_branch = git_to_hg_spaces(branch);
                if !self
                    .snapshot
                    .branches
                    .iter()
                    .any(|(name, _)| *name == hg_branch)
                {
                    new_branch = true;
                }
                updated_refs.push((git_ref, node));
            } else if let Some(bookmark) = git_ref.strip_prefix("refs/heads/") {
                let hg_name = git_to_hg_spaces(bookmark);
                let old = self.snapshot.bookmark(&hg_name).cloned();
                if !self.repo.update_bookmark(&hg_name, old.as_ref(), &node)? {
                    continue;
                }
                let old_hex = old.map(|node| node.as_str().to_owned()).unwrap_or_default();
                push_bookmarks.push((hg_name, old_hex, node.clone()));
                updated_refs.push((git_ref, node));
            } else if let Some(tag) = git_ref.strip_prefix("refs/tags/") {
                self.write_tag(git_to_hg_spaces(tag), &node)?;
                updated_refs.push((git_ref, node));
            } else {
                // transport-helper/fast-export oddities
                log::warn!("Fast-export unexpected ref: {git_ref}");
                continue;
            }
        }

        let success = match self.peer.push(new_branch)? {
            PushOutcome::Pushed | PushOutcome::NothingToPush => {
                for (name, old_hex, node) in &push_bookmarks {
                    self.peer.pushkey_bookmark(name, old_hex, node)?;
                }
                self.marks.store()?;
                true
            }
            PushOutcome::NewRemoteHead(abort) => {
                log::debug!("Push rejected: {abort}");
                self.marks.reload()?;
                if !self.processed_nodes.is_empty() {
                    self.repo.strip(&self.processed_nodes)?;
                }
                false
            }
        };

        for (git_ref, node) in &updated_refs {
            if success {
                let (name, reftype) = ref_to_name_reftype(git_ref)?;
                let gitify_ref = self.namespace.gitify_ref(&name, reftype);
                let new_rev = self.repo.rev_of(node)?;
                // "up to date" keeps git from printing ref update status
                // for refs the push did not actually move.
                let status = if self.marks.tip_for(&gitify_ref) == Some(new_rev) {
                    " up to date"
                } else {
                    ""
                };
                self.out.line(format!("ok {git_ref}{status}"))?;
                self.marks.set_tip(&gitify_ref, new_rev);
            } else {
                self.out.line(format!("error {git_ref} non-fast forward"))?;
            }
        }
        self.out.blank()?;
        self.out.flush()?;

        if !success {
            // Only now has fast-export finished writing the marks file.
            self.git_marks.rewrite_without(&self.processed_marks)?;
        }
        Ok(())
    }

    /// Commits a new `.hgtags` line on the tagged changeset's branch tip,
    /// unless the identical tag line is already present.
    fn write_tag(&mut self, tag: String, node: &HgNode) -> Result<()> {
        let rev = self.repo.rev_of(node)?;
        let branch = self.repo.changeset(rev)?.branch;
        let branch_tip = self.repo.branch_tip(&branch)?;

        let old_tags = self.repo.hgtags_content(&branch_tip)?;
        let tag_line = format!("{node} {tag}");
        if old_tags.find(tag_line.as_bytes()).is_some() {
            return Ok(());
        }
        let mut new_tags = BString::from(old_tags);
        if !new_tags.is_empty() && !new_tags.ends_with(b"\n") {
            new_tags.push(b'\n');
        }
        new_tags.extend_from_slice(tag_line.as_bytes());
        new_tags.push(b'\n');

        let (user, date_secs, tz_seconds_west, message) = match self.parsed_tags.get(&tag) {
            Some((user, secs, tz, message)) => (user.clone(), *secs, *tz, message.clone()),
            None => (
                // An empty user lets the repository fall back to its
                // configured username, like `hg tag` would.
                BString::default(),
                chrono::Utc::now().timestamp(),
                0,
                BString::from(format!("Added tag {tag} for changeset {}", node.short())),
            ),
        };

        let changeset = MemChangeset {
            branch: Some(branch),
            user,
            date_secs,
            tz_seconds_west,
            message,
            parents: (Some(branch_tip), None),
            committer_extra: None,
            files: vec![(
                BString::from(".hgtags"),
                FileAction::Write {
                    mode: FileMode::Regular,
                    data: new_tags,
                },
            )],
        };
        self.repo.commit(&changeset)?;
        Ok(())
    }
}

fn ref_of_line(line: &bstr::BStr, prefix: &[u8]) -> Result<String> {
    Ok(line
        .strip_prefix(prefix)
        .with_context(|| format!("Expected {:?} line, got {line:?}", prefix.as_bstr()))?
        .to_str()
        .with_context(|| format!("Non UTF-8 ref in {line:?}"))?
        .to_owned())
}

/// Unquotes and relativizes a path from a file change line.
fn normalize_path(raw: &[u8]) -> Result<BString> {
    let unquoted = unquote_git_path(raw)?;
    Ok(BString::from(relative_path(&unquoted)))
}

/// Last write wins per path, like the dictionary the file block builds up.
fn upsert_file(files: &mut Vec<(BString, FileAction)>, path: BString, action: FileAction) {
    match files.iter_mut().find(|(existing, _)| *existing == path) {
        Some((_, existing_action)) => *existing_action = action,
        None => files.push((path, action)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemPeer;
    use crate::testing::MemRepo;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    struct Fixture {
        repo: MemRepo,
        peer: MemPeer,
        marks: HgMarks,
        namespace: GitifyNamespace,
        git_marks_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(repo: MemRepo) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            Fixture {
                repo,
                peer: MemPeer::new(),
                marks: HgMarks::load(&dir.path().join("marks-hg")).unwrap(),
                namespace: GitifyNamespace::new("origin"),
                git_marks_path: dir.path().join("marks-git"),
                _dir: dir,
            }
        }

        fn export(&mut self, stream: &str) -> Result<String> {
            let snapshot = ListSnapshot::capture(&self.repo, false).unwrap();
            let git_marks = GitMarks::load(&self.git_marks_path).unwrap();
            let input = format!("export\n{stream}");
            let mut parser = RemoteParser::new(Cursor::new(input.into_bytes())).unwrap();
            let mut buffer = Vec::new();
            let mut out = Output::new(&mut buffer);
            let exporter = GitExporter::new(
                &mut self.repo,
                &mut self.peer,
                &mut self.marks,
                &git_marks,
                &self.namespace,
                &snapshot,
                &mut out,
            );
            exporter.process(&mut parser)?;
            Ok(String::from_utf8(buffer).unwrap())
        }
    }

    fn seeded_repo() -> (MemRepo, HgNode) {
        let mut repo = MemRepo::new();
        let a = repo.add_commit("default", &[], "a", &[("test_file", "a\n")]);
        (repo, a)
    }

    fn commit_record(git_ref: &str, mark: Mark, message: &str, from: Option<Mark>, files: &str) -> String {
        let mut record = format!(
            "commit {git_ref}\nmark :{mark}\n\
             author Jane <jane@example.com> 1400000000 +0000\n\
             committer Jane <jane@example.com> 1400000000 +0000\n\
             data {}\n{message}",
            message.len()
        );
        if let Some(from) = from {
            record.push_str(&format!("from :{from}\n"));
        }
        record.push_str(files);
        record.push('\n');
        record
    }

    #[test]
    fn test_export_commit_to_bookmark_and_push() {
        let (mut repo, a) = seeded_repo();
        repo.set_bookmark("feature", &a);
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);

        let stream = format!(
            "feature done\n\
             blob\nmark :2\ndata 4\na\nb\n\n\
             {}done\n",
            commit_record(
                "refs/heads/feature",
                3,
                "commit b\n",
                Some(mark_a),
                "M 100644 :2 test_file\n",
            )
        );
        let acks = fixture.export(&stream).unwrap();
        assert_eq!(acks, "ok refs/heads/feature\n\n");

        // The commit landed locally, the bookmark moved, and the move was
        // replayed upstream after the push.
        assert_eq!(fixture.repo.len(), 2);
        let new_node = fixture.marks.mark_to_node(3).unwrap();
        assert_eq!(fixture.repo.bookmark("feature"), Some(&new_node));
        assert_eq!(fixture.repo.message_of(&new_node), "commit b\n");
        assert_eq!(fixture.peer.pushes, vec![false]);
        assert_eq!(
            fixture.peer.pushed_bookmarks,
            vec![(
                "feature".to_owned(),
                a.as_str().to_owned(),
                new_node.as_str().to_owned()
            )]
        );
        // The ref tip advanced so the next import knows it is caught up.
        assert_eq!(
            fixture.marks.tip_for("refs/hg/origin/bookmarks/feature"),
            Some(1)
        );
    }

    #[test]
    fn test_export_new_named_branch_sets_newbranch_flag() {
        let (repo, a) = seeded_repo();
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);

        let stream = format!(
            "feature done\n\
             blob\nmark :2\ndata 1\nb\n\n\
             {}done\n",
            commit_record(
                "refs/heads/branches/featurebranch",
                3,
                "b\n",
                Some(mark_a),
                "M 100644 :2 b\n",
            )
        );
        let acks = fixture.export(&stream).unwrap();
        assert_eq!(acks, "ok refs/heads/branches/featurebranch\n\n");
        assert_eq!(fixture.peer.pushes, vec![true]);

        let node = fixture.marks.mark_to_node(3).unwrap();
        let rev = fixture.repo.rev_of(&node).unwrap();
        assert_eq!(fixture.repo.changeset(rev).unwrap().branch, "featurebranch");
    }

    #[test]
    fn test_export_merge_inherits_first_parent_files() {
        let mut repo = MemRepo::new();
        let a = repo.add_commit("default", &[], "a", &[("test_file", "a\n"), ("keep", "k")]);
        let b = repo.add_commit("default", &[&a], "b", &[("other", "o")]);
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);
        let mark_b = fixture.marks.get_or_assign_mark(&b);

        let mut record = commit_record(
            "refs/heads/master",
            4,
            "merge\n",
            Some(mark_b),
            "M 100644 :3 test_file\n",
        );
        record = record.replace(
            &format!("from :{mark_b}\n"),
            &format!("from :{mark_b}\nmerge :{mark_a}\n"),
        );
        let stream = format!(
            "feature done\n\
             blob\nmark :3\ndata 2\nab\n\
             {record}done\n"
        );
        fixture.export(&stream).unwrap();

        let node = fixture.marks.mark_to_node(4).unwrap();
        let rev = fixture.repo.rev_of(&node).unwrap();
        let changeset = fixture.repo.changeset(rev).unwrap();
        assert_eq!(changeset.parent_revs, vec![1, 0]);
        // Files of the first parent that git did not mention survive.
        let paths: Vec<String> = fixture
            .repo
            .manifest(rev)
            .unwrap()
            .into_iter()
            .map(|entry| entry.path.to_string())
            .collect();
        assert_eq!(paths, ["keep", "other", "test_file"]);
        assert_eq!(
            fixture.repo.file_data(rev, b"test_file".as_bstr()).unwrap(),
            b"ab"
        );
    }

    #[test]
    fn test_export_octopus_merge_is_rejected() {
        let (repo, a) = seeded_repo();
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);

        let stream = format!(
            "feature done\n\
             commit refs/heads/master\n\
             mark :4\n\
             author Jane <jane@example.com> 1400000000 +0000\n\
             committer Jane <jane@example.com> 1400000000 +0000\n\
             data 2\nm\n\
             from :{mark_a}\n\
             merge :{mark_a}\n\
             merge :{mark_a}\n\ndone\n"
        );
        let err = fixture.export(&stream).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProtocolError>(),
            Some(&ProtocolError::OctopusMerge)
        );
    }

    #[test]
    fn test_export_tag_writes_hgtags_commit() {
        let (repo, a) = seeded_repo();
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);

        let stream = format!(
            "feature done\n\
             reset refs/tags/this_is_a_tag\n\
             from :{mark_a}\n\n\
             done\n"
        );
        let acks = fixture.export(&stream).unwrap();
        assert_eq!(acks, "ok refs/tags/this_is_a_tag\n\n");

        // One extra changeset carrying .hgtags on the tagged branch.
        assert_eq!(fixture.repo.len(), 2);
        let tip = fixture.repo.branch_tip("default").unwrap();
        assert_eq!(
            fixture.repo.message_of(&tip),
            format!("Added tag this_is_a_tag for changeset {}", a.short()).as_bytes()
                .as_bstr()
        );
        assert_eq!(
            fixture.repo.hgtags_content(&tip).unwrap(),
            format!("{a} this_is_a_tag\n").into_bytes()
        );
    }

    #[test]
    fn test_export_tag_with_tagger_uses_buffered_message() {
        let (repo, a) = seeded_repo();
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);

        let stream = format!(
            "feature done\n\
             tag v1.0\n\
             from :{mark_a}\n\
             tagger Tagger <t@example.com> 1400000000 +0000\n\
             data 8\ntag msg\n\n\
             reset refs/tags/v1.0\n\
             from :{mark_a}\n\n\
             done\n"
        );
        fixture.export(&stream).unwrap();
        let tip = fixture.repo.branch_tip("default").unwrap();
        assert_eq!(fixture.repo.message_of(&tip), "tag msg\n");
        let rev = fixture.repo.rev_of(&tip).unwrap();
        let changeset = fixture.repo.changeset(rev).unwrap();
        assert_eq!(changeset.user, "Tagger <t@example.com>");
        assert_eq!(changeset.date_secs, 1400000000);
    }

    #[test]
    fn test_export_existing_tag_line_is_not_recommitted() {
        let mut repo = MemRepo::new();
        let a = repo.add_commit("default", &[], "a", &[("test_file", "a\n")]);
        let hgtags = format!("{a} this_is_a_tag\n");
        let tagged = repo.add_commit(
            "default",
            &[&a],
            "Added tag this_is_a_tag for changeset x",
            &[(".hgtags", hgtags.as_str())],
        );
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);
        fixture.marks.get_or_assign_mark(&tagged);

        let stream = format!(
            "feature done\n\
             reset refs/tags/this_is_a_tag\n\
             from :{mark_a}\n\n\
             done\n"
        );
        fixture.export(&stream).unwrap();
        assert_eq!(fixture.repo.len(), 2);
    }

    #[test]
    fn test_export_rollback_on_new_remote_head() {
        let (repo, a) = seeded_repo();
        let mut fixture = Fixture::new(repo);
        fixture.peer.refuse_new_head = true;
        let mark_a = fixture.marks.get_or_assign_mark(&a);
        fixture.marks.store().unwrap();
        // Simulate the fast-export half of the marks exchange.
        std::fs::write(
            &fixture.git_marks_path,
            ":1 1111111111111111111111111111111111111111\n\
             :3 3333333333333333333333333333333333333333\n",
        )
        .unwrap();

        let stream = format!(
            "feature done\n\
             blob\nmark :2\ndata 2\nc\n\n\
             {}done\n",
            commit_record(
                "refs/heads/master",
                3,
                "c\n",
                Some(mark_a),
                "M 100644 :2 test_file\n",
            )
        );
        let acks = fixture.export(&stream).unwrap();
        assert_eq!(acks, "error refs/heads/master non-fast forward\n\n");

        // No trace of the rejected commit anywhere: not in the clone, not
        // in the mark store, not in the git marks file.
        assert_eq!(fixture.repo.len(), 1);
        assert!(fixture.marks.mark_to_node(3).is_err());
        assert_eq!(
            std::fs::read_to_string(&fixture.git_marks_path).unwrap(),
            ":1 1111111111111111111111111111111111111111\n"
        );
    }

    #[test]
    fn test_export_up_to_date_ack_suffix() {
        let (mut repo, a) = seeded_repo();
        repo.set_bookmark("feature", &a);
        let mut fixture = Fixture::new(repo);
        let mark_a = fixture.marks.get_or_assign_mark(&a);
        fixture.marks.set_tip("refs/hg/origin/bookmarks/feature", 0);

        let stream = format!(
            "feature done\n\
             reset refs/heads/feature\n\
             from :{mark_a}\n\n\
             done\n"
        );
        let acks = fixture.export(&stream).unwrap();
        assert_eq!(acks, "ok refs/heads/feature up to date\n\n");
    }
}
