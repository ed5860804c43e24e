use crate::error::ProtocolError;
use crate::export::GitExporter;
use crate::gitref::GitifyNamespace;
use crate::gitref::RefType;
use crate::gitref::hg_to_git_spaces;
use crate::gitref::name_reftype_to_ref;
use crate::import::HgImporter;
use crate::marks::GitMarks;
use crate::marks::HgMarks;
use crate::protocol::Output;
use crate::protocol::RemoteParser;
use crate::repo::HgNode;
use crate::repo::HgPeer;
use crate::repo::LocalRepo;
use crate::repo::RemotePaths;
use anyhow::Context as _;
use anyhow::Result;
use bstr::ByteSlice as _;
use std::io::BufRead;
use std::io::Write;

/// When set in the environment, closed branches are advertised and
/// importable instead of suppressed.
pub const ALLOW_CLOSED_ENV: &str = "GIT_REMOTE_HG_ALLOW_CLOSED_BRANCHES";

/// The view of the clone taken by `list` and shared with the import and
/// export phases of the same session.
pub struct ListSnapshot {
    /// Name and node HEAD resolves to: the active bookmark, else the
    /// current branch (`default` shown as `master`). `None` for an empty
    /// repository.
    pub head: Option<(String, HgNode)>,
    pub branches: Vec<(String, Vec<HgNode>)>,
    pub bookmarks: Vec<(String, HgNode)>,
}

impl ListSnapshot {
    pub fn capture(repo: &dyn LocalRepo, include_closed: bool) -> Result<ListSnapshot> {
        let branches = repo.branch_heads(include_closed)?;
        let bookmarks = repo.bookmarks()?;
        let head = match repo.active_bookmark()? {
            Some(active) => {
                let node = bookmarks
                    .iter()
                    .find(|(name, _)| *name == active)
                    .map(|(_, node)| node.clone())
                    .with_context(|| format!("Active bookmark {active:?} has no node"))?;
                Some((active, node))
            }
            None => {
                let branch = repo.current_branch()?;
                let name = if branch == "default" {
                    "master".to_owned()
                } else {
                    branch
                };
                if branches.iter().any(|(branch, _)| branch == "default") {
                    Some((name, repo.branch_tip("default")?))
                } else {
                    // Empty repository, or nothing on the default branch
                    // yet in a clone that was never updated.
                    None
                }
            }
        };
        Ok(ListSnapshot {
            head,
            branches,
            bookmarks,
        })
    }

    /// The changeset a branch ref should advertise: the single head, or
    /// the canonical branch tip when anonymous heads exist.
    pub fn branch_head(&self, repo: &dyn LocalRepo, branch: &str) -> Result<Option<HgNode>> {
        let Some((_, heads)) = self.branches.iter().find(|(name, _)| name == branch) else {
            return Ok(None);
        };
        if heads.len() > 1 {
            log::warn!("Branch '{branch}' has more than one head, consider merging");
            Ok(Some(repo.branch_tip(branch)?))
        } else {
            Ok(heads.first().cloned())
        }
    }

    pub fn bookmark(&self, name: &str) -> Option<&HgNode> {
        self.bookmarks
            .iter()
            .find(|(bookmark, _)| bookmark == name)
            .map(|(_, node)| node)
    }
}

/// Dispatches the remote-helper verbs against the working clone and owns
/// every piece of session state: the mark stores, the protocol writer and
/// the `list` snapshot.
pub struct Session<R, P, W> {
    alias_namespace: GitifyNamespace,
    url: String,
    paths: RemotePaths,
    repo: R,
    peer: P,
    marks: HgMarks,
    git_marks: GitMarks,
    out: Output<W>,
    snapshot: Option<ListSnapshot>,
}

impl<R: LocalRepo, P: HgPeer, W: Write> Session<R, P, W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alias: &str,
        url: &str,
        paths: RemotePaths,
        repo: R,
        peer: P,
        mut marks: HgMarks,
        git_marks: GitMarks,
        out: Output<W>,
    ) -> Result<Self> {
        let alias_namespace = GitifyNamespace::new(alias);
        marks.upgrade(&repo, &alias_namespace)?;
        Ok(Session {
            alias_namespace,
            url: url.to_owned(),
            paths,
            repo,
            peer,
            marks,
            git_marks,
            out,
            snapshot: None,
        })
    }

    /// The request loop: one verb per line until a blank line or EOF, then
    /// the mark store is persisted.
    pub fn run<I: BufRead>(&mut self, parser: &mut RemoteParser<I>) -> Result<()> {
        loop {
            let line = parser.line().to_owned();
            if line.is_empty() {
                break;
            }
            let command = line.split_str(b" ").next().unwrap_or_default().to_owned();
            match command.as_slice() {
                b"capabilities" => self.do_capabilities()?,
                b"list" => self.do_list()?,
                b"import" => self.do_import(parser)?,
                b"export" => self.do_export(parser)?,
                _ => {
                    return Err(ProtocolError::UnhandledCommand(line.to_string()).into());
                }
            }
            parser.read_line()?;
        }
        self.persist_marks()
    }

    fn persist_marks(&self) -> Result<()> {
        self.marks.store().map_err(|err| {
            let parent_missing = self
                .marks
                .path()
                .parent()
                .is_some_and(|parent| !parent.exists());
            if parent_missing {
                log::error!(
                    "The marks directory has been removed. This usually suggests that a git \
                     clone operation failed. To debug, set {} and rerun.",
                    crate::log::DEBUG_ENV_VAR
                );
            }
            err.context("Error updating marks")
        })
    }

    fn do_capabilities(&mut self) -> Result<()> {
        self.out.line("import")?;
        self.out.line("export")?;
        for reftype in RefType::ALL {
            self.out.line(format!(
                "refspec {}:{}",
                name_reftype_to_ref("*", reftype),
                self.alias_namespace.gitify_ref("*", reftype)
            ))?;
        }
        if self.git_marks.file_exists() {
            self.out
                .line(format!("*import-marks {}", self.paths.marks_git.display()))?;
        }
        self.out
            .line(format!("*export-marks {}", self.paths.marks_git.display()))?;
        self.out.blank()?;
        self.out.flush()?;
        Ok(())
    }

    fn do_list(&mut self) -> Result<()> {
        let snapshot = ListSnapshot::capture(&self.repo, allow_closed_branches())?;

        let Some((head_name, _)) = snapshot.head.clone() else {
            self.out.blank()?;
            self.out.flush()?;
            self.snapshot = Some(snapshot);
            return Ok(());
        };

        self.out
            .line(format!("@refs/heads/{} HEAD", hg_to_git_spaces(&head_name)))?;
        for (branch, _) in &snapshot.branches {
            let head = snapshot
                .branch_head(&self.repo, branch)?
                .expect("listed branches have heads");
            self.out.line(format!(
                "{} {}",
                self.change_hash(&head),
                name_reftype_to_ref(&hg_to_git_spaces(branch), RefType::Branch)
            ))?;
        }
        for (bookmark, node) in &snapshot.bookmarks {
            // `master` aliases the default branch on the Git side.
            if bookmark != "master" {
                self.out.line(format!(
                    "{} {}",
                    self.change_hash(node),
                    name_reftype_to_ref(&hg_to_git_spaces(bookmark), RefType::Bookmark)
                ))?;
            }
        }
        for (tag, node) in self.repo.tags()? {
            if tag != "tip" {
                self.out.line(format!(
                    "{} {}",
                    self.change_hash(&node),
                    name_reftype_to_ref(&hg_to_git_spaces(&tag), RefType::Tag)
                ))?;
            }
        }
        self.out.blank()?;
        self.out.flush()?;
        self.snapshot = Some(snapshot);
        Ok(())
    }

    /// The Git object hash to advertise for a changeset, when a previous
    /// import recorded one, else `?`.
    fn change_hash(&self, node: &HgNode) -> String {
        self.marks
            .node_to_mark(node)
            .and_then(|mark| self.git_marks.mark_to_sha(mark))
            .map(str::to_owned)
            .unwrap_or_else(|| "?".to_owned())
    }

    fn do_import<I: BufRead>(&mut self, parser: &mut RemoteParser<I>) -> Result<()> {
        if self.snapshot.is_none() {
            self.snapshot = Some(ListSnapshot::capture(&self.repo, allow_closed_branches())?);
        }
        let snapshot = self.snapshot.as_ref().expect("just captured");
        let mut importer = HgImporter::new(
            &self.repo,
            &mut self.marks,
            &self.paths.marks_git,
            &self.alias_namespace,
            snapshot,
            &self.paths.uuid,
            &self.url,
            &mut self.out,
        );
        importer.process(parser)
    }

    fn do_export<I: BufRead>(&mut self, parser: &mut RemoteParser<I>) -> Result<()> {
        if self.snapshot.is_none() {
            self.snapshot = Some(ListSnapshot::capture(&self.repo, allow_closed_branches())?);
        }
        let snapshot = self.snapshot.as_ref().expect("just captured");
        let exporter = GitExporter::new(
            &mut self.repo,
            &mut self.peer,
            &mut self.marks,
            &self.git_marks,
            &self.alias_namespace,
            snapshot,
            &mut self.out,
        );
        exporter.process(parser)
    }
}

fn allow_closed_branches() -> bool {
    std::env::var_os(ALLOW_CLOSED_ENV).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemPeer;
    use crate::testing::MemRepo;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::path::Path;

    struct Fixture {
        session: Session<MemRepo, MemPeer, Vec<u8>>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(repo: MemRepo) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let paths = RemotePaths::new(dir.path(), "http://hg.example.com/repo");
            std::fs::create_dir_all(&paths.remote_dir).unwrap();
            let marks = HgMarks::load(&paths.marks_hg).unwrap();
            let git_marks = GitMarks::load(&paths.marks_git).unwrap();
            let session = Session::new(
                "origin",
                "http://hg.example.com/repo",
                paths,
                repo,
                MemPeer::new(),
                marks,
                git_marks,
                Output::new(Vec::new()),
            )
            .unwrap();
            Fixture {
                session,
                _dir: dir,
            }
        }

        fn run(&mut self, input: &str) -> Result<String> {
            let mut parser = RemoteParser::new(Cursor::new(input.as_bytes().to_vec())).unwrap();
            let result = self.session.run(&mut parser);
            let output = String::from_utf8(self.session.out.get_ref().clone()).unwrap();
            result.map(|()| output)
        }
    }

    fn seeded_repo() -> MemRepo {
        let mut repo = MemRepo::new();
        repo.add_commit("default", &[], "a", &[("test_file", "a\n")]);
        repo
    }

    #[test]
    fn test_capabilities_block() {
        let mut fixture = Fixture::new(seeded_repo());
        let marks_git = fixture.session.paths.marks_git.clone();
        let output = fixture.run("capabilities\n").unwrap();
        assert_eq!(
            output,
            format!(
                "import\n\
                 export\n\
                 refspec refs/heads/branches/*:refs/hg/origin/branches/*\n\
                 refspec refs/heads/*:refs/hg/origin/bookmarks/*\n\
                 refspec refs/tags/*:refs/hg/origin/tags/*\n\
                 *export-marks {}\n\n",
                marks_git.display()
            )
        );
    }

    #[test]
    fn test_capabilities_advertise_existing_git_marks() {
        let repo = seeded_repo();
        let dir = tempfile::tempdir().unwrap();
        let paths = RemotePaths::new(dir.path(), "http://hg.example.com/repo");
        std::fs::create_dir_all(&paths.remote_dir).unwrap();
        std::fs::write(&paths.marks_git, ":1 1111111111111111111111111111111111111111\n")
            .unwrap();
        let marks = HgMarks::load(&paths.marks_hg).unwrap();
        let git_marks = GitMarks::load(&paths.marks_git).unwrap();
        let mut session = Session::new(
            "origin",
            "http://hg.example.com/repo",
            paths,
            repo,
            MemPeer::new(),
            marks,
            git_marks,
            Output::new(Vec::new()),
        )
        .unwrap();
        let mut parser = RemoteParser::new(Cursor::new(b"capabilities\n".to_vec())).unwrap();
        session.run(&mut parser).unwrap();
        let output = String::from_utf8(session.out.get_ref().clone()).unwrap();
        assert!(output.contains("*import-marks "));
    }

    #[test]
    fn test_list_advertisement_order() {
        let mut repo = MemRepo::new();
        let a = repo.add_commit("default", &[], "a", &[("test_file", "a\n")]);
        let b = repo.add_commit("featurebranch", &[&a], "b", &[("test_file", "a\nb")]);
        let c = repo.add_commit("default", &[&a], "c", &[("c", "c")]);
        repo.set_bookmark("feature", &b);
        repo.set_bookmark("master", &c);
        repo.add_tag("v1.0", &a);

        let mut fixture = Fixture::new(repo);
        let output = fixture.run("list\n").unwrap();
        assert_eq!(
            output,
            "@refs/heads/master HEAD\n\
             ? refs/heads/master\n\
             ? refs/heads/branches/featurebranch\n\
             ? refs/heads/feature\n\
             ? refs/tags/v1.0\n\n"
        );
    }

    #[test]
    fn test_list_empty_repository() {
        let mut fixture = Fixture::new(MemRepo::new());
        let output = fixture.run("list\n").unwrap();
        assert_eq!(output, "\n");
    }

    #[test]
    fn test_list_head_prefers_active_bookmark() {
        let mut repo = seeded_repo();
        let tip = repo.branch_tip("default").unwrap();
        repo.set_bookmark("work in progress", &tip);
        repo.set_active_bookmark("work in progress");

        let mut fixture = Fixture::new(repo);
        let output = fixture.run("list\n").unwrap();
        assert!(output.starts_with("@refs/heads/work___in___progress HEAD\n"));
        assert!(output.contains("? refs/heads/work___in___progress\n"));
    }

    #[test]
    fn test_list_advertises_known_git_hashes() {
        let repo = seeded_repo();
        let tip = repo.branch_tip("default").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = RemotePaths::new(dir.path(), "http://hg.example.com/repo");
        std::fs::create_dir_all(&paths.remote_dir).unwrap();
        std::fs::write(
            &paths.marks_git,
            ":1 4242424242424242424242424242424242424242\n",
        )
        .unwrap();
        let mut marks = HgMarks::load(&paths.marks_hg).unwrap();
        marks.get_or_assign_mark(&tip);
        let git_marks = GitMarks::load(&paths.marks_git).unwrap();
        let mut session = Session::new(
            "origin",
            "http://hg.example.com/repo",
            paths,
            repo,
            MemPeer::new(),
            marks,
            git_marks,
            Output::new(Vec::new()),
        )
        .unwrap();
        let mut parser = RemoteParser::new(Cursor::new(b"list\n".to_vec())).unwrap();
        session.run(&mut parser).unwrap();
        let output = String::from_utf8(session.out.get_ref().clone()).unwrap();
        assert!(output.contains("4242424242424242424242424242424242424242 refs/heads/master\n"));
    }

    #[test]
    fn test_branch_head_warns_and_picks_tip_on_anonymous_heads() {
        let mut repo = MemRepo::new();
        let a = repo.add_commit("default", &[], "a", &[("f", "a")]);
        let _head1 = repo.add_commit("default", &[&a], "h1", &[("f", "b")]);
        let head2 = repo.add_commit("default", &[&a], "h2", &[("f", "c")]);

        let snapshot = ListSnapshot::capture(&repo, false).unwrap();
        let picked = snapshot.branch_head(&repo, "default").unwrap();
        assert_eq!(picked, Some(head2));
    }

    #[test]
    fn test_closed_branches_are_suppressed_by_default() {
        let mut repo = MemRepo::new();
        let a = repo.add_commit("default", &[], "a", &[("f", "a")]);
        let closed = repo.add_commit("oldbranch", &[&a], "end", &[("f", "b")]);
        repo.close_head(&closed);

        let open_only = ListSnapshot::capture(&repo, false).unwrap();
        assert!(!open_only.branches.iter().any(|(name, _)| name == "oldbranch"));

        let with_closed = ListSnapshot::capture(&repo, true).unwrap();
        assert!(with_closed.branches.iter().any(|(name, _)| name == "oldbranch"));
    }

    #[test]
    fn test_full_fetch_session_persists_marks() {
        let mut fixture = Fixture::new(seeded_repo());
        let output = fixture
            .run("capabilities\nlist\nimport refs/heads/master\n\n")
            .unwrap();

        assert!(output.contains("@refs/heads/master HEAD\n"));
        assert!(output.contains("commit refs/hg/origin/bookmarks/master\n"));
        assert!(output.ends_with("done\n"));

        // The mark store was written at end of session.
        let restored = HgMarks::load(fixture.session.marks.path()).unwrap();
        assert_eq!(restored.tip_for("refs/hg/origin/bookmarks/master"), Some(0));
    }

    #[test]
    fn test_unknown_command_is_fatal() {
        let mut fixture = Fixture::new(seeded_repo());
        let err = fixture.run("frobnicate\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProtocolError>(),
            Some(&ProtocolError::UnhandledCommand("frobnicate".to_owned()))
        );
    }

    #[test]
    fn test_eof_is_graceful_shutdown() {
        let mut fixture = Fixture::new(seeded_repo());
        let output = fixture.run("").unwrap();
        assert_eq!(output, "");
        assert!(Path::new(fixture.session.marks.path()).exists());
    }
}
