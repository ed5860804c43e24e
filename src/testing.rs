//! In-memory implementations of the repository seam for unit tests.

use crate::repo::Changeset;
use crate::repo::FileAction;
use crate::repo::FileMode;
use crate::repo::HgNode;
use crate::repo::HgPeer;
use crate::repo::LocalRepo;
use crate::repo::ManifestEntry;
use crate::repo::MemChangeset;
use crate::repo::PushOutcome;
use crate::repo::RevNumber;
use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use bstr::BStr;
use bstr::BString;
use sha1::Digest as _;
use std::collections::BTreeMap;
use std::collections::HashMap;

#[derive(Clone)]
struct MemCommit {
    node: HgNode,
    branch: String,
    user: BString,
    date_secs: i64,
    tz_seconds_west: i64,
    message: BString,
    parent_revs: Vec<RevNumber>,
    committer_extra: Option<BString>,
    manifest: BTreeMap<BString, (String, FileMode, BString)>,
    closed: bool,
}

/// A [`LocalRepo`] that lives entirely in memory. Nodes are synthesized by
/// hashing the commit header, so history rewrites change identities just
/// like in Mercurial.
#[derive(Default)]
pub struct MemRepo {
    commits: Vec<MemCommit>,
    by_node: HashMap<String, RevNumber>,
    bookmarks: BTreeMap<String, HgNode>,
    active_bookmark: Option<String>,
    tags: Vec<(String, HgNode)>,
}

impl MemRepo {
    pub fn new() -> MemRepo {
        MemRepo::default()
    }

    /// Appends a commit of plain files and returns its node.
    pub fn add_commit(
        &mut self,
        branch: &str,
        parents: &[&HgNode],
        message: &str,
        files: &[(&str, &str)],
    ) -> HgNode {
        let files: Vec<(&str, FileMode, &str)> = files
            .iter()
            .map(|&(path, data)| (path, FileMode::Regular, data))
            .collect();
        self.add_commit_full(branch, parents, message, &files, &[], "test <test@example.com>")
    }

    pub fn add_commit_full(
        &mut self,
        branch: &str,
        parents: &[&HgNode],
        message: &str,
        files: &[(&str, FileMode, &str)],
        removed: &[&str],
        user: &str,
    ) -> HgNode {
        let parent_revs: Vec<RevNumber> = parents
            .iter()
            .map(|node| *self.by_node.get(node.as_str()).expect("unknown parent"))
            .collect();
        let mut manifest = match parent_revs.first() {
            Some(&rev) => self.commits[rev as usize].manifest.clone(),
            None => BTreeMap::new(),
        };
        for &(path, mode, data) in files {
            manifest.insert(
                BString::from(path),
                (file_digest(path, data.as_bytes()), mode, BString::from(data)),
            );
        }
        for &path in removed {
            manifest.remove(BStr::new(path));
        }
        self.push_commit(MemCommit {
            node: HgNode::from_hex(NULL_PLACEHOLDER).unwrap(),
            branch: branch.to_owned(),
            user: BString::from(user),
            date_secs: 1_386_372_042 + self.commits.len() as i64,
            tz_seconds_west: 0,
            message: BString::from(message),
            parent_revs,
            committer_extra: None,
            manifest,
            closed: false,
        })
    }

    fn push_commit(&mut self, mut commit: MemCommit) -> HgNode {
        let rev = self.commits.len() as RevNumber;
        commit.node = synthesize_node(rev, &commit);
        let node = commit.node.clone();
        self.by_node.insert(node.as_str().to_owned(), rev);
        self.commits.push(commit);
        node
    }

    pub fn set_bookmark(&mut self, name: &str, node: &HgNode) {
        self.bookmarks.insert(name.to_owned(), node.clone());
    }

    pub fn set_active_bookmark(&mut self, name: &str) {
        self.active_bookmark = Some(name.to_owned());
    }

    pub fn add_tag(&mut self, name: &str, node: &HgNode) {
        self.tags.push((name.to_owned(), node.clone()));
    }

    pub fn set_committer_extra(&mut self, node: &HgNode, extra: &str) {
        let rev = self.by_node[node.as_str()] as usize;
        self.commits[rev].committer_extra = Some(BString::from(extra));
    }

    pub fn close_head(&mut self, node: &HgNode) {
        let rev = self.by_node[node.as_str()] as usize;
        self.commits[rev].closed = true;
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn bookmark(&self, name: &str) -> Option<&HgNode> {
        self.bookmarks.get(name)
    }

    pub fn message_of(&self, node: &HgNode) -> &BStr {
        let rev = self.by_node[node.as_str()] as usize;
        self.commits[rev].message.as_ref()
    }

    fn commit_at(&self, rev: RevNumber) -> Result<&MemCommit> {
        self.commits
            .get(rev as usize)
            .with_context(|| format!("Unknown revision {rev}"))
    }
}

const NULL_PLACEHOLDER: &str = "0000000000000000000000000000000000000000";

fn file_digest(path: &str, data: &[u8]) -> String {
    let mut hasher = sha1::Sha1::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\0");
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn synthesize_node(rev: RevNumber, commit: &MemCommit) -> HgNode {
    let mut hasher = sha1::Sha1::new();
    hasher.update(rev.to_string().as_bytes());
    hasher.update(commit.branch.as_bytes());
    hasher.update(&commit.user);
    hasher.update(&commit.message);
    for (path, (filenode, _, _)) in &commit.manifest {
        hasher.update(path);
        hasher.update(filenode.as_bytes());
    }
    for parent in &commit.parent_revs {
        hasher.update(parent.to_string().as_bytes());
    }
    HgNode::from_hex(&hex::encode(hasher.finalize())).expect("sha1 is valid hex")
}

impl LocalRepo for MemRepo {
    fn is_empty(&self) -> Result<bool> {
        Ok(self.commits.is_empty())
    }

    fn current_branch(&self) -> Result<String> {
        Ok("default".to_owned())
    }

    fn active_bookmark(&self) -> Result<Option<String>> {
        Ok(self.active_bookmark.clone())
    }

    fn bookmarks(&self) -> Result<Vec<(String, HgNode)>> {
        Ok(self
            .bookmarks
            .iter()
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect())
    }

    fn branch_heads(&self, include_closed: bool) -> Result<Vec<(String, Vec<HgNode>)>> {
        let mut branches: Vec<(String, Vec<HgNode>)> = Vec::new();
        for (rev, commit) in self.commits.iter().enumerate().rev() {
            let has_same_branch_child = self.commits.iter().any(|other| {
                other.branch == commit.branch
                    && other.parent_revs.contains(&(rev as RevNumber))
            });
            if has_same_branch_child || (commit.closed && !include_closed) {
                continue;
            }
            match branches.iter_mut().find(|(name, _)| *name == commit.branch) {
                Some((_, heads)) => heads.push(commit.node.clone()),
                None => branches.push((commit.branch.clone(), vec![commit.node.clone()])),
            }
        }
        Ok(branches)
    }

    fn branch_tip(&self, branch: &str) -> Result<HgNode> {
        self.commits
            .iter()
            .rev()
            .find(|commit| commit.branch == branch && !commit.closed)
            .or_else(|| self.commits.iter().rev().find(|commit| commit.branch == branch))
            .map(|commit| commit.node.clone())
            .with_context(|| format!("Unknown branch {branch:?}"))
    }

    fn tags(&self) -> Result<Vec<(String, HgNode)>> {
        let mut tags = Vec::new();
        if let Some(tip) = self.commits.last() {
            tags.push(("tip".to_owned(), tip.node.clone()));
        }
        tags.extend(self.tags.iter().cloned());
        Ok(tags)
    }

    fn rev_of(&self, node: &HgNode) -> Result<RevNumber> {
        self.by_node
            .get(node.as_str())
            .copied()
            .with_context(|| format!("Unknown node {node}"))
    }

    fn changeset(&self, rev: RevNumber) -> Result<Changeset> {
        let commit = self.commit_at(rev)?;
        Ok(Changeset {
            node: commit.node.clone(),
            rev,
            branch: commit.branch.clone(),
            user: commit.user.clone(),
            date_secs: commit.date_secs,
            tz_seconds_west: commit.tz_seconds_west,
            message: commit.message.clone(),
            parent_revs: commit.parent_revs.clone(),
            committer_extra: commit.committer_extra.clone(),
        })
    }

    fn manifest(&self, rev: RevNumber) -> Result<Vec<ManifestEntry>> {
        Ok(self
            .commit_at(rev)?
            .manifest
            .iter()
            .map(|(path, (filenode, mode, _))| ManifestEntry {
                path: path.clone(),
                filenode: filenode.clone(),
                mode: *mode,
            })
            .collect())
    }

    fn file_data(&self, rev: RevNumber, path: &BStr) -> Result<Vec<u8>> {
        let commit = self.commit_at(rev)?;
        let (_, _, data) = commit
            .manifest
            .get(path)
            .with_context(|| format!("No file {path:?} in revision {rev}"))?;
        Ok(data.to_vec())
    }

    fn hgtags_content(&self, node: &HgNode) -> Result<Vec<u8>> {
        let rev = self.rev_of(node)?;
        match self.commit_at(rev)?.manifest.get(BStr::new(".hgtags")) {
            Some((_, _, data)) => Ok(data.to_vec()),
            None => Ok(Vec::new()),
        }
    }

    fn commit(&mut self, changeset: &MemChangeset) -> Result<HgNode> {
        let mut parent_revs = Vec::new();
        for parent in [&changeset.parents.0, &changeset.parents.1]
            .into_iter()
            .flatten()
        {
            parent_revs.push(self.rev_of(parent)?);
        }
        let mut manifest = match parent_revs.first() {
            Some(&rev) => self.commit_at(rev)?.manifest.clone(),
            None => BTreeMap::new(),
        };
        for (path, action) in &changeset.files {
            match action {
                FileAction::Write { mode, data } => {
                    let digest = {
                        let mut hasher = sha1::Sha1::new();
                        hasher.update(path);
                        hasher.update(b"\0");
                        hasher.update(data);
                        hex::encode(hasher.finalize())
                    };
                    manifest.insert(path.clone(), (digest, *mode, data.clone()));
                }
                FileAction::Delete => {
                    manifest.remove(path);
                }
                FileAction::InheritFromParent => {
                    if !manifest.contains_key(path) {
                        bail!("Inherited file {path:?} missing from first parent");
                    }
                }
            }
        }
        let branch = match &changeset.branch {
            Some(branch) => branch.clone(),
            None => match parent_revs.first() {
                Some(&rev) => self.commit_at(rev)?.branch.clone(),
                None => "default".to_owned(),
            },
        };
        Ok(self.push_commit(MemCommit {
            node: HgNode::from_hex(NULL_PLACEHOLDER).unwrap(),
            branch,
            user: changeset.user.clone(),
            date_secs: changeset.date_secs,
            tz_seconds_west: changeset.tz_seconds_west,
            message: changeset.message.clone(),
            parent_revs,
            committer_extra: changeset.committer_extra.clone(),
            manifest,
            closed: false,
        }))
    }

    fn update_bookmark(
        &mut self,
        name: &str,
        expected_old: Option<&HgNode>,
        new: &HgNode,
    ) -> Result<bool> {
        if self.bookmarks.get(name) != expected_old {
            return Ok(false);
        }
        self.bookmarks.insert(name.to_owned(), new.clone());
        Ok(true)
    }

    fn strip(&mut self, nodes: &[HgNode]) -> Result<()> {
        let mut min_rev = None;
        for node in nodes {
            let rev = self.rev_of(node)?;
            if min_rev.is_none_or(|min| rev < min) {
                min_rev = Some(rev);
            }
        }
        let Some(min_rev) = min_rev else {
            return Ok(());
        };
        // Test histories only append, so descendants of the minimum are
        // exactly the higher revisions.
        for commit in self.commits.drain(min_rev as usize..) {
            self.by_node.remove(commit.node.as_str());
        }
        Ok(())
    }
}

/// A scripted [`HgPeer`].
#[derive(Default)]
pub struct MemPeer {
    /// When set, every push is refused as creating a new remote head.
    pub refuse_new_head: bool,
    pub pushes: Vec<bool>,
    pub pushed_bookmarks: Vec<(String, String, String)>,
}

impl MemPeer {
    pub fn new() -> MemPeer {
        MemPeer::default()
    }
}

impl HgPeer for MemPeer {
    fn push(&mut self, new_branch: bool) -> Result<PushOutcome> {
        if self.refuse_new_head {
            return Ok(PushOutcome::NewRemoteHead(
                "push creates new remote head 1234567890ab!".to_owned(),
            ));
        }
        self.pushes.push(new_branch);
        Ok(PushOutcome::Pushed)
    }

    fn pushkey_bookmark(&mut self, name: &str, old_hex: &str, new: &HgNode) -> Result<bool> {
        self.pushed_bookmarks
            .push((name.to_owned(), old_hex.to_owned(), new.as_str().to_owned()));
        Ok(true)
    }
}
