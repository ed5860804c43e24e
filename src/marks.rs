use crate::gitref::GitifyNamespace;
use crate::repo::HgNode;
use crate::repo::LocalRepo;
use crate::repo::RevNumber;
use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use itertools::Itertools as _;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

/// A fast-import mark: a positive integer naming one changeset across both
/// mark files, durable across helper invocations.
pub type Mark = usize;

const CURRENT_VERSION: u32 = 3;

/// The persisted JSON shape of the mark store. Field names match the
/// historical format, so stores written by older helpers keep loading.
#[derive(serde::Serialize, serde::Deserialize)]
struct SerdeMarks {
    tips: BTreeMap<String, RevNumber>,
    /// Keyed by node hex; by integer revision strings in version 1 stores.
    revisions_to_marks: BTreeMap<String, Mark>,
    #[serde(rename = "last-mark")]
    last_mark: Mark,
    #[serde(rename = "notes-mark", default)]
    notes_mark: Option<Mark>,
    #[serde(rename = "marks-version", default = "legacy_version")]
    marks_version: u32,
}

fn legacy_version() -> u32 {
    // Stores from before the schema tag map revisions by integer.
    1
}

/// The persistent bijection between marks and Mercurial changesets, plus
/// the last exported revision per gitify ref.
///
/// A missing file is a clean empty start; a malformed file is fatal. The
/// store is written back at end of session and at every successful export.
#[derive(Debug)]
pub struct HgMarks {
    path: PathBuf,
    version: u32,
    last_mark: Mark,
    revisions_to_marks: BTreeMap<String, Mark>,
    marks_to_revisions: HashMap<Mark, String>,
    tips: BTreeMap<String, RevNumber>,
    notes_mark: Option<Mark>,
}

impl HgMarks {
    pub fn load(path: &Path) -> Result<HgMarks> {
        let text = match std::fs::read(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HgMarks {
                    path: path.to_owned(),
                    version: CURRENT_VERSION,
                    last_mark: 0,
                    revisions_to_marks: BTreeMap::new(),
                    marks_to_revisions: HashMap::new(),
                    tips: BTreeMap::new(),
                    notes_mark: None,
                });
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let loaded: SerdeMarks = serde_json::from_slice(&text).with_context(|| {
            format!(
                "Malformed marks file {}; set {} and rerun to debug",
                path.display(),
                crate::log::DEBUG_ENV_VAR
            )
        })?;
        if loaded.marks_version > CURRENT_VERSION {
            bail!(
                "Marks file {} has version {} from a newer helper",
                path.display(),
                loaded.marks_version
            );
        }
        let mut marks_to_revisions = HashMap::new();
        let mut max_mark = loaded.notes_mark.unwrap_or(0);
        for (revision, &mark) in &loaded.revisions_to_marks {
            if marks_to_revisions.insert(mark, revision.clone()).is_some() {
                bail!("Mark :{mark} is mapped twice in {}", path.display());
            }
            max_mark = max_mark.max(mark);
        }
        if loaded.last_mark < max_mark {
            bail!(
                "Marks file {} is inconsistent: last-mark {} below recorded mark {max_mark}",
                path.display(),
                loaded.last_mark
            );
        }
        Ok(HgMarks {
            path: path.to_owned(),
            version: loaded.marks_version,
            last_mark: loaded.last_mark,
            revisions_to_marks: loaded.revisions_to_marks,
            marks_to_revisions,
            tips: loaded.tips,
            notes_mark: loaded.notes_mark,
        })
    }

    pub fn store(&self) -> Result<()> {
        let serde_marks = SerdeMarks {
            tips: self.tips.clone(),
            revisions_to_marks: self.revisions_to_marks.clone(),
            last_mark: self.last_mark,
            notes_mark: self.notes_mark,
            marks_version: self.version,
        };
        let tmp_path = self.path.with_extension("tmp");
        let mut writer = std::io::BufWriter::new(
            std::fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?,
        );
        serde_json::to_writer(&mut writer, &serde_marks).context("Failed to serialize marks")?;
        writer.flush()?;
        drop(writer);
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Discards in-memory state in favor of the last stored checkpoint.
    pub fn reload(&mut self) -> Result<()> {
        *self = Self::load(&self.path)?;
        Ok(())
    }

    /// Converts legacy stores to the current schema. Version 1 mapped marks
    /// to integer revision numbers, which only the changelog can resolve to
    /// nodes; version 2 keyed `tips` by `<namespace>/<name>` without the
    /// helper prefix. Upgrades are strictly forward.
    pub fn upgrade(&mut self, repo: &dyn LocalRepo, namespace: &GitifyNamespace) -> Result<()> {
        if self.version == 1 {
            log::warn!("Upgrading marks from revision numbers to changeset nodes");
            let mut by_node = BTreeMap::new();
            for (revision, mark) in std::mem::take(&mut self.revisions_to_marks) {
                let rev: RevNumber = revision
                    .parse()
                    .with_context(|| format!("Bad legacy revision key {revision:?}"))?;
                let node = repo.changeset(rev)?.node;
                by_node.insert(node.as_str().to_owned(), mark);
            }
            self.marks_to_revisions = by_node
                .iter()
                .map(|(node, &mark)| (mark, node.clone()))
                .collect();
            self.revisions_to_marks = by_node;
            self.version = 2;
            log::warn!("Upgrade complete");
        }
        if self.version == 2 {
            log::warn!("Upgrading marks tips to full ref keys");
            self.tips = std::mem::take(&mut self.tips)
                .into_iter()
                .map(|(name, rev)| (format!("{}/{name}", namespace.prefix()), rev))
                .collect();
            self.version = 3;
            log::warn!("Upgrade complete");
        }
        Ok(())
    }

    /// Returns the mark for a node, assigning the next free one when the
    /// node has not been seen before. Idempotent per node.
    pub fn get_or_assign_mark(&mut self, node: &HgNode) -> Mark {
        if let Some(&mark) = self.revisions_to_marks.get(node.as_str()) {
            return mark;
        }
        self.last_mark += 1;
        self.record(node, self.last_mark);
        self.last_mark
    }

    /// Records a mark chosen by the Git side (fast-export numbering).
    pub fn new_mark(&mut self, node: &HgNode, mark: Mark) {
        self.record(node, mark);
        self.last_mark = self.last_mark.max(mark);
    }

    fn record(&mut self, node: &HgNode, mark: Mark) {
        self.revisions_to_marks
            .insert(node.as_str().to_owned(), mark);
        self.marks_to_revisions
            .insert(mark, node.as_str().to_owned());
    }

    pub fn is_marked(&self, node: &HgNode) -> bool {
        self.revisions_to_marks.contains_key(node.as_str())
    }

    pub fn node_to_mark(&self, node: &HgNode) -> Option<Mark> {
        self.revisions_to_marks.get(node.as_str()).copied()
    }

    pub fn mark_to_node(&self, mark: Mark) -> Result<HgNode> {
        let hex = self
            .marks_to_revisions
            .get(&mark)
            .with_context(|| format!("Unknown mark :{mark}"))?;
        HgNode::from_hex(hex)
    }

    pub fn notes_mark(&self) -> Option<Mark> {
        self.notes_mark
    }

    /// Assigns a fresh mark for a notes commit and remembers it as the new
    /// high-water line of note-annotated marks.
    pub fn new_notes_mark(&mut self) -> Mark {
        self.last_mark += 1;
        self.notes_mark = Some(self.last_mark);
        self.last_mark
    }

    /// All (mark, node) pairs above the given mark, in mark order. Used to
    /// append Git notes for commits that have none yet.
    pub fn marks_after(&self, mark: Mark) -> Vec<(Mark, HgNode)> {
        self.revisions_to_marks
            .iter()
            .filter(|&(_, &m)| m > mark)
            .filter_map(|(hex, &m)| HgNode::from_hex(hex).ok().map(|node| (m, node)))
            .sorted_by_key(|(m, _)| *m)
            .collect()
    }

    pub fn tip_for(&self, gitify_ref: &str) -> Option<RevNumber> {
        self.tips.get(gitify_ref).copied()
    }

    pub fn set_tip(&mut self, gitify_ref: &str, rev: RevNumber) {
        self.tips.insert(gitify_ref.to_owned(), rev);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The mark file written by git-fast-import/fast-export: `:<mark> <sha>`
/// lines owned by the Git side. The helper reads it for ref advertisement
/// hints and rewrites it exactly once, when rolling back a failed export.
pub struct GitMarks {
    path: PathBuf,
    marks_to_shas: HashMap<Mark, String>,
}

impl GitMarks {
    pub fn load(path: &Path) -> Result<GitMarks> {
        let mut marks_to_shas = HashMap::new();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                for line in text.lines() {
                    let (mark, sha) = parse_git_marks_line(line)?;
                    marks_to_shas.insert(mark, sha.to_owned());
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        }
        Ok(GitMarks {
            path: path.to_owned(),
            marks_to_shas,
        })
    }

    pub fn file_exists(&self) -> bool {
        self.path.exists()
    }

    pub fn has_mark(&self, mark: Mark) -> bool {
        self.marks_to_shas.contains_key(&mark)
    }

    pub fn mark_to_sha(&self, mark: Mark) -> Option<&str> {
        self.marks_to_shas.get(&mark).map(String::as_str)
    }

    /// Rewrites the file without the lines for `processed` marks. Reads the
    /// file fresh: fast-export appends to it after the helper loaded its
    /// copy, and only the on-disk content counts.
    pub fn rewrite_without(&self, processed: &HashSet<Mark>) -> Result<()> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut kept = String::with_capacity(text.len());
        for line in text.lines() {
            let (mark, _) = parse_git_marks_line(line)?;
            if !processed.contains(&mark) {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        std::fs::write(&self.path, kept)
            .with_context(|| format!("Failed to rewrite {}", self.path.display()))?;
        Ok(())
    }
}

fn parse_git_marks_line(line: &str) -> Result<(Mark, &str)> {
    let invalid = || format!("Invalid line in marks-git: {line:?}");
    let rest = line.strip_prefix(':').with_context(invalid)?;
    let (mark, sha) = rest.split_once(' ').with_context(invalid)?;
    let mark: Mark = mark.parse().with_context(invalid)?;
    Ok((mark, sha))
}
