use anyhow::Result;
use anyhow::bail;

/// The escape for space characters, which Mercurial allows in branch,
/// bookmark and tag names but Git does not. Hand-written names are assumed
/// to never contain the sequence itself.
const SPACE_ESCAPE: &str = "___";

/// The three Mercurial namespaces a Git ref can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    Branch,
    Bookmark,
    Tag,
}

impl RefType {
    pub const ALL: [RefType; 3] = [RefType::Branch, RefType::Bookmark, RefType::Tag];
}

/// Replaces spaces for the Git side of the mapping.
pub fn hg_to_git_spaces(name: &str) -> String {
    if name.contains(SPACE_ESCAPE) {
        log::warn!("Name {name:?} contains the escape sequence {SPACE_ESCAPE:?}, translation will not round-trip");
    }
    name.replace(' ', SPACE_ESCAPE)
}

/// Restores spaces when going back to Mercurial.
pub fn git_to_hg_spaces(name: &str) -> String {
    name.replace(SPACE_ESCAPE, " ")
}

/// Classifies a Git ref into a Mercurial name and namespace.
///
/// `refs/heads/master` is the Git alias of the Mercurial `default` branch.
/// All other `refs/heads/<name>` refs outside the `branches/` prefix are
/// bookmarks; this includes refs Git creates for bookmarks that do not
/// exist yet on the Mercurial side.
pub fn ref_to_name_reftype(git_ref: &str) -> Result<(String, RefType)> {
    if git_ref == "refs/heads/master" {
        return Ok(("default".to_owned(), RefType::Branch));
    }
    if let Some(name) = git_ref.strip_prefix("refs/heads/branches/") {
        return Ok((name.to_owned(), RefType::Branch));
    }
    if let Some(name) = git_ref.strip_prefix("refs/heads/") {
        return Ok((name.to_owned(), RefType::Bookmark));
    }
    if let Some(name) = git_ref.strip_prefix("refs/tags/") {
        return Ok((name.to_owned(), RefType::Tag));
    }
    bail!("Unexpected ref namespace: {git_ref}");
}

/// The inverse of [`ref_to_name_reftype`].
pub fn name_reftype_to_ref(name: &str, reftype: RefType) -> String {
    match reftype {
        RefType::Branch => {
            if name == "default" {
                "refs/heads/master".to_owned()
            } else {
                format!("refs/heads/branches/{name}")
            }
        }
        RefType::Bookmark => format!("refs/heads/{name}"),
        RefType::Tag => format!("refs/tags/{name}"),
    }
}

/// The helper-private `refs/hg/<alias>/…` namespace used as fast-import
/// destination, so the Git side keeps a mirror that cannot collide with
/// the user's own refs.
#[derive(Debug, Clone)]
pub struct GitifyNamespace {
    prefix: String,
}

impl GitifyNamespace {
    pub fn new(alias: &str) -> Self {
        GitifyNamespace {
            prefix: format!("refs/hg/{alias}"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The mirror ref for a logical (name, reftype) pair.
    ///
    /// The `default` branch lands under `bookmarks/master`: it aliases
    /// `master` on the Git side and the two must resolve to one mirror ref.
    pub fn gitify_ref(&self, name: &str, reftype: RefType) -> String {
        match reftype {
            RefType::Branch if name == "default" => format!("{}/bookmarks/master", self.prefix),
            RefType::Branch => format!("{}/branches/{name}", self.prefix),
            RefType::Bookmark => format!("{}/bookmarks/{name}", self.prefix),
            RefType::Tag => format!("{}/tags/{name}", self.prefix),
        }
    }
}
