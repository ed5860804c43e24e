/// A violation of one of the streams the helper speaks. These abort the
/// session: neither fast-import nor fast-export supports mid-stream
/// recovery.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("unhandled command: {0}")]
    UnhandledCommand(String),

    #[error("octopus merges cannot be represented as Mercurial changesets")]
    OctopusMerge,
}
