mod cli;

use crate::cli::Cli;
use anyhow::Context as _;
use anyhow::Result;
use clap::Parser as _;
use git_remote_hg::hg::CommandExtension as _;
use git_remote_hg::hg::git_command;
use git_remote_hg::marks::GitMarks;
use git_remote_hg::marks::HgMarks;
use git_remote_hg::protocol::Output;
use git_remote_hg::protocol::RemoteParser;
use git_remote_hg::repo::CliPeer;
use git_remote_hg::repo::CliRepo;
use git_remote_hg::repo::RemotePaths;
use git_remote_hg::session::Session;
use std::path::Path;
use std::path::PathBuf;

fn main() {
    git_remote_hg::log::init();
    let args = Cli::parse();
    log::debug!(
        "git-remote-hg {} for remote {} ({})",
        env!("CARGO_PKG_VERSION"),
        args.alias,
        args.url
    );
    if let Err(err) = run(&args) {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> Result<()> {
    let git_dir: PathBuf = std::env::var_os("GIT_DIR")
        .context("GIT_DIR is not set; this helper must be run by git")?
        .into();
    let url = canonicalize_local_url(&args.alias, &args.url);

    let paths = RemotePaths::new(&git_dir, &url);
    let repo = CliRepo::open_or_clone(&paths, &url)?;
    let peer = CliPeer::new(&paths, &url);
    let marks = HgMarks::load(&paths.marks_hg)?;
    let git_marks = GitMarks::load(&paths.marks_git)?;

    let out = Output::new(std::io::stdout().lock());
    let mut session = Session::new(&args.alias, &url, paths, repo, peer, marks, git_marks, out)?;
    let mut parser = RemoteParser::new(std::io::stdin().lock())?;
    session.run(&mut parser)
}

/// Absolutizes a local repository path and records it back into the git
/// remote configuration, so later runs from other working directories keep
/// finding the same repository (and the same state cache, which is keyed
/// by URL).
fn canonicalize_local_url(alias: &str, url: &str) -> String {
    if url.contains("://") || !Path::new(url).exists() {
        return url.to_owned();
    }
    match std::fs::canonicalize(url) {
        Ok(absolute) => {
            let absolute = absolute.to_string_lossy().into_owned();
            if absolute != url {
                // Best effort; an unusual git setup is not fatal here.
                let _ = git_command()
                    .args([
                        "config",
                        &format!("remote.{alias}.url"),
                        &format!("hg::{absolute}"),
                    ])
                    .capture();
            }
            absolute
        }
        Err(_) => url.to_owned(),
    }
}
