use clap::Parser;

const ABOUT: &str = "Git remote helper for Mercurial repositories.

Not usually run by hand: git invokes it for remotes whose URL has the form
hg::<path-or-url>, translating between the two version control systems.\
";

#[derive(Parser, Debug)]
#[command(about = ABOUT, version, disable_version_flag = true)]
pub struct Cli {
    /// The remote alias git assigned to this remote.
    pub alias: String,

    /// URL or path of the upstream Mercurial repository.
    pub url: String,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::parse_from(["git-remote-hg", "origin", "http://hg.example.com/repo"]);
        assert_eq!(cli.alias, "origin");
        assert_eq!(cli.url, "http://hg.example.com/repo");
    }

    #[test]
    fn test_missing_arguments_fail() {
        assert!(Cli::try_parse_from(["git-remote-hg"]).is_err());
        assert!(Cli::try_parse_from(["git-remote-hg", "origin"]).is_err());
    }
}
