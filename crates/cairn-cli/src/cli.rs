use std::net::SocketAddr;
use std::path::PathBuf;

use cairn_crypto::HashAlgorithm;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cairn",
    about = "Cairn: content-addressed object store with verified ingestion",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides the configuration file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Print the digest of a file
    Hash(HashArgs),
    /// Store a file as an object
    Put(PutArgs),
    /// Show a stored object, or write its content to a file
    Get(GetArgs),
    /// List the children of a stored object
    Children(ChildrenArgs),
    /// Link two stored objects as parent and child
    Link(LinkArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Keep everything in memory
    #[arg(long)]
    pub memory: bool,
    #[arg(long)]
    pub max_object_size: Option<u64>,
}

#[derive(Args)]
pub struct HashArgs {
    pub path: PathBuf,
    #[arg(long)]
    pub algorithm: Option<HashAlgorithm>,
}

#[derive(Args)]
pub struct PutArgs {
    pub path: PathBuf,
    #[arg(short = 't', long = "type", default_value = "blob")]
    pub object_type: String,
    /// Link the new object under this parent
    #[arg(long)]
    pub parent: Option<String>,
    /// Opaque metadata string stored with the object
    #[arg(long)]
    pub metadata: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub hash: String,
    /// Write the object's content here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ChildrenArgs {
    pub hash: String,
}

#[derive(Args)]
pub struct LinkArgs {
    pub parent: String,
    pub child: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["cairn", "serve", "--bind", "0.0.0.0:9000", "--memory"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.bind, Some("0.0.0.0:9000".parse().unwrap()));
            assert!(args.memory);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from(["cairn", "put", "a.txt", "-t", "tree", "--parent", "ab"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.path, PathBuf::from("a.txt"));
            assert_eq!(args.object_type, "tree");
            assert_eq!(args.parent.as_deref(), Some("ab"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_put_default_type() {
        let cli = Cli::try_parse_from(["cairn", "put", "a.txt"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.object_type, "blob");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_hash_algorithm() {
        let cli = Cli::try_parse_from(["cairn", "hash", "f", "--algorithm", "blake3"]).unwrap();
        if let Command::Hash(args) = cli.command {
            assert_eq!(args.algorithm, Some(HashAlgorithm::Blake3));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn global_flags() {
        let cli = Cli::try_parse_from([
            "cairn", "children", "ab", "--data-dir", "/srv/cairn", "--format", "json", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/srv/cairn")));
    }

    #[test]
    fn parse_link() {
        let cli = Cli::try_parse_from(["cairn", "link", "aa", "bb"]).unwrap();
        assert!(matches!(cli.command, Command::Link(LinkArgs { ref parent, ref child }) if parent == "aa" && child == "bb"));
    }
}
