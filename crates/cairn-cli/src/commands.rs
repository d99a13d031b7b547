use std::path::Path;

use anyhow::Context;
use cairn_crypto::{HashAlgorithm, StreamingHash};
use cairn_ingest::{IngestPipeline, IngestReceipt, UploadMetadata};
use cairn_server::{open_pipeline, Backend, CairnServer, ServerConfig};
use cairn_store::StoredObject;
use cairn_types::ObjectHash;
use colored::Colorize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args).await,
        Command::Hash(args) => cmd_hash(&config, args, format).await,
        Command::Put(args) => {
            let pipeline = open_pipeline(&config).await?;
            let receipt = put_file(&pipeline, &args).await?;
            print_receipt(&receipt, format);
            Ok(())
        }
        Command::Get(args) => cmd_get(&open_pipeline(&config).await?, args, format).await,
        Command::Children(args) => {
            let pipeline = open_pipeline(&config).await?;
            let children = list_children(&pipeline, &args.hash).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&children)?),
                OutputFormat::Text if children.is_empty() => println!("No children."),
                OutputFormat::Text => {
                    for child in children {
                        println!("{}", child.to_string().yellow());
                    }
                }
            }
            Ok(())
        }
        Command::Link(args) => {
            let pipeline = open_pipeline(&config).await?;
            let parent = parse_hash(&args.parent)?;
            let child = parse_hash(&args.child)?;
            let linked = pipeline.link(&parent, &child).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", json!({ "parent": parent, "child": child, "linked": linked }))
                }
                OutputFormat::Text if linked => println!(
                    "{} Linked {} → {}",
                    "✓".green().bold(),
                    parent.short_hex().yellow(),
                    child.short_hex().yellow()
                ),
                OutputFormat::Text => println!("Already linked."),
            }
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn parse_hash(raw: &str) -> anyhow::Result<ObjectHash> {
    ObjectHash::from_hex(raw).with_context(|| format!("invalid object hash {raw:?}"))
}

async fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if args.memory {
        config.backend = Backend::Memory;
    }
    if let Some(max) = args.max_object_size {
        config.ingest.max_object_size = max;
    }
    tracing::debug!(?config, "resolved server configuration");
    let server = CairnServer::open(config).await?;
    println!(
        "Cairn server on {} ({})",
        server.config().bind_addr.to_string().bold(),
        match server.config().backend {
            Backend::Memory => "memory".to_string(),
            Backend::Filesystem => server.config().data_dir.display().to_string(),
        }
    );
    server.serve().await?;
    Ok(())
}

/// Digest and length of a file, read in chunks.
async fn digest_file(path: &Path, algorithm: HashAlgorithm) -> anyhow::Result<(ObjectHash, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut hasher = StreamingHash::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let length = hasher.bytes_hashed();
    Ok((hasher.finalize(), length))
}

async fn cmd_hash(config: &ServerConfig, args: HashArgs, format: OutputFormat) -> anyhow::Result<()> {
    let algorithm = args.algorithm.unwrap_or(config.ingest.digest_algorithm);
    let (hash, length) = digest_file(&args.path, algorithm).await?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "hash": hash, "length": length, "algorithm": algorithm })
        ),
        OutputFormat::Text => println!("{}  {}", hash, args.path.display()),
    }
    Ok(())
}

async fn put_file(pipeline: &IngestPipeline, args: &PutArgs) -> anyhow::Result<IngestReceipt> {
    let (hash, length) = digest_file(&args.path, pipeline.config().digest_algorithm).await?;
    let mut metadata = UploadMetadata::new(hash.to_hex(), length, args.object_type.clone());
    if let Some(parent) = &args.parent {
        metadata = metadata.with_parent(parent.clone());
    }
    if let Some(extra) = &args.metadata {
        metadata = metadata.with_metadata(extra.clone());
    }
    let file = tokio::fs::File::open(&args.path).await?;
    let receipt = pipeline.ingest(metadata, ReaderStream::new(file)).await?;
    Ok(receipt)
}

fn print_receipt(receipt: &IngestReceipt, format: OutputFormat) {
    let object = &receipt.object;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "hash": object.hash,
                "length": object.length,
                "type": object.object_type,
                "deduplicated": receipt.deduplicated,
                "parent": receipt.linked_parent,
                "link_error": receipt.link_error,
            })
        ),
        OutputFormat::Text => {
            let verb = if receipt.deduplicated { "Already stored" } else { "Stored" };
            println!("{} {} {}", "✓".green().bold(), verb, object.hash.to_string().yellow());
            println!("  Type: {}", object.object_type.cyan());
            println!("  Length: {} bytes", object.length);
            if let Some(parent) = receipt.linked_parent {
                println!("  Parent: {}", parent.to_string().yellow());
            }
            if let Some(err) = &receipt.link_error {
                println!("  {} link failed: {}", "!".red().bold(), err);
            }
        }
    }
}

async fn cmd_get(pipeline: &IngestPipeline, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let object = fetch_object(pipeline, &args.hash, args.output.as_deref()).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&object)?),
        OutputFormat::Text => {
            println!("Object {}", object.hash.to_string().yellow().bold());
            println!("  Type: {}", object.object_type.cyan());
            println!("  Length: {} bytes", object.length);
            if let Some(meta) = &object.metadata {
                println!("  Metadata: {meta}");
            }
            if let Some(path) = &args.output {
                println!("  Written to {}", path.display());
            }
        }
    }
    Ok(())
}

async fn fetch_object(
    pipeline: &IngestPipeline,
    raw_hash: &str,
    output: Option<&Path>,
) -> anyhow::Result<StoredObject> {
    let hash = parse_hash(raw_hash)?;
    let object = pipeline.get(&hash).await?;
    if let Some(path) = output {
        let bytes = pipeline.read_content(&hash).await?;
        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(object)
}

async fn list_children(pipeline: &IngestPipeline, raw_hash: &str) -> anyhow::Result<Vec<ObjectHash>> {
    let hash = parse_hash(raw_hash)?;
    Ok(pipeline.children(&hash).await?.collect())
}
