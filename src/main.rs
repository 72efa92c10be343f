//! jmt CLI - Command line interface for jmt_db
//!
//! Each invocation opens the store file, performs one operation and exits.
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use jmt_db::{
    replicate, verify_proof, CommitJournal, Config, FileStore, Hash, KvStore, MerkleTrie, Proof,
    Version,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jmt")]
#[command(about = "A versioned, authenticated key-value trie")]
#[command(version)]
struct Cli {
    /// Path to the store file
    #[arg(short, long, default_value = "state.jmt")]
    store: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty store
    Init,

    /// Set a key and commit a new version
    Put {
        /// Version to write the new nodes at
        version: Version,
        /// Root hash to build on, or "empty"
        root: String,
        key: String,
        /// An empty value deletes the key
        value: String,
        /// Save the commit journal to this file
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },

    /// Delete a key and commit a new version
    Delete {
        version: Version,
        root: String,
        key: String,
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },

    /// Read a key under a root
    Get { root: String, key: String },

    /// Print an inclusion proof for a key
    Prove { root: String, key: String },

    /// Check a proof file produced by `prove`
    Verify {
        root: String,
        proof_file: PathBuf,
    },

    /// Copy every node of a root into another store
    Export { root: String, dest: PathBuf },

    /// Delete the nodes a saved journal superseded
    Prune { journal_file: PathBuf },

    /// Rewrite the store file without dead entries
    Compact,
}

/// A proof with hex-encoded bytes, as printed by `prove`
#[derive(Serialize, Deserialize)]
struct ProofDoc {
    key: Option<String>,
    value: Option<String>,
    nodes: Vec<String>,
}

impl From<&Proof> for ProofDoc {
    fn from(proof: &Proof) -> Self {
        ProofDoc {
            key: proof.key.as_ref().map(hex::encode),
            value: proof.value.as_ref().map(hex::encode),
            nodes: proof.nodes.iter().map(hex::encode).collect(),
        }
    }
}

impl ProofDoc {
    fn into_proof(self) -> anyhow::Result<Proof> {
        Ok(Proof {
            key: self.key.map(hex::decode).transpose()?,
            value: self.value.map(hex::decode).transpose()?,
            nodes: self
                .nodes
                .iter()
                .map(hex::decode)
                .collect::<Result<_, _>>()?,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.store)?;

    match cli.command {
        Commands::Init => {
            let store = FileStore::create(&cli.store)?;
            store.sync()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Created store at {}", cli.store.display()),
                    "root": Hash::PLACEHOLDER.to_hex()
                }),
            );
        }

        Commands::Put {
            version,
            root,
            key,
            value,
            journal,
        } => {
            let store = open_store(&cli.store, &config)?;
            let trie = open_trie(store, &root, &config)?;
            let result = write(trie, version, &key, &value, journal.as_deref())?;
            output(&cli.format, &result);
        }

        Commands::Delete {
            version,
            root,
            key,
            journal,
        } => {
            let store = open_store(&cli.store, &config)?;
            let trie = open_trie(store, &root, &config)?;
            let result = write(trie, version, &key, "", journal.as_deref())?;
            output(&cli.format, &result);
        }

        Commands::Get { root, key } => {
            let store = open_store(&cli.store, &config)?;
            let trie = open_trie(store, &root, &config)?;
            match trie.get(key.as_bytes())? {
                Some(value) => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "key": key,
                            "value": String::from_utf8_lossy(&value)
                        }),
                    );
                }
                None => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    );
                    std::process::exit(1);
                }
            }
        }

        Commands::Prove { root, key } => {
            let store = open_store(&cli.store, &config)?;
            let trie = open_trie(store, &root, &config)?;
            let proof = trie.prove(key.as_bytes())?;
            let mut value = serde_json::to_value(ProofDoc::from(&proof))?;
            value["root"] = serde_json::json!(trie.root_hash()?.to_hex());
            value["conclusive"] = serde_json::json!(proof.is_conclusive());
            output(&cli.format, &value);
        }

        Commands::Verify { root, proof_file } => {
            let root = parse_root(&root)?;
            let content = std::fs::read_to_string(&proof_file)
                .with_context(|| format!("reading {}", proof_file.display()))?;
            let proof = serde_json::from_str::<ProofDoc>(&content)?.into_proof()?;
            let verified = verify_proof(&root, Some(&proof))?;
            output(
                &cli.format,
                &serde_json::json!({
                    "root": root.to_hex(),
                    "verified": verified
                }),
            );
            if !verified {
                std::process::exit(1);
            }
        }

        Commands::Export { root, dest } => {
            let root = parse_root(&root)?;
            let source = open_store(&cli.store, &config)?;
            let dest_store = FileStore::open_or_create(&dest)?.with_sync_writes(config.sync_writes);
            let nodes = replicate(source, root, &dest_store, config.iter_options())?;
            dest_store.sync()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": root.to_hex(),
                    "nodes": nodes,
                    "dest": dest.display().to_string()
                }),
            );
        }

        Commands::Prune { journal_file } => {
            let store = open_store(&cli.store, &config)?;
            let content = std::fs::read_to_string(&journal_file)
                .with_context(|| format!("reading {}", journal_file.display()))?;
            let journal: CommitJournal = serde_json::from_str(&content)?;
            let pruned = journal.apply_prune(store.as_ref())?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": journal.root_hash().to_hex(),
                    "pruned": pruned
                }),
            );
        }

        Commands::Compact => {
            let store = FileStore::open(&cli.store)?;
            let before = std::fs::metadata(&cli.store)?.len();
            store.compact()?;
            let after = std::fs::metadata(&cli.store)?.len();
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "entries": store.len(),
                    "bytes_before": before,
                    "bytes_after": after
                }),
            );
        }
    }

    Ok(())
}

fn open_store(path: &Path, config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    let store = FileStore::open_or_create(path)?.with_sync_writes(config.sync_writes);
    Ok(Arc::new(store))
}

fn open_trie(store: Arc<dyn KvStore>, root: &str, config: &Config) -> anyhow::Result<MerkleTrie> {
    let root = parse_root(root)?;
    let mut trie = if root.is_placeholder() {
        MerkleTrie::new(store).with_prefix(config.tree_prefix_bytes()?)?
    } else {
        MerkleTrie::load(store, root)?
    };
    if let Some(cache) = config.node_cache() {
        trie = trie.with_node_cache(cache);
    }
    Ok(trie)
}

/// Apply one update, commit and describe the result
fn write(
    mut trie: MerkleTrie,
    version: Version,
    key: &str,
    value: &str,
    journal_path: Option<&Path>,
) -> anyhow::Result<serde_json::Value> {
    trie.update(version, key.as_bytes(), value.as_bytes())?;
    let pending = trie.pending();
    let (root, journal) = trie.commit_with_journal()?;

    if let Some(path) = journal_path {
        std::fs::write(path, serde_json::to_string_pretty(&journal)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(serde_json::json!({
        "status": "ok",
        "root": root.to_hex(),
        "version": version,
        "dirty": pending.dirty,
        "prune": pending.prune
    }))
}

fn parse_root(root: &str) -> anyhow::Result<Hash> {
    if root == "empty" {
        return Ok(Hash::PLACEHOLDER);
    }
    Hash::from_hex(root).map_err(|_| anyhow::anyhow!("Invalid root hash: {}", root))
}

fn output(format: &OutputFormat, value: &serde_json::Value) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value).unwrap());
        }
        OutputFormat::Text => {
            println!("{}", serde_json::to_string_pretty(value).unwrap());
        }
    }
}
