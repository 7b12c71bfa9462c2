//! OpenVault CLI - Command line interface for vault files.
//!
//! This tool creates vault files and works on their contents. Items inside
//! a vault are addressed by slash-separated paths such as `/Docs/notes.txt`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use openvault_common::{ItemType, NodeId, VaultPath};
use openvault_crypto::{Compression, KdfParams};
use openvault_vault::{VaultManager, VaultOperations, VaultOptions, VaultSession, DEFAULT_CHUNK_SIZE};

#[derive(Parser)]
#[command(name = "openvault")]
#[command(about = "OpenVault - Encrypted single-file vaults")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault file.
    Create {
        /// Path of the vault file to create.
        #[arg(short, long)]
        path: PathBuf,

        /// Display name of the vault.
        #[arg(short, long)]
        name: String,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "interactive")]
        strength: String,

        /// Chunk size in bytes (power of two, 4096 to 65536).
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,

        /// Content compression: "zstd" or "none".
        #[arg(long, default_value = "zstd")]
        compression: String,

        /// Treat names differing only in case as the same name.
        #[arg(long)]
        case_insensitive: bool,
    },

    /// List a folder.
    Ls {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Folder within the vault.
        #[arg(default_value = "/")]
        dir: String,
    },

    /// Create a folder.
    Mkdir {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Folder path to create; its parent must exist.
        dir: String,
    },

    /// Copy a local file into a vault folder.
    Put {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Local file to import.
        source: PathBuf,

        /// Destination folder within the vault.
        #[arg(default_value = "/")]
        dest: String,
    },

    /// Extract a file from the vault.
    Get {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// File path within the vault.
        source: String,

        /// Local destination file.
        dest: PathBuf,
    },

    /// Rename a file or folder. Files keep their extension.
    Rename {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Item path within the vault.
        item: String,

        /// New name.
        new_name: String,
    },

    /// Remove a file, or a folder with everything in it.
    Rm {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Item path within the vault.
        item: String,
    },

    /// Show vault information.
    Info {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,

        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the vault file without unused chunks.
    Compact {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Create {
            path,
            name,
            strength,
            chunk_size,
            compression,
            case_insensitive,
        } => {
            let options = build_options(&strength, chunk_size, &compression, case_insensitive)?;
            cmd_create(&path, &name, options).await
        }

        Commands::Ls { vault_path, dir } => cmd_ls(&vault_path, &dir).await,

        Commands::Mkdir { vault_path, dir } => cmd_mkdir(&vault_path, &dir).await,

        Commands::Put {
            vault_path,
            source,
            dest,
        } => cmd_put(&vault_path, &source, &dest).await,

        Commands::Get {
            vault_path,
            source,
            dest,
        } => cmd_get(&vault_path, &source, &dest).await,

        Commands::Rename {
            vault_path,
            item,
            new_name,
        } => cmd_rename(&vault_path, &item, &new_name).await,

        Commands::Rm { vault_path, item } => cmd_rm(&vault_path, &item).await,

        Commands::Info { path, json } => cmd_info(&path, json).await,

        Commands::Compact { path } => cmd_compact(&path).await,
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn build_options(
    strength: &str,
    chunk_size: u32,
    compression: &str,
    case_insensitive: bool,
) -> Result<VaultOptions> {
    let kdf = match strength {
        "interactive" | "moderate" | "sensitive" => KdfParams::preset(strength),
        _ => None,
    }
    .context("Invalid strength. Use: interactive, moderate, or sensitive")?;

    let compression: Compression = compression.parse().context("Invalid compression")?;

    let options = VaultOptions {
        chunk_size,
        kdf,
        compression,
        case_sensitive: !case_insensitive,
    };
    options.validate().context("Invalid vault options")?;
    Ok(options)
}

async fn open(vault_path: &Path) -> Result<VaultSession> {
    let password = prompt_password("Enter password: ")?;
    VaultManager::new()
        .open_vault(vault_path, &password)
        .await
        .context("Failed to open vault")
}

fn parse_path(path: &str) -> Result<VaultPath> {
    VaultPath::parse(path).with_context(|| format!("Invalid vault path: {}", path))
}

/// Create a new vault.
async fn cmd_create(path: &Path, name: &str, options: VaultOptions) -> Result<()> {
    info!("Creating new vault: {}", name);

    let password = prompt_password("Enter password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let session = VaultManager::new()
        .create_vault(path, name, &password, options)
        .await
        .context("Failed to create vault")?;
    session.lock().await;

    println!("Vault created successfully!");
    println!("  Name: {}", name);
    println!("  Location: {}", path.display());

    Ok(())
}

/// List folder contents.
async fn cmd_ls(vault_path: &Path, dir: &str) -> Result<()> {
    let session = open(vault_path).await?;
    let ops = VaultOperations::new(&session);

    let folder = ops
        .resolve(&parse_path(dir)?)
        .await
        .context("Folder not found")?;
    let listing = ops.browse(folder).await.context("Failed to list folder")?;

    if listing.folders.is_empty() && listing.files.is_empty() {
        println!("Folder is empty.");
    } else {
        println!("Contents of {}:", dir);
        for folder in &listing.folders {
            println!("  [DIR]  {}/ ({} items)", folder.name, folder.item_count);
        }
        for file in &listing.files {
            if file.extension.is_empty() {
                println!("  [FILE] {} ({} bytes)", file.name, file.size);
            } else {
                println!("  [FILE] {}.{} ({} bytes)", file.name, file.extension, file.size);
            }
        }
    }

    Ok(())
}

/// Create a folder.
async fn cmd_mkdir(vault_path: &Path, dir: &str) -> Result<()> {
    info!("Creating folder: {}", dir);

    let path = parse_path(dir)?;
    let (parent, name) = match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => (parent, name.to_string()),
        _ => anyhow::bail!("The root folder already exists"),
    };

    let session = open(vault_path).await?;
    let ops = VaultOperations::new(&session);
    let parent_id = ops
        .resolve(&parent)
        .await
        .context("Parent folder not found")?;

    ops.create_folder(parent_id, &name)
        .await
        .context("Failed to create folder")?;

    println!("Folder created: {}", dir);

    Ok(())
}

/// Import a local file.
async fn cmd_put(vault_path: &Path, source: &Path, dest: &str) -> Result<()> {
    info!("Adding {} to vault folder {}", source.display(), dest);

    let session = open(vault_path).await?;
    let ops = VaultOperations::new(&session);
    let folder = ops
        .resolve(&parse_path(dest)?)
        .await
        .context("Destination folder not found")?;

    let id = ops
        .upload(folder, source)
        .await
        .context("Failed to add file")?;
    let path = session
        .read(move |index| index.path_of(id))
        .await
        .context("Failed to locate added file")?;

    println!("File added: {}", path);

    Ok(())
}

/// Extract a file.
async fn cmd_get(vault_path: &Path, source: &str, dest: &Path) -> Result<()> {
    info!("Extracting {} from vault to {}", source, dest.display());

    let session = open(vault_path).await?;
    let ops = VaultOperations::new(&session);
    let id = ops
        .resolve(&parse_path(source)?)
        .await
        .context("File not found")?;

    let content = ops
        .read_file(id)
        .await
        .context("Failed to read file from vault")?
        .with_context(|| format!("{} is not a file", source))?;

    tokio::fs::write(dest, &content)
        .await
        .context("Failed to write output file")?;

    println!(
        "File extracted successfully: {} ({} bytes)",
        dest.display(),
        content.len()
    );

    Ok(())
}

async fn resolve_item(ops: &VaultOperations<'_>, item: &str) -> Result<(NodeId, ItemType)> {
    let id = ops
        .resolve(&parse_path(item)?)
        .await
        .context("Item not found")?;
    if id.is_root() {
        anyhow::bail!("The root folder cannot be changed");
    }
    let item_type = ops.item_type(id).await?;
    Ok((id, item_type))
}

/// Rename an item.
async fn cmd_rename(vault_path: &Path, item: &str, new_name: &str) -> Result<()> {
    let session = open(vault_path).await?;
    let ops = VaultOperations::new(&session);
    let (id, item_type) = resolve_item(&ops, item).await?;

    ops.rename(id, item_type, new_name)
        .await
        .context("Failed to rename")?;

    println!("Renamed {} {} to {}", item_type, item, new_name);

    Ok(())
}

/// Remove an item.
async fn cmd_rm(vault_path: &Path, item: &str) -> Result<()> {
    info!("Removing: {}", item);

    let session = open(vault_path).await?;
    let ops = VaultOperations::new(&session);
    let (id, item_type) = resolve_item(&ops, item).await?;

    ops.delete(id, item_type)
        .await
        .context("Failed to remove")?;

    println!("Removed {}: {}", item_type, item);

    Ok(())
}

/// Show vault information.
async fn cmd_info(path: &Path, json: bool) -> Result<()> {
    let session = open(path).await?;
    let (meta, header, stats) = session
        .read(|index| {
            Ok((
                index.meta().clone(),
                index.store().header().clone(),
                index.stats()?,
            ))
        })
        .await
        .context("Failed to read vault information")?;

    if json {
        let info = serde_json::json!({
            "name": meta.name,
            "createdAt": meta.created_at,
            "formatVersion": header.version,
            "chunkSize": header.chunk_size,
            "compression": header.compression.as_str(),
            "caseSensitive": header.case_sensitive,
            "kdf": header.kdf,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Vault Information:");
    println!("  Name: {}", meta.name);
    println!("  Created: {}", meta.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Format version: {}", header.version);
    println!("  Chunk size: {} bytes", header.chunk_size);
    println!("  Compression: {}", header.compression);
    println!("  Case-sensitive names: {}", header.case_sensitive);
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", header.kdf.memory_cost);
    println!("    Time: {} iterations", header.kdf.time_cost);
    println!("    Parallelism: {}", header.kdf.parallelism);
    println!("  Contents:");
    println!("    Folders: {}", stats.folders);
    println!("    Files: {} ({} bytes, {} stored)", stats.files, stats.total_bytes, stats.stored_bytes);
    println!("  Storage:");
    println!("    Generation: {}", stats.store.generation);
    println!("    Chunks: {} ({} free)", stats.store.chunk_count, stats.store.free_chunks);
    println!("    File size: {} bytes", stats.store.file_size);

    Ok(())
}

/// Compact a vault file.
async fn cmd_compact(path: &Path) -> Result<()> {
    info!("Compacting vault: {}", path.display());

    let password = prompt_password("Enter password: ")?;
    let report = VaultManager::new()
        .compact(path, &password)
        .await
        .context("Failed to compact vault")?;

    println!("Vault compacted!");
    println!("  Chunks: {} -> {}", report.chunks_before, report.chunks_after);
    println!("  Size: {} -> {} bytes", report.bytes_before, report.bytes_after);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options() {
        let options = build_options("moderate", 4096, "none", true).unwrap();
        assert_eq!(options.kdf, KdfParams::moderate());
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.compression, Compression::None);
        assert!(!options.case_sensitive);
    }

    #[test]
    fn test_build_options_rejects_bad_values() {
        assert!(build_options("minimal", 4096, "zstd", false).is_err());
        assert!(build_options("moderate", 3000, "zstd", false).is_err());
        assert!(build_options("moderate", 4096, "lz4", false).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["openvault", "ls", "-p", "v.ov", "/Docs"]).unwrap();
        match cli.command {
            Commands::Ls { vault_path, dir } => {
                assert_eq!(vault_path, PathBuf::from("v.ov"));
                assert_eq!(dir, "/Docs");
            }
            _ => panic!("expected ls"),
        }
    }
}
