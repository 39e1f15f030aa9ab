//! Command-line client for Depot.

mod api_client;

use anyhow::{Context, Result};
use api_client::ApiClient;
use clap::{Args, Parser, Subcommand};
use depot_core::{DEFAULT_SEGMENT_SIZE, SegmentPlan, SessionToken};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const DEFAULT_BULK_EXTENSIONS: &str = ".mp4,.mov,.avi,.mkv,.wmv,.m4v";

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Client for the Depot chunked file store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL
    #[arg(long, env = "DEPOT_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,
}

#[derive(Args, Clone)]
struct UploadArgs {
    /// Segment size in bytes for multi-segment uploads
    #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE)]
    segment_size: u64,

    /// Resume an existing upload session under this token
    #[arg(long)]
    session: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored files
    List {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Upload a single file
    Upload {
        /// File to upload
        file: PathBuf,
        #[command(flatten)]
        upload: UploadArgs,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Download a file by id
    Download {
        /// File id
        id: i64,
        /// Output directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Delete a file by id
    Delete {
        /// File id
        id: i64,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Abort an in-progress upload session, discarding its segments
    Abort {
        /// Session token
        token: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Upload every matching file under a directory
    BulkUpload {
        /// Directory to scan recursively
        dir: PathBuf,
        /// File extensions to include (comma-separated)
        #[arg(long, short, default_value = DEFAULT_BULK_EXTENSIONS)]
        extensions: String,
        #[command(flatten)]
        upload: UploadArgs,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::List { api } => handle_list(&api).await,
        Commands::Upload { file, upload, api } => {
            let client = ApiClient::new(&api.server)?;
            handle_upload(&client, &file, &upload).await.map(|_| ())
        }
        Commands::Download { id, output, api } => handle_download(id, &output, &api).await,
        Commands::Delete { id, api } => handle_delete(id, &api).await,
        Commands::Abort { token, api } => handle_abort(&token, &api).await,
        Commands::BulkUpload {
            dir,
            extensions,
            upload,
            api,
        } => handle_bulk_upload(&dir, &extensions, &upload, &api).await,
        Commands::Health { api } => handle_health(&api).await,
    }
}

async fn handle_list(api: &ApiArgs) -> Result<()> {
    let client = ApiClient::new(&api.server)?;
    let files = client.list_files().await?;

    if files.is_empty() {
        println!("No files stored yet");
        return Ok(());
    }

    println!(
        "{:<8} {:<42} {:>12} {:>8}  {}",
        "ID", "Filename", "Size", "Chunks", "Created"
    );
    let mut total = 0u64;
    for f in &files {
        let name: String = f.filename.chars().take(40).collect();
        println!(
            "{:<8} {:<42} {:>12} {:>8}  {}",
            f.id,
            name,
            human_size(f.size),
            f.chunks,
            &f.created_at[..f.created_at.len().min(10)]
        );
        total += f.size;
    }
    println!("\nTotal: {} files, {}", files.len(), human_size(total));
    Ok(())
}

/// Upload one file and return its id.
///
/// Files that fit in a single segment go through the direct endpoint;
/// anything larger uses the resumable session protocol so an interrupted
/// transfer can be picked up with `--session`.
async fn handle_upload(client: &ApiClient, file: &Path, upload: &UploadArgs) -> Result<i64> {
    let metadata = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("{} is not a regular file", file.display());
    }
    let size = metadata.len();
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("filename is not valid UTF-8")?
        .to_string();

    if size <= upload.segment_size {
        let data = tokio::fs::read(file).await?;
        let response = client.direct_upload(&filename, data).await?;
        if response.deduplicated {
            println!("{filename}: identical content already stored as id {}", response.file_id);
        } else {
            println!("{filename}: uploaded as id {}", response.file_id);
        }
        return Ok(response.file_id);
    }

    let plan = SegmentPlan::new(size, upload.segment_size)?;
    let segments = plan.segment_count();

    let token = match &upload.session {
        Some(token) => SessionToken::parse(token)?,
        None => SessionToken::generate(),
    };

    // Resume: skip segments the server already holds for this token.
    let mut already = HashSet::new();
    if let Some(status) = client.session_status(token.as_str()).await? {
        if status.declared_size != size || status.declared_segments != segments {
            anyhow::bail!(
                "session {token} was started for a different file ({} bytes in {} segments)",
                status.declared_size,
                status.declared_segments
            );
        }
        already.extend(status.received);
        println!(
            "Resuming session {token}: {}/{segments} segments already uploaded",
            already.len()
        );
    }

    let mut source = tokio::fs::File::open(file).await?;
    for span in plan.iter() {
        if already.contains(&span.index) {
            continue;
        }
        let mut data = vec![0u8; span.size as usize];
        source
            .seek(std::io::SeekFrom::Start(span.offset))
            .await?;
        source.read_exact(&mut data).await?;

        let accepted = put_segment_with_retry(
            client,
            token.as_str(),
            span.index,
            &filename,
            size,
            segments,
            data,
        )
        .await?;
        println!(
            "  [{}/{}] segment {} uploaded ({})",
            accepted.received,
            segments,
            span.index,
            human_size(span.size)
        );
    }

    let finalized = client.finalize_session(token.as_str()).await?;
    println!(
        "{filename}: uploaded as id {} ({} in {} chunks)",
        finalized.file_id,
        human_size(finalized.size),
        finalized.chunks
    );
    Ok(finalized.file_id)
}

/// Put one segment, retrying transient failures with exponential backoff.
async fn put_segment_with_retry(
    client: &ApiClient,
    token: &str,
    index: u32,
    filename: &str,
    total_size: u64,
    total_segments: u32,
    data: Vec<u8>,
) -> Result<depot_core::session::AcceptSegmentResponse> {
    const MAX_RETRIES: u32 = 3;
    let mut attempt = 0;

    loop {
        match client
            .put_segment(token, index, filename, total_size, total_segments, data.clone())
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(e);
                }
                let delay = Duration::from_secs(1 << (attempt - 1)); // 1s, 2s, 4s
                eprintln!("  segment {index} failed ({e}), retrying in {}s...", delay.as_secs());
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn handle_download(id: i64, output: &Path, api: &ApiArgs) -> Result<()> {
    let client = ApiClient::new(&api.server)?;

    let filename = client
        .list_files()
        .await?
        .into_iter()
        .find(|f| f.id == id)
        .map(|f| f.filename)
        .unwrap_or_else(|| format!("file-{id}.bin"));

    tokio::fs::create_dir_all(output).await?;
    let dest = output.join(&filename);

    let response = client.download(id).await?;
    let mut file = tokio::fs::File::create(&dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    println!("{}: {} written", dest.display(), human_size(written));
    Ok(())
}

async fn handle_delete(id: i64, api: &ApiArgs) -> Result<()> {
    let client = ApiClient::new(&api.server)?;
    let response = client.delete_file(id).await?;
    println!("Deleted file {}", response.deleted);
    Ok(())
}

async fn handle_abort(token: &str, api: &ApiArgs) -> Result<()> {
    let client = ApiClient::new(&api.server)?;
    let token = SessionToken::parse(token)?;
    client.abort_session(token.as_str()).await?;
    println!("Aborted session {token}");
    Ok(())
}

async fn handle_bulk_upload(
    dir: &Path,
    extensions: &str,
    upload: &UploadArgs,
    api: &ApiArgs,
) -> Result<()> {
    let extensions = parse_extensions(extensions);
    let mut files = collect_matching_files(dir, &extensions)
        .with_context(|| format!("cannot scan {}", dir.display()))?;
    files.sort();

    let total: u64 = files
        .iter()
        .filter_map(|f| f.metadata().ok())
        .map(|m| m.len())
        .sum();
    println!("Found {} files ({})", files.len(), human_size(total));

    let client = ApiClient::new(&api.server)?;
    let count = files.len();
    let mut failures = 0usize;
    for (i, file) in files.iter().enumerate() {
        println!("\n[{}/{count}] {}", i + 1, file.display());
        if let Err(e) = handle_upload(&client, file, upload).await {
            eprintln!("  error: {e}");
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {count} uploads failed");
    }
    println!("\nBulk upload complete");
    Ok(())
}

async fn handle_health(api: &ApiArgs) -> Result<()> {
    let client = ApiClient::new(&api.server)?;
    let health = client.health().await?;
    println!("Server: {}", api.server);
    println!("Status: {}", health.status);
    println!("Backend: {}", health.backend);
    Ok(())
}

/// Normalize a comma-separated extension list to lowercase with leading dots.
fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .collect()
}

/// Recursively collect files whose name ends with one of the extensions
/// (case-insensitive).
fn collect_matching_files(dir: &Path, extensions: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            found.extend(collect_matching_files(&path, extensions)?);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            let lower = name.to_ascii_lowercase();
            if extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
                found.push(path);
            }
        }
    }
    Ok(found)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extensions_normalizes() {
        let exts = parse_extensions(".MP4, mkv ,,.mov");
        assert_eq!(exts, vec![".mp4", ".mkv", ".mov"]);
    }

    #[test]
    fn test_human_size_units() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.00 KiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn test_collect_matching_files_recurses_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("season1");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(nested.join("b.MKV"), b"x").unwrap();
        std::fs::write(nested.join("notes.txt"), b"x").unwrap();

        let exts = parse_extensions(".mp4,.mkv");
        let mut found = collect_matching_files(dir.path(), &exts).unwrap();
        found.sort();

        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.mp4"));
        assert!(found[1].ends_with("season1/b.MKV"));
    }
}
