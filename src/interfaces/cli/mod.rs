use clap::{Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

use crate::domain::models::{DownloadItem, FileSpec, ItemId};
use crate::domain::services::infer_name::infer_file_name;
use crate::infra::config::{EngineConfig, HttpConfig};

/// Resumable, parallel downloader for game installers.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Root directory downloads are stored under.
    #[arg(short, long, global = true, env = "VAULTDL_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
    /// Byte ranges a large file is split into.
    #[arg(short = 'n', long, global = true)]
    pub chunks: Option<usize>,
    /// Items downloading at the same time.
    #[arg(short = 'j', long, global = true)]
    pub max_jobs: Option<usize>,
    #[command(flatten)]
    pub http: HttpConfig,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the files of one item, in order.
    Download {
        #[arg(short, long)]
        item: ItemId,
        /// Item title, used as the download directory name.
        #[arg(short, long)]
        title: Option<String>,
        #[arg(value_parser = parse_url, required = true)]
        urls: Vec<Url>,
    },
    /// Continue downloads interrupted by a previous exit.
    Resume,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(chunks) = self.chunks {
            config = config.with_chunk_count(chunks);
        }
        if let Some(max_jobs) = self.max_jobs {
            config = config.with_max_concurrent_jobs(max_jobs);
        }
        config
    }
}

/// Build a batch out of command line urls, files are named after the url path.
pub fn download_item(item_id: ItemId, title: Option<String>, urls: &[Url]) -> DownloadItem {
    let files = urls
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let name = infer_file_name(url).unwrap_or_else(|| format!("file_{index}"));
            FileSpec::new(index.to_string(), name, url.clone())
        })
        .collect();
    DownloadItem::new(item_id, title, files)
}

fn parse_url(url: &str) -> Result<Url, String> {
    let url = if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    Url::parse(&url).map_err(|e| format!("Invalid Url {url} {e}"))
}
