use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::domain::models::{DownloadEvent, ItemId, ProgressEvent};

const BAR_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}";

/// Renders engine events as one indicatif bar per item.
pub struct CliProgressTracker {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<ItemId, ProgressBar>,
}

impl CliProgressTracker {
    pub fn new() -> Result<Self> {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Result<Self> {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .context("Invalid progress bar template")?
            .progress_chars("##-");
        Ok(Self { multi: MultiProgress::with_draw_target(target), style, bars: HashMap::new() })
    }

    /// Consume events until every sender is gone.
    pub async fn run(mut self, mut rx: UnboundedReceiver<DownloadEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: DownloadEvent) {
        match event {
            DownloadEvent::Progress(progress) => self.progress(&progress),
            DownloadEvent::FileCompleted { item_id, file_index, output, bytes } => {
                info!(item_id, file_index, %output, bytes, "File downloaded.");
                let bar = self.bar(item_id);
                bar.set_length(bytes);
                bar.set_position(bytes);
                bar.set_message(format!("{output} done"));
            }
            DownloadEvent::BatchCompleted { item_id, outputs } => {
                let message = format!("{} file(s) downloaded", outputs.len()).purple();
                self.bar(item_id).finish_with_message(message.to_string());
                self.bars.remove(&item_id);
            }
            DownloadEvent::Failed { item_id, file_index, cause } => {
                let message = format!("file {} failed: {cause}", file_index + 1).red();
                self.bar(item_id).abandon_with_message(message.to_string());
                self.bars.remove(&item_id);
            }
            DownloadEvent::Cancelled { item_id, file_index } => {
                let message = format!("cancelled at file {}", file_index + 1).yellow();
                self.bar(item_id).abandon_with_message(message.to_string());
                self.bars.remove(&item_id);
            }
        }
    }

    fn progress(&mut self, progress: &ProgressEvent) {
        let bar = self.bar(progress.item_id);
        if let Some(total) = progress.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(progress.downloaded_bytes);
        bar.set_message(status_message(progress));
    }

    fn bar(&mut self, item_id: ItemId) -> &ProgressBar {
        self.bars.entry(item_id).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(self.style.clone());
            bar
        })
    }
}

fn status_message(progress: &ProgressEvent) -> String {
    let eta = match progress.eta_secs {
        Some(secs) => HumanDuration(Duration::from_secs(secs)).to_string(),
        None => "unknown".to_string(),
    };
    format!(
        "file {}/{} {:.1}% {}/s eta {eta}",
        progress.file_index + 1,
        progress.total_files,
        progress.percentage(),
        HumanBytes(progress.speed as u64)
    )
}
