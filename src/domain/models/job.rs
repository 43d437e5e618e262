use chrono::{DateTime, Local};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::chunk::ChunkPlan;

pub type ItemId = u64;

const FALLBACK_FILE_NAME: &str = "installer.exe";

///# ``FileSpec``
/// One file of a downloadable item (installer, patch or extra).
/// * ``file_id`` : Catalog identifier of the file.
/// * ``file_name`` : Name the file is saved under.
/// * ``url`` : Resolved download url.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct FileSpec {
    file_id: String,
    file_name: String,
    url: Url,
}

impl FileSpec {
    pub fn new(file_id: impl Into<String>, file_name: impl Into<String>, url: Url) -> Self {
        Self { file_id: file_id.into(), file_name: file_name.into(), url }
    }
}

/// Ordered set of files belonging to one purchased item.
#[derive(Debug, Clone, Getters)]
pub struct DownloadItem {
    item_id: ItemId,
    title: Option<String>,
    files: Vec<FileSpec>,
}

impl DownloadItem {
    pub fn new(item_id: ItemId, title: Option<String>, files: Vec<FileSpec>) -> Self {
        Self { item_id, title, files }
    }

    /// Directory (relative to the storage root) holding every file of this item.
    /// Titles without a single letter or digit fall back to ``item_<id>``.
    pub fn directory(&self) -> String {
        match self.title.as_deref().filter(|title| title.chars().any(|c| c.is_ascii_alphanumeric())) {
            Some(title) => sanitize_file_name(title),
            None => format!("item_{}", self.item_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Planning,
    Running,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

/// State of a single file download, owned by one batch step at a time.
#[derive(Debug, Getters)]
pub struct DownloadJob {
    item_id: ItemId,
    file: FileSpec,
    /// Container name of the final output, relative to the storage root.
    output: String,
    total_size: Option<u64>,
    plan: Option<ChunkPlan>,
    state: JobState,
    created_at: DateTime<Local>,
}

impl DownloadJob {
    pub fn new(item: &DownloadItem, file: FileSpec) -> Self {
        let output = format!("{}/{}", item.directory(), sanitize_file_name(file.file_name()));
        Self {
            item_id: *item.item_id(),
            file,
            output,
            total_size: None,
            plan: None,
            state: JobState::Planning,
            created_at: Local::now(),
        }
    }

    pub fn part_name(&self, index: usize) -> String {
        format!("{}.part{index}", self.output)
    }

    pub fn manifest_name(&self) -> String {
        format!("{}.manifest", self.output)
    }

    pub fn set_plan(&mut self, plan: ChunkPlan) {
        self.total_size = *plan.total_size();
        self.plan = Some(plan);
    }

    pub fn transition(&mut self, next: JobState) {
        debug!(output = %self.output, from = ?self.state, to = ?next, "Job state change");
        self.state = next;
    }
}

/// Replace characters that are not safe in file names.
///
/// Anything outside ``[A-Za-z0-9._-]`` and whitespace becomes ``_``,
/// whitespace runs become a single ``_`` and repeated ``_`` collapse.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-') {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        sanitized.push(mapped);
    }
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return FALLBACK_FILE_NAME.to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: Option<&str>) -> DownloadItem {
        let url = Url::parse("https://cdn.example.com/setup.exe").unwrap();
        DownloadItem::new(42, title.map(str::to_string), vec![FileSpec::new("1", "setup.exe", url)])
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("setup_game (1.0).exe"), "setup_game_1.0_.exe");
        assert_eq!(sanitize_file_name("a  b\tc"), "a_b_c");
        assert_eq!(sanitize_file_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_file_name(""), "installer.exe");
    }

    #[test]
    fn test_job_container_names() {
        let item = item(Some("The Witcher: Enhanced"));
        let job = DownloadJob::new(&item, item.files()[0].clone());
        assert_eq!(job.output(), "The_Witcher_Enhanced/setup.exe");
        assert_eq!(job.part_name(3), "The_Witcher_Enhanced/setup.exe.part3");
        assert_eq!(job.manifest_name(), "The_Witcher_Enhanced/setup.exe.manifest");
        assert_eq!(*job.state(), JobState::Planning);
    }

    #[test]
    fn test_untitled_item_directory() {
        assert_eq!(item(None).directory(), "item_42");
        assert_eq!(item(Some("")).directory(), "item_42");
        assert_eq!(item(Some("???")).directory(), "item_42");
        assert_eq!(item(Some(" .. ")).directory(), "item_42");
        assert_eq!(item(Some("Doom 2")).directory(), "Doom_2");
    }
}
