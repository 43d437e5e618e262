use tracing::{info, instrument, warn};
use url::Url;

use crate::domain::ports::download_service::{RemoteInfo, RangeTransport};

/// Learn the size of ``url`` and whether it can be fetched by byte range.
///
/// Never fails: a network error or a missing size is reported as
/// "unknown size, ranges unsupported" so the caller falls back to a single stream.
#[instrument(name = "inspect_capabilities", skip(transport), fields(url = url.as_str()))]
pub async fn inspect_capabilities(transport: &dyn RangeTransport, url: &Url) -> RemoteInfo {
    match transport.inspect(url).await {
        Ok(RemoteInfo { total_size: Some(size), supports_ranges }) => {
            info!(size, supports_ranges, "Inspected download capabilities.");
            RemoteInfo::new(Some(size), supports_ranges)
        }
        Ok(_) => {
            warn!("No usable Content-Length, falling back to a single stream.");
            RemoteInfo::unknown()
        }
        Err(err) => {
            warn!(error = %err, "Metadata request failed, falling back to a single stream.");
            RemoteInfo::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::MemoryTransport;

    fn url() -> Url {
        Url::parse("https://cdn.example.com/setup.exe").unwrap()
    }

    #[tokio::test]
    async fn test_inspect_reports_size_and_ranges() {
        let transport = MemoryTransport::new(vec![7u8; 4096]);
        let remote = inspect_capabilities(&transport, &url()).await;
        assert_eq!(remote, RemoteInfo::new(Some(4096), true));
    }

    #[tokio::test]
    async fn test_inspect_without_size_disables_ranges() {
        let transport = MemoryTransport::new(vec![7u8; 4096]).hide_size();
        let remote = inspect_capabilities(&transport, &url()).await;
        assert_eq!(remote, RemoteInfo::unknown());
    }

    #[tokio::test]
    async fn test_inspect_failure_is_not_fatal() {
        let transport = MemoryTransport::new(vec![7u8; 4096]).fail_inspect();
        let remote = inspect_capabilities(&transport, &url()).await;
        assert_eq!(remote, RemoteInfo::unknown());
    }
}
