use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use bb_core::{Diff, SubscriptionInfo, TransportError};
use bb_sync::DiffFetcher;

use crate::index::UrlFile;

/// Serves diffs from local JSON files, one per subscription url.
///
/// A subscription without a file fails with a connection error, the same as
/// an unreachable diff endpoint.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    files: HashMap<String, PathBuf>,
}

impl FileFetcher {
    pub fn new(files: &[UrlFile]) -> Self {
        Self {
            files: files
                .iter()
                .map(|file| (file.url.clone(), file.path.clone()))
                .collect(),
        }
    }
}

impl DiffFetcher for FileFetcher {
    fn fetch(&self, subscription: &SubscriptionInfo) -> impl Future<Output = Result<Diff, TransportError>> + Send {
        let path = self.files.get(&subscription.url).cloned();
        let url = subscription.url.clone();

        async move {
            let path = path.ok_or_else(|| TransportError::Connection(format!("No diff file for {}", url)))?;
            let json = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| TransportError::Connection(format!("Failed to read '{}': {}", path.display(), e)))?;
            serde_json::from_str(&json).map_err(|e| TransportError::Status {
                status: "synchronize_invalid_data".to_string(),
                message: format!("Invalid diff '{}': {}", path.display(), e),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_core::{Subscription, SubscriptionId, SubscriptionOptions};

    fn info(url: &str) -> SubscriptionInfo {
        Subscription::new(SubscriptionId::new(url), SubscriptionOptions::default(), Default::default()).info()
    }

    #[tokio::test]
    async fn reads_diff_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(&good, r#"{"added": ["||a.example^"], "version": "3"}"#).unwrap();
        std::fs::write(&bad, "not json").unwrap();

        let fetcher = FileFetcher::new(&[
            UrlFile {
                url: "https://lists.example/good.txt".to_string(),
                path: good,
            },
            UrlFile {
                url: "https://lists.example/bad.txt".to_string(),
                path: bad,
            },
        ]);

        let diff = fetcher.fetch(&info("https://lists.example/good.txt")).await.unwrap();
        assert_eq!(diff, Diff::new(["||a.example^"], Vec::<String>::new()).with_version("3"));

        let err = fetcher.fetch(&info("https://lists.example/bad.txt")).await.unwrap_err();
        assert_eq!(err.download_status().as_str(), "synchronize_invalid_data");

        let err = fetcher.fetch(&info("https://lists.example/none.txt")).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
