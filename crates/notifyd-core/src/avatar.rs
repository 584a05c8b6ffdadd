use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nostr_sdk::PublicKey;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Disk-backed avatar store. Files are named `<hex-pubkey><ext>` where the
/// extension comes from the source URL path; an existing file is reused
/// forever, even if the URL later serves different bytes, and two URLs with
/// the same extension share one slot per identity.
pub struct AvatarCache {
    dir: PathBuf,
    http: reqwest::Client,
    resolved: RefCell<HashMap<PublicKey, PathBuf>>,
}

impl AvatarCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            http: reqwest::Client::new(),
            resolved: RefCell::new(HashMap::new()),
        }
    }

    /// Local path already resolved for `author` during this run, if any.
    pub fn lookup(&self, author: &PublicKey) -> Option<PathBuf> {
        self.resolved.borrow().get(author).cloned()
    }

    fn local_path(&self, author: &PublicKey, url: &Url) -> PathBuf {
        let mut name = author.to_hex();
        if let Some(ext) = Path::new(url.path()).extension().and_then(OsStr::to_str) {
            name.push('.');
            name.push_str(ext);
        }
        self.dir.join(name)
    }

    /// Fetch-or-download the avatar for `author`, returning the local path.
    /// An existing cache file is returned without any network access.
    pub async fn resolve(&self, author: &PublicKey, picture: &str) -> Result<PathBuf> {
        let url = Url::parse(picture).context("invalid avatar url")?;
        let path = self.local_path(author, &url);

        if tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "avatar already cached");
        } else {
            self.download(&url, &path)
                .await
                .with_context(|| format!("downloading {url}"))?;
        }

        self.resolved.borrow_mut().insert(*author, path.clone());
        Ok(path)
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<()> {
        let mut response = self.http.get(url.clone()).send().await?.error_for_status()?;

        // Stream into a sibling temp file so an interrupted transfer never
        // occupies the cache slot.
        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, dest).await?;

        debug!(url = %url, path = %dest.display(), "avatar downloaded");
        Ok(())
    }
}
