//! Remote archive downloads with incremental SHA-256 verification.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{ResolvedSource, SourceDigest, SourceError};
use crate::util::hash::{ContentHash, hash_file};

/// Returns true if `url` should be fetched over the network rather than read from disk.
pub fn is_remote(url: &str) -> bool {
  url.starts_with("http://") || url.starts_with("https://")
}

/// Cache file name for a remote archive: `<hash>-<basename(url)>`.
pub fn cache_key(url: &str, hash: &ContentHash) -> String {
  format!("{}-{}", hash, url_basename(url))
}

/// Take the last path component of a URL and sanitize it.
///
/// Falls back to `download` if nothing usable remains.
fn url_basename(url: &str) -> String {
  let last = url.rsplit(['/', '\\']).next().unwrap_or_default();
  let last = last.split(['?', '#']).next().unwrap_or_default();

  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
    "download".to_string()
  } else {
    sanitized
  }
}

/// Resolve a remote archive against the downloads cache.
///
/// Order of preference:
/// 1. an existing cache entry for `(url, hash)` is trusted as-is;
/// 2. a local filesystem `url` is verified in place;
/// 3. otherwise the archive is streamed into the cache and verified as it arrives.
pub async fn fetch_archive(
  client: &reqwest::Client,
  url: &str,
  expected: &ContentHash,
  downloads: &Path,
) -> Result<ResolvedSource, SourceError> {
  let cached = downloads.join(cache_key(url, expected));
  if cached.is_file() {
    debug!(url, path = %cached.display(), "archive cache hit");
    return Ok(ResolvedSource {
      path: cached,
      digest: SourceDigest::Sha256(expected.clone()),
    });
  }

  if !is_remote(url) {
    return verify_local(Path::new(url), expected);
  }

  download_verified(client, url, expected, &cached).await?;
  Ok(ResolvedSource {
    path: cached,
    digest: SourceDigest::Sha256(expected.clone()),
  })
}

fn verify_local(path: &Path, expected: &ContentHash) -> Result<ResolvedSource, SourceError> {
  if !path.is_file() {
    return Err(SourceError::PathNotFound(path.to_path_buf()));
  }
  let actual = hash_file(path)?;
  if actual != *expected {
    return Err(SourceError::Integrity {
      origin: path.display().to_string(),
      expected: expected.clone(),
      actual,
    });
  }
  let path = dunce::canonicalize(path).map_err(|source| SourceError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  debug!(path = %path.display(), "verified local archive in place");
  Ok(ResolvedSource {
    path,
    digest: SourceDigest::Sha256(expected.clone()),
  })
}

/// Stream `url` into a temporary file next to `dest`, hashing each chunk.
///
/// The file only lands at `dest` once the digest matches; on mismatch the
/// temporary file is dropped and nothing is left under the claimed hash.
async fn download_verified(
  client: &reqwest::Client,
  url: &str,
  expected: &ContentHash,
  dest: &Path,
) -> Result<PathBuf, SourceError> {
  let dir = dest.parent().unwrap_or(Path::new("."));
  tokio::fs::create_dir_all(dir).await.map_err(|source| SourceError::Io {
    path: dir.to_path_buf(),
    source,
  })?;

  info!(url, "downloading archive");
  let download_err = |message: String| SourceError::Download {
    url: url.to_string(),
    message,
  };

  let mut response = client.get(url).send().await.map_err(|e| download_err(e.to_string()))?;
  if !response.status().is_success() {
    return Err(download_err(format!("HTTP {}", response.status())));
  }

  let io_err = |source| SourceError::Io {
    path: dest.to_path_buf(),
    source,
  };
  let staging = tempfile::Builder::new()
    .prefix(".download-")
    .tempfile_in(dir)
    .map_err(io_err)?;
  let mut file = tokio::fs::File::from_std(staging.as_file().try_clone().map_err(io_err)?);

  let mut hasher = Sha256::new();
  let mut size = 0usize;
  while let Some(chunk) = response.chunk().await.map_err(|e| download_err(e.to_string()))? {
    hasher.update(&chunk);
    file.write_all(&chunk).await.map_err(io_err)?;
    size += chunk.len();
  }
  file.flush().await.map_err(io_err)?;
  drop(file);

  let actual = ContentHash::from_hasher(hasher);
  if actual != *expected {
    warn!(url, expected = %expected, actual = %actual, "downloaded archive failed verification");
    return Err(SourceError::Integrity {
      origin: url.to_string(),
      expected: expected.clone(),
      actual,
    });
  }

  staging.persist(dest).map_err(|e| io_err(e.error))?;
  info!(path = %dest.display(), size, "download complete");
  Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  const BODY: &[u8] = b"pretend this is a tarball";

  #[test]
  fn url_basename_simple() {
    assert_eq!(url_basename("https://example.com/file.tar.gz"), "file.tar.gz");
  }

  #[test]
  fn url_basename_strips_query() {
    assert_eq!(url_basename("https://example.com/file.tar.gz?token=abc"), "file.tar.gz");
  }

  #[test]
  fn url_basename_sanitizes_special_chars() {
    assert_eq!(url_basename("https://example.com/file name.tar.gz"), "file_name.tar.gz");
  }

  #[test]
  fn url_basename_fallback_for_empty() {
    assert_eq!(url_basename("https://example.com/"), "download");
  }

  #[test]
  fn cache_key_embeds_hash_and_name() {
    let hash = hash_bytes(BODY);
    assert_eq!(
      cache_key("https://example.com/v1/zlib-1.3.tar.gz", &hash),
      format!("{}-zlib-1.3.tar.gz", hash)
    );
  }

  #[tokio::test]
  async fn wrong_hash_fails_and_leaves_nothing_behind() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/zlib.tar.gz")
      .with_body(BODY)
      .expect(1)
      .create_async()
      .await;
    let downloads = TempDir::new().unwrap();
    let url = format!("{}/zlib.tar.gz", server.url());
    let claimed = hash_bytes(b"something else entirely");

    let result = fetch_archive(&reqwest::Client::new(), &url, &claimed, downloads.path()).await;

    assert!(matches!(result, Err(SourceError::Integrity { .. })));
    assert!(!downloads.path().join(cache_key(&url, &claimed)).exists());
    assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn second_resolve_is_a_cache_hit() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/zlib.tar.gz")
      .with_body(BODY)
      .expect(1)
      .create_async()
      .await;
    let downloads = TempDir::new().unwrap();
    let url = format!("{}/zlib.tar.gz", server.url());
    let hash = hash_bytes(BODY);
    let client = reqwest::Client::new();

    let first = fetch_archive(&client, &url, &hash, downloads.path()).await.unwrap();
    let second = fetch_archive(&client, &url, &hash, downloads.path()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::read(&first.path).unwrap(), BODY);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn http_error_is_a_download_failure() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/missing.tar.gz").with_status(404).create_async().await;
    let downloads = TempDir::new().unwrap();
    let url = format!("{}/missing.tar.gz", server.url());

    let result = fetch_archive(&reqwest::Client::new(), &url, &hash_bytes(BODY), downloads.path()).await;

    assert!(matches!(result, Err(SourceError::Download { .. })));
  }

  #[tokio::test]
  async fn local_file_is_verified_in_place() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("vendored.tar.gz");
    std::fs::write(&archive, BODY).unwrap();
    let downloads = TempDir::new().unwrap();
    let client = reqwest::Client::new();
    let url = archive.to_string_lossy().into_owned();

    let ok = fetch_archive(&client, &url, &hash_bytes(BODY), downloads.path()).await.unwrap();
    assert_eq!(ok.path, dunce::canonicalize(&archive).unwrap());

    let bad = fetch_archive(&client, &url, &hash_bytes(b"nope"), downloads.path()).await;
    assert!(matches!(bad, Err(SourceError::Integrity { .. })));
  }
}
