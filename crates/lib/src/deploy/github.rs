//! GitHub as a [`Forge`] and [`RegistryStaging`] backend.
//!
//! - REST API over `reqwest` for repositories, releases and pull requests
//! - `git` CLI for commit and push; tokens travel as an HTTP header through
//!   `GIT_CONFIG_*` environment variables, never as arguments
//! - `gix` for cloning and reading tree ids

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::credentials::PushCredentials;
use super::forge::{Forge, ForgeError, Registration, RegistryStaging, RepoId};
use crate::consts::APP_NAME;
use crate::registry::{append_versions_entry, versions_file};
use crate::source::git;

pub const DEFAULT_API: &str = "https://api.github.com";
pub const DEFAULT_HOST: &str = "https://github.com";

/// Authenticated access to the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubApi {
  client: reqwest::Client,
  base: String,
  token: Option<String>,
}

impl GitHubApi {
  pub fn new(token: Option<String>) -> Result<Self, ForgeError> {
    Self::with_base(DEFAULT_API, token)
  }

  pub fn with_base(base: &str, token: Option<String>) -> Result<Self, ForgeError> {
    let client = reqwest::Client::builder()
      .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ForgeError::Http {
        url: base.to_string(),
        message: format!("failed to build client: {}", e),
      })?;
    Ok(Self {
      client,
      base: base.trim_end_matches('/').to_string(),
      token: token.filter(|t| !t.is_empty()),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base, path)
  }

  fn request(&self, method: Method, url: &str) -> RequestBuilder {
    let builder = self
      .client
      .request(method, url)
      .header("Accept", "application/vnd.github+json")
      .header("X-GitHub-Api-Version", "2022-11-28");
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, ForgeError> {
    builder.send().await.map_err(|e| ForgeError::Http {
      url: url.to_string(),
      message: e.to_string(),
    })
  }

  /// Turn a non-success response into [`ForgeError::Api`].
  async fn check(url: &str, response: Response) -> Result<Response, ForgeError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ForgeError::Api {
      url: url.to_string(),
      status: status.as_u16(),
      message,
    })
  }

  async fn json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, ForgeError> {
    Self::check(url, response)
      .await?
      .json::<T>()
      .await
      .map_err(|e| ForgeError::Http {
        url: url.to_string(),
        message: format!("invalid response body: {}", e),
      })
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ForgeError> {
    let url = self.url(path);
    let response = self.send(&url, self.request(Method::GET, &url)).await?;
    Self::json(&url, response).await
  }

  /// GET that maps 404 to `None`.
  async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ForgeError> {
    let url = self.url(path);
    let response = self.send(&url, self.request(Method::GET, &url)).await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    Self::json(&url, response).await.map(Some)
  }

  async fn send_json<B: Serialize, T: DeserializeOwned>(&self, method: Method, path: &str, body: &B) -> Result<T, ForgeError> {
    let url = self.url(path);
    let response = self.send(&url, self.request(method, &url).json(body)).await?;
    Self::json(&url, response).await
  }
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
  default_branch: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
  name: &'a str,
  auto_init: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
  id: u64,
  upload_url: String,
  #[serde(default)]
  assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
  id: u64,
  name: String,
}

#[derive(Debug, Serialize)]
struct CreateReleaseRequest<'a> {
  tag_name: &'a str,
  name: &'a str,
  target_commitish: &'a str,
  draft: bool,
  prerelease: bool,
}

/// The `Authorization` header git should send, as `GIT_CONFIG_*` variables.
pub fn git_auth_env(token: &str) -> [(&'static str, String); 4] {
  let basic = BASE64.encode(format!("x-access-token:{}", token));
  [
    ("GIT_CONFIG_COUNT", "1".to_string()),
    ("GIT_CONFIG_KEY_0", "http.extraheader".to_string()),
    ("GIT_CONFIG_VALUE_0", format!("AUTHORIZATION: basic {}", basic)),
    ("GIT_TERMINAL_PROMPT", "0".to_string()),
  ]
}

/// GitHub-hosted wrapper repositories and their releases.
#[derive(Debug, Clone)]
pub struct GitHubForge {
  api: GitHubApi,
  host: String,
  branch: String,
}

impl GitHubForge {
  pub fn new(api: GitHubApi) -> Self {
    Self {
      api,
      host: DEFAULT_HOST.to_string(),
      branch: crate::consts::DEFAULT_BRANCH.to_string(),
    }
  }

  /// Clone from `host` instead of github.com.
  pub fn with_host(mut self, host: impl Into<String>) -> Self {
    self.host = host.into().trim_end_matches('/').to_string();
    self
  }

  pub fn clone_url(&self, repo: &RepoId) -> String {
    format!("{}/{}.git", self.host, repo)
  }

  async fn git(&self, checkout: &Path, args: &[&str], token: Option<&str>) -> Result<String, ForgeError> {
    let mut command = Command::new("git");
    command
      .arg("-c")
      .arg(format!("user.name={}", APP_NAME))
      .arg("-c")
      .arg(format!("user.email={}@users.noreply.github.com", APP_NAME))
      .args(args)
      .current_dir(checkout);
    if let Some(token) = token {
      command.envs(git_auth_env(token));
    }

    let command_name = args.first().copied().unwrap_or("git").to_string();
    debug!(command = %command_name, checkout = %checkout.display(), "running git");
    let output = command.output().await.map_err(|e| ForgeError::Git {
      command: command_name.clone(),
      message: e.to_string(),
    })?;
    if !output.status.success() {
      return Err(ForgeError::Git {
        command: command_name,
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }

  async fn release_for_tag(&self, repo: &RepoId, tag: &str) -> Result<ReleaseResponse, ForgeError> {
    let existing = self
      .api
      .get_optional::<ReleaseResponse>(&format!("/repos/{}/releases/tags/{}", repo, tag))
      .await?;
    if let Some(release) = existing {
      return Ok(release);
    }
    info!(%repo, tag, "creating release");
    let request = CreateReleaseRequest {
      tag_name: tag,
      name: tag,
      target_commitish: &self.branch,
      draft: false,
      prerelease: false,
    };
    self
      .api
      .send_json(Method::POST, &format!("/repos/{}/releases", repo), &request)
      .await
  }

  async fn delete_asset(&self, repo: &RepoId, asset: &AssetResponse) -> Result<(), ForgeError> {
    let url = self.api.url(&format!("/repos/{}/releases/assets/{}", repo, asset.id));
    let response = self.api.send(&url, self.api.request(Method::DELETE, &url)).await?;
    GitHubApi::check(&url, response).await?;
    debug!(asset = %asset.name, "deleted existing asset");
    Ok(())
  }

  async fn upload_asset(&self, release: &ReleaseResponse, path: &Path) -> Result<(), ForgeError> {
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let base = release.upload_url.split('{').next().unwrap_or(&release.upload_url);
    let url = format!("{}?name={}", base, name);
    let body = tokio::fs::read(path).await.map_err(|source| ForgeError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let builder = self
      .api
      .request(Method::POST, &url)
      .header("Content-Type", "application/gzip")
      .body(body);
    let response = self.api.send(&url, builder).await?;
    GitHubApi::check(&url, response).await?;
    info!(asset = %name, release = release.id, "uploaded asset");
    Ok(())
  }
}

impl Forge for GitHubForge {
  async fn repo_exists(&self, repo: &RepoId) -> Result<bool, ForgeError> {
    let found = self.api.get_optional::<RepoResponse>(&format!("/repos/{}", repo)).await?;
    Ok(found.is_some())
  }

  async fn create_repo(&self, repo: &RepoId) -> Result<(), ForgeError> {
    let request = CreateRepoRequest {
      name: &repo.name,
      auto_init: false,
    };
    // Organizations first; a 404 means the owner is the authenticated user.
    let org_url = self.api.url(&format!("/orgs/{}/repos", repo.owner));
    let response = self
      .api
      .send(&org_url, self.api.request(Method::POST, &org_url).json(&request))
      .await?;
    if response.status() != StatusCode::NOT_FOUND {
      GitHubApi::check(&org_url, response).await?;
      info!(%repo, "created organization repository");
      return Ok(());
    }
    let _: RepoResponse = self.api.send_json(Method::POST, "/user/repos", &request).await?;
    info!(%repo, "created user repository");
    Ok(())
  }

  async fn clone_repo(&self, repo: &RepoId, dest: &Path) -> Result<(), ForgeError> {
    let url = self.clone_url(repo);
    let dest: PathBuf = dest.to_path_buf();
    info!(url, dest = %dest.display(), "cloning");
    tokio::task::spawn_blocking(move || git::clone_worktree(&url, &dest))
      .await
      .map_err(|e| ForgeError::Git {
        command: "clone".to_string(),
        message: e.to_string(),
      })??;
    Ok(())
  }

  async fn fetch(&self, checkout: &Path, branch: &str) -> Result<(), ForgeError> {
    self.git(checkout, &["fetch", "--quiet", "origin"], None).await?;
    let remote_ref = format!("refs/remotes/origin/{}", branch);
    if self
      .git(checkout, &["rev-parse", "--verify", "--quiet", &remote_ref], None)
      .await
      .is_err()
    {
      debug!(branch, "remote branch does not exist yet");
      return Ok(());
    }
    // Soft, so the next commit lands on the remote tip with our files.
    self
      .git(checkout, &["reset", "--quiet", "--soft", &remote_ref], None)
      .await?;
    Ok(())
  }

  async fn commit_all(&self, checkout: &Path, message: &str) -> Result<bool, ForgeError> {
    self.git(checkout, &["add", "--all"], None).await?;
    let status = self.git(checkout, &["status", "--porcelain"], None).await?;
    if status.trim().is_empty() {
      warn!(checkout = %checkout.display(), "nothing to commit");
      return Ok(false);
    }
    self.git(checkout, &["commit", "--quiet", "-m", message], None).await?;
    Ok(true)
  }

  async fn push(&self, checkout: &Path, branch: &str, credentials: &PushCredentials) -> Result<(), ForgeError> {
    let token = credentials
      .secret()
      .ok_or_else(|| ForgeError::MissingCredentials(checkout.display().to_string()))?;
    let refspec = format!("HEAD:refs/heads/{}", branch);
    self
      .git(checkout, &["push", "--quiet", "origin", &refspec], Some(token))
      .await?;
    info!(branch, "pushed");
    Ok(())
  }

  async fn tree_hash(&self, checkout: &Path) -> Result<String, ForgeError> {
    Ok(git::head_tree_id(checkout)?)
  }

  async fn upload_release(&self, repo: &RepoId, tag: &str, dir: &Path) -> Result<(), ForgeError> {
    let release = self.release_for_tag(repo, tag).await?;

    let io_err = |source| ForgeError::Io {
      path: dir.to_path_buf(),
      source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
      let path = entry.map_err(io_err)?.path();
      if path.is_file() {
        files.push(path);
      }
    }
    files.sort();

    for path in &files {
      let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
      for asset in release.assets.iter().filter(|a| Some(&a.name) == name.as_ref()) {
        self.delete_asset(repo, asset).await?;
      }
      self.upload_asset(&release, path).await?;
    }
    info!(%repo, tag, assets = files.len(), "release uploaded");
    Ok(())
  }
}

#[derive(Debug, Deserialize)]
struct RefResponse {
  object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
  sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
  #[serde(rename = "ref")]
  reference: String,
  sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
  sha: String,
  #[serde(default)]
  content: String,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
  message: &'a str,
  content: String,
  branch: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
  title: &'a str,
  head: &'a str,
  base: &'a str,
  body: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
  html_url: String,
}

/// Opens pull requests against a registry repository.
///
/// Each registration gets its own branch that appends the new version to the
/// package's `Versions.toml` (and creates `Package.toml` for new packages).
#[derive(Debug, Clone)]
pub struct GitHubRegistryStaging {
  api: GitHubApi,
  registry: RepoId,
  host: String,
}

impl GitHubRegistryStaging {
  pub fn new(api: GitHubApi, registry: RepoId) -> Self {
    Self {
      api,
      registry,
      host: DEFAULT_HOST.to_string(),
    }
  }

  /// Branch name for a registration; `+` is avoided for tooling that mishandles it.
  pub fn branch_name(registration: &Registration) -> String {
    format!("{}/{}-v{}", APP_NAME, registration.package, registration.version).replace('+', "-")
  }

  async fn ensure_branch(&self, branch: &str, base_sha: &str) -> Result<(), ForgeError> {
    let url = self.api.url(&format!("/repos/{}/git/refs", self.registry));
    let request = CreateRefRequest {
      reference: format!("refs/heads/{}", branch),
      sha: base_sha,
    };
    let response = self
      .api
      .send(&url, self.api.request(Method::POST, &url).json(&request))
      .await?;
    // 422: the branch already exists from an earlier attempt
    if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
      debug!(branch, "registry branch already exists");
      return Ok(());
    }
    GitHubApi::check(&url, response).await?;
    Ok(())
  }

  async fn read_file(&self, path: &str, branch: &str) -> Result<Option<(String, String)>, ForgeError> {
    let found = self
      .api
      .get_optional::<ContentResponse>(&format!("/repos/{}/contents/{}?ref={}", self.registry, path, branch))
      .await?;
    let Some(found) = found else {
      return Ok(None);
    };
    let packed: String = found.content.split_whitespace().collect();
    let bytes = BASE64.decode(packed).map_err(|e| ForgeError::Http {
      url: path.to_string(),
      message: format!("invalid base64 content: {}", e),
    })?;
    Ok(Some((String::from_utf8_lossy(&bytes).into_owned(), found.sha)))
  }

  async fn write_file(
    &self,
    path: &str,
    content: &str,
    branch: &str,
    message: &str,
    sha: Option<&str>,
  ) -> Result<(), ForgeError> {
    let request = PutContentRequest {
      message,
      content: BASE64.encode(content),
      branch,
      sha,
    };
    let _: serde_json::Value = self
      .api
      .send_json(Method::PUT, &format!("/repos/{}/contents/{}", self.registry, path), &request)
      .await?;
    Ok(())
  }
}

impl RegistryStaging for GitHubRegistryStaging {
  async fn submit(&self, registration: &Registration) -> Result<String, ForgeError> {
    let repo: RepoResponse = self.api.get(&format!("/repos/{}", self.registry)).await?;
    let base = repo.default_branch.unwrap_or_else(|| crate::consts::DEFAULT_BRANCH.to_string());
    let head: RefResponse = self
      .api
      .get(&format!("/repos/{}/git/ref/heads/{}", self.registry, base))
      .await?;

    let branch = Self::branch_name(registration);
    self.ensure_branch(&branch, &head.object.sha).await?;

    let versions_path =
      versions_file(&registration.package).map_err(|e| ForgeError::InvalidRepo(e.to_string()))?;
    let message = format!("New version: {} v{}", registration.package, registration.version);
    let existing = self.read_file(&versions_path, &branch).await?;
    let (current, sha) = match &existing {
      Some((content, sha)) => (content.as_str(), Some(sha.as_str())),
      None => ("", None),
    };
    let updated = append_versions_entry(current, &registration.version.to_semver(), &registration.tree_hash);
    self.write_file(&versions_path, &updated, &branch, &message, sha).await?;

    if existing.is_none() {
      let package_path = versions_path.replace("Versions.toml", "Package.toml");
      let package_toml = format!(
        "name = \"{}\"\nrepo = \"{}/{}.git\"\n",
        registration.package, self.host, registration.repository
      );
      self
        .write_file(&package_path, &package_toml, &branch, &message, None)
        .await?;
    }

    let body = format!(
      "- Package: {}\n- Repository: {}/{}\n- Version: {}\n- Tree: {}\n",
      registration.package, self.host, registration.repository, registration.version, registration.tree_hash
    );
    let pull: PullResponse = self
      .api
      .send_json(
        Method::POST,
        &format!("/repos/{}/pulls", self.registry),
        &CreatePullRequest {
          title: &message,
          head: &branch,
          base: &base,
          body,
        },
      )
      .await?;
    info!(url = %pull.html_url, "opened registry pull request");
    Ok(pull.html_url)
  }
}
