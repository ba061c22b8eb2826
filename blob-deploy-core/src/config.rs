//! Deployment options and per-file inputs.
//!
//! [`DeployOptions`] is built once per invocation, merged with defaults, and not
//! mutated afterwards. Each [`FileDescriptor`] is turned into an [`UploadTask`]
//! by [`UploadTask::derive`], which owns the destination key rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31556926";
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Public access level requested when the container is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicAccessLevel {
    Private,
    #[default]
    Blob,
    Container,
}

/// Backend settings used by "create container if not exists".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    #[serde(alias = "publicAccessLevel")]
    pub public_access_level: PublicAccessLevel,
}

/// Content settings and user metadata attached to every uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobMetadata {
    #[serde(alias = "cacheControl", skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(alias = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(alias = "contentEncoding", skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(alias = "contentLanguage", skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(alias = "contentDisposition", skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    /// Free-form user metadata (`x-ms-meta-*` on Azure).
    #[serde(flatten)]
    pub user: BTreeMap<String, String>,
}

impl Default for BlobMetadata {
    fn default() -> Self {
        Self {
            cache_control: Some(DEFAULT_CACHE_CONTROL.to_string()),
            content_type: None,
            content_encoding: None,
            content_language: None,
            content_disposition: None,
            user: BTreeMap::new(),
        }
    }
}

impl BlobMetadata {
    /// Metadata with no content settings at all, not even the cache-control default.
    pub fn empty() -> Self {
        Self {
            cache_control: None,
            ..Self::default()
        }
    }

    /// Overlays `overrides` on top of `self`; fields set in `overrides` win.
    pub fn merged_with(mut self, overrides: BlobMetadata) -> Self {
        if overrides.cache_control.is_some() {
            self.cache_control = overrides.cache_control;
        }
        if overrides.content_type.is_some() {
            self.content_type = overrides.content_type;
        }
        if overrides.content_encoding.is_some() {
            self.content_encoding = overrides.content_encoding;
        }
        if overrides.content_language.is_some() {
            self.content_language = overrides.content_language;
        }
        if overrides.content_disposition.is_some() {
            self.content_disposition = overrides.content_disposition;
        }
        self.user.extend(overrides.user);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Options for one deployment.
///
/// Deserialises from both the snake_case names and the camelCase names used by
/// older task configurations (`containerName`, `folder`, `zip`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    #[serde(default, alias = "containerName")]
    pub container_name: String,
    #[serde(default, alias = "containerOptions")]
    pub container_options: ContainerOptions,
    #[serde(default, alias = "destinationPrefix", alias = "folder")]
    pub destination_prefix: String,
    #[serde(default = "default_true", alias = "deleteExisting", alias = "deleteExistingBlobs")]
    pub delete_existing: bool,
    #[serde(default = "default_concurrency", alias = "concurrentUploadThreads")]
    pub concurrency: usize,
    #[serde(default, alias = "zip")]
    pub compress: bool,
    #[serde(default)]
    pub metadata: BlobMetadata,
    #[serde(default, alias = "testRun")]
    pub test_run: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            container_name: String::new(),
            container_options: ContainerOptions::default(),
            destination_prefix: String::new(),
            delete_existing: true,
            concurrency: DEFAULT_CONCURRENCY,
            compress: false,
            metadata: BlobMetadata::default(),
            test_run: false,
        }
    }
}

impl DeployOptions {
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            ..Self::default()
        }
    }

    pub fn with_destination_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.destination_prefix = prefix.into();
        self
    }

    pub fn with_delete_existing(mut self, delete_existing: bool) -> Self {
        self.delete_existing = delete_existing;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_test_run(mut self, test_run: bool) -> Self {
        self.test_run = test_run;
        self
    }

    /// Merges user metadata over the current (default) metadata.
    pub fn with_metadata(mut self, metadata: BlobMetadata) -> Self {
        self.metadata = self.metadata.merged_with(metadata);
        self
    }

    pub fn with_container_options(mut self, container_options: ContainerOptions) -> Self {
        self.container_options = container_options;
        self
    }

    /// Upload concurrency, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn trace_loaded(&self) {
        info!(
            container = %self.container_name,
            prefix = %self.destination_prefix,
            delete_existing = self.delete_existing,
            concurrency = self.effective_concurrency(),
            compress = self.compress,
            test_run = self.test_run,
            "Loaded DeployOptions"
        );
        debug!(?self, "DeployOptions loaded (full debug)");
    }
}

/// One local file to deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Directory the destination key is made relative to.
    #[serde(default)]
    pub base: Option<PathBuf>,
    /// Explicit destination, relative to the destination prefix.
    #[serde(default)]
    pub dest: Option<String>,
    /// Deprecated alias for `base`.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// True when only the deprecated `cwd` locates this file.
    pub fn uses_legacy_cwd(&self) -> bool {
        self.cwd.is_some() && self.base.is_none()
    }

    fn base_dir(&self) -> Option<&Path> {
        self.base.as_deref().or(self.cwd.as_deref())
    }

    /// Path of the file relative to its base directory, or its basename without one.
    pub fn relative_path(&self) -> String {
        match self.base_dir() {
            Some(dir) => relative_to(&self.path, dir),
            None => self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Lexical equivalent of `path.relative(from, to)`: walks up out of `from` where needed.
fn relative_to(path: &Path, base: &Path) -> String {
    let path_parts: Vec<Component<'_>> = normalise(path);
    let base_parts: Vec<Component<'_>> = normalise(base);
    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<String> = Vec::new();
    for _ in common..base_parts.len() {
        segments.push("..".to_string());
    }
    for part in &path_parts[common..] {
        segments.push(part.as_os_str().to_string_lossy().into_owned());
    }
    segments.join("/")
}

fn normalise(path: &Path) -> Vec<Component<'_>> {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts
}

/// Joins key segments with `/`, dropping empty and `.` segments and resolving `..`.
///
/// `relative` is split on `/` and the platform separator only, so a backslash in a
/// POSIX file name stays part of that name.
pub fn join_key(prefix: &str, relative: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in prefix
        .split('/')
        .chain(relative.split(['/', std::path::MAIN_SEPARATOR]))
    {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Content type looked up from the file extension.
pub fn content_type_for(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

/// Everything needed to upload one file once preparation is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub dest_key: String,
    pub metadata: BlobMetadata,
    pub source: PathBuf,
}

impl UploadTask {
    pub fn derive(options: &DeployOptions, file: &FileDescriptor) -> Self {
        let relative = match &file.dest {
            Some(dest) => dest.clone(),
            None => file.relative_path(),
        };
        let dest_key = join_key(&options.destination_prefix, &relative);

        let mut metadata = options.metadata.clone();
        metadata.content_type = content_type_for(&file.path);

        Self {
            dest_key,
            metadata,
            source: file.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> DeployOptions {
        DeployOptions::new("web").with_destination_prefix("pre")
    }

    #[test]
    fn key_is_relative_to_base() {
        let file = FileDescriptor::new("/p/dist/f.js").with_base("/p");
        assert_eq!(UploadTask::derive(&options(), &file).dest_key, "pre/dist/f.js");
    }

    #[test]
    fn key_without_base_is_basename() {
        let file = FileDescriptor::new("/p/dist/f.js");
        assert_eq!(UploadTask::derive(&options(), &file).dest_key, "pre/f.js");
    }

    #[test]
    fn explicit_dest_wins_over_path() {
        let file = FileDescriptor::new("/p/dist/f.js")
            .with_base("/p")
            .with_dest("x/y.js");
        assert_eq!(UploadTask::derive(&options(), &file).dest_key, "pre/x/y.js");
    }

    #[test]
    fn legacy_cwd_is_used_when_base_missing() {
        let file = FileDescriptor::new("/project/dist/file1.js").with_cwd("/project");
        assert!(file.uses_legacy_cwd());
        assert_eq!(file.relative_path(), "dist/file1.js");

        let both = file.clone().with_base("/project/dist");
        assert!(!both.uses_legacy_cwd());
        assert_eq!(both.relative_path(), "file1.js");
    }

    #[test]
    fn empty_prefix_yields_no_leading_separator() {
        let opts = DeployOptions::new("web");
        let file = FileDescriptor::new("/p/a/b.css").with_base("/p");
        assert_eq!(UploadTask::derive(&opts, &file).dest_key, "a/b.css");
    }

    #[test]
    fn join_key_normalises_segments() {
        assert_eq!(join_key("/path/in/cdn/", "dist/file1.js"), "path/in/cdn/dist/file1.js");
        assert_eq!(join_key("pre", "./a/../b.js"), "pre/b.js");
        assert_eq!(join_key("", ""), "");
    }

    #[cfg(unix)]
    #[test]
    fn backslash_in_posix_file_name_is_kept() {
        assert_eq!(join_key("pre", "dist/a\\b.js"), "pre/dist/a\\b.js");
        let file = FileDescriptor::new("/p/dist/a\\b.js").with_base("/p");
        assert_eq!(UploadTask::derive(&options(), &file).dest_key, "pre/dist/a\\b.js");
    }

    #[test]
    fn file_outside_base_walks_up() {
        let file = FileDescriptor::new("/p/other/x.js").with_base("/p/dist");
        assert_eq!(file.relative_path(), "../other/x.js");
    }

    #[test]
    fn metadata_gets_content_type_and_default_cache_control() {
        let file = FileDescriptor::new("/project/dist/file1.js").with_base("/project");
        let task = UploadTask::derive(&options(), &file);
        assert_eq!(task.metadata.cache_control.as_deref(), Some(DEFAULT_CACHE_CONTROL));
        assert!(task
            .metadata
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("javascript")));
        assert_eq!(task.metadata.content_encoding, None);
    }

    #[test]
    fn user_metadata_is_merged_over_defaults() {
        let mut user = BlobMetadata::empty();
        user.content_language = Some("en".into());
        user.user.insert("build".into(), "42".into());
        let opts = DeployOptions::new("web").with_metadata(user);
        assert_eq!(opts.metadata.cache_control.as_deref(), Some(DEFAULT_CACHE_CONTROL));
        assert_eq!(opts.metadata.content_language.as_deref(), Some("en"));
        assert_eq!(opts.metadata.user.get("build").map(String::as_str), Some("42"));
    }

    #[test]
    fn legacy_option_names_deserialise_with_defaults() {
        let raw = serde_json::json!({
            "containerName": "testContainer",
            "containerOptions": {"publicAccessLevel": "container"},
            "folder": "path/in/cdn",
            "concurrentUploadThreads": 2,
            "zip": true,
            "metadata": {"contentLanguage": "en"},
            "testRun": true
        });
        let opts: DeployOptions = serde_json::from_value(raw).expect("options should parse");
        assert_eq!(opts.container_name, "testContainer");
        assert_eq!(opts.container_options.public_access_level, PublicAccessLevel::Container);
        assert_eq!(opts.destination_prefix, "path/in/cdn");
        assert!(opts.delete_existing);
        assert_eq!(opts.concurrency, 2);
        assert!(opts.compress);
        assert!(opts.test_run);
        assert_eq!(opts.metadata.cache_control.as_deref(), Some(DEFAULT_CACHE_CONTROL));
        assert_eq!(opts.metadata.content_language.as_deref(), Some("en"));
    }

    #[test]
    fn concurrency_is_clamped_to_one() {
        assert_eq!(DeployOptions::new("web").with_concurrency(0).effective_concurrency(), 1);
        assert_eq!(DeployOptions::default().effective_concurrency(), DEFAULT_CONCURRENCY);
    }
}
