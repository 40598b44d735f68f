//! Request path classification. Every predicate here is pure.
use std::sync::LazyLock;

use regex::Regex;

static GIT_RAW_OR_ATTACH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/[^/]+/[^/]+/(?:git-(?:upload|receive)-pack|info/refs|HEAD|objects/|raw/|releases/download/|attachments/)",
    )
    .unwrap()
});

static LFS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[^/]+/[^/]+(?:\.git)?/info/lfs/").unwrap());

static ARCHIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[^/]+/[^/]+/archive/").unwrap());

pub fn is_api_path(path: &str) -> bool {
    path.starts_with("/api/")
}

pub fn is_attachment_download(path: &str) -> bool {
    path.starts_with("/attachments/")
}

pub fn is_git_raw_release_or_attach_path(path: &str) -> bool {
    GIT_RAW_OR_ATTACH.is_match(path)
}

pub fn is_lfs_path(path: &str) -> bool {
    LFS.is_match(path)
}

pub fn is_git_raw_or_lfs_path(path: &str) -> bool {
    is_git_raw_release_or_attach_path(path) || is_lfs_path(path)
}

pub fn is_archive_path(path: &str) -> bool {
    ARCHIVE.is_match(path)
}

pub fn is_container_registry_path(path: &str) -> bool {
    path == "/v2" || path.starts_with("/v2/")
}

/// Paths on which password and token credentials are accepted outside the session.
pub fn is_credential_bearing(path: &str) -> bool {
    is_api_path(path)
        || is_attachment_download(path)
        || is_git_raw_or_lfs_path(path)
        || is_container_registry_path(path)
}

/// Download URLs that may embed an application-issued token.
pub fn is_token_download(path: &str) -> bool {
    is_attachment_download(path) || is_archive_path(path) || is_git_raw_release_or_attach_path(path)
}
