//! libgit2 helpers shared by the cache and persistence flows.
use git2::{Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks};
use std::path::Path;

const DEFAULT_SSH_USER: &str = "git";

/// Return true when the URL names a local repository.
pub fn is_local_url(url: &str) -> bool {
    if url.starts_with("file://") {
        return true;
    }
    if url.contains("://") {
        return false;
    }
    if scp_like_host(url).is_some() {
        return false;
    }
    Path::new(url).is_absolute() || url.starts_with('.') || Path::new(url).exists()
}

/// SSH user implied by a remote URL, defaulting to `git`.
pub fn ssh_username(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("ssh://") {
        if let Some((user, _)) = rest.split_once('@') {
            if !user.is_empty() && !user.contains('/') {
                return user.to_string();
            }
        }
        return DEFAULT_SSH_USER.to_string();
    }
    if let Some((user, _)) = scp_like_host(url) {
        if !user.is_empty() {
            return user.to_string();
        }
    }
    DEFAULT_SSH_USER.to_string()
}

/// Split `user@host:path` into `(user, host)`.
fn scp_like_host(url: &str) -> Option<(&str, &str)> {
    let (authority, _) = url.split_once(':')?;
    if authority.contains('/') {
        return None;
    }
    match authority.split_once('@') {
        Some((user, host)) if !host.is_empty() => Some((user, host)),
        None if !authority.is_empty() && authority.len() > 1 => Some(("", authority)),
        _ => None,
    }
}

/// Remote callbacks that authenticate through the SSH agent.
///
/// Local paths never need credentials, so they get default callbacks.
pub fn remote_callbacks(url: &str) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if is_local_url(url) {
        return callbacks;
    }
    let username = ssh_username(url);
    callbacks.credentials(move |_url, username_from_url, allowed| {
        let user = username_from_url.unwrap_or(&username);
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(user);
        }
        Cred::default()
    });
    callbacks
}

pub fn fetch_options(url: &str) -> FetchOptions<'static> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(url));
    options
}

pub fn push_options(url: &str) -> PushOptions<'static> {
    let mut options = PushOptions::new();
    options.remote_callbacks(remote_callbacks(url));
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_urls_are_recognised() {
        assert!(is_local_url("/srv/estate"));
        assert!(is_local_url("file:///srv/estate"));
        assert!(is_local_url("./estate"));
        assert!(!is_local_url("git@github.com:acme/estate.git"));
        assert!(!is_local_url("https://github.com/acme/estate.git"));
        assert!(!is_local_url("ssh://git@github.com/acme/estate.git"));
    }

    #[test]
    fn ssh_username_follows_url() {
        assert_eq!(ssh_username("git@github.com:acme/estate.git"), "git");
        assert_eq!(ssh_username("deploy@example.com:estate.git"), "deploy");
        assert_eq!(ssh_username("ssh://ops@example.com/estate.git"), "ops");
        assert_eq!(ssh_username("ssh://example.com/estate.git"), "git");
        assert_eq!(ssh_username("https://github.com/acme/estate.git"), "git");
    }
}
