//! Directory tree resolution
//!
//! [`TreeFetcher`] drains the paged `GetTree` listing and keys every directory
//! by the digest this client computes for it, never by anything the server
//! claims. [`TreeWalk`] resolves the same tree one directory blob at a time.

use super::BytestreamFetcher;
use crate::digest::{Digest, DigestFunction};
use crate::error::{FetchError, RpcError};
use crate::proto::remote_execution::{Directory, GetTreeRequest};
use crate::rpc::ContentAddressableStorage;
use crate::types::PageToken;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Directories keyed by canonical digest string.
pub type DirectoryMap = HashMap<String, Directory>;

/// Flattened view of one child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub digest: Digest,
    pub is_executable: bool,
    pub is_directory: bool,
}

/// Children of `directory` with digests lifted under `function`.
///
/// Files come first, then subdirectories, each in listing order. Symlinks have
/// no digest and are left out.
pub fn entries(
    directory: &Directory,
    function: DigestFunction,
) -> Result<Vec<DirectoryEntry>, FetchError> {
    let mut entries = Vec::with_capacity(directory.files.len() + directory.directories.len());
    for file in &directory.files {
        entries.push(DirectoryEntry {
            name: file.name.clone(),
            digest: Digest::from_wire(&file.digest.clone().unwrap_or_default(), function)?,
            is_executable: file.is_executable,
            is_directory: false,
        });
    }
    for child in &directory.directories {
        entries.push(DirectoryEntry {
            name: child.name.clone(),
            digest: Digest::from_wire(&child.digest.clone().unwrap_or_default(), function)?,
            is_executable: false,
            is_directory: true,
        });
    }
    Ok(entries)
}

fn child_digests(
    directory: &Directory,
    function: DigestFunction,
) -> Result<Vec<Digest>, FetchError> {
    directory
        .directories
        .iter()
        .map(|child| {
            Digest::from_wire(&child.digest.clone().unwrap_or_default(), function)
                .map_err(FetchError::from)
        })
        .collect()
}

/// Drains paged `GetTree` listings.
#[derive(Clone)]
pub struct TreeFetcher {
    cas: Arc<dyn ContentAddressableStorage>,
    instance_name: String,
    page_size: i32,
}

impl TreeFetcher {
    pub fn new(cas: Arc<dyn ContentAddressableStorage>) -> Self {
        Self {
            cas,
            instance_name: String::new(),
            page_size: 0,
        }
    }

    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    /// Page size hint; zero lets the server choose.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Every directory reachable from `root`.
    ///
    /// Fails if the root or any referenced child is absent from the listing.
    pub async fn get_tree(&self, root: &Digest) -> Result<DirectoryMap, FetchError> {
        let function = root.function();
        let mut directories = DirectoryMap::new();
        let mut token = PageToken::Initial;
        let mut pages = 0usize;

        loop {
            let request = GetTreeRequest {
                instance_name: self.instance_name.clone(),
                root_digest: Some(root.to_wire()),
                page_size: self.page_size,
                page_token: token.as_wire().to_string(),
                digest_function: function.to_wire(),
            };
            let mut stream = self
                .cas
                .get_tree(request)
                .await
                .map_err(|status| RpcError::new("GetTree", status))?;

            let mut next_page_token = String::new();
            while let Some(page) = stream.next().await {
                let page = page.map_err(|status| RpcError::new("GetTree", status))?;
                pages += 1;
                for directory in page.directories {
                    let digest = Digest::of_message(&directory, function)?;
                    directories.insert(digest.to_string(), directory);
                }
                next_page_token = page.next_page_token;
            }

            match PageToken::from_response(next_page_token) {
                Some(next) => token = next,
                None => break,
            }
        }

        debug!(root = %root, pages, directories = directories.len(), "Tree fetched");
        verify_closed(root, &directories)?;
        Ok(directories)
    }
}

/// Check that `root` and everything it references are present.
fn verify_closed(root: &Digest, directories: &DirectoryMap) -> Result<(), FetchError> {
    let function = root.function();
    let mut seen = HashSet::new();
    let mut pending = VecDeque::from([root.clone()]);

    while let Some(digest) = pending.pop_front() {
        let key = digest.to_string();
        if !seen.insert(key.clone()) {
            continue;
        }
        let directory = directories.get(&key).ok_or_else(|| {
            warn!(root = %root, missing = %key, "Tree listing incomplete");
            FetchError::MissingDirectory { digest: key.clone() }
        })?;
        pending.extend(child_digests(directory, function)?);
    }
    Ok(())
}

/// Breadth-first tree resolution over blob reads.
///
/// Children are registered as `None` placeholders when first seen, so each
/// digest is fetched at most once.
pub struct TreeWalk {
    root: Digest,
    pending: VecDeque<Digest>,
    directories: HashMap<String, Option<Directory>>,
}

impl TreeWalk {
    pub fn new(root: Digest) -> Self {
        let mut directories = HashMap::new();
        directories.insert(root.to_string(), None);
        Self {
            pending: VecDeque::from([root.clone()]),
            root,
            directories,
        }
    }

    pub fn root(&self) -> &Digest {
        &self.root
    }

    /// Directories discovered so far; `None` marks one not yet fetched.
    pub fn directories(&self) -> &HashMap<String, Option<Directory>> {
        &self.directories
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fetch the next directory. Returns `false` once nothing is left.
    pub async fn step(&mut self, fetcher: &BytestreamFetcher) -> Result<bool, FetchError> {
        let Some(digest) = self.pending.pop_front() else {
            return Ok(false);
        };
        let function = digest.function();
        let directory: Directory = fetcher.fetch(&digest).await?;

        let actual = Digest::of_message(&directory, function)?;
        if actual != digest {
            return Err(FetchError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        for child in child_digests(&directory, function)? {
            let key = child.to_string();
            if !self.directories.contains_key(&key) {
                self.directories.insert(key, None);
                self.pending.push_back(child);
            }
        }
        self.directories.insert(digest.to_string(), Some(directory));
        Ok(true)
    }

    /// Step until every reachable directory has been fetched.
    pub async fn resolve(&mut self, fetcher: &BytestreamFetcher) -> Result<(), FetchError> {
        while self.step(fetcher).await? {}
        debug!(root = %self.root, directories = self.directories.len(), "Tree walked");
        Ok(())
    }

    /// Resolved directories. Call after [`TreeWalk::resolve`].
    pub fn into_directories(self) -> DirectoryMap {
        self.directories
            .into_iter()
            .filter_map(|(key, directory)| directory.map(|directory| (key, directory)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::remote_execution::{DirectoryNode, FileNode};

    fn dir_node(name: &str, directory: &Directory) -> DirectoryNode {
        DirectoryNode {
            name: name.to_string(),
            digest: Some(
                Digest::of_message(directory, DigestFunction::Sha256)
                    .unwrap()
                    .to_wire(),
            ),
        }
    }

    #[test]
    fn entries_lists_files_then_directories() {
        let leaf = Directory::default();
        let blob = Digest::from_blob(b"data", DigestFunction::Sha256).unwrap();
        let parent = Directory {
            files: vec![FileNode {
                name: "run.sh".into(),
                digest: Some(blob.to_wire()),
                is_executable: true,
            }],
            directories: vec![dir_node("lib", &leaf)],
            symlinks: vec![],
        };

        let listed = entries(&parent, DigestFunction::Sha256).unwrap();

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "run.sh");
        assert!(listed[0].is_executable && !listed[0].is_directory);
        assert_eq!(listed[0].digest, blob);
        assert!(listed[1].is_directory);
    }

    #[test]
    fn closure_check_reports_missing_child() {
        let leaf = Directory {
            files: vec![FileNode {
                name: "x".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let root = Directory {
            directories: vec![dir_node("leaf", &leaf)],
            ..Default::default()
        };
        let root_digest = Digest::of_message(&root, DigestFunction::Sha256).unwrap();
        let mut directories = DirectoryMap::new();
        directories.insert(root_digest.to_string(), root);

        let err = verify_closed(&root_digest, &directories).unwrap_err();

        let leaf_key = Digest::of_message(&leaf, DigestFunction::Sha256)
            .unwrap()
            .to_string();
        assert!(matches!(err, FetchError::MissingDirectory { digest } if digest == leaf_key));
    }
}
