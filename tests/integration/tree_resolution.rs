use crate::support::{child, digest_of, file, BlobServer, PagedCas};
use bfscope::cas::{BytestreamFetcher, TreeFetcher, TreeWalk};
use bfscope::error::FetchError;
use bfscope::proto::remote_execution::Directory;
use std::collections::HashSet;
use std::sync::Arc;

/// root -> {lib, bin}; lib -> {util}; bin -> {tools}
fn five_directory_tree() -> Vec<Directory> {
    let util = Directory {
        files: vec![file("strings.rs", b"pub fn trim() {}")],
        ..Default::default()
    };
    let tools = Directory {
        files: vec![file("fmt.sh", b"#!/bin/sh\n")],
        ..Default::default()
    };
    let lib = Directory {
        files: vec![file("lib.rs", b"mod util;")],
        directories: vec![child("util", &util)],
        ..Default::default()
    };
    let bin = Directory {
        files: vec![file("main.rs", b"fn main() {}")],
        directories: vec![child("tools", &tools)],
        ..Default::default()
    };
    let root = Directory {
        directories: vec![child("bin", &bin), child("lib", &lib)],
        ..Default::default()
    };
    vec![root, lib, bin, util, tools]
}

/// root -> {a, b, c, d}
fn flat_tree() -> Vec<Directory> {
    let children: Vec<Directory> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| Directory {
            files: vec![file(&format!("{}.txt", name), name.as_bytes())],
            ..Default::default()
        })
        .collect();
    let root = Directory {
        directories: ["a", "b", "c", "d"]
            .iter()
            .zip(&children)
            .map(|(name, directory)| child(name, directory))
            .collect(),
        ..Default::default()
    };
    std::iter::once(root).chain(children).collect()
}

/// root -> {left, right}; left -> {shared}; right -> {shared}
fn diamond_tree() -> Vec<Directory> {
    let shared = Directory {
        files: vec![file("common.rs", b"pub const N: u8 = 1;")],
        ..Default::default()
    };
    let left = Directory {
        files: vec![file("left.rs", b"mod common;")],
        directories: vec![child("common", &shared)],
        ..Default::default()
    };
    let right = Directory {
        files: vec![file("right.rs", b"mod common;")],
        directories: vec![child("common", &shared)],
        ..Default::default()
    };
    let root = Directory {
        directories: vec![child("left", &left), child("right", &right)],
        ..Default::default()
    };
    vec![root, left, right, shared]
}

fn keys(directories: &[Directory]) -> HashSet<String> {
    directories.iter().map(|d| digest_of(d).to_string()).collect()
}

#[tokio::test]
async fn get_tree_drains_every_page() {
    let tree = five_directory_tree();
    let root = digest_of(&tree[0]);
    let cas = Arc::new(PagedCas::new(vec![tree[..3].to_vec(), tree[3..].to_vec()]));

    let directories = TreeFetcher::new(cas.clone())
        .with_instance_name("shard")
        .with_page_size(3)
        .get_tree(&root)
        .await
        .unwrap();

    assert_eq!(directories.len(), 5);
    assert_eq!(directories.keys().cloned().collect::<HashSet<_>>(), keys(&tree));

    let requests = cas.requests.lock();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].page_token, "");
    assert_eq!(requests[1].page_token, "1");
    assert!(requests.iter().all(|r| r.instance_name == "shard" && r.page_size == 3));
}

#[tokio::test]
async fn get_tree_resolves_two_levels_split_across_pages() {
    let tree = flat_tree();
    let root = digest_of(&tree[0]);
    let cas = Arc::new(PagedCas::new(vec![tree[..2].to_vec(), tree[2..].to_vec()]));

    let directories = TreeFetcher::new(cas.clone()).get_tree(&root).await.unwrap();

    assert_eq!(directories.len(), 5);
    assert_eq!(directories.keys().cloned().collect::<HashSet<_>>(), keys(&tree));
    assert!(directories.contains_key(&root.to_string()));
    assert_eq!(cas.requests.lock().len(), 2);
}

#[tokio::test]
async fn get_tree_rejects_a_listing_with_holes() {
    let tree = five_directory_tree();
    let root = digest_of(&tree[0]);
    // `tools` is never listed.
    let cas = Arc::new(PagedCas::new(vec![tree[..4].to_vec()]));

    let err = TreeFetcher::new(cas).get_tree(&root).await.unwrap_err();

    match err {
        FetchError::MissingDirectory { digest } => {
            assert_eq!(digest, digest_of(&tree[4]).to_string())
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn walk_reads_each_directory_once() {
    let tree = five_directory_tree();
    let blobs = Arc::new(BlobServer::new(7));
    let mut digests: Vec<_> = tree.iter().map(|d| blobs.put_directory(d)).collect();
    let root = digests.remove(0);

    let fetcher = BytestreamFetcher::new(blobs.clone());
    let mut walk = TreeWalk::new(root.clone());
    assert!(!walk.is_complete());
    walk.resolve(&fetcher).await.unwrap();

    assert!(walk.is_complete());
    assert_eq!(walk.pending(), 0);
    let directories = walk.into_directories();
    assert_eq!(directories.keys().cloned().collect::<HashSet<_>>(), keys(&tree));

    let reads = blobs.reads.lock();
    assert_eq!(reads.len(), 5);
    assert_eq!(reads[0], BytestreamFetcher::resource_name(&root));
}

#[tokio::test]
async fn walk_fetches_a_shared_child_once() {
    let tree = diamond_tree();
    let blobs = Arc::new(BlobServer::new(32));
    let digests: Vec<_> = tree.iter().map(|d| blobs.put_directory(d)).collect();

    let mut walk = TreeWalk::new(digests[0].clone());
    walk.resolve(&BytestreamFetcher::new(blobs.clone()))
        .await
        .unwrap();

    let directories = walk.into_directories();
    assert_eq!(directories.len(), 4);
    assert_eq!(directories.keys().cloned().collect::<HashSet<_>>(), keys(&tree));

    let reads = blobs.reads.lock();
    assert_eq!(reads.len(), 4);
    let distinct: HashSet<&String> = reads.iter().collect();
    assert_eq!(distinct.len(), 4);
    let shared = BytestreamFetcher::resource_name(&digests[3]);
    assert_eq!(reads.iter().filter(|read| **read == shared).count(), 1);
}

#[tokio::test]
async fn walk_detects_substituted_content() {
    let genuine = Directory {
        files: vec![file("aaaa", b"one")],
        ..Default::default()
    };
    let forged = Directory {
        files: vec![file("bbbb", b"one")],
        ..Default::default()
    };
    let digest = digest_of(&genuine);
    let blobs = Arc::new(BlobServer::new(64));
    // Same length, different bytes.
    blobs.put(&digest, prost::Message::encode_to_vec(&forged));

    let mut walk = TreeWalk::new(digest.clone());
    let err = walk
        .resolve(&BytestreamFetcher::new(blobs))
        .await
        .unwrap_err();

    match err {
        FetchError::DigestMismatch { expected, actual } => {
            assert_eq!(expected, digest.to_string());
            assert_eq!(actual, digest_of(&forged).to_string());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn short_blob_is_incomplete() {
    let directory = five_directory_tree().remove(0);
    let digest = digest_of(&directory);
    let mut bytes = prost::Message::encode_to_vec(&directory);
    bytes.truncate(bytes.len() - 1);
    let blobs = Arc::new(BlobServer::new(16));
    blobs.put(&digest, bytes);

    let err = BytestreamFetcher::new(blobs)
        .fetch_bytes(&digest)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::IncompleteBlob { .. }));
}
