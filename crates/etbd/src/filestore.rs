//! Content-addressed file store.
//!
//! Blobs live once per node under a two-level hex-prefix layout keyed by
//! SHA-1 of the body. A named-path mirror records which blob each tracked
//! path points at, and a working tree holds the materialised copies that
//! `ls` classifies. Writes are atomic at blob granularity (write to a
//! temp file, then rename).
//!
//! Layout under the node working directory:
//!
//!   blobs/ab/cdef...   blob bodies
//!   mirror/<path>      tracked paths; file content is the blob hex digest
//!   files/<path>       working copies
//!   queries/<id>/      transient per-query wrapper workspaces

use crate::fabric::Fabric;
use crate::peer_client;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use etb_core::wire::{LsListing, Method, ResponseData};
use etb_core::{sha1_hex, FileRef};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    // serialises mirror/working-tree updates; blob writes are atomic anyway
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<FileStore> {
        let root = root.into();
        for sub in ["blobs", "mirror", "files", "queries"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(FileStore {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let (prefix, rest) = hash.split_at(2.min(hash.len()));
        self.root.join("blobs").join(prefix).join(rest)
    }

    /// Reject absolute destinations and parent traversal.
    fn checked_rel(path: &str) -> io::Result<PathBuf> {
        let rel = PathBuf::from(path);
        let bad = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if bad || path.is_empty() {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("illegal path {:?}", path),
            ))
        } else {
            Ok(rel)
        }
    }

    fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("tmp");
        fs::write(&temp, data)?;
        fs::rename(&temp, path)
    }

    /// Store a blob; returns its hash. Idempotent.
    pub fn put_blob(&self, bytes: &[u8]) -> io::Result<String> {
        let hash = sha1_hex(bytes);
        let path = self.blob_path(&hash);
        if !path.exists() {
            Self::atomic_write(&path, bytes)?;
        }
        Ok(hash)
    }

    /// Store a file body under a destination path: blob, working copy and
    /// mirror entry. Returns the content-addressed reference.
    pub fn put_bytes(&self, dest: &str, bytes: &[u8]) -> io::Result<FileRef> {
        let rel = Self::checked_rel(dest)?;
        let hash = self.put_blob(bytes)?;
        let _guard = self.lock.lock().unwrap();
        Self::atomic_write(&self.root.join("files").join(&rel), bytes)?;
        Self::atomic_write(&self.root.join("mirror").join(&rel), hash.as_bytes())?;
        Ok(FileRef::new(dest, hash))
    }

    pub fn has(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Read the blob of a reference; `None` when it is not stored locally.
    pub fn get(&self, fileref: &FileRef) -> io::Result<Option<Vec<u8>>> {
        let path = self.blob_path(&fileref.sha1);
        if !path.exists() {
            return Ok(None);
        }
        fs::read(path).map(Some)
    }

    /// Copy a locally stored blob into `dir` under the reference's file
    /// name; used to stage wrapper inputs.
    pub fn materialize(&self, fileref: &FileRef, dir: &Path) -> io::Result<PathBuf> {
        let bytes = self.get(fileref)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("blob {} not stored locally", fileref.sha1),
            )
        })?;
        let name = Path::new(&fileref.file)
            .file_name()
            .map(|n| n.to_owned())
            .unwrap_or_else(|| std::ffi::OsString::from("input"));
        let target = dir.join(name);
        Self::atomic_write(&target, &bytes)?;
        Ok(target)
    }

    /// Transient workspace for one query or wrapper invocation.
    pub fn workspace(&self, name: &str) -> io::Result<PathBuf> {
        let dir = self.root.join("queries").join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Classify a working-tree directory against the mirror.
    pub fn ls(&self, dir: &str) -> io::Result<LsListing> {
        let rel = if dir.is_empty() || dir == "." {
            PathBuf::new()
        } else {
            Self::checked_rel(dir)?
        };
        let base = self.root.join("files").join(&rel);
        let mut listing = LsListing::default();
        if !base.exists() {
            return Ok(listing);
        }
        let _guard = self.lock.lock().unwrap();
        for entry in fs::read_dir(&base)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let shown = if rel.as_os_str().is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel.display(), name)
            };
            if entry.file_type()?.is_dir() {
                listing.dirs.push(shown);
                continue;
            }
            let mirror_entry = self.root.join("mirror").join(&rel).join(&name);
            if !mirror_entry.exists() {
                listing.untracked.push(shown);
                continue;
            }
            let recorded = fs::read_to_string(&mirror_entry)?;
            let actual = sha1_hex(&fs::read(entry.path())?);
            if recorded.trim() == actual {
                listing.in_sync.push(shown);
            } else {
                listing.outdated.push(shown);
            }
        }
        for bucket in [
            &mut listing.dirs,
            &mut listing.in_sync,
            &mut listing.outdated,
            &mut listing.untracked,
        ] {
            bucket.sort();
        }
        Ok(listing)
    }
}

/// Make a reference's blob locally resolvable, pulling it from the first
/// reachable peer that stores it. Integrity is verified by recomputing the
/// hash after transfer; a mismatch is fatal for the fetch.
pub async fn ensure_local(
    store: &FileStore,
    fabric: &Fabric,
    fileref: &FileRef,
    timeout: Duration,
) -> Result<(), String> {
    if store.has(&fileref.sha1) {
        return Ok(());
    }
    for peer in fabric.reachable_peers() {
        let (host, port) = fabric.dial_addr(&peer.id).unwrap_or((peer.host.clone(), peer.port));
        let reply = peer_client::call(
            &host,
            port,
            Method::FetchBlob {
                file: fileref.clone(),
            },
            timeout,
        )
        .await;
        match reply {
            Ok(ResponseData::FileContents { contents }) => {
                let bytes = BASE64
                    .decode(contents.as_bytes())
                    .map_err(|e| format!("peer {} sent undecodable blob: {}", peer.id, e))?;
                let actual = sha1_hex(&bytes);
                if actual != fileref.sha1 {
                    return Err(format!(
                        "file integrity failure for {}: expected {}, got {} from peer {}",
                        fileref.file, fileref.sha1, actual, peer.id
                    ));
                }
                store
                    .put_blob(&bytes)
                    .map_err(|e| format!("failed to store fetched blob: {}", e))?;
                debug!("fetched blob {} from peer {}", fileref.sha1, peer.id);
                return Ok(());
            }
            Ok(_) | Err(_) => {
                warn!("peer {} could not serve blob {}", peer.id, fileref.sha1);
                continue;
            }
        }
    }
    Err(format!(
        "no reachable peer stores blob {} ({})",
        fileref.sha1, fileref.file
    ))
}
