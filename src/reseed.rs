//! Packaging engine shell.
//!
//! Scans the netDb directory for router records and keeps an in-memory
//! snapshot that is rebuilt on a fixed interval. Bundle encoding lives
//! outside this crate; the [`Reseeder`] owns the signing identity it will use.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::credentials::SigningIdentity;

/// File name prefix of router info records
pub const ROUTER_INFO_PREFIX: &str = "routerInfo-";

/// File name suffix of router info records
pub const ROUTER_INFO_SUFFIX: &str = ".dat";

/// A router info file found in the netDb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterRecord {
    pub name: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

/// Supplies the records to package.
pub trait DataSource: Send + Sync {
    fn scan(&self) -> io::Result<Vec<RouterRecord>>;
}

/// A netDb directory on local disk
#[derive(Debug, Clone)]
pub struct LocalNetDb {
    root: PathBuf,
}

impl LocalNetDb {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DataSource for LocalNetDb {
    /// Collect `routerInfo-*.dat` files from the root and its immediate
    /// subdirectories (netDb buckets them as `r?/`).
    fn scan(&self) -> io::Result<Vec<RouterRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                for inner in std::fs::read_dir(entry.path())? {
                    let inner = inner?;
                    if inner.file_type()?.is_file() {
                        push_record(&mut records, &inner);
                    }
                }
            } else if file_type.is_file() {
                push_record(&mut records, &entry);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

fn push_record(records: &mut Vec<RouterRecord>, entry: &std::fs::DirEntry) {
    let name = entry.file_name().to_string_lossy().into_owned();
    if !name.starts_with(ROUTER_INFO_PREFIX) || !name.ends_with(ROUTER_INFO_SUFFIX) {
        return;
    }
    records.push(RouterRecord {
        modified: entry.metadata().and_then(|m| m.modified()).ok(),
        path: entry.path(),
        name,
    });
}

/// The latest scan result
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Arc<Vec<RouterRecord>>,
    pub built_at: Option<SystemTime>,
}

/// Rebuilds the record snapshot from a [`DataSource`].
pub struct Reseeder {
    source: Box<dyn DataSource>,
    signer: SigningIdentity,
    snapshot: RwLock<Snapshot>,
}

impl Reseeder {
    pub fn new(source: Box<dyn DataSource>, signer: SigningIdentity) -> Self {
        Self {
            source,
            signer,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn signer(&self) -> &SigningIdentity {
        &self.signer
    }

    pub fn snapshot(&self) -> Snapshot {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rescan the data source and replace the snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub fn rebuild(&self) -> io::Result<usize> {
        let records = self.source.scan()?;
        let count = records.len();
        let snapshot = Snapshot {
            records: Arc::new(records),
            built_at: Some(SystemTime::now()),
        };
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        Ok(count)
    }

    /// Rebuild now and then every `interval` until `stop` is set.
    pub fn spawn_rebuild_loop(
        self: Arc<Self>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.rebuild() {
                            Ok(count) => tracing::info!(records = count, "Rebuilt reseed snapshot"),
                            Err(e) => tracing::error!(error = %e, "Failed to scan netDb, keeping previous snapshot"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            tracing::debug!("Reseed rebuild loop stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    fn signer() -> SigningIdentity {
        SigningIdentity::new("me@mail.i2p", SigningKey::from_bytes(&[5u8; 32]))
    }

    fn netdb_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("rA");
        std::fs::create_dir(&bucket).unwrap();
        std::fs::write(bucket.join("routerInfo-AAAA.dat"), b"ri").unwrap();
        std::fs::write(bucket.join("routerInfo-BBBB.dat"), b"ri").unwrap();
        std::fs::write(bucket.join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("routerInfo-CCCC.dat"), b"ri").unwrap();
        dir
    }

    #[test]
    fn scans_buckets_for_router_infos() {
        let dir = netdb_fixture();
        let records = LocalNetDb::new(dir.path()).scan().unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            ["routerInfo-AAAA.dat", "routerInfo-BBBB.dat", "routerInfo-CCCC.dat"]
        );
    }

    #[test]
    fn failed_rebuild_keeps_snapshot() {
        let dir = netdb_fixture();
        let root = dir.path().to_path_buf();
        let reseeder = Reseeder::new(Box::new(LocalNetDb::new(&root)), signer());

        assert_eq!(reseeder.rebuild().unwrap(), 3);
        drop(dir);

        assert!(reseeder.rebuild().is_err());
        let snapshot = reseeder.snapshot();
        assert_eq!(snapshot.records.len(), 3);
        assert!(snapshot.built_at.is_some());
    }

    #[tokio::test]
    async fn rebuild_loop_stops_on_signal() {
        let dir = netdb_fixture();
        let reseeder = Arc::new(Reseeder::new(
            Box::new(LocalNetDb::new(dir.path())),
            signer(),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = reseeder
            .clone()
            .spawn_rebuild_loop(Duration::from_millis(10), stop_rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reseeder.snapshot().records.len(), 3);
    }
}
