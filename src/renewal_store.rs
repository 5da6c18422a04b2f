//! Persistence of renewal definitions.

use std::path::PathBuf;

use async_trait::async_trait;
use eyre::WrapErr as _;

use crate::{
    renewal::Renewal,
    util::{safe_file_name, write_atomic},
};

const SUFFIX: &str = ".renewal.json";

#[async_trait]
pub trait RenewalStore: Send + Sync {
    /// All stored renewals, ordered by id.
    async fn load(&self) -> eyre::Result<Vec<Renewal>>;

    /// Persists one renewal. A deleted renewal is removed instead.
    async fn save(&self, renewal: &mut Renewal) -> eyre::Result<()>;

    async fn save_all(&self, renewals: &mut [Renewal]) -> eyre::Result<()> {
        for renewal in renewals {
            self.save(renewal).await?;
        }

        Ok(())
    }
}

/// One JSON file per renewal.
#[derive(Debug, Clone)]
pub struct FileRenewalStore {
    dir: PathBuf,
}

impl FileRenewalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileRenewalStore { dir: dir.into() }
    }

    fn file(&self, renewal: &Renewal) -> PathBuf {
        self.dir
            .join(format!("{}{SUFFIX}", safe_file_name(&renewal.id)))
    }
}

#[async_trait]
impl RenewalStore for FileRenewalStore {
    async fn load(&self) -> eyre::Result<Vec<Renewal>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).wrap_err_with(|| format!("reading {}", self.dir.display())),
        };

        let mut renewals = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(SUFFIX))
            {
                continue;
            }

            let json = tokio::fs::read_to_string(&path)
                .await
                .wrap_err_with(|| format!("reading {}", path.display()))?;

            // one broken file must not hold up every other renewal
            match serde_json::from_str::<Renewal>(&json) {
                Ok(renewal) => renewals.push(renewal),
                Err(err) => log::error!("Skipping unreadable renewal {}: {err}", path.display()),
            }
        }

        renewals.sort_by(|a, b| a.id.cmp(&b.id));
        log::debug!("Loaded {} renewal(s) from {}", renewals.len(), self.dir.display());

        Ok(renewals)
    }

    async fn save(&self, renewal: &mut Renewal) -> eyre::Result<()> {
        let file = self.file(renewal);

        if renewal.deleted {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => log::info!("Renewal {renewal} deleted"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).wrap_err_with(|| format!("removing {}", file.display()))
                }
            }
            return Ok(());
        }

        let json = serde_json::to_string_pretty(renewal)?;
        write_atomic(&file, json).await?;

        renewal.new = false;
        renewal.updated = false;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{
        plugins::{
            order::OrderOptions, store::StoreOptions, target::TargetOptions,
            validation::ValidationOptions,
        },
        renewal::RenewResult,
    };

    fn renewal(host: &str) -> Renewal {
        Renewal::new(
            TargetOptions::Manual {
                common_name: None,
                hosts: vec![host.to_owned()],
            },
            ValidationOptions::FileSystem {
                path: Some("/var/www".into()),
            },
        )
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRenewalStore::new(dir.path().join("missing"));

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRenewalStore::new(dir.path());

        let mut first = renewal("a.example.com");
        first.order = OrderOptions::Host;
        first.stores.push(StoreOptions::PemFiles {
            path: "/etc/ssl/wacs".into(),
        });
        first
            .history
            .push(RenewResult::failure(datetime!(2024-01-01 0:00 UTC), "boom"));
        let mut second = renewal("b.example.com");

        store.save(&mut first).await.unwrap();
        store.save(&mut second).await.unwrap();
        assert!(!first.new);

        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);

        let restored = loaded.iter().find(|r| r.id == first.id).unwrap();
        assert_eq!(restored, &first);

        let idx = loaded.iter().position(|r| r.id == second.id).unwrap();
        loaded[idx].deleted = true;
        store.save_all(&mut loaded).await.unwrap();

        let remaining = store.load().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, first.id);
    }

    #[tokio::test]
    async fn broken_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRenewalStore::new(dir.path());

        store.save(&mut renewal("a.example.com")).await.unwrap();
        std::fs::write(dir.path().join(format!("broken{SUFFIX}")), "{").unwrap();

        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}
