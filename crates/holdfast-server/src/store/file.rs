//! JSON file store.
//!
//! The whole [`StoreData`] snapshot is rewritten on every mutation: written
//! to a temporary file, restricted to the owner, then renamed over the
//! previous file. A mutation is only visible in memory once it is on disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use holdfast_core::{AccountId, BlackoutPeriod, CalendarAccount, TimeWindow, WorkingHours};
use holdfast_providers::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AccountStore, ExclusionStore, HoldStore, StoreData};
use crate::error::{StoreError, StoreResult};
use crate::hold::{AggregateHold, HoldId, HoldState, HoldTransition};

/// A store persisted to a single JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl FileStore {
    /// Opens the store at `path`, loading existing data if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let data: StoreData =
                serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            info!(
                path = %path.display(),
                accounts = data.accounts.len(),
                holds = data.holds.len(),
                "Loaded store"
            );
            data
        } else {
            StoreData::default()
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the exclusion rules and persists them.
    pub async fn set_exclusions(
        &self,
        blackouts: Vec<BlackoutPeriod>,
        working_hours: Vec<WorkingHours>,
    ) -> StoreResult<()> {
        self.mutate(|data| {
            data.blackouts = blackouts;
            data.working_hours = working_hours;
            Ok(())
        })
        .await
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.data.write().await;
        let mut next = guard.clone();
        let value = f(&mut next)?;
        write_atomic(&self.path, &next)?;
        *guard = next;
        Ok(value)
    }
}

fn write_atomic(path: &Path, data: &StoreData) -> StoreResult<()> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(data).map_err(StoreError::Serialize)?;
    fs::write(&temp_path, content).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }

    fs::rename(&temp_path, path).map_err(io_err)?;
    debug!(path = %path.display(), "Persisted store");
    Ok(())
}

impl AccountStore for FileStore {
    fn active_accounts<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<CalendarAccount>>> {
        Box::pin(async move { Ok(self.data.read().await.active_accounts(owner_id)) })
    }

    fn upsert_account(&self, account: CalendarAccount) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.mutate(|data| {
                data.upsert_account(account);
                Ok(())
            })
            .await
        })
    }

    fn deactivate_account<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { self.mutate(|data| Ok(data.deactivate_account(id))).await })
    }
}

impl HoldStore for FileStore {
    fn insert_hold(&self, hold: AggregateHold) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move { self.mutate(|data| data.insert_hold(hold)).await })
    }

    fn get_hold<'a>(&'a self, id: &'a HoldId) -> BoxFuture<'a, StoreResult<Option<AggregateHold>>> {
        Box::pin(async move { Ok(self.data.read().await.get_hold(id)) })
    }

    fn active_hold_for_request<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<AggregateHold>>> {
        Box::pin(async move { Ok(self.data.read().await.active_hold_for_request(request_id)) })
    }

    fn transition<'a>(
        &'a self,
        id: &'a HoldId,
        expected: HoldState,
        transition: HoldTransition,
    ) -> BoxFuture<'a, StoreResult<AggregateHold>> {
        Box::pin(async move {
            self.mutate(|data| data.transition(id, expected, transition))
                .await
        })
    }

    fn expired_active_holds(
        &self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<AggregateHold>>> {
        Box::pin(async move { Ok(self.data.read().await.expired_active_holds(now)) })
    }
}

impl ExclusionStore for FileStore {
    fn blackouts<'a>(
        &'a self,
        owner_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, StoreResult<Vec<BlackoutPeriod>>> {
        Box::pin(async move { Ok(self.data.read().await.blackouts(owner_id, window)) })
    }

    fn working_hours<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Vec<WorkingHours>>> {
        Box::pin(async move { Ok(self.data.read().await.working_hours(owner_id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone, Weekday};
    use holdfast_core::{CredentialBundle, ProviderKind, TimeSlot};

    fn hold(request_id: &str, expires_at: DateTime<Utc>) -> AggregateHold {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let slot = TimeSlot::available(start, start + Duration::hours(1));
        AggregateHold::active(request_id, &slot, [], Utc::now(), expires_at)
    }

    #[tokio::test]
    async fn holds_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let past = Utc::now() - Duration::minutes(5);

        let abandoned = hold("req-1", past);
        {
            let store = FileStore::open(&path).unwrap();
            store.insert_hold(abandoned.clone()).await.unwrap();
            store
                .upsert_account(CalendarAccount::new(
                    "work",
                    "owner",
                    ProviderKind::Google,
                    CredentialBundle::new("token", Some("refresh".into()), None),
                ))
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let expired = reopened.expired_active_holds(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![abandoned]);
        assert_eq!(reopened.active_accounts("owner").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transitions_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let h = hold("req-1", Utc::now());
        let id = h.id.clone();

        let store = FileStore::open(&path).unwrap();
        store.insert_hold(h).await.unwrap();
        store
            .transition(&id, HoldState::Active, HoldTransition::to(HoldState::Expired))
            .await
            .unwrap();

        let reopened = FileStore::open(&path).unwrap();
        let stored = reopened.get_hold(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, HoldState::Expired);
    }

    #[tokio::test]
    async fn rejected_mutation_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.insert_hold(hold("req-1", Utc::now())).await.unwrap();

        assert!(store.insert_hold(hold("req-1", Utc::now())).await.is_err());

        let reopened = FileStore::open(&path).unwrap();
        let on_disk: StoreData =
            serde_json::from_str(&fs::read_to_string(reopened.path()).unwrap()).unwrap();
        assert_eq!(on_disk.holds.len(), 1);
    }

    #[tokio::test]
    async fn exclusions_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let store = FileStore::open(&path).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        store
            .set_exclusions(
                vec![],
                vec![WorkingHours::new(
                    "owner",
                    Weekday::Mon,
                    nine,
                    five,
                    chrono_tz::Europe::Paris,
                )],
            )
            .await
            .unwrap();

        let reopened = FileStore::open(&path).unwrap();
        let rows = reopened.working_hours("owner").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timezone, chrono_tz::Europe::Paris);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.insert_hold(hold("req-1", Utc::now())).await.unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
