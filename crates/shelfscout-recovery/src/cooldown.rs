//! Cooldown stamps: when an expensive recovery action last succeeded for a
//! site. Stamps are written on success only and age out by comparison.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::persist::{read_json, site_file, write_json_atomic, SiteLocks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownKind {
    Prewarm,
    OperatorUnlock,
    StoreSelection,
}

impl CooldownKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prewarm => "prewarm",
            Self::OperatorUnlock => "operator_unlock",
            Self::StoreSelection => "store_selection",
        }
    }
}

impl std::fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// # Errors
    ///
    /// Storage failures.
    async fn last_success(
        &self,
        site: &str,
        kind: CooldownKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// # Errors
    ///
    /// Storage failures.
    async fn stamp(&self, site: &str, kind: CooldownKind, at: DateTime<Utc>)
        -> Result<(), StoreError>;
}

/// `true` while the last successful `kind` action for `site` is younger than
/// `window`. Unreadable stamps count as "no cooldown".
pub async fn is_active(
    store: &dyn CooldownStore,
    clock: &dyn Clock,
    site: &str,
    kind: CooldownKind,
    window: Duration,
) -> bool {
    match store.last_success(site, kind).await {
        Ok(Some(at)) => {
            let age = clock.now().signed_duration_since(at);
            age < chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX)
        }
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(site, kind = %kind, error = %e, "cooldown unreadable; treating as inactive");
            false
        }
    }
}

/// Records a success; failures are logged and swallowed.
pub async fn record(store: &dyn CooldownStore, clock: &dyn Clock, site: &str, kind: CooldownKind) {
    if let Err(e) = store.stamp(site, kind, clock.now()).await {
        tracing::warn!(site, kind = %kind, error = %e, "failed to write cooldown stamp");
    }
}

type Stamps = BTreeMap<CooldownKind, DateTime<Utc>>;

/// One JSON document per site under `<dir>/<site>.json`.
#[derive(Debug, Clone)]
pub struct FileCooldownStore {
    dir: PathBuf,
    locks: SiteLocks,
}

impl FileCooldownStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, locks: SiteLocks) -> Self {
        Self {
            dir: dir.into(),
            locks,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CooldownStore for FileCooldownStore {
    async fn last_success(
        &self,
        site: &str,
        kind: CooldownKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = site_file(&self.dir, site, ".json")?;
        let stamps: Option<Stamps> = read_json(&path).await?;
        Ok(stamps.and_then(|s| s.get(&kind).copied()))
    }

    async fn stamp(
        &self,
        site: &str,
        kind: CooldownKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let path = site_file(&self.dir, site, ".json")?;
        let _guard = self.locks.lock(site).await;
        let mut stamps: Stamps = match read_json(&path).await {
            Ok(stamps) => stamps.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(site, error = %e, "discarding unreadable cooldown file");
                Stamps::new()
            }
        };
        stamps.insert(kind, at);
        write_json_atomic(&path, "cooldown stamps", &stamps).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    stamps: Mutex<HashMap<(String, CooldownKind), DateTime<Utc>>>,
}

impl MemoryCooldownStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn last_success(
        &self,
        site: &str,
        kind: CooldownKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let stamps = self
            .stamps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(stamps.get(&(site.to_ascii_lowercase(), kind)).copied())
    }

    async fn stamp(
        &self,
        site: &str,
        kind: CooldownKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.stamps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((site.to_ascii_lowercase(), kind), at);
        Ok(())
    }
}
