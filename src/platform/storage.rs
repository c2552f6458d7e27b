use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::CredentialStore;
use crate::{credentials::Credentials, error::StoreError};

/// On-disk layout. A missing identifier means unprovisioned.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct Record {
    ssid: Option<String>,
    password: Option<String>,
}

/// One ron file per namespace, replaced atomically on every save.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.ron", namespace)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&mut self) -> Result<Option<Credentials>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: Record =
            ron::from_str(&text).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(match record.ssid {
            Some(ssid) if !ssid.is_empty() => {
                Some(Credentials::new(ssid, record.password.unwrap_or_default()))
            }
            _ => None,
        })
    }

    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let record = Record {
            ssid: Some(credentials.ssid.clone()),
            password: Some(credentials.password.clone()),
        };
        let text = ron::to_string(&record).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let staging = self.path.with_extension("ron.tmp");
        {
            let mut file = File::create(&staging)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        info!("storage: credentials for {:?} saved", credentials.ssid);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("storage: credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("storage: nothing to clear");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path(), "wifi");
        let creds = Credentials::new("home", "hunter22");

        store.save(&creds).unwrap();

        let mut reopened = FileCredentialStore::new(dir.path(), "wifi");
        assert_eq!(reopened.load().unwrap(), Some(creds));
    }

    #[test]
    fn empty_store_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path().join("nested"), "wifi");
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn clear_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path(), "wifi");
        store.save(&Credentials::new("home", "hunter22")).unwrap();

        store.clear().unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn record_without_identifier_is_unprovisioned() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path(), "wifi");
        fs::write(store.path(), r#"(password: Some("orphan"))"#).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path(), "wifi");
        fs::write(store.path(), "not ron at all {").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn save_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path(), "wifi");
        store.save(&Credentials::new("old", "password1")).unwrap();
        store.save(&Credentials::new("new", "password2")).unwrap();

        assert_eq!(
            store.load().unwrap(),
            Some(Credentials::new("new", "password2"))
        );
        assert!(!dir.path().join("wifi.ron.tmp").exists());
    }
}
