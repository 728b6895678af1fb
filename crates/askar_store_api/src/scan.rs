use crate::backend::*;
use crate::store::*;
use crate::types::*;
use crate::*;
use std::sync::Arc;

/// A lazy, paged cursor over the entries of one profile.
///
/// The backend cursor is opened on the first call to [`Scan::next`].
/// Closing the store or removing the profile makes further calls fail
/// with `InvalidState`.
pub struct Scan {
    store: Store,
    profile: Arc<ProfileState>,
    query: Option<EntryQuery>,
    cursor: Option<BackendScan>,
    done: bool,
}

impl std::fmt::Debug for Scan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("store", &self.store)
            .field("started", &self.cursor.is_some())
            .field("done", &self.done)
            .finish()
    }
}

impl Scan {
    pub(crate) fn new(store: Store, profile: Arc<ProfileState>, query: EntryQuery) -> Self {
        Self {
            store,
            profile,
            query: Some(query),
            cursor: None,
            done: false,
        }
    }

    /// The next page of entries, or `None` once the scan is exhausted.
    pub async fn next(&mut self) -> AskarResult<Option<Vec<Entry>>> {
        if self.done {
            return Ok(None);
        }
        self.store.check_open()?;
        if self.profile.is_removed() {
            return Err(err_invalid_state("Profile has been removed"));
        }
        if self.cursor.is_none() {
            let query = self
                .query
                .take()
                .ok_or_else(|| err_invalid_state("Scan failed to start"))?;
            let cursor = self.store.backend().scan(self.profile.id, query).await?;
            self.cursor = Some(cursor);
        }
        let page = match self.cursor.as_mut() {
            Some(cursor) => cursor.next().await?,
            None => None,
        };
        match page {
            Some(page) => {
                let key = &self.profile.key;
                let entries = page
                    .iter()
                    .map(|enc| key.decrypt_entry(enc))
                    .collect::<AskarResult<Vec<_>>>()?;
                Ok(Some(entries))
            }
            None => {
                self.done = true;
                self.cursor = None;
                Ok(None)
            }
        }
    }

    /// Drain every remaining page.
    pub async fn fetch_all(mut self) -> AskarResult<Vec<Entry>> {
        let mut out = Vec::new();
        while let Some(page) = self.next().await? {
            out.extend(page);
        }
        Ok(out)
    }
}
