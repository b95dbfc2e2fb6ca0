//! Image pool allocation with claim-or-skip reservations.
//!
//! Every session start asks the pool for a fixed number of images per
//! category. Candidates come from storage ranked least-used first; the
//! in-process [`ReservationLedger`] then hands each candidate to at most one
//! in-flight start. An image already claimed by another start is skipped, never
//! waited for, so two starts racing over a small category cannot both receive
//! the same image and neither stalls: the loser sees fewer rows and reports
//! [`SessionError::InsufficientImages`].
//!
//! A [`Reservation`] releases its claims when dropped, which callers do after
//! the session-start transaction has committed or failed. Reserving performs no
//! writes; the assignment counters are bumped by the session-start transaction.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::error_handling::types::SessionError;
use crate::storage::types::{Image, ImageCategory};
use crate::storage::DatabaseStorage;

/// Shared set of image ids currently claimed by in-flight session starts.
#[derive(Clone, Default)]
pub struct ReservationLedger {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl ReservationLedger {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.claimed.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claims the first `count` unclaimed candidates, keeping their ranking.
    ///
    /// On shortfall nothing is claimed and the number of unclaimed
    /// candidates is returned as the error.
    fn claim(&self, candidates: Vec<Image>, count: usize) -> Result<Vec<Image>, usize> {
        let mut claimed = self.lock();
        let free: Vec<Image> = candidates
            .into_iter()
            .filter(|img| !claimed.contains(&img.image_id))
            .collect();
        if free.len() < count {
            return Err(free.len());
        }
        let taken: Vec<Image> = free.into_iter().take(count).collect();
        for img in &taken {
            claimed.insert(img.image_id.clone());
        }
        Ok(taken)
    }

    fn release(&self, ids: &[String]) {
        let mut claimed = self.lock();
        for id in ids {
            claimed.remove(id);
        }
    }

    pub fn claimed_count(&self) -> usize {
        self.lock().len()
    }
}

/// Images held for one session start, grouped by category.
pub struct Reservation {
    ledger: ReservationLedger,
    ids: Vec<String>,
    by_category: BTreeMap<ImageCategory, Vec<Image>>,
}

impl Reservation {
    pub fn by_category(&self) -> &BTreeMap<ImageCategory, Vec<Image>> {
        &self.by_category
    }

    pub fn image_ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.ledger.release(&self.ids);
    }
}

/// Allocator over the shared image pool.
#[derive(Clone)]
pub struct ImagePool {
    storage: DatabaseStorage,
    ledger: ReservationLedger,
}

impl ImagePool {
    pub fn new(storage: DatabaseStorage) -> Self {
        Self {
            storage,
            ledger: ReservationLedger::default(),
        }
    }

    pub fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    /// Reserves `count` images in every listed category, or none at all.
    ///
    /// Categories are served in the order given; the first one that falls
    /// short aborts the whole reservation and releases earlier claims.
    pub async fn reserve(
        &self,
        plan: &[(ImageCategory, usize)],
    ) -> Result<Reservation, SessionError> {
        let mut reservation = Reservation {
            ledger: self.ledger.clone(),
            ids: Vec::new(),
            by_category: BTreeMap::new(),
        };
        for &(category, count) in plan {
            if count == 0 {
                continue;
            }
            let candidates = self.storage.image_candidates(category).await?;
            match self.ledger.claim(candidates, count) {
                Ok(taken) => {
                    debug!("Reserved {} images in {}", taken.len(), category);
                    reservation
                        .ids
                        .extend(taken.iter().map(|img| img.image_id.clone()));
                    reservation
                        .by_category
                        .entry(category)
                        .or_default()
                        .extend(taken);
                }
                Err(available) => {
                    warn!(
                        "Not enough images in {}: needed {}, available {}",
                        category, count, available
                    );
                    return Err(SessionError::InsufficientImages {
                        category: category.as_str().to_string(),
                        needed: count,
                        available,
                    });
                }
            }
        }
        Ok(reservation)
    }
}
