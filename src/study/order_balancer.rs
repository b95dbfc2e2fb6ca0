//! Statement counterbalancing for a session's image selection.
//!
//! A session shows part of its images under its first statement and the rest
//! under the other one. Which images go first is decided by an
//! [`OrderStrategy`]:
//! - [`PairwiseHistory`] when every category contributed exactly two images:
//!   one image of each pair goes first, chosen to even out how often each image
//!   has been shown under either statement so far.
//! - [`HalfSplit`] otherwise: a shuffled selection cut into two halves.
//!
//! Either way the first-statement images, shuffled, precede the
//! second-statement images, shuffled.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::session_management::Statement;
use crate::storage::types::{Image, ImageCategory, StatementTally};

/// An image at its final position with the statement it is shown under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedImage {
    pub image: Image,
    pub order_index: u32,
    pub statement: Statement,
}

/// Decides which images of a selection are shown under the first statement.
pub trait OrderStrategy {
    fn name(&self) -> &'static str;

    /// Whether the selection has the shape this strategy needs.
    fn applies(&self, selection: &BTreeMap<ImageCategory, Vec<Image>>) -> bool;

    /// Returns `(first_half, second_half)`.
    fn split(
        &self,
        selection: &BTreeMap<ImageCategory, Vec<Image>>,
        first: Statement,
        tallies: &HashMap<String, StatementTally>,
        rng: &mut dyn rand::RngCore,
    ) -> (Vec<Image>, Vec<Image>);
}

/// Shuffle, then give the first ⌊N/2⌋ images the first statement.
pub struct HalfSplit;

impl OrderStrategy for HalfSplit {
    fn name(&self) -> &'static str {
        "half_split"
    }

    fn applies(&self, _selection: &BTreeMap<ImageCategory, Vec<Image>>) -> bool {
        true
    }

    fn split(
        &self,
        selection: &BTreeMap<ImageCategory, Vec<Image>>,
        _first: Statement,
        _tallies: &HashMap<String, StatementTally>,
        rng: &mut dyn rand::RngCore,
    ) -> (Vec<Image>, Vec<Image>) {
        let mut all: Vec<Image> = selection.values().flatten().cloned().collect();
        all.shuffle(rng);
        let second = all.split_off(all.len() / 2);
        (all, second)
    }
}

/// Per-category pairing that minimises each image's statement skew.
pub struct PairwiseHistory;

impl PairwiseHistory {
    /// Combined absolute skew of a pair after `lead` is shown under `first`
    /// and `other` under the remaining statement.
    fn cost(lead: i64, other: i64, first: Statement) -> i64 {
        let s = first.skew();
        (lead + s).abs() + (other - s).abs()
    }
}

impl OrderStrategy for PairwiseHistory {
    fn name(&self) -> &'static str {
        "pairwise_history"
    }

    fn applies(&self, selection: &BTreeMap<ImageCategory, Vec<Image>>) -> bool {
        !selection.is_empty() && selection.values().all(|images| images.len() == 2)
    }

    fn split(
        &self,
        selection: &BTreeMap<ImageCategory, Vec<Image>>,
        first: Statement,
        tallies: &HashMap<String, StatementTally>,
        rng: &mut dyn rand::RngCore,
    ) -> (Vec<Image>, Vec<Image>) {
        let imbalance = |img: &Image| {
            tallies
                .get(&img.image_id)
                .map(StatementTally::imbalance)
                .unwrap_or(0)
        };
        let mut lead = Vec::with_capacity(selection.len());
        let mut rest = Vec::with_capacity(selection.len());
        for pair in selection.values() {
            let (a, b) = (&pair[0], &pair[1]);
            let (da, db) = (imbalance(a), imbalance(b));
            let a_first = Self::cost(da, db, first);
            let b_first = Self::cost(db, da, first);
            let a_leads = match a_first.cmp(&b_first) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => rng.gen_bool(0.5),
            };
            if a_leads {
                lead.push(a.clone());
                rest.push(b.clone());
            } else {
                lead.push(b.clone());
                rest.push(a.clone());
            }
        }
        (lead, rest)
    }
}

/// Picks the session's first statement and lays out the final presentation order.
///
/// `tallies` holds the historical statement counts of the selected images;
/// only the pairwise strategy reads it.
pub fn assign_order<R: Rng>(
    selection: &BTreeMap<ImageCategory, Vec<Image>>,
    tallies: &HashMap<String, StatementTally>,
    rng: &mut R,
) -> (Statement, Vec<PlannedImage>) {
    let first = if rng.gen_bool(0.5) {
        Statement::One
    } else {
        Statement::Two
    };
    let strategy: &dyn OrderStrategy = if PairwiseHistory.applies(selection) {
        &PairwiseHistory
    } else {
        &HalfSplit
    };
    debug!(
        "Ordering {} images with {} strategy, first statement {}",
        selection.values().map(Vec::len).sum::<usize>(),
        strategy.name(),
        u8::from(first)
    );

    let (mut lead, mut rest) = strategy.split(selection, first, tallies, &mut *rng);
    lead.shuffle(rng);
    rest.shuffle(rng);

    let planned = lead
        .into_iter()
        .map(|image| (image, first))
        .chain(rest.into_iter().map(|image| (image, first.other())))
        .enumerate()
        .map(|(i, (image, statement))| PlannedImage {
            image,
            order_index: i as u32,
            statement,
        })
        .collect();
    (first, planned)
}
