//! Assigns an observed barcode to the closest entry of a [`BarcodeCatalog`].
//!
//! The distance from an observed barcode to an expected barcode is the number of positions where
//! both bases are called and differ; a no-call on either side never counts as a mismatch.  The
//! closest expected barcode is accepted only if the observed barcode has few enough no-calls, is
//! close enough, and is sufficiently further from every other expected barcode.  Otherwise the read
//! is assigned to the unassigned entry.

use std::cell::RefCell;

use cached::{Cached, SizedCache};

use crate::barcode_catalog::{is_no_call, BarcodeCatalog, UNASSIGNED_INDEX};

/// The default number of observed barcodes remembered by the [`CachedClassifier`].
pub const DEFAULT_CACHE_SIZE: usize = 100_000;

/// The thresholds used to accept or reject the closest expected barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierThresholds {
    /// Max no-calls in an observed barcode before it is considered unmatchable.
    pub max_no_calls: usize,
    /// Max mismatches between the observed barcode and the best expected barcode.
    pub max_mismatches: usize,
    /// Min difference between the mismatches to the best and second best expected barcodes.
    pub min_mismatch_delta: usize,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self { max_no_calls: 2, max_mismatches: 1, min_mismatch_delta: 1 }
    }
}

/// The base trait for the classifiers.
///
/// Returns the index into the catalogue of the chosen entry, which is
/// [`UNASSIGNED_INDEX`] when no expected barcode is acceptable.
pub trait Classifier {
    fn classify(&self, observed: &[u8]) -> usize;

    /// The catalogue the classifier assigns reads to.
    fn catalog(&self) -> &BarcodeCatalog;
}

/// Classifies every observed barcode by comparing it against each expected barcode.
#[derive(Debug, Clone, Copy)]
pub struct MismatchClassifier<'a> {
    pub catalog: &'a BarcodeCatalog,
    pub thresholds: ClassifierThresholds,
}

impl<'a> MismatchClassifier<'a> {
    pub fn new(catalog: &'a BarcodeCatalog, thresholds: ClassifierThresholds) -> Self {
        Self { catalog, thresholds }
    }
}

impl<'a> Classifier for MismatchClassifier<'a> {
    fn classify(&self, observed: &[u8]) -> usize {
        classify(observed, self.catalog, &self.thresholds)
    }

    fn catalog(&self) -> &BarcodeCatalog {
        self.catalog
    }
}

/// A [`MismatchClassifier`] that remembers the result for recently observed barcodes.
///
/// Classification is a pure function of the observed barcode for a fixed catalogue and
/// thresholds, so cached results are always identical to recomputed ones.
pub struct CachedClassifier<'a> {
    inner: MismatchClassifier<'a>,
    cache: RefCell<SizedCache<Vec<u8>, usize>>,
}

impl<'a> CachedClassifier<'a> {
    /// Create a new [`CachedClassifier`] holding up to `cache_size` observed barcodes.
    ///
    /// # Panics
    ///
    /// - if `cache_size` is zero
    pub fn new(
        catalog: &'a BarcodeCatalog,
        thresholds: ClassifierThresholds,
        cache_size: usize,
    ) -> Self {
        Self {
            inner: MismatchClassifier::new(catalog, thresholds),
            cache: RefCell::new(SizedCache::with_size(cache_size)),
        }
    }
}

impl<'a> Classifier for CachedClassifier<'a> {
    fn classify(&self, observed: &[u8]) -> usize {
        let cache = &mut *self.cache.borrow_mut();
        let key = observed.to_vec();
        if let Some(index) = cache.cache_get(&key) {
            return *index;
        }
        let index = self.inner.classify(observed);
        cache.cache_set(key, index);
        index
    }

    fn catalog(&self) -> &BarcodeCatalog {
        self.inner.catalog
    }
}

/// Finds the best matching entry in the catalogue for the observed barcode.
///
/// The observed barcode is expected to already be the catalogue tag length.  Ties for the closest
/// barcode are resolved in favour of the first in catalogue order, though a tie also sets the
/// second best distance equal to the best, so a tie is only accepted when `min_mismatch_delta` is
/// zero.
pub fn classify(
    observed: &[u8],
    catalog: &BarcodeCatalog,
    thresholds: &ClassifierThresholds,
) -> usize {
    let tag_length = catalog.tag_length();
    let num_no_calls = count_no_calls(observed);

    let mut best_index: Option<usize> = None;
    let mut best_dist = tag_length;
    let mut next_best_dist = tag_length;
    for (index, entry) in catalog.entries().iter().enumerate().skip(UNASSIGNED_INDEX + 1) {
        let dist = count_mismatches(&entry.sequence, observed);
        if dist < best_dist {
            if best_index.is_some() {
                next_best_dist = best_dist;
            }
            best_dist = dist;
            best_index = Some(index);
        } else if dist < next_best_dist {
            next_best_dist = dist;
        }
    }

    match best_index {
        Some(index)
            if num_no_calls <= thresholds.max_no_calls
                && best_dist <= thresholds.max_mismatches
                && next_best_dist - best_dist >= thresholds.min_mismatch_delta =>
        {
            index
        }
        _ => UNASSIGNED_INDEX,
    }
}

/// Counts the mismatches between an expected and an observed barcode, ignoring no-calls.
///
/// Comparison stops at the end of the shorter of the two.
pub fn count_mismatches(expected: &[u8], observed: &[u8]) -> usize {
    expected
        .iter()
        .zip(observed.iter())
        .filter(|&(&e, &o)| !is_no_call(e) && !is_no_call(o) && e != o)
        .count()
}

/// Counts the no-calls (`N`, `n`, or `.`) in a barcode.
pub fn count_no_calls(barcode: &[u8]) -> usize {
    bytecount::count(barcode, b'N')
        + bytecount::count(barcode, b'n')
        + bytecount::count(barcode, b'.')
}
