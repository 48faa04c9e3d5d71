//! A library of functionality for decoding sample barcodes on sequencing records.
//!
//! # Overview
//!
//! The flow of data is as follows:
//!
//! - The [`barcode_catalog::BarcodeCatalog`] is loaded from the barcode file, with a synthetic
//!   unassigned entry ahead of the expected barcodes.
//! - The read groups of the input header are expanded into one read group per original group and
//!   barcode by [`read_group::rewrite`], and the header is written before any record.
//! - The [`processor::RecordProcessor`] reads each record, cleans its barcode with the
//!   [`quality::QualityFilter`], assigns it with a [`classifier::Classifier`], tags it (and its
//!   mate) with the new read group, and writes it.
//! - [`metrics`] are accumulated per barcode as records are classified and written once the input
//!   is exhausted.
//!
//! The record container is hidden behind the traits in [`record`]; [`sam`] implements them for
//! SAM (plain or BGZF compressed) and BAM using `noodles`.
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod barcode_catalog;
pub mod classifier;
pub mod errors;
pub mod metrics;
pub mod opts;
pub mod processor;
pub mod quality;
pub mod read_group;
pub mod record;
pub mod run;
pub mod sam;
pub mod utils;
