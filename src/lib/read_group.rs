//! Rewriting of read groups so that every decoded read still references a declared group.
//!
//! Each original read group is expanded into one group per catalogue entry (unassigned first,
//! then the real barcodes in catalogue order).  A group is modelled as an ordered list of
//! `TAG`/`VALUE` fields rather than a header string, so the rewrite is a pure transform over the
//! fields.

use std::fmt::{self, Display};

use crate::{
    barcode_catalog::{BarcodeCatalog, BarcodeEntry, UNASSIGNED_INDEX},
    errors::DecodeError,
    record::GroupingMetadata,
};

/// The read group identifier field.
pub const ID_TAG: &str = "ID";
/// The platform unit field, which gets the barcode name appended.
pub const PLATFORM_UNIT_TAG: &str = "PU";
/// The library field.
pub const LIBRARY_TAG: &str = "LB";
/// The sample field.
pub const SAMPLE_TAG: &str = "SM";
/// The description field.
pub const DESCRIPTION_TAG: &str = "DS";

/// The separator between an original value and the barcode name.
pub const BARCODE_SEPARATOR: char = '#';

/// Append `#name` to `value`.
pub fn with_barcode_suffix(value: &str, name: &str) -> String {
    format!("{}{}{}", value, BARCODE_SEPARATOR, name)
}

/// A read group descriptor: an ordered set of tag/value fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadGroup {
    fields: Vec<(String, String)>,
}

impl ReadGroup {
    /// Create a read group from its fields, in the order they should be written.
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// The fields of this group, in order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// The value of the `ID` field, if any.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_TAG)
    }

    /// The value of the first field named `tag`, if any.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.iter().find(|(t, _)| t == tag).map(|(_, v)| v.as_str())
    }

    /// Set the value of the field named `tag`, appending the field if absent.
    pub fn set(&mut self, tag: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(t, _)| t == tag) {
            Some((_, v)) => *v = value,
            None => self.fields.push((tag.to_string(), value)),
        }
    }

    /// Derive the group for reads of `self` assigned to `entry`.
    ///
    /// The identifier becomes `ID#name` and any `PU` gets `#name` appended.  For a real barcode the
    /// `LB`, `SM`, and `DS` fields present on the original are replaced with the entry's values;
    /// for the unassigned entry they are kept as is.
    fn for_barcode(&self, entry: &BarcodeEntry, is_unassigned: bool) -> Result<Self, DecodeError> {
        let id = self
            .id()
            .ok_or_else(|| DecodeError::MissingReadGroupId { group: self.to_string() })?;
        let new_id = with_barcode_suffix(id, &entry.name);

        let fields = self
            .fields
            .iter()
            .map(|(tag, value)| {
                let value = match tag.as_str() {
                    ID_TAG => new_id.clone(),
                    PLATFORM_UNIT_TAG => with_barcode_suffix(value, &entry.name),
                    LIBRARY_TAG if !is_unassigned => entry.library.clone(),
                    SAMPLE_TAG if !is_unassigned => entry.sample.clone(),
                    DESCRIPTION_TAG if !is_unassigned => entry.description.clone(),
                    _ => value.clone(),
                };
                (tag.clone(), value)
            })
            .collect();
        Ok(Self { fields })
    }
}

impl Display for ReadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tag, value) in &self.fields {
            if !first {
                write!(f, "\t")?;
            }
            write!(f, "{}:{}", tag, value)?;
            first = false;
        }
        Ok(())
    }
}

/// The program that produced the output, recorded in the output metadata for provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// The program name, also the preferred identifier.
    pub name: String,
    /// The program version.
    pub version: String,
    /// The full command line the program was invoked with.
    pub command_line: String,
}

/// Expand every group in `groups` into one group per entry in `catalog`.
///
/// For `N` groups and a catalogue of `M` entries (including unassigned) this returns `N × M`
/// groups: for each original group, the unassigned group first and then one per real barcode.
///
/// # Errors
///
/// - [`DecodeError::MissingReadGroupId`] if any group lacks an `ID` field
pub fn rewrite_groups(
    groups: &[ReadGroup],
    catalog: &BarcodeCatalog,
) -> Result<Vec<ReadGroup>, DecodeError> {
    let mut rewritten = Vec::with_capacity(groups.len() * catalog.len());
    for group in groups {
        for (index, entry) in catalog.entries().iter().enumerate() {
            rewritten.push(group.for_barcode(entry, index == UNASSIGNED_INDEX)?);
        }
    }
    Ok(rewritten)
}

/// Rewrite the read groups of `metadata` for `catalog` and record `provenance`.
///
/// Returns the number of groups written.
pub fn rewrite<M: GroupingMetadata>(
    metadata: &mut M,
    catalog: &BarcodeCatalog,
    provenance: &Provenance,
) -> Result<usize, DecodeError> {
    let rewritten = rewrite_groups(&metadata.read_groups()?, catalog)?;
    let count = rewritten.len();
    metadata.replace_read_groups(rewritten)?;
    metadata.add_provenance(provenance)?;
    Ok(count)
}
