//! Quality-aware cleanup of observed barcodes prior to classification.
use bstr::BString;

use crate::{barcode_catalog::NO_CALL, errors::DecodeError};

/// The offset of Phred+33 encoded base qualities.
const PHRED_OFFSET: i16 = 33;

/// Converts low-quality bases in an observed barcode to no-calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityFilter {
    /// Bases with a Phred quality less than or equal to this value are converted to `N`.
    pub max_low_quality_to_convert: u8,
}

impl QualityFilter {
    /// Create a new [`QualityFilter`].
    pub fn new(max_low_quality_to_convert: u8) -> Self {
        Self { max_low_quality_to_convert }
    }

    /// Returns a copy of `barcode` with every base whose quality is at or below the threshold
    /// replaced with `N`.
    ///
    /// If no quality is given the barcode is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::BarcodeQualityLengthMismatch`] if the barcode and quality lengths differ
    pub fn clean(&self, barcode: &[u8], quality: Option<&[u8]>) -> Result<BString, DecodeError> {
        let quality = match quality {
            None => return Ok(BString::from(barcode)),
            Some(quality) => quality,
        };
        if barcode.len() != quality.len() {
            return Err(DecodeError::BarcodeQualityLengthMismatch {
                barcode: String::from_utf8_lossy(barcode).to_string(),
                barcode_len: barcode.len(),
                quality_len: quality.len(),
            });
        }

        let threshold = i16::from(self.max_low_quality_to_convert);
        Ok(barcode
            .iter()
            .zip(quality.iter())
            .map(|(&base, &qual)| {
                if i16::from(qual) - PHRED_OFFSET <= threshold {
                    NO_CALL
                } else {
                    base
                }
            })
            .collect::<Vec<u8>>()
            .into())
    }
}

/// Fits an observed barcode to the catalogue tag length.
///
/// Longer barcodes are truncated.  Shorter barcodes are padded with `N` so the missing bases
/// count as no-calls rather than silently matching.
pub fn fit_to_tag_length(mut barcode: BString, tag_length: usize) -> BString {
    barcode.resize(tag_length, NO_CALL);
    barcode
}

#[cfg(test)]
mod test {
    use bstr::BString;
    use matches::assert_matches;
    use rstest::rstest;

    use super::{fit_to_tag_length, QualityFilter};
    use crate::errors::DecodeError;

    /// Encode Phred values as a Phred+33 string.
    fn quals(phred: &[u8]) -> Vec<u8> {
        phred.iter().map(|q| q + 33).collect()
    }

    #[test]
    fn test_clean_masks_low_quality() {
        let filter = QualityFilter::new(15);
        let cleaned = filter.clean(b"ACGT", Some(&quals(&[10, 20, 10, 20]))).unwrap();
        assert_eq!(cleaned, BString::from("NCNT"));
    }

    #[rstest]
    #[case(15, b"A", 15, "N")] // equal to the threshold is converted
    #[case(15, b"A", 16, "A")]
    #[case(0, b"A", 0, "N")]
    #[case(0, b"A", 1, "A")]
    #[case(40, b"a", 2, "N")]
    fn test_clean_threshold_boundary(
        #[case] threshold: u8,
        #[case] base: &[u8],
        #[case] phred: u8,
        #[case] expected: &str,
    ) {
        let cleaned = QualityFilter::new(threshold).clean(base, Some(&quals(&[phred]))).unwrap();
        assert_eq!(cleaned, BString::from(expected));
    }

    #[test]
    fn test_clean_without_quality_is_unchanged() {
        let cleaned = QualityFilter::new(60).clean(b"ACGTN", None).unwrap();
        assert_eq!(cleaned, BString::from("ACGTN"));
    }

    #[test]
    fn test_clean_length_mismatch() {
        let result = QualityFilter::new(15).clean(b"ACGT", Some(b"III"));
        assert_matches!(
            result,
            Err(DecodeError::BarcodeQualityLengthMismatch { barcode_len: 4, quality_len: 3, .. })
        );
    }

    #[test]
    fn test_clean_quality_below_offset_does_not_underflow() {
        let cleaned = QualityFilter::new(0).clean(b"AC", Some(b" I")).unwrap();
        assert_eq!(cleaned, BString::from("NC"));
    }

    #[rstest]
    #[case("ACGTAC", 4, "ACGT")]
    #[case("ACGT", 4, "ACGT")]
    #[case("AC", 4, "ACNN")]
    #[case("ACGT", 0, "")]
    fn test_fit_to_tag_length(#[case] barcode: &str, #[case] len: usize, #[case] expected: &str) {
        assert_eq!(fit_to_tag_length(BString::from(barcode), len), BString::from(expected));
    }
}
