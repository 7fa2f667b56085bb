use std::collections::BTreeSet;

pub const FIT_SUFFIX: &[u8] = b".fit";
/// Length of the `YYYYMMDDhhmmss` stamp in activity file names.
pub const STAMP_DIGITS: usize = 14;

/// Extracts every `<14 digits>.fit` name from a raw listing.
///
/// Matching is positional and does not care about the surrounding CSV
/// structure; duplicates collapse.
pub fn extract_fit_filenames(listing: &[u8]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut at = STAMP_DIGITS;
    while at + FIT_SUFFIX.len() <= listing.len() {
        if listing[at..].starts_with(FIT_SUFFIX)
            && listing[at - STAMP_DIGITS..at].iter().all(u8::is_ascii_digit)
        {
            let name = &listing[at - STAMP_DIGITS..at + FIT_SUFFIX.len()];
            names.insert(String::from_utf8_lossy(name).into_owned());
            at += FIT_SUFFIX.len() + STAMP_DIGITS;
        } else {
            at += 1;
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_row_yields_its_file() {
        let names = extract_fit_filenames(b"ID,20230101120000.fit,1024\n");
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["20230101120000.fit".to_string()]
        );
    }

    #[test]
    fn duplicates_collapse() {
        let names = extract_fit_filenames(b"..20230101120000.fit..20230101120000.fit..");
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn extraction_is_order_independent() {
        let a = extract_fit_filenames(b"20230102090000.fit\n20230101120000.fit\n");
        let b = extract_fit_filenames(b"20230101120000.fit\n20230102090000.fit\n");
        assert_eq!(a, b);
        assert_eq!(extract_fit_filenames(b"20230101120000.fit\n20230102090000.fit\n"), a);
    }

    #[test]
    fn several_files_per_line_are_all_found() {
        let names = extract_fit_filenames(b"20230101120000.fit;20230101130000.fit");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn short_or_non_digit_stamps_are_ignored() {
        assert!(extract_fit_filenames(b"2023010112000.fit").is_empty());
        assert!(extract_fit_filenames(b"2023010112000x.fit").is_empty());
        assert!(extract_fit_filenames(b"20230101120000.txt").is_empty());
        assert!(extract_fit_filenames(b"").is_empty());
    }

    #[test]
    fn longer_digit_runs_keep_last_fourteen() {
        let names = extract_fit_filenames(b"920230101120000.fit");
        assert!(names.contains("20230101120000.fit"));
    }

    #[test]
    fn binary_noise_around_names_is_tolerated() {
        let mut listing = vec![0xFF, 0x00, 0x02];
        listing.extend_from_slice(b"20240505070809.fit");
        listing.extend_from_slice(&[0x00, 0x00]);
        let names = extract_fit_filenames(&listing);
        assert!(names.contains("20240505070809.fit"));
    }
}
