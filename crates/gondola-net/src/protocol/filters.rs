use std::collections::BTreeMap;

/// Parse a comma-separated `key=value` dictionary header.
///
/// Keys are lowercased; values keep their case with surrounding quotes
/// stripped. Entries without `=` are skipped.
#[must_use]
pub fn parse_manifest_filters(header: &str) -> BTreeMap<String, String> {
    header
        .split(',')
        .filter_map(|entry| {
            let (key, value) = entry.trim().split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            Some((key, value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_pairs_and_lowercases_keys() {
        let filters = parse_manifest_filters("Branch=main, channel=\"production\"");
        assert_eq!(filters.get("branch").unwrap(), "main");
        assert_eq!(filters.get("channel").unwrap(), "production");
    }

    #[rstest]
    #[case("", 0)]
    #[case("no-equals-sign", 0)]
    #[case("a=1", 1)]
    #[case("a=1,b=2, c = 3", 3)]
    #[case("=orphan,x=y", 1)]
    fn entry_counts(#[case] header: &str, #[case] expected: usize) {
        assert_eq!(parse_manifest_filters(header).len(), expected);
    }
}
