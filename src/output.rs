use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;
use crate::scanner::VersionMap;

/// Build tags that could be full Windows builds, e.g. `6.1.7601.17514 (win7sp1_rtm.101119-1850)`.
///
/// Major 5, 6 or 10, minor 0-5, a build of 4-5 digits not starting with 0, a 1-5 digit
/// revision, then whitespace and `(<branch>.<yymmdd>-`. The separators are unescaped `.` and
/// match any character. `[^\t\n\f\r ]` stands in for an ASCII-only `\S`.
pub const WINDOWS_BUILD_TAG: &str =
    r"^(5|6|10).[0-5]{1}.[^0][0-9]{3,4}.[0-9]{1,5}[[:space:]]\([[:alpha:][^\t\n\f\r ]]+.[0-9]{6}-";

/// Build tags in the older source depot format, e.g.
/// `5.0.1234.567 built by: buildmachine at: 20200101-1200`.
pub const SOURCE_DEPOT_BUILD_TAG: &str =
    r"^5.[0-1]{1,2}.[0-9]{4}.[0-9]{1,4} built by: ([0-9A-Za-z_]+) ?(at: ([0-9]+)-([0-9]+))?";

static WINDOWS_BUILD_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(WINDOWS_BUILD_TAG).expect("valid windows build tag pattern"));

static SOURCE_DEPOT_BUILD_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(SOURCE_DEPOT_BUILD_TAG).expect("valid source depot pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    None,
    ByName,
    WindowsBuildTag,
    SourceDepotBuildTag,
}

impl FilterMode {
    /// Resolves the command line flags. Both tag filters at once is rejected even when name
    /// mode would ignore them.
    pub fn from_flags(names: bool, windows: bool, source_depot: bool) -> Result<Self, Error> {
        match (names, windows, source_depot) {
            (_, true, true) => Err(Error::ConflictingFilters),
            (true, _, _) => Ok(FilterMode::ByName),
            (false, true, false) => Ok(FilterMode::WindowsBuildTag),
            (false, false, true) => Ok(FilterMode::SourceDepotBuildTag),
            (false, false, false) => Ok(FilterMode::None),
        }
    }

    fn keeps(self, version: &str) -> bool {
        match self {
            FilterMode::None | FilterMode::ByName => true,
            FilterMode::WindowsBuildTag => WINDOWS_BUILD_TAG_RE.is_match(version),
            FilterMode::SourceDepotBuildTag => SOURCE_DEPOT_BUILD_TAG_RE.is_match(version),
        }
    }
}

/// Every distinct version in the map, in byte order.
pub fn unique_versions(versions: &VersionMap) -> Vec<&str> {
    versions
        .values()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// `name: version` pairs ordered by name.
pub fn named_lines(versions: &VersionMap) -> Vec<String> {
    let mut names: Vec<&String> = versions.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| format!("{}: {}", name, versions[name]))
        .collect()
}

/// The lines to print for `mode`.
pub fn render(versions: &VersionMap, mode: FilterMode) -> Vec<String> {
    if mode == FilterMode::ByName {
        return named_lines(versions);
    }
    unique_versions(versions)
        .into_iter()
        .filter(|v| mode.keeps(v))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> VersionMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn versions_are_deduplicated_and_sorted() {
        let versions = map(&[("c.dll", "2.0.0.0"), ("a.dll", "1.0.0.1"), ("b.exe", "1.0.0.1")]);
        assert_eq!(render(&versions, FilterMode::None), vec!["1.0.0.1", "2.0.0.0"]);
    }

    #[test]
    fn sort_is_lexicographic_not_numeric() {
        let versions = map(&[("a.dll", "10.0.1.1"), ("b.dll", "9.0.1.1"), ("c.dll", "10.0.10.1")]);
        assert_eq!(
            render(&versions, FilterMode::None),
            vec!["10.0.1.1", "10.0.10.1", "9.0.1.1"]
        );
    }

    #[test]
    fn name_mode_sorts_by_name() {
        let versions = map(&[("b.dll", "1.0"), ("a.exe", "2.0")]);
        assert_eq!(render(&versions, FilterMode::ByName), vec!["a.exe: 2.0", "b.dll: 1.0"]);
    }

    #[test]
    fn name_mode_keeps_duplicates() {
        let versions = map(&[("b.dll", "1.0"), ("a.exe", "1.0")]);
        assert_eq!(named_lines(&versions), vec!["a.exe: 1.0", "b.dll: 1.0"]);
    }

    #[test]
    fn empty_map_renders_nothing() {
        let versions = VersionMap::new();
        assert!(render(&versions, FilterMode::None).is_empty());
        assert!(render(&versions, FilterMode::ByName).is_empty());
    }

    #[test]
    fn windows_filter() {
        let re = &*WINDOWS_BUILD_TAG_RE;
        assert!(re.is_match("6.1.7601.17514 (win7sp1_rtm.101119-1850)"));
        assert!(re.is_match("10.0.19041.1 (WinBuild.160101.0800)"));
        assert!(re.is_match("5.1.2600.5512 (xpsp.080413-2111)"));
        assert!(!re.is_match("1.2.3.4"));
        assert!(!re.is_match("6.1.0601.17514 (win7sp1_rtm.101119-1850)"));
        assert!(!re.is_match("7.0.7601.17514 (win7sp1_rtm.101119-1850)"));
        assert!(!re.is_match("6.1.7601.17514"));
        assert!(!re.is_match("prefix 6.1.7601.17514 (win7sp1_rtm.101119-1850)"));
    }

    #[test]
    fn windows_filter_only_anchors_the_start() {
        assert!(WINDOWS_BUILD_TAG_RE.is_match("6.3.9600.16384 (winblue_rtm.130821-1623) trailing"));
    }

    #[test]
    fn source_depot_filter() {
        let re = &*SOURCE_DEPOT_BUILD_TAG_RE;
        assert!(re.is_match("5.0.1234.567 built by: buildmachine at: 20200101-1200"));
        assert!(re.is_match("5.00.2195.6717 built by: WMILAB"));
        assert!(!re.is_match("6.0.1234.567 built by: buildmachine"));
        assert!(!re.is_match("5.0.1234.567"));
        assert!(!re.is_match("6.1.7601.17514 (win7sp1_rtm.101119-1850)"));
    }

    #[test]
    fn ascii_only_classes() {
        // Arabic-Indic digits are \d in Unicode mode but not here
        assert!(!SOURCE_DEPOT_BUILD_TAG_RE.is_match("5.0.\u{0661}\u{0662}\u{0663}\u{0664}.5 built by: x"));
        assert!(!SOURCE_DEPOT_BUILD_TAG_RE.is_match("5.0.1234.5 built by: \u{00e9}"));
    }

    #[test]
    fn filters_apply_to_sorted_unique_versions() {
        let versions = map(&[
            ("a.dll", "6.1.7601.17514 (win7sp1_rtm.101119-1850)"),
            ("b.dll", "6.1.7601.17514 (win7sp1_rtm.101119-1850)"),
            ("c.dll", "1.2.3.4"),
            ("d.sys", "5.0.1234.567 built by: buildmachine at: 20200101-1200"),
            ("e.exe", "6.1.7600.16385 (win7_rtm.090713-1255)"),
        ]);
        assert_eq!(
            render(&versions, FilterMode::WindowsBuildTag),
            vec![
                "6.1.7600.16385 (win7_rtm.090713-1255)",
                "6.1.7601.17514 (win7sp1_rtm.101119-1850)",
            ]
        );
        assert_eq!(
            render(&versions, FilterMode::SourceDepotBuildTag),
            vec!["5.0.1234.567 built by: buildmachine at: 20200101-1200"]
        );
    }

    #[test]
    fn flag_resolution() {
        assert_eq!(FilterMode::from_flags(false, false, false).unwrap(), FilterMode::None);
        assert_eq!(FilterMode::from_flags(true, true, false).unwrap(), FilterMode::ByName);
        assert_eq!(
            FilterMode::from_flags(false, true, false).unwrap(),
            FilterMode::WindowsBuildTag
        );
        assert_eq!(
            FilterMode::from_flags(false, false, true).unwrap(),
            FilterMode::SourceDepotBuildTag
        );
        assert!(matches!(
            FilterMode::from_flags(false, true, true),
            Err(Error::ConflictingFilters)
        ));
        assert!(matches!(
            FilterMode::from_flags(true, true, true),
            Err(Error::ConflictingFilters)
        ));
    }
}
