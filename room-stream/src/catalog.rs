/// Quality codes and their display labels.
///
/// The platform reports quality names in Chinese, and the labels are the same strings.
const QUALITIES: &[(&str, &str)] = &[
    ("流畅", "流畅"),
    ("高清", "高清"),
    ("超清", "超清"),
    ("蓝光", "蓝光"),
    ("蓝光4M", "蓝光4M"),
    ("蓝光8M", "蓝光8M"),
    ("蓝光10M", "蓝光10M"),
];

/// Circuit (CDN route) codes and their display labels.
const CIRCUITS: &[(&str, &str)] = &[
    ("ws", "主线 (网宿)"),
    ("ws-h5", "主线-H5 (网宿)"),
    ("tct", "备用线路5 (腾讯云)"),
    ("tct-h5", "备用线路5-H5 (腾讯云)"),
    ("ali-h5", "备用线路6 (阿里云)"),
    ("ws2", "备用线路2 (网宿2)"),
    ("dl", "备用线路3 (帝联)"),
];

/**
    Default quality/circuit pair used when the caller has no preference.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferred {
    pub quality: &'static str,
    pub circuit: &'static str,
}

pub const PREFERRED: Preferred = Preferred {
    quality: "超清",
    circuit: "ws-h5",
};

/// Known qualities as `(code, display)`.
pub fn qualities() -> impl Iterator<Item = (&'static str, &'static str)> {
    QUALITIES.iter().copied()
}

/// Known circuits as `(code, display)`.
pub fn circuits() -> impl Iterator<Item = (&'static str, &'static str)> {
    CIRCUITS.iter().copied()
}

pub fn quality_display(code: &str) -> Option<&'static str> {
    lookup(QUALITIES, code)
}

pub fn circuit_display(code: &str) -> Option<&'static str> {
    lookup(CIRCUITS, code)
}

fn lookup(table: &[(&'static str, &'static str)], code: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(quality_display("超清"), Some("超清"));
        assert_eq!(circuit_display("ws-h5"), Some("主线-H5 (网宿)"));
        assert_eq!(circuit_display("dl"), Some("备用线路3 (帝联)"));
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(quality_display("原画"), None);
        assert_eq!(circuit_display("hw-h5"), None);
        assert_eq!(quality_display(""), None);
    }

    #[test]
    fn test_listing_matches_lookups() {
        assert_eq!(qualities().count(), 7);
        assert_eq!(circuits().count(), 7);
        assert_eq!(qualities().next(), Some(("流畅", "流畅")));
        assert!(circuits().all(|(code, label)| circuit_display(code) == Some(label)));
    }

    #[test]
    fn test_preferred_pair_is_in_catalog() {
        assert!(quality_display(PREFERRED.quality).is_some());
        assert!(circuit_display(PREFERRED.circuit).is_some());
    }
}
