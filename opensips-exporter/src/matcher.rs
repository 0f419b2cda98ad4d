//! Classification of flat statistics against the catalog.

use std::sync::Arc;

use tracing::trace;

use crate::catalog::{StatCatalog, StatMatch};
use crate::metrics::Emission;

/// A statistic split into subsystem and local name, with a parsed value.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatStat {
    pub subsystem: String,
    pub name: String,
    pub value: f64,
}

/// Split a `subsystem:name` statistic and parse its value.
///
/// Whitespace in the local name is replaced with `_`. Returns `None` if the
/// name has no `:` or the value is not a number.
pub fn parse_stat(full_name: &str, raw_value: &str) -> Option<FlatStat> {
    let (subsystem, name) = full_name.split_once(':')?;
    let value = raw_value.trim().parse::<f64>().ok()?;

    let name = name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    Some(FlatStat {
        subsystem: subsystem.to_string(),
        name,
        value,
    })
}

/// Resolves flat statistics to metric emissions.
#[derive(Debug, Clone)]
pub struct StatMatcher {
    catalog: Arc<StatCatalog>,
}

impl StatMatcher {
    pub fn new(catalog: Arc<StatCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &StatCatalog {
        &self.catalog
    }

    /// Resolve one statistic; the first matching definition wins.
    pub fn matches(&self, subsystem: &str, flat_name: &str, value: f64) -> Option<Emission> {
        for def in self.catalog.definitions(subsystem) {
            match &def.matcher {
                StatMatch::Literal(stat) => {
                    if stat == flat_name {
                        return Some(Emission::new(def.desc.clone(), value, Vec::new()));
                    }
                }
                StatMatch::Pattern(regex) => {
                    if let Some(caps) = regex.captures(flat_name) {
                        let label_values = def
                            .label_names()
                            .iter()
                            .map(|n| caps.name(n).map_or("", |m| m.as_str()).to_string())
                            .collect();
                        return Some(Emission::new(def.desc.clone(), value, label_values));
                    }
                }
            }
        }

        trace!(subsystem, name = flat_name, "No catalog entry for statistic");
        None
    }

    /// Resolve a parsed statistic.
    pub fn matches_stat(&self, stat: &FlatStat) -> Option<Emission> {
        self.matches(&stat.subsystem, &stat.name, stat.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ValueKind;

    fn matcher() -> StatMatcher {
        StatMatcher::new(Arc::new(StatCatalog::builtin().unwrap()))
    }

    #[test]
    fn test_parse_stat() {
        let stat = parse_stat("core:rcv_requests", "42").unwrap();
        assert_eq!(stat.subsystem, "core");
        assert_eq!(stat.name, "rcv_requests");
        assert_eq!(stat.value, 42.0);
    }

    #[test]
    fn test_parse_stat_splits_on_first_colon() {
        let stat = parse_stat("net:waiting_udp:5060", "0").unwrap();
        assert_eq!(stat.subsystem, "net");
        assert_eq!(stat.name, "waiting_udp:5060");
    }

    #[test]
    fn test_parse_stat_replaces_whitespace() {
        let stat = parse_stat("dialog:create sent", " 3 ").unwrap();
        assert_eq!(stat.name, "create_sent");
        assert_eq!(stat.value, 3.0);
    }

    #[test]
    fn test_parse_stat_rejects() {
        assert!(parse_stat("no_colon", "1").is_none());
        assert!(parse_stat("core:rcv_requests", "lots").is_none());
        assert!(parse_stat("core:rcv_requests", "").is_none());
    }

    #[test]
    fn test_literal_match() {
        let emission = matcher().matches("core", "rcv_requests", 42.0).unwrap();

        assert_eq!(emission.name(), "opensips_core_received_requests_total");
        assert_eq!(emission.kind(), ValueKind::Counter);
        assert_eq!(emission.value, 42.0);
        assert!(emission.label_values.is_empty());
    }

    #[test]
    fn test_pattern_match() {
        let emission = matcher().matches("load", "load-proc-3", 12.0).unwrap();

        assert_eq!(emission.name(), "opensips_load_process_load");
        assert_eq!(emission.kind(), ValueKind::Gauge);
        assert_eq!(emission.label("id"), Some("3"));
    }

    #[test]
    fn test_pattern_requires_full_match() {
        let m = matcher();
        assert!(m.matches("load", "load-proc-3x", 1.0).is_none());
        assert!(m.matches("pkmem", "x1-used_size", 1.0).is_none());
    }

    #[test]
    fn test_unknown_statistic() {
        let m = matcher();
        assert!(m.matches("core", "totally_unknown_stat", 1.0).is_none());
        assert!(m.matches("no_such_subsystem", "rcv_requests", 1.0).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let m = matcher();

        let by_code = m.matches("sl", "2xx_replies", 10.0).unwrap();
        assert_eq!(by_code.name(), "opensips_sl_sent_replies");
        assert_eq!(by_code.label("code"), Some("2xx"));

        let total = m.matches("sl", "sent_replies", 15.0).unwrap();
        assert_eq!(total.name(), "opensips_sl_sent_replies_total");
    }

    #[test]
    fn test_replication_operation_label() {
        let emission = matcher().matches("dialog", "create_sent", 5.0).unwrap();
        assert_eq!(emission.name(), "opensips_dialog_replication_messages_sent_total");
        assert_eq!(emission.label("operation"), Some("create"));
    }

    #[test]
    fn test_matches_stat() {
        let stat = parse_stat("pkmem:1-used_size", "65536").unwrap();
        let emission = matcher().matches_stat(&stat).unwrap();
        assert_eq!(emission.name(), "opensips_pkmem_used_size_bytes");
        assert_eq!(emission.label("id"), Some("1"));
        assert_eq!(emission.value, 65536.0);
    }
}
