//! Collection pass against an OpenSIPS instance.
//!
//! A pass issues MI commands through a [`CommandExecutor`], turns the
//! responses into [`Emission`]s and returns them as a [`MetricSet`]. Only
//! `version` is mandatory; every other feature is skipped for the pass when
//! its command is unavailable or fails.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use opensips_mi::{CommandExecutor, Node};
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::cache::{CapabilityCache, ProcessInfo};
use crate::catalog::StatCatalog;
use crate::mapping::{NAMESPACE, ValueKind, build_fq_name, sanitize_label_name};
use crate::matcher::{StatMatcher, parse_stat};
use crate::metrics::{Emission, MetricDesc, MetricSet};

/// `OpenSIPS (2.4.2 (x86_64/linux))` -> server, version, arch, os.
static VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S+)\s+\((\S+)\s+\((\S+)/(\S+)\)\)").expect("valid version regex"));

/// `key1=a,key2=b` pairs in a dialog profile value.
static PROFILE_VALUES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|,)([a-z0-9_]+)=([^,]*)").expect("valid profile regex"));

const STATISTICS_COMMAND: &str = "get_statistics";
const PROFILES_COMMAND: &str = "list_all_profiles";
const UPTIME_SUBSYSTEM: &str = "core";
const UPTIME_STAT: &str = "timestamp";

/// Collector statistics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Passes run.
    pub collections: u64,
    /// Passes where OpenSIPS did not answer `version`.
    pub failures: u64,
    /// Statistics resolved through the catalog.
    pub stats_matched: u64,
    /// Statistics that were unparseable or unknown.
    pub stats_skipped: u64,
    /// Whether the last pass saw OpenSIPS up.
    pub last_up: bool,
}

/// Descriptors of the metrics not backed by the statistic catalog.
#[derive(Debug)]
struct FixedDescs {
    up: Arc<MetricDesc>,
    version_info: Arc<MetricDesc>,
    process_info: Arc<MetricDesc>,
    profile_values: Arc<MetricDesc>,
    collections: Arc<MetricDesc>,
    failures: Arc<MetricDesc>,
    stats_matched: Arc<MetricDesc>,
    stats_skipped: Arc<MetricDesc>,
}

fn desc(subsystem: &str, name: &str, help: &str, kind: ValueKind, labels: &[&str]) -> Arc<MetricDesc> {
    Arc::new(MetricDesc::new(
        build_fq_name(NAMESPACE, subsystem, name),
        help,
        kind,
        labels.iter().map(|l| l.to_string()).collect(),
    ))
}

impl FixedDescs {
    fn new() -> Self {
        use ValueKind::{Counter, Gauge};

        Self {
            up: desc("", "up", "1 if OpenSIPS is running", Gauge, &[]),
            version_info: desc(
                "",
                "version_info",
                "Version information (always 1)",
                Gauge,
                &["server", "version", "arch", "os"],
            ),
            process_info: desc(
                "",
                "process_info",
                "Process information (always 1)",
                Gauge,
                &["id", "type"],
            ),
            profile_values: desc(
                "dialog",
                "profiles_with_values_count",
                "Dialog profiles with counts",
                Gauge,
                &["profile", "value"],
            ),
            collections: desc(
                "exporter",
                "collections_total",
                "Total number of collection passes",
                Counter,
                &[],
            ),
            failures: desc(
                "exporter",
                "collection_failures_total",
                "Total number of collection passes where OpenSIPS was unreachable",
                Counter,
                &[],
            ),
            stats_matched: desc(
                "exporter",
                "stats_matched_total",
                "Total number of OpenSIPS statistics exported",
                Counter,
                &[],
            ),
            stats_skipped: desc(
                "exporter",
                "stats_skipped_total",
                "Total number of OpenSIPS statistics ignored as unparseable or unknown",
                Counter,
                &[],
            ),
        }
    }

    fn all(&self) -> [&Arc<MetricDesc>; 8] {
        [
            &self.up,
            &self.version_info,
            &self.process_info,
            &self.profile_values,
            &self.collections,
            &self.failures,
            &self.stats_matched,
            &self.stats_skipped,
        ]
    }
}

/// Collector shared between HTTP handlers.
pub type SharedCollector<E> = Arc<Collector<E>>;

/// Runs collection passes against one OpenSIPS instance.
#[derive(Debug)]
pub struct Collector<E> {
    executor: E,
    matcher: StatMatcher,
    cache: Arc<CapabilityCache>,
    descs: FixedDescs,
    stats: RwLock<CollectorStats>,
}

impl<E: CommandExecutor> Collector<E> {
    /// Create a collector with an empty capability cache.
    pub fn new(executor: E, catalog: Arc<StatCatalog>) -> Self {
        Self::with_cache(executor, catalog, Arc::new(CapabilityCache::new()))
    }

    /// Create a collector sharing an existing capability cache.
    pub fn with_cache(executor: E, catalog: Arc<StatCatalog>, cache: Arc<CapabilityCache>) -> Self {
        Self {
            executor,
            matcher: StatMatcher::new(catalog),
            cache,
            descs: FixedDescs::new(),
            stats: RwLock::new(CollectorStats::default()),
        }
    }

    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }

    /// Descriptors of every metric this collector can emit.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<MetricDesc>> {
        self.descs
            .all()
            .into_iter()
            .chain(self.matcher.catalog().descriptors())
    }

    /// Run one collection pass. Never fails; an unreachable instance yields
    /// `opensips_up 0`.
    pub async fn collect(&self) -> MetricSet {
        let mut set = MetricSet::new();

        let up = self.collect_version(&mut set).await;
        set.push(Emission::new(
            self.descs.up.clone(),
            if up { 1.0 } else { 0.0 },
            Vec::new(),
        ));

        let mut matched = 0;
        let mut skipped = 0;

        if up {
            if self.cache.snapshot().commands.is_empty() {
                self.fetch_commands().await;
            }

            self.collect_processes(&mut set).await;

            let snapshot = self.cache.snapshot();
            let has_statistics = snapshot.has_command(STATISTICS_COMMAND);
            let has_profiles = snapshot.has_command(PROFILES_COMMAND);

            let mut uptime = None;
            if has_statistics {
                let result = self.collect_statistics(&mut set).await;
                uptime = result.uptime;
                matched = result.matched;
                skipped = result.skipped;
            }

            if has_profiles {
                self.collect_dialog_profiles(&mut set).await;
            }

            if let Some(uptime) = uptime {
                self.cache.observe_uptime(uptime);
            }
        }

        let stats = {
            let mut stats = self.stats.write();
            stats.collections += 1;
            if !up {
                stats.failures += 1;
            }
            stats.stats_matched += matched;
            stats.stats_skipped += skipped;
            stats.last_up = up;
            stats.clone()
        };

        self.push_self_metrics(&mut set, &stats);

        debug!(up, emissions = set.len(), matched, skipped, "Collection pass finished");
        set
    }

    async fn collect_version(&self, set: &mut MetricSet) -> bool {
        let response = match self.executor.execute("version", &[]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(command = "version", error = %e, "OpenSIPS is not responding");
                return false;
            }
        };

        if let Some(server) = response.child_value("Server") {
            match VERSION_REGEX.captures(server) {
                Some(caps) => {
                    let labels = (1..=4)
                        .map(|i| caps.get(i).map_or("", |m| m.as_str()).to_string())
                        .collect();
                    set.push(Emission::new(self.descs.version_info.clone(), 1.0, labels));
                }
                None => debug!(server, "Unrecognized server version string"),
            }
        }

        true
    }

    async fn fetch_commands(&self) {
        let response = match self.executor.execute("which", &[]).await {
            Ok(response) => response,
            Err(e) => {
                debug!(command = "which", error = %e, "Failed to list MI commands");
                return;
            }
        };

        let commands: BTreeSet<String> = response
            .children()
            .iter()
            .filter_map(|c| c.value())
            .map(str::to_string)
            .collect();

        debug!(count = commands.len(), "Discovered MI commands");
        self.cache.set_commands(commands);
    }

    async fn collect_processes(&self, set: &mut MetricSet) {
        let mut processes = self.cache.snapshot().processes;

        if processes.is_empty() {
            let response = match self.executor.execute("ps", &[]).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(command = "ps", error = %e, "Failed to list processes");
                    return;
                }
            };

            processes = response
                .children()
                .iter()
                .map(|c| {
                    ProcessInfo::new(
                        c.attribute("ID").unwrap_or_default(),
                        c.attribute("Type").unwrap_or_default().trim(),
                    )
                })
                .collect();

            debug!(count = processes.len(), "Discovered processes");
            self.cache.set_processes(processes.clone());
        }

        for process in processes {
            set.push(Emission::new(
                self.descs.process_info.clone(),
                1.0,
                vec![process.id, process.kind],
            ));
        }
    }

    async fn collect_statistics(&self, set: &mut MetricSet) -> StatisticsResult {
        let mut result = StatisticsResult::default();

        let response = match self.executor.execute(STATISTICS_COMMAND, &["all"]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(command = STATISTICS_COMMAND, error = %e, "Failed to fetch statistics");
                return result;
            }
        };

        for (full_name, raw_value) in response.child_values() {
            let Some(stat) = parse_stat(full_name, raw_value) else {
                trace!(stat = %full_name, value = %raw_value, "Skipping unparseable statistic");
                result.skipped += 1;
                continue;
            };

            if stat.subsystem == UPTIME_SUBSYSTEM && stat.name == UPTIME_STAT {
                result.uptime = Some(stat.value);
            }

            match self.matcher.matches_stat(&stat) {
                Some(emission) => {
                    set.push(emission);
                    result.matched += 1;
                }
                None => result.skipped += 1,
            }
        }

        result
    }

    async fn collect_dialog_profiles(&self, set: &mut MetricSet) {
        let mut profiles = self.cache.snapshot().profiles;

        if profiles.is_empty() {
            let response = match self.executor.execute(PROFILES_COMMAND, &[]).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(command = PROFILES_COMMAND, error = %e, "Failed to list dialog profiles");
                    return;
                }
            };

            profiles = response
                .child_values()
                .iter()
                .map(|(profile, has_values)| (profile.clone(), has_values != "0"))
                .collect::<BTreeMap<_, _>>();

            debug!(count = profiles.len(), "Discovered dialog profiles");
            self.cache.set_profiles(profiles.clone());
        }

        for (profile, has_values) in &profiles {
            if !has_values {
                continue;
            }

            match self
                .executor
                .execute("profile_get_values", &[profile.as_str()])
                .await
            {
                Ok(response) => self.emit_profile_values(set, profile, &response),
                Err(e) => {
                    debug!(profile = %profile, error = %e, "Failed to get dialog profile values");
                }
            }
        }
    }

    fn emit_profile_values(&self, set: &mut MetricSet, profile: &str, response: &Node) {
        for entry in response.children() {
            let Some(count) = entry
                .attribute("count")
                .and_then(|c| c.trim().parse::<f64>().ok())
            else {
                trace!(profile, "Skipping dialog profile value without count");
                continue;
            };

            let value = entry.value().unwrap_or_default();
            let pairs = parse_profile_values(value);

            if pairs.is_empty() {
                set.push(Emission::new(
                    self.descs.profile_values.clone(),
                    count,
                    vec![profile.to_string(), value.to_string()],
                ));
                continue;
            }

            let mut label_names = vec!["profile".to_string()];
            let mut label_values = vec![profile.to_string()];
            for (key, val) in pairs {
                if label_names.contains(&key) {
                    continue;
                }
                label_names.push(key);
                label_values.push(val);
            }

            let desc = Arc::new(MetricDesc::new(
                self.descs.profile_values.fq_name.clone(),
                self.descs.profile_values.help.clone(),
                ValueKind::Gauge,
                label_names,
            ));
            set.push(Emission::new(desc, count, label_values));
        }
    }

    fn push_self_metrics(&self, set: &mut MetricSet, stats: &CollectorStats) {
        let counters = [
            (&self.descs.collections, stats.collections),
            (&self.descs.failures, stats.failures),
            (&self.descs.stats_matched, stats.stats_matched),
            (&self.descs.stats_skipped, stats.stats_skipped),
        ];

        for (desc, value) in counters {
            set.push(Emission::new(desc.clone(), value as f64, Vec::new()));
        }
    }
}

#[derive(Debug, Default)]
struct StatisticsResult {
    uptime: Option<f64>,
    matched: u64,
    skipped: u64,
}

/// Parse `key=value` pairs of a dialog profile value.
///
/// Keys become label names and are sanitized accordingly.
pub fn parse_profile_values(value: &str) -> Vec<(String, String)> {
    PROFILE_VALUES_REGEX
        .captures_iter(value)
        .map(|caps| {
            let key = caps.get(1).map_or("", |m| m.as_str());
            let val = caps.get(2).map_or("", |m| m.as_str());
            (sanitize_label_name(key), val.to_string())
        })
        .collect()
}
