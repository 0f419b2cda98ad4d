//! Catalog of known OpenSIPS statistics.
//!
//! Each subsystem (the part of a statistic name before `:`) owns an ordered
//! list of definitions. A definition matches either one literal statistic
//! name or a pattern whose named capture groups become label values.
//! Matching stops at the first definition that accepts a name, so the order
//! in which definitions are declared is significant.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::mapping::{NAMESPACE, ValueKind, build_fq_name};
use crate::metrics::MetricDesc;

/// Errors building a [`StatCatalog`].
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid pattern for {subsystem}/{metric}: {source}")]
    InvalidPattern {
        subsystem: String,
        metric: String,
        #[source]
        source: regex::Error,
    },

    #[error("Pattern for {subsystem}/{metric} has an unnamed capture group")]
    UnnamedGroup { subsystem: String, metric: String },
}

/// How a statistic name is recognized, as declared in a [`StatSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecMatch {
    Literal(&'static str),
    Pattern(&'static str),
}

/// Static declaration of a catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct StatSpec {
    pub subsystem: &'static str,
    /// Local metric name, without namespace and subsystem.
    pub name: &'static str,
    pub matcher: SpecMatch,
    pub kind: ValueKind,
    pub help: &'static str,
}

const fn literal(
    subsystem: &'static str,
    name: &'static str,
    stat: &'static str,
    kind: ValueKind,
    help: &'static str,
) -> StatSpec {
    StatSpec {
        subsystem,
        name,
        matcher: SpecMatch::Literal(stat),
        kind,
        help,
    }
}

const fn pattern(
    subsystem: &'static str,
    name: &'static str,
    pattern: &'static str,
    kind: ValueKind,
    help: &'static str,
) -> StatSpec {
    StatSpec {
        subsystem,
        name,
        matcher: SpecMatch::Pattern(pattern),
        kind,
        help,
    }
}

use ValueKind::{Counter, Gauge};

/// Statistics exported out of the box.
pub const BUILTIN_STATS: &[StatSpec] = &[
    // core
    literal("core", "received_requests_total", "rcv_requests", Counter, "The total number of received requests by OpenSIPS"),
    literal("core", "received_replies_total", "rcv_replies", Counter, "The total number of received replies by OpenSIPS"),
    literal("core", "forwarded_requests_total", "fwd_requests", Counter, "Total number of stateless forwarded requests by OpenSIPS"),
    literal("core", "forwarded_replies_total", "fwd_replies", Counter, "Total number of stateless forwarded replies by OpenSIPS"),
    literal("core", "dropped_requests_total", "drop_requests", Counter, "Total number of requests dropped even before entering the script routing logic"),
    literal("core", "dropped_replies_total", "drop_replies", Counter, "Total number of replies dropped even before entering the script routing logic"),
    literal("core", "error_requests_total", "err_requests", Counter, "Total number of bogus or invalid requests"),
    literal("core", "error_replies_total", "err_replies", Counter, "Total number of bogus or invalid replies"),
    literal("core", "bad_uris_received_total", "bad_URIs_rcvd", Counter, "Total number of URIs that OpenSIPS failed to parse"),
    literal("core", "unsupported_methods_total", "unsupported_methods", Counter, "Total number of non-standard methods encountered by OpenSIPS while parsing SIP methods"),
    literal("core", "bad_message_headers_total", "bad_msg_hdr", Counter, "Total number of SIP headers that OpenSIPS failed to parse"),
    literal("core", "uptime_seconds_total", "timestamp", Counter, "The number of seconds elapsed from OpenSIPS starting"),
    // dialog
    literal("dialog", "active_dialogs", "active_dialogs", Gauge, "Number of active dialogs"),
    literal("dialog", "early_dialogs", "early_dialogs", Gauge, "Number of early dialogs"),
    literal("dialog", "processed_dialogs_total", "processed_dialogs", Counter, "Total number of processed dialogs"),
    literal("dialog", "expired_dialogs_total", "expired_dialogs", Counter, "Total number of expired dialogs"),
    literal("dialog", "failed_dialogs_total", "failed_dialogs", Counter, "Total number of failed dialogs"),
    pattern("dialog", "replication_messages_sent_total", r"(?P<operation>.+)_sent", Counter, "Total number of replication messages sent"),
    pattern("dialog", "replication_messages_received_total", r"(?P<operation>.+)_recv", Counter, "Total number of replication messages received"),
    // load
    literal("load", "load", "load", Gauge, "The real time load of core OpenSIPS processes"),
    literal("load", "load_all", "load-all", Gauge, "The real time load of all OpenSIPS processes"),
    pattern("load", "process_load", r"load-proc-(?P<id>\d+)", Gauge, "The real time load of the OpenSIPS process #id"),
    // msilo
    literal("msilo", "stored_messages_total", "stored_messages", Counter, "Total number of stored messages"),
    literal("msilo", "dumped_messages_total", "dumped_messages", Counter, "Total number of dumped messages"),
    literal("msilo", "failed_messages_total", "failed_messages", Counter, "Total number of failed messages"),
    literal("msilo", "dumped_reminders_total", "dumped_reminders", Counter, "Total number of dumped reminders"),
    literal("msilo", "failed_reminders_total", "failed_reminders", Counter, "Total number of failed reminders"),
    // nat_traversal
    literal("nat_traversal", "keepalive_endpoints", "keepalive_endpoints", Gauge, "Current number of keepalive endpoints"),
    literal("nat_traversal", "registered_endpoints", "registered_endpoints", Gauge, "Current number of registered endpoints"),
    literal("nat_traversal", "subscribed_endpoints", "subscribed_endpoints", Gauge, "Current number of subscribed endpoints"),
    literal("nat_traversal", "dialog_endpoints", "dialog_endpoints", Gauge, "Current number of dialog endpoints"),
    // net
    pattern("net", "waiting_bytes", r"waiting_(?P<transport>.+)", Gauge, "The number of bytes waiting to be consumed on interfaces that OpenSIPS is listening on"),
    // pkmem
    pattern("pkmem", "total_size_bytes", r"(?P<id>\d+)-total_size", Gauge, "The total size of private memory available to OpenSIPS process #id"),
    pattern("pkmem", "used_size_bytes", r"(?P<id>\d+)-used_size", Gauge, "The total size of private memory used by OpenSIPS process #id"),
    pattern("pkmem", "real_used_size_bytes", r"(?P<id>\d+)-real_used_size", Gauge, "The total size of private memory (including overhead) used by OpenSIPS process #id"),
    pattern("pkmem", "max_used_size_bytes", r"(?P<id>\d+)-max_used_size", Gauge, "The maximum amount of private memory ever used by OpenSIPS process #id"),
    pattern("pkmem", "free_size_bytes", r"(?P<id>\d+)-free_size", Gauge, "The free private memory available for OpenSIPS process #id"),
    pattern("pkmem", "fragments", r"(?P<id>\d+)-fragments", Gauge, "The number of fragments in the private memory for OpenSIPS process #id"),
    // registrar
    literal("registrar", "max_expires", "max_expires", Gauge, "The value of the max_expires module parameter"),
    literal("registrar", "max_contacts", "max_contacts", Gauge, "The value of the max_contacts module parameter"),
    literal("registrar", "default_expires", "default_expire", Gauge, "The value of the default_expires module parameter"),
    literal("registrar", "accepted_registrations_total", "accepted_registrations", Counter, "Total number of accepted registrations"),
    literal("registrar", "rejected_registrations_total", "rejected_registrations", Counter, "Total number of rejected registrations"),
    // shmem
    literal("shmem", "total_size_bytes", "total_size", Gauge, "The total size of shared memory available to OpenSIPS processes"),
    literal("shmem", "used_size_bytes", "used_size", Gauge, "The total size of shared memory used by OpenSIPS processes"),
    literal("shmem", "real_used_size_bytes", "real_used_size", Gauge, "The total size of shared memory used (including overhead) by OpenSIPS processes"),
    literal("shmem", "max_used_size_bytes", "max_used_size", Gauge, "The maximum amount of shared memory used by OpenSIPS processes"),
    literal("shmem", "free_size_bytes", "free_size", Gauge, "The amount of free shared memory available to OpenSIPS processes"),
    literal("shmem", "fragments", "fragments", Gauge, "The number of fragments in the shared memory used by OpenSIPS processes"),
    // sipcapture
    literal("sipcapture", "captured_requests_total", "captured_requests", Counter, "Total number of SIP requests captured"),
    literal("sipcapture", "captured_replies_total", "captured_replies", Counter, "Total number of SIP replies captured"),
    // siptrace
    literal("siptrace", "traced_requests_total", "traced_requests", Counter, "Total number of traced requests"),
    literal("siptrace", "traced_replies_total", "traced_replies", Counter, "Total number of traced replies"),
    // sl
    pattern("sl", "sent_replies", r"(?P<code>[2-6]xx)_replies", Counter, "Total number of sent replies by status code"),
    literal("sl", "sent_replies_total", "sent_replies", Counter, "Total number of sent replies"),
    literal("sl", "sent_error_replies_total", "sent_err_replies", Counter, "Total number of sent error replies"),
    literal("sl", "received_acks_total", "received_ACKs", Counter, "Total number of ACK replies received"),
    // sst
    literal("sst", "expired_sst_total", "expired_sst", Counter, "Total number of expired SST sessions"),
    // tm
    literal("tm", "received_replies_total", "received_replies", Counter, "Total number of replies received"),
    literal("tm", "relayed_replies_total", "relayed_replies", Counter, "Total number of replies relayed"),
    literal("tm", "local_replies_total", "local_replies", Counter, "Total number of local replies sent"),
    literal("tm", "uas_transactions_total", "UAS_transactions", Counter, "Total number of UAS transactions"),
    literal("tm", "uac_transactions_total", "UAC_transactions", Counter, "Total number of UAC transactions"),
    pattern("tm", "transactions_total", r"(?P<code>[2-6]xx)_transactions", Counter, "Total number of transactions by status code"),
    literal("tm", "inuse_transactions", "inuse_transactions", Gauge, "Number of transactions currently in-use"),
    // uri
    literal("uri", "positive_checks_total", "positive_checks", Counter, "Total number of positive URI checks"),
    literal("uri", "negative_checks_total", "negative_checks", Counter, "Total number of negative URI checks"),
    // usrloc
    literal("usrloc", "registered_users", "registered_users", Gauge, "Current number of registered users"),
];

/// How a compiled definition recognizes a statistic name.
#[derive(Debug, Clone)]
pub enum StatMatch {
    /// Exact name.
    Literal(String),
    /// Anchored pattern; named groups yield label values.
    Pattern(Regex),
}

/// A compiled catalog entry.
#[derive(Debug, Clone)]
pub struct StatDefinition {
    pub metric_name: String,
    pub matcher: StatMatch,
    pub kind: ValueKind,
    pub description: String,
    /// Descriptor used for both registration and emission.
    pub desc: Arc<MetricDesc>,
}

impl StatDefinition {
    fn compile(spec: &StatSpec) -> Result<Self, CatalogError> {
        let (matcher, label_names) = match spec.matcher {
            SpecMatch::Literal(stat) => (StatMatch::Literal(stat.to_string()), Vec::new()),
            SpecMatch::Pattern(pattern) => {
                let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
                    CatalogError::InvalidPattern {
                        subsystem: spec.subsystem.to_string(),
                        metric: spec.name.to_string(),
                        source,
                    }
                })?;

                let label_names = regex
                    .capture_names()
                    .skip(1)
                    .map(|name| name.map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| CatalogError::UnnamedGroup {
                        subsystem: spec.subsystem.to_string(),
                        metric: spec.name.to_string(),
                    })?;

                (StatMatch::Pattern(regex), label_names)
            }
        };

        let desc = MetricDesc::new(
            build_fq_name(NAMESPACE, spec.subsystem, spec.name),
            spec.help,
            spec.kind,
            label_names,
        );

        Ok(Self {
            metric_name: spec.name.to_string(),
            matcher,
            kind: spec.kind,
            description: spec.help.to_string(),
            desc: Arc::new(desc),
        })
    }

    /// Label names declared by this definition (empty for literals).
    pub fn label_names(&self) -> &[String] {
        &self.desc.label_names
    }
}

/// Immutable registry of statistic definitions grouped by subsystem.
#[derive(Debug, Clone, Default)]
pub struct StatCatalog {
    stats: BTreeMap<String, Vec<StatDefinition>>,
}

impl StatCatalog {
    /// Compile the built-in OpenSIPS catalog.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_specs(BUILTIN_STATS)
    }

    /// Compile a catalog from declarations, keeping declaration order per subsystem.
    pub fn from_specs(specs: &[StatSpec]) -> Result<Self, CatalogError> {
        let mut stats: BTreeMap<String, Vec<StatDefinition>> = BTreeMap::new();

        for spec in specs {
            let definition = StatDefinition::compile(spec)?;
            stats
                .entry(spec.subsystem.to_string())
                .or_default()
                .push(definition);
        }

        Ok(Self { stats })
    }

    /// Definitions of a subsystem in catalog order; empty if unknown.
    pub fn definitions(&self, subsystem: &str) -> &[StatDefinition] {
        self.stats.get(subsystem).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Known subsystems, sorted.
    pub fn subsystems(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    /// Descriptors of every definition, by subsystem then catalog order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<MetricDesc>> {
        self.stats.values().flatten().map(|d| &d.desc)
    }

    /// Total number of definitions.
    pub fn len(&self) -> usize {
        self.stats.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
