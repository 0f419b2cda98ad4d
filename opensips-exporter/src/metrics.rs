//! Metric descriptors, emissions and Prometheus text exposition.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::mapping::{ValueKind, escape_help, escape_label_value, format_value};

/// Display descriptor of a metric: name, help, kind and label names.
///
/// Shared between registration (HELP/TYPE lines) and emission so both agree
/// on the label ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    /// Fully qualified metric name.
    pub fq_name: String,
    /// Help text.
    pub help: String,
    /// Value semantics.
    pub kind: ValueKind,
    /// Label names, in the order emissions carry their values.
    pub label_names: Vec<String>,
}

impl MetricDesc {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        kind: ValueKind,
        label_names: Vec<String>,
    ) -> Self {
        Self {
            fq_name: fq_name.into(),
            help: help.into(),
            kind,
            label_names,
        }
    }
}

/// A single resolved sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub desc: Arc<MetricDesc>,
    pub value: f64,
    /// Label values, parallel to `desc.label_names`.
    pub label_values: Vec<String>,
}

impl Emission {
    pub fn new(desc: Arc<MetricDesc>, value: f64, label_values: Vec<String>) -> Self {
        debug_assert_eq!(desc.label_names.len(), label_values.len());
        Self {
            desc,
            value,
            label_values,
        }
    }

    /// Fully qualified metric name.
    pub fn name(&self) -> &str {
        &self.desc.fq_name
    }

    pub fn kind(&self) -> ValueKind {
        self.desc.kind
    }

    /// Label value by label name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .label_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }

    /// `(name, value)` label pairs in declared order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.desc
            .label_names
            .iter()
            .map(String::as_str)
            .zip(self.label_values.iter().map(String::as_str))
    }

    fn format_labels(&self) -> String {
        if self.label_values.is_empty() {
            return String::new();
        }

        let parts: Vec<String> = self
            .labels()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();

        format!("{{{}}}", parts.join(","))
    }
}

/// The metrics produced by one collection pass.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    emissions: Vec<Emission>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, emission: Emission) {
        self.emissions.push(emission);
    }

    pub fn len(&self) -> usize {
        self.emissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Emission> {
        self.emissions.iter()
    }

    /// All emissions with the given fully qualified name.
    pub fn by_name<'a, 'b>(&'a self, fq_name: &'b str) -> impl Iterator<Item = &'a Emission> {
        self.emissions.iter().filter(move |e| e.name() == fq_name)
    }

    /// First emission with the given name whose labels include every pair.
    pub fn find(&self, fq_name: &str, labels: &[(&str, &str)]) -> Option<&Emission> {
        self.by_name(fq_name)
            .find(|e| labels.iter().all(|(k, v)| e.label(k) == Some(*v)))
    }

    /// Render in Prometheus exposition format.
    ///
    /// Series sharing a name are grouped under one HELP/TYPE header, names
    /// appear in first-emitted order.
    pub fn render(&self) -> String {
        let mut output = Vec::with_capacity(self.emissions.len() * 80);

        let mut order: Vec<&str> = Vec::new();
        let mut by_name: HashMap<&str, Vec<&Emission>> = HashMap::new();
        for emission in &self.emissions {
            let series = by_name.entry(emission.name()).or_default();
            if series.is_empty() {
                order.push(emission.name());
            }
            series.push(emission);
        }

        for name in order {
            let series = &by_name[name];
            let desc = &series[0].desc;

            writeln!(output, "# HELP {} {}", name, escape_help(&desc.help)).ok();
            writeln!(output, "# TYPE {} {}", name, desc.kind.as_str()).ok();

            for emission in series {
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    emission.format_labels(),
                    format_value(emission.value)
                )
                .ok();
            }
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a MetricSet {
    type Item = &'a Emission;
    type IntoIter = std::slice::Iter<'a, Emission>;

    fn into_iter(self) -> Self::IntoIter {
        self.emissions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, kind: ValueKind, labels: &[&str]) -> Arc<MetricDesc> {
        Arc::new(MetricDesc::new(
            name,
            format!("Help for {}", name),
            kind,
            labels.iter().map(|l| l.to_string()).collect(),
        ))
    }

    #[test]
    fn test_emission_labels() {
        let emission = Emission::new(
            desc("opensips_version_info", ValueKind::Gauge, &["server", "version"]),
            1.0,
            vec!["OpenSIPS".to_string(), "2.4.2".to_string()],
        );

        assert_eq!(emission.label("server"), Some("OpenSIPS"));
        assert_eq!(emission.label("version"), Some("2.4.2"));
        assert_eq!(emission.label("os"), None);
        assert_eq!(
            emission.format_labels(),
            "{server=\"OpenSIPS\",version=\"2.4.2\"}"
        );
    }

    #[test]
    fn test_render_groups_series() {
        let load = desc("opensips_load_process_load", ValueKind::Gauge, &["id"]);
        let up = desc("opensips_up", ValueKind::Gauge, &[]);

        let mut set = MetricSet::new();
        set.push(Emission::new(load.clone(), 3.0, vec!["1".to_string()]));
        set.push(Emission::new(up, 1.0, vec![]));
        set.push(Emission::new(load, 0.5, vec!["2".to_string()]));

        let output = set.render();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(
            lines,
            vec![
                "# HELP opensips_load_process_load Help for opensips_load_process_load",
                "# TYPE opensips_load_process_load gauge",
                "opensips_load_process_load{id=\"1\"} 3",
                "opensips_load_process_load{id=\"2\"} 0.5",
                "# HELP opensips_up Help for opensips_up",
                "# TYPE opensips_up gauge",
                "opensips_up 1",
            ]
        );
    }

    #[test]
    fn test_render_escapes_label_values() {
        let mut set = MetricSet::new();
        set.push(Emission::new(
            desc("opensips_process_info", ValueKind::Gauge, &["id", "type"]),
            1.0,
            vec!["0".to_string(), "say \"hi\"".to_string()],
        ));

        let output = set.render();
        assert!(output.contains("opensips_process_info{id=\"0\",type=\"say \\\"hi\\\"\"} 1"));
    }

    #[test]
    fn test_find() {
        let mut set = MetricSet::new();
        let d = desc("opensips_tm_transactions_total", ValueKind::Counter, &["code"]);
        set.push(Emission::new(d.clone(), 10.0, vec!["2xx".to_string()]));
        set.push(Emission::new(d, 4.0, vec!["4xx".to_string()]));

        let found = set
            .find("opensips_tm_transactions_total", &[("code", "4xx")])
            .unwrap();
        assert_eq!(found.value, 4.0);
        assert_eq!(set.by_name("opensips_tm_transactions_total").count(), 2);
        assert!(set.find("opensips_tm_transactions_total", &[("code", "5xx")]).is_none());
    }

    #[test]
    fn test_empty_render() {
        assert_eq!(MetricSet::new().render(), "");
    }
}
