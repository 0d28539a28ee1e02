//! Prometheus text exposition format.
//!
//! Renders a [`MetricsSnapshot`] for scraping by a Prometheus server or
//! compatible agent.

use crate::collector::MetricsSnapshot;

/// Render a metrics snapshot into Prometheus text format.
///
/// Operation counters carry `operation` and `outcome` labels; the
/// connection gauges are unlabelled.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP fedstore_operations_total Store operations by outcome.\n");
    out.push_str("# TYPE fedstore_operations_total counter\n");
    for op in &snapshot.operations {
        out.push_str(&format!(
            "fedstore_operations_total{{operation=\"{}\",outcome=\"success\"}} {}\n",
            op.operation, op.successes
        ));
        out.push_str(&format!(
            "fedstore_operations_total{{operation=\"{}\",outcome=\"failure\"}} {}\n",
            op.operation, op.failures
        ));
    }

    out.push_str(
        "# HELP fedstore_operation_latency_micros_total Cumulative operation latency in microseconds.\n",
    );
    out.push_str("# TYPE fedstore_operation_latency_micros_total counter\n");
    for op in &snapshot.operations {
        out.push_str(&format!(
            "fedstore_operation_latency_micros_total{{operation=\"{}\"}} {}\n",
            op.operation, op.latency_micros_total
        ));
    }

    out.push_str("# HELP fedstore_connections_created Backend connections created.\n");
    out.push_str("# TYPE fedstore_connections_created gauge\n");
    out.push_str(&format!(
        "fedstore_connections_created {}\n",
        snapshot.connections_created
    ));

    out.push_str("# HELP fedstore_connections_live Backend connections currently open.\n");
    out.push_str("# TYPE fedstore_connections_live gauge\n");
    out.push_str(&format!(
        "fedstore_connections_live {}\n",
        snapshot.connections_live
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::OperationSnapshot;

    fn test_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            operations: vec![OperationSnapshot {
                operation: "get_sub_cluster".to_string(),
                successes: 7,
                failures: 2,
                latency_micros_total: 420,
            }],
            connections_created: 1,
            connections_live: 1,
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&MetricsSnapshot {
            operations: vec![],
            connections_created: 0,
            connections_live: 0,
        });
        assert!(output.contains("# TYPE fedstore_operations_total counter"));
        assert!(output.contains("fedstore_connections_created 0\n"));
    }

    #[test]
    fn render_operation_counters() {
        let output = render_prometheus(&test_snapshot());

        assert!(output.contains(
            "fedstore_operations_total{operation=\"get_sub_cluster\",outcome=\"success\"} 7"
        ));
        assert!(output.contains(
            "fedstore_operations_total{operation=\"get_sub_cluster\",outcome=\"failure\"} 2"
        ));
        assert!(output
            .contains("fedstore_operation_latency_micros_total{operation=\"get_sub_cluster\"} 420"));
        assert!(output.contains("fedstore_connections_created 1\n"));
        assert!(output.contains("fedstore_connections_live 1\n"));
    }

    #[test]
    fn every_sample_line_has_a_value() {
        let output = render_prometheus(&test_snapshot());
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.rsplit(' ').next().unwrap();
            assert!(value.parse::<u64>().is_ok(), "bad sample line: {line}");
        }
    }
}
