use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::common::v1::{KeyValue, any_value};
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, Span};
use privsweep_contracts::{UsageRecord, privilege_from_parts};

use crate::metrics;

/// Distills privilege usage records out of an OTLP trace export.
///
/// The enclosing resource must carry an `aws.iam.role` attribute or all of
/// its spans are dropped. Each span must carry `aws.service` and
/// `aws.operation`; spans missing either are skipped and counted.
pub fn extract_records(resource_spans: &[ResourceSpans]) -> Vec<UsageRecord> {
    let mut records = Vec::new();

    for rs in resource_spans {
        let identity = rs
            .resource
            .as_ref()
            .map(|r| attr_value(&r.attributes, "aws.iam.role"))
            .unwrap_or("");
        if identity.is_empty() {
            tracing::debug!("skipping resource spans: missing aws.iam.role resource attribute");
            continue;
        }

        for scope in &rs.scope_spans {
            for span in &scope.spans {
                metrics::inc_spans_received();

                let service = attr_value(&span.attributes, "aws.service");
                let operation = attr_value(&span.attributes, "aws.operation");

                if service.is_empty() || operation.is_empty() {
                    tracing::debug!(
                        span = %span.name,
                        identity = %identity,
                        "skipping span: missing aws.service or aws.operation"
                    );
                    metrics::inc_spans_skipped();
                    continue;
                }

                records.push(UsageRecord {
                    timestamp: span_timestamp(span),
                    identity: identity.to_string(),
                    privilege: privilege_from_parts(service, operation),
                    call_count: 1,
                });
            }
        }
    }

    records
}

/// The string value of a named attribute, or "" when absent.
fn attr_value<'a>(attrs: &'a [KeyValue], key: &str) -> &'a str {
    for kv in attrs {
        if kv.key == key
            && let Some(value) = &kv.value
            && let Some(any_value::Value::StringValue(s)) = &value.value
            && !s.is_empty()
        {
            return s;
        }
    }
    ""
}

/// The span's start time, falling back to the receiver's clock when the span
/// carries a zero timestamp.
fn span_timestamp(span: &Span) -> DateTime<Utc> {
    if span.start_time_unix_nano != 0 {
        DateTime::from_timestamp_nanos(span.start_time_unix_nano as i64)
    } else {
        Utc::now()
    }
}
