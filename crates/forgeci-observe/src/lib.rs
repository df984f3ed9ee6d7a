//! Observability: tracing subscriber setup and OpenTelemetry span attribute
//! conventions for pipeline instrumentation.

pub mod pipeline_attrs;
pub mod tracing_setup;
