// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! * `device` - adapter and device lifecycle events
//! * `registry` - registration and teardown events
//! * `scheduler` - polling events
//! * `workcell` - reconciliation and recovery events

use tracing::Span;

pub mod device;
pub mod registry;
pub mod scheduler;
pub mod workcell;

/// A message that knows its own log level and structured fields.
pub trait StructuredLog {
    /// Emit the message at its level, with its fields attached.
    fn log(&self);

    /// Span for work the message introduces.
    ///
    /// The default span records only `span_name`. Messages whose fields
    /// should follow the work (device and workcell ids) override this.
    fn span(&self, name: &str) -> Span {
        tracing::info_span!("runtime", span_name = name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::messages::workcell::RecoveryStarted;

    struct Bare;

    impl StructuredLog for Bare {
        fn log(&self) {}
    }

    fn field_names(span: &Span) -> Vec<String> {
        span.metadata()
            .expect("span disabled")
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    #[test]
    fn test_span_fields() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());

        assert_eq!(field_names(&Bare.span("sweep")), vec!["span_name"]);

        let started = RecoveryStarted {
            workcell_id: "cell1",
            device_id: "robot1",
            consecutive_failures: 3,
        };
        assert_eq!(
            field_names(&started.span("recover_member")),
            vec!["span_name", "workcell_id", "device_id"]
        );
    }
}
