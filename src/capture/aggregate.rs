//! Merging per-sink outcomes into one classified result.

use serde::{Serialize, Serializer, ser::SerializeStruct};
use url::Url;

use super::{
    arranger::ConstructionFailure,
    types::{CaptureError, Classification, OperationOutcome, SinkReport},
};

/// Ordered per-sink outcomes of one capture or recording.
///
/// Never empty. The classification is derived from the outcomes on every call.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    reports: Vec<SinkReport>,
}

impl AggregateResult {
    pub fn new(reports: Vec<SinkReport>) -> Result<Self, CaptureError> {
        if reports.is_empty() {
            return Err(CaptureError::NoOutcomes);
        }
        Ok(Self { reports })
    }

    pub fn reports(&self) -> &[SinkReport] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn classification(&self) -> Classification {
        from_counts(self.successes().count(), self.reports.len())
    }

    pub fn successes(&self) -> impl Iterator<Item = &SinkReport> {
        self.reports.iter().filter(|r| r.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &SinkReport> {
        self.reports.iter().filter(|r| !r.outcome.is_success())
    }

    /// First URI produced by a successful sink, if any.
    pub fn first_uri(&self) -> Option<&Url> {
        self.reports.iter().find_map(|r| r.outcome.uri())
    }
}

impl Serialize for AggregateResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AggregateResult", 2)?;
        state.serialize_field("classification", &self.classification())?;
        state.serialize_field("outcomes", &self.reports)?;
        state.end()
    }
}

/// Classifies a list of outcomes. Empty input is rejected.
pub fn classify(outcomes: &[OperationOutcome]) -> Result<Classification, CaptureError> {
    if outcomes.is_empty() {
        return Err(CaptureError::NoOutcomes);
    }
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    Ok(from_counts(succeeded, outcomes.len()))
}

fn from_counts(succeeded: usize, total: usize) -> Classification {
    match succeeded {
        0 => Classification::AllFailed,
        n if n == total => Classification::AllSucceeded,
        _ => Classification::Partial,
    }
}

/// Concatenates construction failures (first) with broadcast reports (in the
/// order the broadcaster returned them).
pub fn aggregate(
    construction_failures: Vec<ConstructionFailure>,
    broadcast: Vec<SinkReport>,
) -> Result<AggregateResult, CaptureError> {
    let mut reports = Vec::with_capacity(construction_failures.len() + broadcast.len());
    reports.extend(construction_failures.into_iter().map(|failure| {
        SinkReport::new(failure.descriptor, OperationOutcome::failure(failure.error))
    }));
    reports.extend(broadcast);

    let result = AggregateResult::new(reports)?;
    log::info!(
        "Capture finished: {:?} ({} ok, {} failed)",
        result.classification(),
        result.successes().count(),
        result.failures().count()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::SinkDescriptor;

    fn ok(id: &str) -> SinkReport {
        SinkReport::new(
            SinkDescriptor::new(id, id),
            OperationOutcome::success("done", id),
        )
    }

    fn failed(id: &str) -> SinkReport {
        SinkReport::new(
            SinkDescriptor::new(id, id),
            OperationOutcome::failure(CaptureError::Upload("timeout".into())),
        )
    }

    fn construction_failure(id: &str) -> ConstructionFailure {
        ConstructionFailure {
            descriptor: SinkDescriptor::new(id, id),
            error: CaptureError::UnknownSink(id.into()),
        }
    }

    #[test]
    fn construction_failures_come_first() {
        let result = aggregate(
            vec![construction_failure("x")],
            vec![ok("a"), failed("b"), ok("master")],
        )
        .unwrap();
        let ids: Vec<_> = result.reports().iter().map(|r| r.sink.id.as_str()).collect();
        assert_eq!(ids, ["x", "a", "b", "master"]);
        assert_eq!(result.classification(), Classification::Partial);
    }

    #[test]
    fn classification_covers_all_cases() {
        let all_ok = AggregateResult::new(vec![ok("a"), ok("b")]).unwrap();
        assert_eq!(all_ok.classification(), Classification::AllSucceeded);

        let all_bad = AggregateResult::new(vec![failed("a"), failed("b")]).unwrap();
        assert_eq!(all_bad.classification(), Classification::AllFailed);

        let mixed = AggregateResult::new(vec![failed("a"), ok("b")]).unwrap();
        assert_eq!(mixed.classification(), Classification::Partial);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(aggregate(vec![], vec![]), Err(CaptureError::NoOutcomes)));
        assert!(matches!(classify(&[]), Err(CaptureError::NoOutcomes)));
    }

    #[test]
    fn classify_is_pure() {
        let outcomes: Vec<_> = [ok("a"), failed("b")]
            .into_iter()
            .map(|r| r.outcome)
            .collect();
        let first = classify(&outcomes).unwrap();
        let second = classify(&outcomes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Classification::Partial);
    }

    #[test]
    fn first_uri_skips_failures() {
        let mut with_uri = ok("file");
        with_uri.outcome = OperationOutcome::Success {
            uri: Some(Url::parse("file:///tmp/shot.ppm").unwrap()),
            title: "Capture saved".into(),
            content: "/tmp/shot.ppm".into(),
        };
        let result = AggregateResult::new(vec![failed("a"), ok("b"), with_uri]).unwrap();
        assert_eq!(
            result.first_uri().map(Url::as_str),
            Some("file:///tmp/shot.ppm")
        );
    }

    #[test]
    fn serializes_classification_with_outcomes() {
        let result = AggregateResult::new(vec![ok("a"), failed("b")]).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["classification"], "partial");
        assert_eq!(json["outcomes"][1]["cause"], "Upload failed: timeout");
    }
}
