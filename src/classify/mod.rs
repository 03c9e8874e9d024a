//! Classification Orchestrator.
//!
//! Turns an encoded still into a `WasteResult`:
//!
//! ```text
//! Idle -> Submitting -> Resolved | Failed
//! ```
//!
//! Every `submit` mints a new `RequestId` and supersedes whatever was in
//! flight. Responses come back through `resolve`, which only applies the one
//! carrying the latest id; anything older is dropped on arrival.
//!
//! The orchestrator does no I/O itself. `Workflow` runs the `Classifier`
//! and `ResultSink` and feeds completions back here.

use std::fmt;

pub mod transport;
pub mod wire;

pub use transport::{
    endpoint_url, Classifier, ClassifierError, HttpClassifier, HttpResultSink, ResultSink,
};
pub use wire::{parse_predict_response, Detection, PredictResponse, SaveRecord};

use crate::disposal::{ClassSource, DisposalLookupTable, WasteResult};
use crate::frame::EncodedFrame;

/// Monotonic id assigned at submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// An image bound to the id it was submitted under.
#[derive(Clone, Debug)]
pub struct ClassificationRequest {
    pub id: RequestId,
    pub frame: EncodedFrame,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassificationState {
    Idle,
    Submitting {
        request: RequestId,
    },
    /// The classifier answered; the result is mapped or `Unrecognized`.
    Resolved {
        request: RequestId,
        result: WasteResult,
    },
    /// The round trip failed; the result is the communication-failure sentinel.
    Failed {
        request: RequestId,
        result: WasteResult,
    },
}

/// What `resolve` did with a completion.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// The completion belonged to the latest request and is now visible.
    /// `report` is the record to send to the persistence endpoint, if any.
    Applied {
        result: WasteResult,
        report: Option<SaveRecord>,
    },
    /// A newer request exists; the completion was discarded.
    Stale,
}

pub struct Orchestrator {
    table: DisposalLookupTable,
    next_id: u64,
    state: ClassificationState,
}

impl Orchestrator {
    pub fn new(table: DisposalLookupTable) -> Self {
        Self {
            table,
            next_id: 1,
            state: ClassificationState::Idle,
        }
    }

    pub fn table(&self) -> &DisposalLookupTable {
        &self.table
    }

    pub fn state(&self) -> &ClassificationState {
        &self.state
    }

    pub fn is_analyzing(&self) -> bool {
        matches!(self.state, ClassificationState::Submitting { .. })
    }

    /// Id of the request whose completion would currently be applied.
    pub fn current_request(&self) -> Option<RequestId> {
        match &self.state {
            ClassificationState::Idle => None,
            ClassificationState::Submitting { request }
            | ClassificationState::Resolved { request, .. }
            | ClassificationState::Failed { request, .. } => Some(*request),
        }
    }

    /// Latest visible result, if the current request has finished.
    pub fn result(&self) -> Option<&WasteResult> {
        match &self.state {
            ClassificationState::Resolved { result, .. }
            | ClassificationState::Failed { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Start a new classification, superseding any request in flight.
    pub fn submit(&mut self, frame: EncodedFrame) -> ClassificationRequest {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        if let ClassificationState::Submitting { request } = self.state {
            log::debug!("{} superseded by {}", request, id);
        }
        log::info!("{} submitted ({} bytes)", id, frame.len());
        self.state = ClassificationState::Submitting { request: id };
        ClassificationRequest { id, frame }
    }

    /// Apply the outcome of request `id` if it is still the latest.
    pub fn resolve(
        &mut self,
        id: RequestId,
        outcome: Result<PredictResponse, ClassifierError>,
    ) -> Resolution {
        if self.current_request() != Some(id) || !self.is_analyzing() {
            log::debug!("discarding stale completion for {}", id);
            return Resolution::Stale;
        }

        match outcome {
            Ok(response) => {
                let (result, class_id) = match response.top() {
                    Some(top) => (
                        self.table.result_for(top.class_id),
                        ClassSource::Class(top.class_id),
                    ),
                    None => (self.table.unrecognized(), ClassSource::Unknown),
                };
                log::info!(
                    "{} resolved: {} ({:?}, top class {})",
                    id,
                    result.item_name(),
                    result.kind(),
                    class_id
                );
                let report = SaveRecord::new(class_id, &result);
                self.state = ClassificationState::Resolved {
                    request: id,
                    result: result.clone(),
                };
                Resolution::Applied {
                    result,
                    report: Some(report),
                }
            }
            Err(err) => {
                log::warn!("{} failed: {}", id, err);
                let result = WasteResult::communication_failure();
                self.state = ClassificationState::Failed {
                    request: id,
                    result: result.clone(),
                };
                Resolution::Applied {
                    result,
                    report: None,
                }
            }
        }
    }

    /// Forget the visible result. Completions still in flight become stale.
    pub fn reset(&mut self) {
        self.state = ClassificationState::Idle;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposal::ResultKind;
    use crate::frame::VideoFrame;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(DisposalLookupTable::builtin().expect("table"))
    }

    fn frame(shade: u8) -> EncodedFrame {
        VideoFrame::new(vec![shade; 4 * 4 * 3], 4, 4)
            .expect("frame")
            .encode()
            .expect("encode")
    }

    fn response(class_ids: &[i64]) -> PredictResponse {
        PredictResponse {
            detections: class_ids
                .iter()
                .map(|&class_id| Detection {
                    class_id,
                    confidence: 0.9,
                    bbox: [0.0, 0.0, 10.0, 10.0],
                })
                .collect(),
        }
    }

    fn applied(resolution: Resolution) -> (WasteResult, Option<SaveRecord>) {
        match resolution {
            Resolution::Applied { result, report } => (result, report),
            Resolution::Stale => panic!("expected an applied resolution"),
        }
    }

    #[test]
    fn request_ids_are_monotonic() {
        let mut orch = orchestrator();
        let a = orch.submit(frame(1)).id;
        let b = orch.submit(frame(2)).id;
        assert!(b > a);
        assert_eq!(orch.current_request(), Some(b));
        assert!(orch.is_analyzing());
    }

    #[test]
    fn top_detection_is_mapped() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        let (result, report) = applied(orch.resolve(req.id, Ok(response(&[1, 2]))));
        assert_eq!(result.kind(), ResultKind::Mapped);
        assert_eq!(result.item_name(), "Glass bottle");
        assert_eq!(report.map(|r| r.class_id), Some(ClassSource::Class(1)));
        assert!(!orch.is_analyzing());
        assert_eq!(orch.result(), Some(&result));
    }

    #[test]
    fn empty_detections_are_unrecognized() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        let (result, report) = applied(orch.resolve(req.id, Ok(response(&[]))));
        assert_eq!(result.kind(), ResultKind::Unrecognized);
        assert_eq!(report.map(|r| r.class_id), Some(ClassSource::Unknown));
        assert!(matches!(orch.state(), ClassificationState::Resolved { .. }));
    }

    #[test]
    fn unknown_class_is_unrecognized_but_reported_with_its_id() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        let (result, report) = applied(orch.resolve(req.id, Ok(response(&[77]))));
        assert_eq!(result, orch.table().unrecognized());
        assert_eq!(report.map(|r| r.class_id), Some(ClassSource::Class(77)));
    }

    #[test]
    fn out_of_range_class_ids_are_unrecognized() {
        let mut orch = orchestrator();
        for body in [
            r#"{"detections":[{"class_id":-1,"confidence":0.9,"bbox":[0,0,1,1]}]}"#,
            r#"{"detections":[{"class_id":4294967296,"confidence":0.9,"bbox":[0,0,1,1]}]}"#,
        ] {
            let req = orch.submit(frame(1));
            let parsed = parse_predict_response(body);
            let (result, report) = applied(orch.resolve(req.id, parsed));
            assert_eq!(result.kind(), ResultKind::Unrecognized, "{}", body);
            assert!(report.is_some());
        }
    }

    #[test]
    fn bad_secondary_detection_still_maps_top() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        let parsed = parse_predict_response(
            r#"{"detections":[
                {"class_id":2,"confidence":0.9,"bbox":[0,0,1,1]},
                {"class_id":0,"confidence":1.2,"bbox":[0,0,1,1]}
            ]}"#,
        );
        let (result, _) = applied(orch.resolve(req.id, parsed));
        assert_eq!(result.kind(), ResultKind::Mapped);
        assert_eq!(result.item_name(), "PET bottle");
    }

    #[test]
    fn transport_failure_is_communication_failure_without_report() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        let (result, report) = applied(orch.resolve(
            req.id,
            Err(ClassifierError::Transport("connection refused".into())),
        ));
        assert_eq!(result, WasteResult::communication_failure());
        assert!(report.is_none());
        assert!(matches!(orch.state(), ClassificationState::Failed { .. }));
    }

    #[test]
    fn late_first_response_is_discarded() {
        let mut orch = orchestrator();
        let first = orch.submit(frame(1));
        let second = orch.submit(frame(2));

        let (result, _) = applied(orch.resolve(second.id, Ok(response(&[2]))));
        assert_eq!(result.item_name(), "PET bottle");

        assert_eq!(orch.resolve(first.id, Ok(response(&[0]))), Resolution::Stale);
        assert_eq!(orch.result().map(|r| r.item_name()), Some("PET bottle"));
        assert_eq!(orch.current_request(), Some(second.id));
    }

    #[test]
    fn early_first_response_is_discarded_too() {
        let mut orch = orchestrator();
        let first = orch.submit(frame(1));
        let second = orch.submit(frame(2));

        assert_eq!(orch.resolve(first.id, Ok(response(&[0]))), Resolution::Stale);
        assert!(orch.is_analyzing());
        let (result, _) = applied(orch.resolve(second.id, Ok(response(&[1]))));
        assert_eq!(orch.result(), Some(&result));
    }

    #[test]
    fn duplicate_completion_is_not_reapplied() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        applied(orch.resolve(req.id, Ok(response(&[0]))));
        assert_eq!(orch.resolve(req.id, Ok(response(&[1]))), Resolution::Stale);
        assert_eq!(orch.result().map(|r| r.item_name()), Some("Can"));
    }

    #[test]
    fn same_response_always_gives_same_result() {
        let mut orch = orchestrator();
        let image = frame(5);
        let mut results = Vec::new();
        for _ in 0..3 {
            let req = orch.submit(image.clone());
            let (result, _) = applied(orch.resolve(req.id, Ok(response(&[0, 1]))));
            results.push(result);
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn reset_makes_inflight_completion_stale() {
        let mut orch = orchestrator();
        let req = orch.submit(frame(1));
        orch.reset();
        assert!(!orch.is_analyzing());
        assert_eq!(orch.resolve(req.id, Ok(response(&[0]))), Resolution::Stale);
        assert!(orch.result().is_none());
    }
}
