//! JSON contracts of the classification and persistence endpoints.
//!
//! `/predict` answers `{ "detections": [{ "class_id", "confidence", "bbox" }] }`
//! ranked by the service. `/save` takes `{ class_id, itemName, category, method }`
//! and stamps its own id and timestamp; its reply is ignored.

use serde::{Deserialize, Serialize};

use super::transport::ClassifierError;
use crate::disposal::{ClassSource, WasteResult};

/// One object proposed by the classifier.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub class_id: i64,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source pixels.
    pub bbox: [f32; 4],
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PredictResponse {
    pub detections: Vec<Detection>,
}

impl PredictResponse {
    /// The service's top-ranked detection. Never re-sorted here.
    pub fn top(&self) -> Option<&Detection> {
        self.detections.first()
    }
}

/// Parse a `/predict` body. A missing `detections` field is malformed.
///
/// Only the top detection is ever consulted, so only its confidence is
/// range checked.
pub fn parse_predict_response(body: &str) -> Result<PredictResponse, ClassifierError> {
    let response: PredictResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::Malformed(format!("invalid /predict body: {}", e)))?;
    if let Some(top) = response.top() {
        if !(0.0..=1.0).contains(&top.confidence) {
            return Err(ClassifierError::Malformed(format!(
                "top detection confidence {} outside [0, 1]",
                top.confidence
            )));
        }
    }
    Ok(response)
}

/// Body posted to `/save`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SaveRecord {
    pub class_id: ClassSource,
    #[serde(rename = "itemName")]
    pub item_name: String,
    pub category: String,
    pub method: String,
}

impl SaveRecord {
    pub fn new(class_id: ClassSource, result: &WasteResult) -> Self {
        Self {
            class_id,
            item_name: result.item_name().to_string(),
            category: result.category().to_string(),
            method: result.method().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_response() {
        let body = r#"{"detections":[
            {"class_id": 2, "confidence": 0.913, "bbox": [10.5, 20.0, 110.25, 300.0]},
            {"class_id": 0, "confidence": 0.402, "bbox": [0.0, 0.0, 5.0, 5.0]}
        ]}"#;
        let response = parse_predict_response(body).expect("parse");
        assert_eq!(response.detections.len(), 2);
        let top = response.top().expect("top");
        assert_eq!(top.class_id, 2);
        assert_eq!(top.bbox, [10.5, 20.0, 110.25, 300.0]);
    }

    #[test]
    fn keeps_service_order() {
        let body = r#"{"detections":[
            {"class_id": 1, "confidence": 0.2, "bbox": [0,0,1,1]},
            {"class_id": 0, "confidence": 0.9, "bbox": [0,0,1,1]}
        ]}"#;
        let response = parse_predict_response(body).expect("parse");
        assert_eq!(response.top().map(|d| d.class_id), Some(1));
    }

    #[test]
    fn empty_detections_are_valid() {
        let response = parse_predict_response(r#"{"detections": []}"#).expect("parse");
        assert!(response.top().is_none());
    }

    #[test]
    fn missing_field_and_bad_json_are_malformed() {
        for body in ["{}", r#"{"detections": null}"#, "not json", r#"{"detections":[{"class_id":1}]}"#] {
            assert!(
                matches!(parse_predict_response(body), Err(ClassifierError::Malformed(_))),
                "{} should be malformed",
                body
            );
        }
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let body = r#"{"detections":[{"class_id": 1, "confidence": 1.5, "bbox": [0,0,1,1]}]}"#;
        assert!(matches!(
            parse_predict_response(body),
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[test]
    fn lower_ranked_detections_are_not_range_checked() {
        let body = r#"{"detections":[
            {"class_id": 2, "confidence": 0.9, "bbox": [0,0,1,1]},
            {"class_id": 0, "confidence": 1.2, "bbox": [0,0,1,1]}
        ]}"#;
        let response = parse_predict_response(body).expect("parse");
        assert_eq!(response.top().map(|d| d.class_id), Some(2));
    }

    #[test]
    fn negative_class_id_parses() {
        let body = r#"{"detections":[{"class_id": -1, "confidence": 0.9, "bbox": [0,0,1,1]}]}"#;
        let response = parse_predict_response(body).expect("parse");
        assert_eq!(response.top().map(|d| d.class_id), Some(-1));
    }

    #[test]
    fn save_record_uses_service_field_names() {
        let table = crate::DisposalLookupTable::builtin().expect("table");
        let record = SaveRecord::new(ClassSource::Class(0), &table.result_for(0));
        let json = serde_json::to_value(&record).expect("json");
        assert_eq!(json["class_id"], 0);
        assert_eq!(json["itemName"], "Can");
        assert_eq!(json["category"], "Cans");
        assert_eq!(json["method"], "Sort as cans");
    }
}
