use ndarray::ArrayView1;
use serde::Serialize;
use thiserror::Error;

pub const NUM_CLASSES: usize = 2;

/// Display label of each output class, indexed by class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Fake,
    Real,
}

impl Label {
    pub const ALL: [Label; NUM_CLASSES] = [Label::Fake, Label::Real];

    pub fn from_class_id(class_id: usize) -> Option<Self> {
        Self::ALL.get(class_id).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fake => "FAKE",
            Label::Real => "REAL",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PredictionError {
    #[error("Expected 2 logits, got {0}")]
    LogitCount(usize),
    #[error("Model produced non-finite logits: {0:?}")]
    NonFinite(Vec<f32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: Label,
    pub confidence: f64,
}

impl Prediction {
    /// Ties go to the lower class id.
    pub fn from_logits(logits: ArrayView1<f32>) -> Result<Self, PredictionError> {
        if logits.len() != NUM_CLASSES {
            return Err(PredictionError::LogitCount(logits.len()));
        }
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(PredictionError::NonFinite(logits.to_vec()));
        }

        let probabilities = softmax(logits);
        let (class_id, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        let prediction =
            Label::from_class_id(class_id).ok_or(PredictionError::LogitCount(logits.len()))?;
        Ok(Self {
            prediction,
            confidence: round_to(probability, 4),
        })
    }
}

pub fn softmax(logits: ArrayView1<f32>) -> Vec<f64> {
    let max = logits.iter().fold(f64::NEG_INFINITY, |acc, v| acc.max(*v as f64));
    let exps: Vec<f64> = logits.iter().map(|v| (*v as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Rounds the exact decimal value of `value`, not the scaled binary product.
fn round_to(value: f64, decimals: usize) -> f64 {
    format!("{value:.decimals$}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_class_ids_map_to_labels() {
        assert_eq!(Label::from_class_id(0), Some(Label::Fake));
        assert_eq!(Label::from_class_id(1), Some(Label::Real));
        assert_eq!(Label::from_class_id(2), None);
        assert_eq!(Label::Fake.as_str(), "FAKE");
        assert_eq!(Label::Real.as_str(), "REAL");
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(array![3.0f32, -1.25].view());

        assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probabilities[0] > probabilities[1]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let probabilities = softmax(array![1000.0f32, 999.0].view());

        assert!(probabilities.iter().all(|p| p.is_finite()));
        assert!((probabilities[0] - 0.7310585786300049).abs() < 1e-12);
    }

    #[test]
    fn test_prediction_picks_argmax_and_rounds_confidence() {
        let prediction = Prediction::from_logits(array![0.0f32, 2.0].view()).unwrap();

        assert_eq!(prediction.prediction, Label::Real);
        assert_eq!(prediction.confidence, 0.8808);
    }

    #[test]
    fn test_confidence_matches_softmax_of_returned_class() {
        let logits = array![1.7f32, -0.3];
        let prediction = Prediction::from_logits(logits.view()).unwrap();
        let probabilities = softmax(logits.view());

        assert_eq!(prediction.prediction, Label::Fake);
        assert!((prediction.confidence - probabilities[0]).abs() <= 0.00005);
        assert_eq!(prediction.confidence, round_to(probabilities[0], 4));
    }

    #[test]
    fn test_rounding_near_decimal_tie() {
        assert_eq!(round_to(0.88885, 4), 0.8889);
        assert_eq!(round_to(0.12344999, 4), 0.1234);
        assert_eq!(round_to(1.0, 4), 1.0);
    }

    #[test]
    fn test_tie_resolves_to_fake() {
        let prediction = Prediction::from_logits(array![0.5f32, 0.5].view()).unwrap();

        assert_eq!(prediction.prediction, Label::Fake);
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn test_saturated_confidence_is_one() {
        let prediction = Prediction::from_logits(array![-50.0f32, 50.0].view()).unwrap();

        assert_eq!(prediction.prediction, Label::Real);
        assert_eq!(prediction.confidence, 1.0);
    }

    #[test]
    fn test_rejects_wrong_logit_count() {
        let result = Prediction::from_logits(array![1.0f32, 2.0, 3.0].view());

        assert_eq!(result, Err(PredictionError::LogitCount(3)));
    }

    #[test]
    fn test_rejects_non_finite_logits() {
        let result = Prediction::from_logits(array![f32::NAN, 0.0].view());

        assert!(matches!(result, Err(PredictionError::NonFinite(_))));
    }
}
