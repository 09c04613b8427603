//! Open-set identity decision.
//!
//! Classifier probability alone cannot tell "known person, bad angle" from
//! "someone new": both come out as low confidence. The embedding distance to
//! stored baselines separates the two, and also catches the classifier being
//! confidently wrong.

use serde::{Deserialize, Serialize};

use super::identity::{Baselines, Classification};
use crate::domain::{Curation, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionPolicy {
    /// Below this the classifier's label is ignored.
    pub min_probability: f32,
    /// At or above this an accepted face becomes training material.
    pub usable_probability: f32,
    /// An unknown face further than this from every baseline is a new person.
    pub new_face_distance: f32,
}

impl Default for RecognitionPolicy {
    fn default() -> Self {
        Self {
            min_probability: 0.5,
            usable_probability: 0.99,
            new_face_distance: 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceDecision {
    pub identity: Identity,
    pub probability: f32,
    /// Distance to the chosen label's baseline, or to the nearest one for unknowns.
    pub distance: f32,
    pub usable: bool,
    pub curation: Option<Curation>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecognitionEnsemble {
    policy: RecognitionPolicy,
}

impl RecognitionEnsemble {
    pub fn new(policy: RecognitionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RecognitionPolicy {
        &self.policy
    }

    pub fn decide(
        &self,
        classification: Option<&Classification>,
        embedding: &[f32],
        baselines: &Baselines,
    ) -> FaceDecision {
        let probability = classification.map_or(0.0, |c| c.probability);

        if let Some(claimed) = classification.filter(|c| c.probability >= self.policy.min_probability) {
            if let Some(baseline) = baselines.get(&claimed.label) {
                let distance = super::identity::euclidean(&baseline.centroid, embedding);
                if distance <= baseline.threshold {
                    let usable = probability >= self.policy.usable_probability;
                    return FaceDecision {
                        identity: Identity::Known(claimed.label.clone()),
                        probability,
                        distance,
                        usable,
                        curation: usable.then_some(Curation::Training),
                    };
                }
            }

            // Confident but inconsistent with the claimed baseline.
            if let Some(nearest) = baselines.nearest(embedding).filter(|n| n.within_threshold()) {
                return FaceDecision {
                    identity: Identity::Known(nearest.label.to_string()),
                    probability,
                    distance: nearest.distance,
                    usable: false,
                    curation: None,
                };
            }
        }

        self.unknown(probability, embedding, baselines)
    }

    fn unknown(&self, probability: f32, embedding: &[f32], baselines: &Baselines) -> FaceDecision {
        let nearest = baselines.nearest(embedding);
        let distance = nearest.map_or(f32::MAX, |n| n.distance);
        let curation = match nearest {
            None => Some(Curation::NewIndividual),
            Some(n) if n.distance > self.policy.new_face_distance => Some(Curation::NewIndividual),
            Some(n) if n.within_threshold() => Some(Curation::Refine(n.label.to_string())),
            Some(_) => None,
        };
        FaceDecision {
            identity: Identity::Unknown,
            probability,
            distance,
            usable: curation.is_some(),
            curation,
        }
    }
}
