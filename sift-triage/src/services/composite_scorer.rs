//! Composite scorer
//!
//! Scores a single photo with several weighted models per category
//! (aesthetic, technical). Every distinct model is asked once with the JSON
//! scoring prompt; its `aesthetic_score`/`technical_score` feed whichever
//! categories list it.
//!
//! Normalisation: `raw / scale * 100`, clamped to 0..=100. A category's score
//! is the weighted mean over the models that answered, so one failing model
//! re-distributes its weight instead of dragging the score to zero.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::inference_cache::InferenceCache;
use super::prompts::SCORING_PROMPT;
use super::vision_client::{ModelError, ModelSpec, VisionModel};
use crate::error::TriageError;
use crate::models::ImageReference;

const WEIGHT_TOLERANCE: f64 = 1e-6;

fn default_scale() -> f64 {
    10.0
}

/// A model contributing to one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedModel {
    pub model: ModelSpec,
    pub weight: f64,
    /// Maximum raw score the model reports
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl WeightedModel {
    pub fn new(model: ModelSpec, weight: f64) -> Self {
        Self {
            model,
            weight,
            scale: default_scale(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub aesthetic_models: Vec<WeightedModel>,
    pub technical_models: Vec<WeightedModel>,
    pub aesthetic_weight: f64,
    pub technical_weight: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        let primary = ModelSpec::new("gpt-4o", "2024-08-06");
        let secondary = ModelSpec::new("gpt-4o-mini", "2024-07-18");
        Self {
            aesthetic_models: vec![
                WeightedModel::new(primary.clone(), 0.7),
                WeightedModel::new(secondary.clone(), 0.3),
            ],
            technical_models: vec![
                WeightedModel::new(primary, 0.5),
                WeightedModel::new(secondary, 0.5),
            ],
            aesthetic_weight: 0.6,
            technical_weight: 0.4,
        }
    }
}

impl ScorerConfig {
    /// Every weight set must sum to 1.0
    pub fn validate(&self) -> Result<(), TriageError> {
        check_sum(
            "category weights",
            [self.aesthetic_weight, self.technical_weight].iter().copied(),
        )?;
        check_models("aesthetic_models", &self.aesthetic_models)?;
        check_models("technical_models", &self.technical_models)?;
        Ok(())
    }

    /// Distinct models in configuration order (aesthetic list first)
    fn distinct_models(&self) -> Vec<ModelSpec> {
        let mut models: Vec<ModelSpec> = Vec::new();
        for weighted in self.aesthetic_models.iter().chain(&self.technical_models) {
            if !models.contains(&weighted.model) {
                models.push(weighted.model.clone());
            }
        }
        models
    }
}

fn check_models(name: &str, models: &[WeightedModel]) -> Result<(), TriageError> {
    if models.is_empty() {
        return Err(TriageError::InvalidWeightConfig(format!("{} is empty", name)));
    }
    if let Some(bad) = models.iter().find(|m| !m.scale.is_finite() || m.scale <= 0.0) {
        return Err(TriageError::InvalidWeightConfig(format!(
            "{}: {} needs a positive, finite scale",
            name, bad.model
        )));
    }
    check_sum(name, models.iter().map(|m| m.weight))
}

fn check_sum(name: &str, weights: impl Iterator<Item = f64>) -> Result<(), TriageError> {
    let weights: Vec<f64> = weights.collect();
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(TriageError::InvalidWeightConfig(format!(
            "{} contain invalid weight {} (must be finite and non-negative)",
            name, bad
        )));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(TriageError::InvalidWeightConfig(format!(
            "{} sum to {} (expected 1.0)",
            name, sum
        )));
    }
    Ok(())
}

/// Score of one photo, all scores on 0..=100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub aesthetic_score: f64,
    pub technical_score: f64,
    pub final_score: f64,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub explanation: String,
}

/// What a model returns for the scoring prompt
#[derive(Debug, Deserialize)]
struct ModelScore {
    aesthetic_score: Option<f64>,
    technical_score: Option<f64>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
}

pub struct CompositeScorer {
    config: ScorerConfig,
    model: Arc<dyn VisionModel>,
    cache: Option<Arc<dyn InferenceCache>>,
    call_timeout: Duration,
}

impl CompositeScorer {
    /// # Errors
    /// `InvalidWeightConfig` before any model is contacted.
    pub fn new(
        config: ScorerConfig,
        model: Arc<dyn VisionModel>,
        cache: Option<Arc<dyn InferenceCache>>,
        call_timeout: Duration,
    ) -> Result<Self, TriageError> {
        config.validate()?;
        Ok(Self {
            config,
            model,
            cache,
            call_timeout,
        })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Score one photo
    ///
    /// # Errors
    /// `ScoringFailed` when every model of a category failed, or the file
    /// cannot be read.
    pub async fn score(&self, image: &ImageReference) -> Result<ScoreResult, TriageError> {
        let bytes = tokio::fs::read(&image.path).await.map_err(|e| {
            TriageError::ScoringFailed(format!("Cannot read {}: {}", image.path.display(), e))
        })?;

        let models = self.config.distinct_models();
        let answers = join_all(models.iter().map(|model| self.query_model(image, &bytes, model))).await;

        let mut responses: BTreeMap<&ModelSpec, ModelScore> = BTreeMap::new();
        for (model, answer) in models.iter().zip(answers) {
            match answer {
                Ok(score) => {
                    responses.insert(model, score);
                }
                Err(e) => tracing::warn!(
                    image_id = %image.id,
                    model = %model,
                    error = %e,
                    "Scoring model failed"
                ),
            }
        }

        let aesthetic = category_score(
            "aesthetic",
            &self.config.aesthetic_models,
            &responses,
            |s| s.aesthetic_score,
        )?;
        let technical = category_score(
            "technical",
            &self.config.technical_models,
            &responses,
            |s| s.technical_score,
        )?;

        let mut attributes = serde_json::Map::new();
        let mut explanation = Vec::new();
        for model in &models {
            if let Some(score) = responses.get(model) {
                for (key, value) in &score.attributes {
                    attributes.entry(key.clone()).or_insert_with(|| value.clone());
                }
                if let Some(text) = score.explanation.as_deref().map(str::trim) {
                    if !text.is_empty() {
                        explanation.push(format!("{}: {}", model.name, text));
                    }
                }
            }
        }

        Ok(ScoreResult {
            aesthetic_score: aesthetic,
            technical_score: technical,
            final_score: self.config.aesthetic_weight * aesthetic
                + self.config.technical_weight * technical,
            attributes,
            explanation: explanation.join("\n"),
        })
    }

    async fn query_model(
        &self,
        image: &ImageReference,
        bytes: &[u8],
        model: &ModelSpec,
    ) -> Result<ModelScore, TriageError> {
        if let Some(cache) = &self.cache {
            match cache.get(&image.id, model).await {
                Ok(Some(cached)) => return parse_model_score(&cached),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Inference cache read failed"),
            }
        }

        self.model.ready().await;
        let response =
            tokio::time::timeout(self.call_timeout, self.model.analyze(bytes, SCORING_PROMPT, model))
                .await
                .map_err(|_| ModelError::Timeout(self.call_timeout))??;

        let parsed = parse_model_score(&response)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&image.id, model, &response).await {
                tracing::warn!(error = %e, "Inference cache write failed");
            }
        }

        Ok(parsed)
    }
}

/// Extract the JSON object from a model answer (tolerates prose or code fences)
fn parse_model_score(response: &str) -> Result<ModelScore, TriageError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => {
            return Err(ModelError::Parse("no JSON object in scoring response".to_string()).into())
        }
    };
    serde_json::from_str(json).map_err(|e| ModelError::Parse(e.to_string()).into())
}

fn category_score(
    category: &str,
    models: &[WeightedModel],
    responses: &BTreeMap<&ModelSpec, ModelScore>,
    raw: impl Fn(&ModelScore) -> Option<f64>,
) -> Result<f64, TriageError> {
    let mut weighted_sum = 0.0;
    let mut surviving_weight = 0.0;

    for weighted in models {
        let Some(value) = responses.get(&weighted.model).and_then(&raw) else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        let normalised = (value / weighted.scale * 100.0).clamp(0.0, 100.0);
        weighted_sum += weighted.weight * normalised;
        surviving_weight += weighted.weight;
    }

    if surviving_weight <= 0.0 {
        return Err(TriageError::ScoringFailed(format!(
            "every {} model failed",
            category
        )));
    }

    Ok(weighted_sum / surviving_weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ScorerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = ScorerConfig::default();
        config.aesthetic_models[0].weight = 0.6;
        assert!(matches!(
            config.validate(),
            Err(TriageError::InvalidWeightConfig(_))
        ));

        let mut config = ScorerConfig::default();
        config.technical_weight = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scale_must_be_positive() {
        let mut config = ScorerConfig::default();
        config.technical_models[1].scale = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_and_negative_weights_rejected() {
        let mut config = ScorerConfig::default();
        config.aesthetic_models[0].weight = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(TriageError::InvalidWeightConfig(_))
        ));

        let mut config = ScorerConfig::default();
        config.aesthetic_weight = f64::INFINITY;
        assert!(config.validate().is_err());

        // Sums to 1.0 but one weight is negative
        let mut config = ScorerConfig::default();
        config.technical_models[0].weight = 1.5;
        config.technical_models[1].weight = -0.5;
        assert!(config.validate().is_err());

        let mut config = ScorerConfig::default();
        config.technical_models[0].scale = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_model_score_from_fenced_json() {
        let text = "Here you go:\n```json\n{\"aesthetic_score\": 7.5, \"technical_score\": 9, \"attributes\": {\"subject\": \"dog\"}}\n```";
        let score = parse_model_score(text).unwrap();
        assert_eq!(score.aesthetic_score, Some(7.5));
        assert_eq!(score.technical_score, Some(9.0));
        assert_eq!(score.attributes["subject"], "dog");
        assert!(parse_model_score("I can't rate this").is_err());
    }

    #[test]
    fn test_category_score_renormalises_over_survivors() {
        let a = ModelSpec::new("a", "1");
        let b = ModelSpec::new("b", "1");
        let models = vec![WeightedModel::new(a.clone(), 0.75), WeightedModel::new(b, 0.25)];

        let mut responses = BTreeMap::new();
        responses.insert(
            &a,
            ModelScore {
                aesthetic_score: Some(8.0),
                technical_score: None,
                attributes: Default::default(),
                explanation: None,
            },
        );

        let score = category_score("aesthetic", &models, &responses, |s| s.aesthetic_score).unwrap();
        assert!((score - 80.0).abs() < 1e-9);

        let err = category_score("technical", &models, &responses, |s| s.technical_score);
        assert!(matches!(err, Err(TriageError::ScoringFailed(_))));
    }

    #[test]
    fn test_out_of_scale_scores_are_clamped() {
        let a = ModelSpec::new("a", "1");
        let models = vec![WeightedModel::new(a.clone(), 1.0)];
        let mut responses = BTreeMap::new();
        responses.insert(
            &a,
            ModelScore {
                aesthetic_score: Some(14.0),
                technical_score: Some(-2.0),
                attributes: Default::default(),
                explanation: None,
            },
        );

        assert_eq!(
            category_score("aesthetic", &models, &responses, |s| s.aesthetic_score).unwrap(),
            100.0
        );
        assert_eq!(
            category_score("technical", &models, &responses, |s| s.technical_score).unwrap(),
            0.0
        );
    }
}
