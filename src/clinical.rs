//! Clinical reasoning on top of the knowledge engine.
//!
//! Four stateless operations — differential diagnosis, treatment
//! recommendation, risk assessment, follow-up planning — each one or more
//! grounded engine calls with an operation-specific prompt template and a
//! strict output schema. Schema-invalid model output gets exactly one
//! corrective re-prompt; a second failure surfaces
//! [`EngineError::MalformedModelOutput`] rather than fabricated defaults.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClinicalConfig;
use crate::document::{Citation, MetadataFilter};
use crate::engine::{AnswerRequest, KnowledgeEngine};
use crate::error::{EngineError, Result};

const CORRECTIVE_INSTRUCTION: &str =
    "Your previous response did not match the required schema. Respond again \
     with only the JSON object, no prose and no markdown fences, with every \
     required field present and confidence values between 0 and 1.";

// ── Inputs ─────────────────────────────────────────────────────────

/// Patient descriptors shared by all clinical operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    /// Age in years.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// Sex as recorded in the chart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    /// Relevant medical history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medical_history: Vec<String>,
    /// Current medications.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medications: Vec<String>,
    /// Declared allergies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allergies: Vec<String>,
    /// Vital signs, name → value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vitals: BTreeMap<String, f64>,
    /// Lab results, name → reported value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lab_results: BTreeMap<String, String>,
}

impl PatientInfo {
    fn describe(&self) -> String {
        let mut out = String::new();
        if let Some(age) = self.age {
            out.push_str(&format!("Age: {age}\n"));
        }
        if let Some(sex) = &self.sex {
            out.push_str(&format!("Sex: {sex}\n"));
        }
        if !self.medical_history.is_empty() {
            out.push_str(&format!("Medical history: {}\n", self.medical_history.join(", ")));
        }
        if !self.medications.is_empty() {
            out.push_str(&format!("Current medications: {}\n", self.medications.join(", ")));
        }
        if !self.allergies.is_empty() {
            out.push_str(&format!("Allergies: {}\n", self.allergies.join(", ")));
        }
        for (name, value) in &self.vitals {
            out.push_str(&format!("Vital {name}: {value}\n"));
        }
        for (name, value) in &self.lab_results {
            out.push_str(&format!("Lab {name}: {value}\n"));
        }
        out
    }
}

/// Inputs for a differential diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialRequest {
    /// Presenting symptoms; must be non-empty.
    pub symptoms: Vec<String>,
    /// Patient descriptors.
    #[serde(default)]
    pub patient: PatientInfo,
}

/// Inputs for a treatment recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRequest {
    /// The working diagnosis; required.
    pub diagnosis: String,
    /// Patient descriptors, including declared allergies.
    #[serde(default)]
    pub patient: PatientInfo,
}

/// Inputs for a risk assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRequest {
    /// The condition under assessment.
    pub condition: String,
    /// Patient descriptors, including vitals and lab results.
    #[serde(default)]
    pub patient: PatientInfo,
}

/// Follow-up planning horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeFrame {
    /// Days to two weeks.
    ShortTerm,
    /// Two weeks to three months.
    MediumTerm,
    /// Beyond three months.
    LongTerm,
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeFrame::ShortTerm => write!(f, "short-term"),
            TimeFrame::MediumTerm => write!(f, "medium-term"),
            TimeFrame::LongTerm => write!(f, "long-term"),
        }
    }
}

/// Inputs for follow-up planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRequest {
    /// The diagnosis being followed.
    pub diagnosis: String,
    /// Summary of the treatment in progress.
    #[serde(default)]
    pub treatment_summary: Option<String>,
    /// Patient descriptors.
    #[serde(default)]
    pub patient: PatientInfo,
    /// Planning horizon.
    pub time_frame: TimeFrame,
}

/// Inputs for a full case evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRequest {
    /// Presenting symptoms; must be non-empty.
    pub symptoms: Vec<String>,
    /// Patient descriptors.
    #[serde(default)]
    pub patient: PatientInfo,
    /// Follow-up horizon for the resulting plan.
    pub time_frame: TimeFrame,
}

// ── Outputs ────────────────────────────────────────────────────────

/// One candidate diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisCandidate {
    /// Condition name.
    pub name: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Supporting rationale.
    pub rationale: String,
    /// Suggested confirmatory tests.
    #[serde(default)]
    pub confirmatory_tests: Vec<String>,
    /// Set when confidence falls below the configured threshold. Flagged,
    /// never dropped; callers decide whether to display.
    #[serde(default)]
    pub low_confidence: bool,
}

/// A ranked differential diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialDiagnosis {
    /// Candidates in descending confidence order.
    pub candidates: Vec<DiagnosisCandidate>,
    /// Citations for the evidence the candidates are grounded on.
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// `true` when the filtered corpus held no evidence and the model was
    /// never asked.
    #[serde(default)]
    pub no_evidence: bool,
}

impl DifferentialDiagnosis {
    /// The explicit no-evidence result.
    pub fn no_evidence() -> Self {
        Self { candidates: Vec::new(), citations: Vec::new(), no_evidence: true }
    }
}

/// A recommended therapeutic agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentOption {
    /// The recommended agent or intervention.
    pub agent: String,
    /// Dosage guidance, if the evidence provides it.
    #[serde(default)]
    pub dosage: Option<String>,
    /// Additional notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// An agent that must not be used for this patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contraindication {
    /// The contraindicated agent.
    pub agent: String,
    /// Why it is contraindicated.
    pub reason: String,
    /// Set when the demotion came from the declared allergy list rather
    /// than the model.
    #[serde(default)]
    pub allergy_flagged: bool,
}

/// A treatment plan with allergy cross-referencing applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    /// First-line options; guaranteed free of declared allergens.
    pub first_line: Vec<TreatmentOption>,
    /// Alternatives; also allergy-screened.
    #[serde(default)]
    pub alternatives: Vec<TreatmentOption>,
    /// Contraindications, including allergy-demoted agents.
    #[serde(default)]
    pub contraindications: Vec<Contraindication>,
    /// Citations for the evidence used.
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Ordinal risk level, used for sorting and display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine management.
    Low,
    /// Closer observation warranted.
    Moderate,
    /// Escalation likely needed.
    High,
    /// Immediate intervention required.
    Critical,
}

/// A structured risk assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Overall risk level.
    pub level: RiskLevel,
    /// Contributing risk factors.
    #[serde(default)]
    pub factors: Vec<String>,
    /// Possible complications.
    #[serde(default)]
    pub complications: Vec<String>,
    /// Mitigations for the identified risks.
    #[serde(default)]
    pub mitigations: Vec<String>,
    /// Parameters to monitor.
    #[serde(default)]
    pub monitoring: Vec<String>,
    /// Citations for the evidence used.
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// One checkpoint on the follow-up timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// When the checkpoint occurs (e.g. "48 hours", "2 weeks").
    pub when: String,
    /// Parameters to monitor at this checkpoint.
    #[serde(default)]
    pub monitoring: Vec<String>,
}

/// An ordered follow-up plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpPlan {
    /// The horizon the plan covers.
    pub time_frame: TimeFrame,
    /// Ordered timeline of checkpoints.
    pub checkpoints: Vec<Checkpoint>,
    /// Warning signs that should trigger earlier re-evaluation.
    #[serde(default)]
    pub warning_signs: Vec<String>,
    /// Criteria indicating successful recovery.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Citations for the evidence used.
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Aggregate output of a full case evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalCaseResult {
    /// The ranked differential.
    pub diagnosis: DifferentialDiagnosis,
    /// Treatment plan for the leading candidate, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment: Option<TreatmentPlan>,
    /// Risk assessment for the leading candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    /// Follow-up plan for the leading candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpPlan>,
    /// When the case was evaluated.
    pub created_at: DateTime<Utc>,
}

// ── Wire schemas (model output before post-processing) ─────────────

#[derive(Debug, Deserialize)]
struct DifferentialWire {
    candidates: Vec<DiagnosisCandidate>,
}

#[derive(Deserialize)]
struct TreatmentWire {
    first_line: Vec<TreatmentOption>,
    #[serde(default)]
    alternatives: Vec<TreatmentOption>,
    #[serde(default)]
    contraindications: Vec<Contraindication>,
}

#[derive(Deserialize)]
struct RiskWire {
    level: RiskLevel,
    #[serde(default)]
    factors: Vec<String>,
    #[serde(default)]
    complications: Vec<String>,
    #[serde(default)]
    mitigations: Vec<String>,
    #[serde(default)]
    monitoring: Vec<String>,
}

#[derive(Deserialize)]
struct FollowUpWire {
    checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    warning_signs: Vec<String>,
    #[serde(default)]
    success_criteria: Vec<String>,
}

// ── Reasoner ───────────────────────────────────────────────────────

/// Clinical reasoning orchestrator.
///
/// Stateless: all shared state lives in the [`KnowledgeEngine`].
pub struct ClinicalReasoner<'a> {
    engine: &'a KnowledgeEngine,
    config: ClinicalConfig,
}

impl<'a> ClinicalReasoner<'a> {
    /// Create a reasoner over an engine with the given configuration.
    pub fn new(engine: &'a KnowledgeEngine, config: ClinicalConfig) -> Self {
        Self { engine, config }
    }

    /// Produce a ranked differential diagnosis.
    ///
    /// Evidence is filtered toward the configured diagnostic category. When
    /// the filtered corpus holds no evidence, the explicit no-evidence
    /// result is returned and the model is never asked.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] for an empty symptom list.
    /// - [`EngineError::MalformedModelOutput`] after a failed corrective
    ///   retry.
    pub async fn differential_diagnosis(
        &self,
        request: &DifferentialRequest,
    ) -> Result<DifferentialDiagnosis> {
        if request.symptoms.is_empty() {
            return Err(EngineError::Config("symptom list must not be empty".into()));
        }

        let query = format!(
            "A patient presents with: {}.\n{}\
             List the most likely diagnoses. Respond with a JSON object:\n\
             {{\"candidates\": [{{\"name\": string, \"confidence\": number between 0 and 1, \
             \"rationale\": string, \"confirmatory_tests\": [string]}}]}}",
            request.symptoms.join(", "),
            request.patient.describe(),
        );
        let filter = self
            .config
            .diagnosis_category
            .as_ref()
            .map(|category| MetadataFilter::category(category.clone()));

        let Some((wire, citations)) = self
            .grounded_structured::<DifferentialWire>(&query, filter, validate_differential)
            .await?
        else {
            return Ok(DifferentialDiagnosis::no_evidence());
        };

        let mut candidates = wire.candidates;
        candidates.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        for candidate in &mut candidates {
            candidate.low_confidence = candidate.confidence < self.config.confidence_threshold;
        }

        Ok(DifferentialDiagnosis { candidates, citations, no_evidence: false })
    }

    /// Recommend treatment for a diagnosis.
    ///
    /// Any first-line or alternative option whose agent matches a declared
    /// allergy is demoted to a flagged contraindication.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] for an empty diagnosis.
    /// - [`EngineError::NotFound`] when the corpus holds no supporting
    ///   evidence.
    /// - [`EngineError::MalformedModelOutput`] after a failed corrective
    ///   retry.
    pub async fn recommend_treatment(&self, request: &TreatmentRequest) -> Result<TreatmentPlan> {
        if request.diagnosis.trim().is_empty() {
            return Err(EngineError::Config("diagnosis must not be empty".into()));
        }

        let query = format!(
            "Recommend treatment for a patient diagnosed with {}.\n{}\
             Respond with a JSON object:\n\
             {{\"first_line\": [{{\"agent\": string, \"dosage\": string or null, \
             \"notes\": string or null}}], \"alternatives\": [same shape], \
             \"contraindications\": [{{\"agent\": string, \"reason\": string}}]}}",
            request.diagnosis,
            request.patient.describe(),
        );

        let (wire, citations) = self
            .grounded_structured::<TreatmentWire>(&query, None, validate_treatment)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no supporting evidence for treatment of '{}'",
                    request.diagnosis
                ))
            })?;

        let mut plan = TreatmentPlan {
            first_line: Vec::new(),
            alternatives: Vec::new(),
            contraindications: wire.contraindications,
            citations,
        };
        let mut first_line = Vec::new();
        for option in wire.first_line {
            place_option(option, &request.patient.allergies, &mut first_line, &mut plan);
        }
        plan.first_line = first_line;
        let mut alternatives = Vec::new();
        for option in wire.alternatives {
            place_option(option, &request.patient.allergies, &mut alternatives, &mut plan);
        }
        plan.alternatives = alternatives;

        Ok(plan)
    }

    /// Assess risk for a patient with a given condition.
    ///
    /// # Errors
    ///
    /// Same classes as [`recommend_treatment`](Self::recommend_treatment).
    pub async fn assess_risk(&self, request: &RiskRequest) -> Result<RiskAssessment> {
        if request.condition.trim().is_empty() {
            return Err(EngineError::Config("condition must not be empty".into()));
        }

        let query = format!(
            "Assess the clinical risk for a patient with {}.\n{}\
             Respond with a JSON object:\n\
             {{\"level\": \"low\"|\"moderate\"|\"high\"|\"critical\", \
             \"factors\": [string], \"complications\": [string], \
             \"mitigations\": [string], \"monitoring\": [string]}}",
            request.condition,
            request.patient.describe(),
        );

        let (wire, citations) = self
            .grounded_structured::<RiskWire>(&query, None, |_| Ok(()))
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no supporting evidence for risk assessment of '{}'",
                    request.condition
                ))
            })?;

        Ok(RiskAssessment {
            level: wire.level,
            factors: wire.factors,
            complications: wire.complications,
            mitigations: wire.mitigations,
            monitoring: wire.monitoring,
            citations,
        })
    }

    /// Plan follow-up for a diagnosis over a given horizon.
    ///
    /// # Errors
    ///
    /// Same classes as [`recommend_treatment`](Self::recommend_treatment).
    pub async fn plan_follow_up(&self, request: &FollowUpRequest) -> Result<FollowUpPlan> {
        if request.diagnosis.trim().is_empty() {
            return Err(EngineError::Config("diagnosis must not be empty".into()));
        }

        let treatment = request
            .treatment_summary
            .as_deref()
            .map(|s| format!("Treatment in progress: {s}\n"))
            .unwrap_or_default();
        let query = format!(
            "Plan {} follow-up for a patient diagnosed with {}.\n{treatment}{}\
             Respond with a JSON object:\n\
             {{\"checkpoints\": [{{\"when\": string, \"monitoring\": [string]}}], \
             \"warning_signs\": [string], \"success_criteria\": [string]}}",
            request.time_frame,
            request.diagnosis,
            request.patient.describe(),
        );

        let (wire, citations) = self
            .grounded_structured::<FollowUpWire>(&query, None, validate_follow_up)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no supporting evidence for follow-up of '{}'",
                    request.diagnosis
                ))
            })?;

        Ok(FollowUpPlan {
            time_frame: request.time_frame,
            checkpoints: wire.checkpoints,
            warning_signs: wire.warning_signs,
            success_criteria: wire.success_criteria,
            citations,
        })
    }

    /// Run the full case workflow: differential, then treatment, risk, and
    /// follow-up for the leading candidate.
    pub async fn evaluate_case(&self, request: &CaseRequest) -> Result<ClinicalCaseResult> {
        let diagnosis = self
            .differential_diagnosis(&DifferentialRequest {
                symptoms: request.symptoms.clone(),
                patient: request.patient.clone(),
            })
            .await?;

        let Some(leading) = diagnosis.candidates.first().map(|c| c.name.clone()) else {
            return Ok(ClinicalCaseResult {
                diagnosis,
                treatment: None,
                risk: None,
                follow_up: None,
                created_at: Utc::now(),
            });
        };

        let treatment = self
            .recommend_treatment(&TreatmentRequest {
                diagnosis: leading.clone(),
                patient: request.patient.clone(),
            })
            .await?;
        let risk = self
            .assess_risk(&RiskRequest {
                condition: leading.clone(),
                patient: request.patient.clone(),
            })
            .await?;
        let treatment_summary = treatment
            .first_line
            .iter()
            .map(|o| o.agent.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let follow_up = self
            .plan_follow_up(&FollowUpRequest {
                diagnosis: leading,
                treatment_summary: (!treatment_summary.is_empty()).then_some(treatment_summary),
                patient: request.patient.clone(),
                time_frame: request.time_frame,
            })
            .await?;

        Ok(ClinicalCaseResult {
            diagnosis,
            treatment: Some(treatment),
            risk: Some(risk),
            follow_up: Some(follow_up),
            created_at: Utc::now(),
        })
    }

    /// Issue a grounded query and parse the answer against a schema.
    ///
    /// Returns `None` when retrieval found no evidence. On a schema
    /// failure, re-prompts once with a corrective instruction; a second
    /// failure surfaces [`EngineError::MalformedModelOutput`].
    async fn grounded_structured<T: DeserializeOwned>(
        &self,
        query: &str,
        filter: Option<MetadataFilter>,
        validate: fn(&T) -> std::result::Result<(), String>,
    ) -> Result<Option<(T, Vec<Citation>)>> {
        let mut request = AnswerRequest::new(query);
        if let Some(filter) = filter {
            request = request.with_filter(filter);
        }

        let answer = self.engine.answer(request.clone()).await?;
        if !answer.grounded {
            return Ok(None);
        }

        match parse_structured::<T>(&answer.text).and_then(|v| {
            validate(&v)?;
            Ok(v)
        }) {
            Ok(value) => Ok(Some((value, answer.citations))),
            Err(first_failure) => {
                warn!(error = %first_failure, "model output failed validation, re-prompting");
                let corrective = AnswerRequest {
                    query: format!("{query}\n\n{CORRECTIVE_INSTRUCTION}"),
                    ..request
                };
                let retry = self.engine.answer(corrective).await?;
                if !retry.grounded {
                    return Ok(None);
                }
                match parse_structured::<T>(&retry.text).and_then(|v| {
                    validate(&v)?;
                    Ok(v)
                }) {
                    Ok(value) => {
                        debug!("corrective re-prompt produced valid output");
                        Ok(Some((value, retry.citations)))
                    }
                    Err(second_failure) => Err(EngineError::MalformedModelOutput(format!(
                        "{second_failure} (after corrective retry; first failure: {first_failure})"
                    ))),
                }
            }
        }
    }
}

/// Route a treatment option either into `target` or, when its agent matches
/// a declared allergy, into the plan's contraindications.
fn place_option(
    option: TreatmentOption,
    allergies: &[String],
    target: &mut Vec<TreatmentOption>,
    plan: &mut TreatmentPlan,
) {
    if let Some(allergy) = matching_allergy(&option.agent, allergies) {
        plan.contraindications.push(Contraindication {
            agent: option.agent,
            reason: format!("declared allergy: {allergy}"),
            allergy_flagged: true,
        });
    } else {
        target.push(option);
    }
}

/// Case-insensitive match between an agent name and the allergy list.
fn matching_allergy(agent: &str, allergies: &[String]) -> Option<String> {
    let agent_lower = agent.to_lowercase();
    allergies.iter().find_map(|allergy| {
        let allergy_lower = allergy.trim().to_lowercase();
        if allergy_lower.is_empty() {
            return None;
        }
        if agent_lower.contains(&allergy_lower) || allergy_lower.contains(&agent_lower) {
            Some(allergy.clone())
        } else {
            None
        }
    })
}

/// Extract and deserialize the JSON payload of a model response.
///
/// Tolerates surrounding prose and markdown fences: the payload is taken
/// from the first `{` to the last `}`.
fn parse_structured<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    let start = text.find('{').ok_or("no JSON object in model output")?;
    let end = text.rfind('}').ok_or("unterminated JSON object in model output")?;
    if end < start {
        return Err("unterminated JSON object in model output".into());
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| format!("schema mismatch: {e}"))
}

fn validate_differential(wire: &DifferentialWire) -> std::result::Result<(), String> {
    for candidate in &wire.candidates {
        if candidate.name.trim().is_empty() {
            return Err("candidate with empty name".into());
        }
        if !candidate.confidence.is_finite()
            || !(0.0..=1.0).contains(&candidate.confidence)
        {
            return Err(format!(
                "confidence {} for '{}' out of [0, 1]",
                candidate.confidence, candidate.name
            ));
        }
    }
    Ok(())
}

fn validate_treatment(wire: &TreatmentWire) -> std::result::Result<(), String> {
    for option in wire.first_line.iter().chain(&wire.alternatives) {
        if option.agent.trim().is_empty() {
            return Err("treatment option with empty agent".into());
        }
    }
    Ok(())
}

fn validate_follow_up(wire: &FollowUpWire) -> std::result::Result<(), String> {
    if wire.checkpoints.is_empty() {
        return Err("follow-up plan without checkpoints".into());
    }
    for checkpoint in &wire.checkpoints {
        if checkpoint.when.trim().is_empty() {
            return Err("checkpoint with empty timing".into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_structured_strips_fences_and_prose() {
        let text = "Here is the plan:\n```json\n{\"candidates\": []}\n```\nHope this helps.";
        let wire: DifferentialWire = parse_structured(text).unwrap();
        assert!(wire.candidates.is_empty());
    }

    #[test]
    fn parse_structured_rejects_missing_json() {
        let err = parse_structured::<DifferentialWire>("no json here").unwrap_err();
        assert!(err.contains("no JSON object"));
    }

    #[test]
    fn confidence_out_of_range_fails_validation() {
        let wire: DifferentialWire = parse_structured(
            r#"{"candidates": [{"name": "flu", "confidence": 1.4, "rationale": "r"}]}"#,
        )
        .unwrap();
        assert!(validate_differential(&wire).is_err());
    }

    #[test]
    fn allergy_matching_is_case_insensitive_and_substring() {
        let allergies = vec!["Penicillin".to_string()];
        assert!(matching_allergy("penicillin V potassium", &allergies).is_some());
        assert!(matching_allergy("Amoxicillin", &allergies).is_none());
    }

    #[test]
    fn risk_levels_are_ordinal() {
        assert!(RiskLevel::Low < RiskLevel::Moderate);
        assert!(RiskLevel::High < RiskLevel::Critical);
        let level: RiskLevel = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(level, RiskLevel::Critical);
    }

    #[test]
    fn time_frames_serialize_kebab_case() {
        assert_eq!(serde_json::to_string(&TimeFrame::ShortTerm).unwrap(), "\"short-term\"");
    }
}
