//! Clinical reasoning tests over scripted model output.
//!
//! The similarity threshold is lowered to -1.0 so every indexed chunk is
//! eligible evidence; what is under test is schema validation, allergy
//! handling, and the corrective-retry contract, not retrieval ranking.

use std::sync::Arc;

use medrag::mock::{MockEmbedding, MockGeneration};
use medrag::{
    CaseRequest, ClinicalConfig, ClinicalReasoner, DifferentialRequest, DocumentMetadata,
    EngineConfig, EngineError, FollowUpRequest, KnowledgeEngine, PatientInfo, RiskLevel,
    RiskRequest, TimeFrame, TreatmentRequest,
};

const DIM: usize = 32;

fn build_engine(generator: Arc<MockGeneration>) -> KnowledgeEngine {
    KnowledgeEngine::builder()
        .config(
            EngineConfig::builder()
                .similarity_threshold(-1.0)
                .build()
                .unwrap(),
        )
        .embedding_provider(Arc::new(MockEmbedding::new(DIM)))
        .generation_provider(generator)
        .build()
        .unwrap()
}

async fn seed_guidelines(engine: &KnowledgeEngine) {
    engine
        .ingest(
            "Influenza presents with fever, cough, and fatigue; confirm with PCR.",
            DocumentMetadata::new("Influenza Guideline", "clinical-handbook")
                .with_category("clinical-guidelines"),
        )
        .await
        .unwrap();
}

const DIFFERENTIAL_JSON: &str = r#"{"candidates": [
    {"name": "Common cold", "confidence": 0.2, "rationale": "overlapping symptoms"},
    {"name": "Influenza", "confidence": 0.8, "rationale": "classic triad",
     "confirmatory_tests": ["PCR"]}
]}"#;

fn differential_request() -> DifferentialRequest {
    DifferentialRequest {
        symptoms: vec!["fever".into(), "cough".into(), "fatigue".into()],
        patient: PatientInfo { age: Some(42), ..Default::default() },
    }
}

#[tokio::test]
async fn differential_ranks_and_flags_low_confidence() {
    // Fenced output exercises the tolerant JSON extraction.
    let fenced = format!("```json\n{DIFFERENTIAL_JSON}\n```");
    let generator = Arc::new(MockGeneration::with_responses([fenced]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let differential = reasoner.differential_diagnosis(&differential_request()).await.unwrap();

    assert!(!differential.no_evidence);
    assert_eq!(differential.candidates.len(), 2);
    assert_eq!(differential.candidates[0].name, "Influenza");
    assert!(!differential.candidates[0].low_confidence);
    // Below the 0.3 threshold: flagged, still present.
    assert_eq!(differential.candidates[1].name, "Common cold");
    assert!(differential.candidates[1].low_confidence);
    assert!(!differential.citations.is_empty());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn empty_symptom_list_is_rejected_before_any_provider_call() {
    let generator = Arc::new(MockGeneration::new());
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let request = DifferentialRequest { symptoms: Vec::new(), patient: PatientInfo::default() };
    let err = reasoner.differential_diagnosis(&request).await;

    assert!(matches!(err, Err(EngineError::Config(_))));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn differential_without_matching_evidence_skips_the_model() {
    let generator = Arc::new(MockGeneration::new());
    let engine = build_engine(Arc::clone(&generator));
    // Corpus holds only drug information; the diagnostic category is empty.
    engine
        .ingest(
            "Amoxicillin dosing for adults.",
            DocumentMetadata::new("Amoxicillin", "formulary").with_category("drug-information"),
        )
        .await
        .unwrap();
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let differential = reasoner.differential_diagnosis(&differential_request()).await.unwrap();

    assert!(differential.no_evidence);
    assert!(differential.candidates.is_empty());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn declared_allergy_demotes_treatment_options() {
    let treatment_json = r#"{"first_line": [
        {"agent": "Penicillin V", "dosage": "500 mg qid"},
        {"agent": "Ibuprofen"}
    ], "alternatives": [{"agent": "Azithromycin"}], "contraindications": []}"#;
    let generator = Arc::new(MockGeneration::with_responses([treatment_json]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let plan = reasoner
        .recommend_treatment(&TreatmentRequest {
            diagnosis: "Streptococcal pharyngitis".into(),
            patient: PatientInfo { allergies: vec!["penicillin".into()], ..Default::default() },
        })
        .await
        .unwrap();

    let first_line: Vec<_> = plan.first_line.iter().map(|o| o.agent.as_str()).collect();
    assert_eq!(first_line, vec!["Ibuprofen"]);
    assert_eq!(plan.alternatives.len(), 1);
    assert_eq!(plan.contraindications.len(), 1);
    assert_eq!(plan.contraindications[0].agent, "Penicillin V");
    assert!(plan.contraindications[0].allergy_flagged);
    assert!(plan.contraindications[0].reason.contains("penicillin"));
}

#[tokio::test]
async fn malformed_output_gets_exactly_one_corrective_retry() {
    let generator = Arc::new(MockGeneration::with_responses([
        "I think it could be the flu, but I cannot produce JSON.",
        DIFFERENTIAL_JSON,
    ]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let differential = reasoner.differential_diagnosis(&differential_request()).await.unwrap();

    assert_eq!(differential.candidates.len(), 2);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn persistently_malformed_output_is_an_error() {
    let generator = Arc::new(MockGeneration::with_responses([
        "no json here",
        "still no json here",
    ]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let err = reasoner.differential_diagnosis(&differential_request()).await;

    assert!(matches!(err, Err(EngineError::MalformedModelOutput(_))));
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn out_of_range_confidence_counts_as_malformed() {
    let bad = r#"{"candidates": [{"name": "Flu", "confidence": 1.7, "rationale": "r"}]}"#;
    let generator = Arc::new(MockGeneration::with_responses([bad, bad]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let err = reasoner.differential_diagnosis(&differential_request()).await;
    assert!(matches!(err, Err(EngineError::MalformedModelOutput(_))));
}

#[tokio::test]
async fn risk_and_follow_up_parse_their_schemas() {
    let risk_json = r#"{"level": "high", "factors": ["age over 65"],
        "complications": ["pneumonia"], "mitigations": ["early antivirals"],
        "monitoring": ["oxygen saturation"]}"#;
    let follow_up_json = r#"{"checkpoints": [
        {"when": "48 hours", "monitoring": ["temperature"]},
        {"when": "1 week", "monitoring": ["symptom resolution"]}
    ], "warning_signs": ["worsening dyspnea"], "success_criteria": ["afebrile"]}"#;
    let generator = Arc::new(MockGeneration::with_responses([risk_json, follow_up_json]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let risk = reasoner
        .assess_risk(&RiskRequest {
            condition: "Influenza".into(),
            patient: PatientInfo { age: Some(70), ..Default::default() },
        })
        .await
        .unwrap();
    assert_eq!(risk.level, RiskLevel::High);
    assert!(risk.level > RiskLevel::Moderate);
    assert_eq!(risk.monitoring, vec!["oxygen saturation"]);

    let plan = reasoner
        .plan_follow_up(&FollowUpRequest {
            diagnosis: "Influenza".into(),
            treatment_summary: Some("oseltamivir".into()),
            patient: PatientInfo::default(),
            time_frame: TimeFrame::ShortTerm,
        })
        .await
        .unwrap();
    assert_eq!(plan.time_frame, TimeFrame::ShortTerm);
    assert_eq!(plan.checkpoints.len(), 2);
    assert_eq!(plan.checkpoints[0].when, "48 hours");
}

#[tokio::test]
async fn evaluate_case_runs_the_full_workflow() {
    let treatment_json =
        r#"{"first_line": [{"agent": "Oseltamivir", "dosage": "75 mg bid"}]}"#;
    let risk_json = r#"{"level": "moderate"}"#;
    let follow_up_json =
        r#"{"checkpoints": [{"when": "72 hours", "monitoring": ["fever curve"]}]}"#;
    let generator = Arc::new(MockGeneration::with_responses([
        DIFFERENTIAL_JSON,
        treatment_json,
        risk_json,
        follow_up_json,
    ]));
    let engine = build_engine(Arc::clone(&generator));
    seed_guidelines(&engine).await;
    let reasoner = ClinicalReasoner::new(&engine, ClinicalConfig::default());

    let result = reasoner
        .evaluate_case(&CaseRequest {
            symptoms: vec!["fever".into(), "cough".into(), "fatigue".into()],
            patient: PatientInfo::default(),
            time_frame: TimeFrame::ShortTerm,
        })
        .await
        .unwrap();

    assert_eq!(result.diagnosis.candidates[0].name, "Influenza");
    let treatment = result.treatment.unwrap();
    assert_eq!(treatment.first_line[0].agent, "Oseltamivir");
    assert_eq!(result.risk.unwrap().level, RiskLevel::Moderate);
    assert_eq!(result.follow_up.unwrap().time_frame, TimeFrame::ShortTerm);
    assert_eq!(generator.calls(), 4);
}
