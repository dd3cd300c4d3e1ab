use crate::dto::{optional, GenerateProofRequest, VerifiedProof, VerifyProofResponse};
use crate::errors::ApiError;
use crate::models::{AuditAction, NewZkProof, PrivacyLevel, ZkProof};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use zk_claims::constants::CLAIM_AUDIT_PRIVACY_LEVEL;

const PROOF_NOT_FOUND: &str = "Proof not found or may have expired";
const PROOF_EXPIRED: &str = "This proof has expired and is no longer valid";

/// Store a claim. When the client sends no claim text, it is rendered from the attributes.
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateProofRequest>,
) -> Result<(StatusCode, Json<ZkProof>), ApiError> {
    let kind = zk_claims::validate(&req.proof_type, &req.attributes)?;

    let mut attributes = req.attributes;
    if let Some(name) = optional(req.recipient_name) {
        attributes.recipient_name = Some(name);
    }
    if let Some(purpose) = optional(req.purpose) {
        attributes.purpose = Some(purpose);
    }
    let proof_result =
        optional(req.proof_result).unwrap_or_else(|| zk_claims::describe_claim(kind, &attributes));

    let user_id = state.user_id();
    let proof_type = req.proof_type.trim().to_string();
    let proof = state
        .storage
        .create_zk_proof(NewZkProof {
            user_id: user_id.to_string(),
            proof_type: proof_type.clone(),
            attributes,
            proof_result,
        })
        .await?;

    state
        .audit(
            user_id,
            AuditAction::ZkProofGenerated,
            format!("ZK Proof generated for {proof_type}"),
            proof.attributes.recipient_name.clone(),
            Some(PrivacyLevel::saturating(CLAIM_AUDIT_PRIVACY_LEVEL)),
        )
        .await?;
    tracing::info!(%user_id, proof_id = %proof.id, kind = %kind, "claim generated");
    Ok((StatusCode::CREATED, Json(proof)))
}

/// Public check of a shared claim. Missing and expired claims answer 200 with `valid: false`.
pub async fn verify(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<VerifyProofResponse>, ApiError> {
    let Some(proof) = state.storage.get_zk_proof(&id).await? else {
        return Ok(Json(VerifyProofResponse::invalid(PROOF_NOT_FOUND)));
    };

    if zk_claims::is_expired(proof.created_at, &proof.attributes, Utc::now()) {
        tracing::info!(proof_id = %proof.id, "expired claim presented");
        return Ok(Json(VerifyProofResponse::invalid(PROOF_EXPIRED)));
    }

    let expires_at = zk_claims::expires_at(proof.created_at, proof.attributes.expires_in_days);
    Ok(Json(VerifyProofResponse {
        valid: true,
        proof: Some(VerifiedProof {
            id: proof.id,
            proof_type: proof.proof_type,
            proof_result: proof.proof_result,
            created_at: proof.created_at,
            expires_at,
            attributes: proof.attributes,
        }),
        error: None,
    }))
}
