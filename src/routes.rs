//! HTTP routes: one handler per ledger operation.
//!
//! Handlers are thin adapters: deserialize, take the ledger lock, call the
//! facade, map `LedgerError` onto a status code. The upstream identity check
//! on emergency intake is defense in depth; the core re-verifies regardless.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::{
    ActivityEntry, EmergencyHistoryEntry, IdentityView, NewEmergency, NewIdentity, NewResolution,
    Stats,
};
use crate::model::{now_rfc3339, Block, EmergencyContact, GeoPoint, Payload};
use crate::AppState;

/// Map a core error onto the HTTP status the adapter contract promises.
fn into_http(err: LedgerError) -> (StatusCode, String) {
    let status = match &err {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
    };
    (status, err.to_string())
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub identity_hash: String,
    pub message: &'static str,
    pub block_index: u64,
}

/// POST /api/register-tourist
pub async fn register_tourist(
    State(state): State<AppState>,
    Json(payload): Json<NewIdentity>,
) -> Result<Json<RegisterResponse>, (StatusCode, String)> {
    let mut guard = state.ledger.lock().unwrap();
    let identity_hash = guard.register_identity(payload).map_err(into_http)?;
    let block_index = guard.tail().index;

    Ok(Json(RegisterResponse {
        success: true,
        identity_hash,
        message: "tourist registered on ledger",
        block_index,
    }))
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<IdentityView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emergency_history: Vec<EmergencyHistoryEntry>,
    pub total_emergencies: usize,
}

/// GET /api/verify-tourist/:identity_hash
///
/// An unknown handle is a normal `{valid:false}` response, never an error.
pub async fn verify_tourist(
    State(state): State<AppState>,
    Path(identity_hash): Path<String>,
) -> Json<VerifyResponse> {
    let guard = state.ledger.lock().unwrap();
    match guard.verify_identity(&identity_hash) {
        Some(record) => {
            let emergency_history = guard.emergency_history(&identity_hash);
            Json(VerifyResponse {
                valid: true,
                record: Some(record),
                total_emergencies: emergency_history.len(),
                emergency_history,
            })
        }
        None => Json(VerifyResponse {
            valid: false,
            record: None,
            emergency_history: Vec::new(),
            total_emergencies: 0,
        }),
    }
}

#[derive(Deserialize)]
pub struct EmergencyRequest {
    #[serde(default)]
    pub identity_hash: Option<String>,
    #[serde(flatten)]
    pub data: NewEmergency,
}

#[derive(Serialize)]
pub struct EmergencyResponse {
    pub success: bool,
    pub emergency_hash: String,
    pub message: &'static str,
    pub emergency_type: String,
    pub timestamp: String,
    pub estimated_response: &'static str,
}

/// POST /api/emergency
pub async fn report_emergency(
    State(state): State<AppState>,
    Json(payload): Json<EmergencyRequest>,
) -> Result<Json<EmergencyResponse>, (StatusCode, String)> {
    let Some(identity_hash) = payload.identity_hash.filter(|h| !h.trim().is_empty()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            "tourist identity hash is required".into(),
        ));
    };

    let mut guard = state.ledger.lock().unwrap();
    let emergency_hash = guard
        .record_emergency(&identity_hash, payload.data)
        .map_err(into_http)?;

    // tail is the record just appended; echo the applied defaults back
    let (emergency_type, timestamp) = match &guard.tail().payload {
        Payload::EmergencyRecord(rec) => (rec.emergency_type.clone(), rec.timestamp.clone()),
        _ => unreachable!("tail is the emergency block just appended"),
    };

    Ok(Json(EmergencyResponse {
        success: true,
        emergency_hash,
        message: "emergency recorded on ledger",
        emergency_type,
        timestamp,
        estimated_response: "3-5 minutes",
    }))
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub resolution_hash: String,
    pub message: &'static str,
    pub resolved_by: String,
}

/// POST /api/emergency/:emergency_id/resolve
pub async fn resolve_emergency(
    State(state): State<AppState>,
    Path(emergency_id): Path<String>,
    Json(payload): Json<NewResolution>,
) -> Result<Json<ResolveResponse>, (StatusCode, String)> {
    let mut guard = state.ledger.lock().unwrap();
    let resolution_hash = guard
        .resolve_emergency(&emergency_id, payload)
        .map_err(into_http)?;

    let resolved_by = match &guard.tail().payload {
        Payload::EmergencyResolution(res) => res.resolved_by.clone(),
        _ => unreachable!("tail is the resolution block just appended"),
    };

    Ok(Json(ResolveResponse {
        success: true,
        resolution_hash,
        message: "emergency marked as resolved",
        resolved_by,
    }))
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub emergencies: Vec<EmergencyHistoryEntry>,
    pub total_count: usize,
}

/// GET /api/tourist/:identity_hash/emergencies
pub async fn tourist_emergencies(
    State(state): State<AppState>,
    Path(identity_hash): Path<String>,
) -> Json<HistoryResponse> {
    let guard = state.ledger.lock().unwrap();
    let emergencies = guard.emergency_history(&identity_hash);
    Json(HistoryResponse {
        success: true,
        total_count: emergencies.len(),
        emergencies,
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: Stats,
    pub recent_activity: Vec<ActivityEntry>,
    pub server_uptime_secs: u64,
    pub timestamp: String,
}

const DEFAULT_ACTIVITY: usize = 10;

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let guard = state.ledger.lock().unwrap();
    Json(StatsResponse {
        stats: guard.stats(),
        recent_activity: guard.recent_activity(DEFAULT_ACTIVITY),
        server_uptime_secs: state.started.elapsed().as_secs(),
        timestamp: now_rfc3339(),
    })
}

#[derive(Deserialize)]
pub struct ChainQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
    pub total_blocks: usize,
    pub showing: usize,
}

/// GET /api/blockchain?limit=N — raw-chain inspection, bounded.
pub async fn get_blockchain(
    State(state): State<AppState>,
    Query(query): Query<ChainQuery>,
) -> Json<ChainResponse> {
    let limit = query.limit.unwrap_or(10);
    let guard = state.ledger.lock().unwrap();
    let chain = guard.blocks_prefix(limit).to_vec();
    Json(ChainResponse {
        showing: chain.len(),
        total_blocks: guard.len(),
        chain,
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub chain_valid: bool,
    pub timestamp: String,
    pub uptime_secs: u64,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let guard = state.ledger.lock().unwrap();
    Json(HealthResponse {
        status: "ok",
        chain_valid: guard.is_valid(),
        timestamp: now_rfc3339(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
pub struct DemoDataResponse {
    pub success: bool,
    pub message: &'static str,
    pub tourists: Vec<String>,
    pub emergencies: Vec<String>,
}

/// POST /api/demo-data — seed two tourists and one emergency for quick tests.
pub async fn demo_data(
    State(state): State<AppState>,
) -> Result<Json<DemoDataResponse>, (StatusCode, String)> {
    let mut guard = state.ledger.lock().unwrap();

    let tourist1 = guard
        .register_identity(NewIdentity {
            name: "Rahul Sharma".to_string(),
            phone: "+919876543210".to_string(),
            aadhaar_number: Some("1234567890123456".to_string()),
            kyc_verified: true,
            emergency_contacts: vec![
                EmergencyContact {
                    name: "Mom".to_string(),
                    phone: "+919876543211".to_string(),
                },
                EmergencyContact {
                    name: "Dad".to_string(),
                    phone: "+919876543212".to_string(),
                },
            ],
            public_key: None,
            location: Some("Delhi".to_string()),
        })
        .map_err(into_http)?;

    let tourist2 = guard
        .register_identity(NewIdentity {
            name: "Priya Patel".to_string(),
            phone: "+919123456789".to_string(),
            aadhaar_number: Some("9876543210987654".to_string()),
            kyc_verified: true,
            emergency_contacts: vec![EmergencyContact {
                name: "Brother".to_string(),
                phone: "+919123456790".to_string(),
            }],
            public_key: None,
            location: Some("Mumbai".to_string()),
        })
        .map_err(into_http)?;

    let emergency1 = guard
        .record_emergency(
            &tourist1,
            NewEmergency {
                emergency_type: Some("THEFT".to_string()),
                severity: Some("MEDIUM".to_string()),
                location: Some(GeoPoint {
                    lat: 28.6139,
                    lng: 77.2090,
                    name: Some("Red Fort, Delhi".to_string()),
                }),
                description: Some("Tourist reported pickpocket incident".to_string()),
            },
        )
        .map_err(into_http)?;

    Ok(Json(DemoDataResponse {
        success: true,
        message: "demo data created",
        tourists: vec![tourist1, tourist2],
        emergencies: vec![emergency1],
    }))
}
