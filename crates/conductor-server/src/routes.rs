//! HTTP surface (§6). One thin handler per endpoint: extract, call the
//! orchestrator or store, wrap the result in the `{result, error}`
//! envelope. Role gates are checked inline against the `AuthedUser`
//! attached by `auth::require_session`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use conductor_core::domain::config::{Mode, Options};
use conductor_core::domain::job::JobResult;
use conductor_core::domain::phase::PhaseType;
use conductor_core::ports::{AuthedUser, Role};
use conductor_core::store::phase_type_for_restart;
use conductor_core::ConductorError;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::envelope::{Envelope, ResponseFormat};
use crate::AppState;

type ApiResult = Result<Envelope, Envelope>;

fn ok<T: Serialize>(format: ResponseFormat, value: T) -> ApiResult {
    Ok(Envelope::ok(format, value))
}

fn from_result<T: Serialize>(format: ResponseFormat, result: Result<T, ConductorError>) -> ApiResult {
    match result {
        Ok(v) => Ok(Envelope::ok(format, v)),
        Err(e) => Err(Envelope::err(format, &e)),
    }
}

fn require_role(format: ResponseFormat, user: &AuthedUser, minimum: Role) -> Result<(), Envelope> {
    auth::require_role(user, minimum).map_err(|e| Envelope::err(format, &e))
}

/// Turns a `ConductorError` into the `Envelope` an `ApiResult` needs,
/// so store/orchestrator calls can use `?` directly in a handler body.
fn lift<T>(format: ResponseFormat, result: Result<T, ConductorError>) -> Result<T, Envelope> {
    result.map_err(|e| Envelope::err(format, &e))
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/config", get(get_config))
        .route("/api/mode", get(get_mode).post(post_mode))
        .route("/api/options", get(get_options).post(post_options))
        .route("/api/search", get(search_by_commit))
        .route("/api/train", get(latest_train))
        .route("/api/train/{train_id}", get(get_train))
        .route("/api/train/{train_id}/close", post(close_train))
        .route("/api/train/{train_id}/open", post(open_train))
        .route("/api/train/{train_id}/extend", post(extend_train))
        .route("/api/train/{train_id}/block", post(block_train))
        .route("/api/train/{train_id}/unblock", post(unblock_train))
        .route("/api/train/{train_id}/cancel", post(cancel_train))
        .route("/api/train/{train_id}/rollback", post(rollback_train))
        .route("/api/train/{train_id}/phase/{phase_type}/restart", post(restart_phase))
        .route("/api/train/{train_id}/phase/{phase_id}/job", get(list_jobs).post(start_or_restart_job))
        .route("/api/train/{train_id}/phase/{phase_id}/job/{job_name}", post(complete_job))
        .route("/api/ticket/open", get(open_tickets))
        .route("/api/metadata", get(list_metadata_namespaces))
        .route(
            "/api/metadata/{ns}",
            get(list_metadata_keys).post(set_metadata).delete(delete_metadata_namespace),
        )
        .route("/api/metadata/{ns}/{key}", get(get_metadata_value).delete(delete_metadata_key))
        .route("/api/user", get(current_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_session));

    let open = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/code/webhook", post(webhook))
        .route("/api/session", post(create_session));

    Router::new().merge(open).merge(protected).with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

// ── auth/session ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    code: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    token: String,
    user: AuthedUserView,
}

#[derive(Debug, Serialize)]
struct AuthedUserView {
    email: String,
    name: String,
    role: &'static str,
}

fn role_view(role: Role) -> &'static str {
    match role {
        Role::Viewer => "viewer",
        Role::User => "user",
        Role::Admin => "admin",
    }
}

async fn create_session(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult {
    let user = state
        .auth
        .authenticate(&body.code)
        .await
        .map_err(|e| Envelope::err(format, &ConductorError::External(e)))?;
    let token = auth::mint_session(&state.session_signing_key, &user)
        .map_err(|e| Envelope::err(format, &ConductorError::External(e)))?;
    ok(
        format,
        SessionResponse {
            token,
            user: AuthedUserView {
                email: user.email,
                name: user.name,
                role: role_view(user.role),
            },
        },
    )
}

async fn current_user(Extension(format): Extension<ResponseFormat>, Extension(user): Extension<AuthedUser>) -> ApiResult {
    ok(
        format,
        AuthedUserView {
            email: user.email,
            name: user.name,
            role: role_view(user.role),
        },
    )
}

// ── webhook ─────────────────────────────────────────────────────────

async fn webhook(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult {
    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();

    let branch = state
        .code
        .parse_webhook_for_branch(&body, &header_pairs)
        .map_err(|e| Envelope::err(format, &ConductorError::Validation(e.to_string())))?;

    if let Some(branch) = branch {
        if state.branch_regex.is_match(&branch) {
            let orchestrator = Arc::clone(&state.orchestrator);
            tokio::spawn(async move {
                if let Err(err) = orchestrator.check_branch(&branch).await {
                    tracing::warn!(error = %err, branch, "checkBranch (webhook) failed");
                }
            });
        }
    }

    Ok(Envelope::empty(format))
}

// ── config / mode / options ─────────────────────────────────────────

async fn get_config(Extension(format): Extension<ResponseFormat>, State(state): State<AppState>) -> ApiResult {
    from_result(format, state.store.config().await.map_err(ConductorError::Persistence))
}

async fn get_mode(Extension(format): Extension<ResponseFormat>, State(state): State<AppState>) -> ApiResult {
    from_result(format, state.store.mode().await.map_err(ConductorError::Persistence))
}

#[derive(Debug, Deserialize)]
struct ModeBody {
    mode: Mode,
}

async fn post_mode(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Json(body): Json<ModeBody>,
) -> ApiResult {
    require_role(format, &user, Role::Admin)?;
    from_result(format, state.store.set_mode(body.mode).await.map_err(ConductorError::Persistence))
}

async fn get_options(Extension(format): Extension<ResponseFormat>, State(state): State<AppState>) -> ApiResult {
    from_result(format, state.store.options().await.map_err(ConductorError::Persistence))
}

async fn post_options(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Json(options): Json<Options>,
) -> ApiResult {
    require_role(format, &user, Role::Admin)?;
    lift(format, state.store.set_options(options).await.map_err(ConductorError::Persistence))?;
    from_result(format, state.store.options().await.map_err(ConductorError::Persistence))
}

// ── search ───────────────────────────────────────────────────────────

async fn search_by_commit(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let commit = match params.get("commit") {
        Some(c) if !c.is_empty() => c.clone(),
        _ => return Err(Envelope::err(format, &ConductorError::validation("missing commit query param"))),
    };

    let trains = lift(format, state.store.trains_by_commit(&commit).await.map_err(ConductorError::Persistence))?;
    if trains.is_empty() {
        return Err(Envelope::err(format, &ConductorError::not_found("no trains contain that commit")));
    }

    ok(format, serde_json::json!({ "params": { "commit": commit }, "results": trains }))
}

// ── train reads ──────────────────────────────────────────────────────

async fn latest_train(Extension(format): Extension<ResponseFormat>, State(state): State<AppState>) -> ApiResult {
    if let Some(hit) = state.orchestrator.cache().get().await {
        return ok(format, hit.0);
    }
    let train = lift(format, state.store.latest_train().await.map_err(ConductorError::Persistence))?;
    state.orchestrator.cache().set(train.clone()).await;
    ok(format, train)
}

async fn get_train(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    Path(train_id): Path<u64>,
) -> ApiResult {
    let train = lift(format, state.store.train(train_id).await.map_err(ConductorError::Persistence))?;
    match train {
        Some(t) => ok(format, t),
        None => Err(Envelope::err(format, &ConductorError::not_found("train"))),
    }
}

// ── train lifecycle actions ─────────────────────────────────────────

macro_rules! train_action {
    ($name:ident, $method:ident) => {
        async fn $name(
            Extension(format): Extension<ResponseFormat>,
            Extension(user): Extension<AuthedUser>,
            State(state): State<AppState>,
            Path(train_id): Path<u64>,
        ) -> ApiResult {
            require_role(format, &user, Role::User)?;
            from_result(format, state.orchestrator.$method(train_id).await)
        }
    };
}

train_action!(close_train, close_train);
train_action!(open_train, open_train);
train_action!(extend_train, extend_train);
train_action!(block_train, block_train);
train_action!(unblock_train, unblock_train);
train_action!(cancel_train, cancel_train);

async fn rollback_train(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path(train_id): Path<u64>,
) -> ApiResult {
    require_role(format, &user, Role::User)?;
    match state.orchestrator.rollback(train_id).await {
        Ok(()) => Ok(Envelope::empty(format)),
        Err(e) => Err(Envelope::err(format, &e)),
    }
}

async fn restart_phase(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path((train_id, phase_type)): Path<(u64, String)>,
) -> ApiResult {
    require_role(format, &user, Role::User)?;

    let phase_type = match phase_type_for_restart(&phase_type) {
        Some(pt) => pt,
        None => return Err(Envelope::err(format, &ConductorError::validation("unknown phase type"))),
    };

    let latest = lift(
        format,
        state
            .store
            .latest_train()
            .await
            .map_err(ConductorError::Persistence)
            .and_then(|opt| opt.ok_or_else(|| ConductorError::not_found("train"))),
    )?;
    if train_id != latest.id && train_id + 1 != latest.id {
        return Err(Envelope::err(
            format,
            &ConductorError::conflict("phase restart only allowed on the latest train or its immediate predecessor"),
        ));
    }

    let train = lift(
        format,
        state
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)
            .and_then(|opt| opt.ok_or_else(|| ConductorError::not_found("train"))),
    )?;
    let phase_id = train.active_phases.phase(phase_type).id;

    match state.orchestrator.restart_phase(phase_id).await {
        Ok(()) => Ok(Envelope::empty(format)),
        Err(e) => Err(Envelope::err(format, &e)),
    }
}

// ── jobs ─────────────────────────────────────────────────────────────

async fn list_jobs(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    Path((train_id, phase_id)): Path<(u64, u64)>,
) -> ApiResult {
    let train = lift(
        format,
        state
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)
            .and_then(|opt| opt.ok_or_else(|| ConductorError::not_found("train"))),
    )?;

    let phase = lift(
        format,
        train
            .active_phases
            .phases()
            .into_iter()
            .find(|p| p.id == phase_id)
            .ok_or_else(|| ConductorError::not_found("phase")),
    )?;

    ok(format, phase.jobs.clone())
}

#[derive(Debug, Deserialize)]
struct StartJobBody {
    name: String,
    url: String,
}

async fn start_or_restart_job(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path((train_id, phase_id)): Path<(u64, u64)>,
    Json(body): Json<StartJobBody>,
) -> ApiResult {
    require_role(format, &user, Role::User)?;

    let train = lift(
        format,
        state
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)
            .and_then(|opt| opt.ok_or_else(|| ConductorError::not_found("train"))),
    )?;

    let phase = lift(
        format,
        train
            .active_phases
            .phases()
            .into_iter()
            .find(|p| p.id == phase_id)
            .ok_or_else(|| ConductorError::not_found("phase")),
    )?;

    if !state.job_names.for_phase(phase.phase_type).iter().any(|n| n == &body.name) {
        return Err(Envelope::err(
            format,
            &ConductorError::validation(format!("job `{}` is not expected for phase `{}`", body.name, phase.phase_type.as_str())),
        ));
    }
    if phase.phase_type != train.active_phase_type() {
        return Err(Envelope::err(format, &ConductorError::conflict("phase is not the train's active phase")));
    }
    if phase.phase_type == PhaseType::Deploy && (train.blocked || train.is_cancelled()) {
        return Err(Envelope::err(format, &ConductorError::conflict("cannot start a deploy job on a blocked or cancelled train")));
    }

    let already_started = phase.jobs.iter().any(|j| j.name == body.name && j.started_at.is_some());
    let result = if already_started {
        state.store.restart_job(phase_id, &body.name, body.url.clone()).await
    } else {
        state.store.start_job(phase_id, &body.name, body.url.clone()).await
    };
    lift(format, result.map_err(ConductorError::Persistence))?;

    Ok(Envelope::empty(format))
}

#[derive(Debug, Deserialize)]
struct CompleteJobBody {
    result: JobResult,
    #[serde(default)]
    metadata: String,
}

async fn complete_job(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path((train_id, phase_id, job_name)): Path<(u64, u64, String)>,
    Json(body): Json<CompleteJobBody>,
) -> ApiResult {
    require_role(format, &user, Role::User)?;

    let train = lift(
        format,
        state
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)
            .and_then(|opt| opt.ok_or_else(|| ConductorError::not_found("train"))),
    )?;

    let phase = lift(
        format,
        train
            .active_phases
            .phases()
            .into_iter()
            .find(|p| p.id == phase_id)
            .ok_or_else(|| ConductorError::not_found("phase")),
    )?;

    let job = phase
        .jobs
        .iter()
        .find(|j| j.name == job_name)
        .ok_or_else(|| ConductorError::not_found("job"))
        .map_err(|e| Envelope::err(format, &e))?;
    if job.started_at.is_none() {
        return Err(Envelope::err(format, &ConductorError::conflict("job has not been started")));
    }
    if job.is_complete() {
        return Err(Envelope::err(format, &ConductorError::conflict("job is already complete")));
    }

    lift(
        format,
        state
            .orchestrator
            .complete_job(phase_id, &job_name, body.result, body.metadata)
            .await
            .map_err(ConductorError::External),
    )?;

    Ok(Envelope::empty(format))
}

// ── tickets ──────────────────────────────────────────────────────────

async fn open_tickets(Extension(format): Extension<ResponseFormat>, State(state): State<AppState>) -> ApiResult {
    let train = lift(format, state.store.latest_train().await.map_err(ConductorError::Persistence))?;
    let tickets = train.map(|t| t.tickets).unwrap_or_default();
    ok(format, tickets)
}

// ── metadata ─────────────────────────────────────────────────────────

async fn list_metadata_namespaces(Extension(format): Extension<ResponseFormat>, State(state): State<AppState>) -> ApiResult {
    from_result(format, state.store.metadata_namespaces().await.map_err(ConductorError::Persistence))
}

async fn list_metadata_keys(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> ApiResult {
    let entries = lift(format, state.store.metadata_list(&ns).await.map_err(ConductorError::Persistence))?;
    ok(format, entries.into_iter().collect::<HashMap<_, _>>())
}

async fn get_metadata_value(
    Extension(format): Extension<ResponseFormat>,
    State(state): State<AppState>,
    Path((ns, key)): Path<(String, String)>,
) -> ApiResult {
    let value = lift(format, state.store.metadata_get(&ns, &key).await.map_err(ConductorError::Persistence))?;
    match value {
        Some(v) => ok(format, v),
        None => Err(Envelope::err(format, &ConductorError::not_found("metadata key"))),
    }
}

async fn set_metadata(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(entries): Json<HashMap<String, String>>,
) -> ApiResult {
    require_role(format, &user, Role::Admin)?;
    for (key, value) in entries {
        lift(format, state.store.metadata_set(&ns, &key, value).await.map_err(ConductorError::Persistence))?;
    }
    Ok(Envelope::empty(format))
}

async fn delete_metadata_namespace(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> ApiResult {
    require_role(format, &user, Role::Admin)?;
    lift(format, state.store.metadata_delete_namespace(&ns).await.map_err(ConductorError::Persistence))?;
    Ok(Envelope::empty(format))
}

async fn delete_metadata_key(
    Extension(format): Extension<ResponseFormat>,
    Extension(user): Extension<AuthedUser>,
    State(state): State<AppState>,
    Path((ns, key)): Path<(String, String)>,
) -> ApiResult {
    require_role(format, &user, Role::Admin)?;
    lift(format, state.store.metadata_delete(&ns, &key).await.map_err(ConductorError::Persistence))?;
    Ok(Envelope::empty(format))
}
