use super::*;
use std::time::Duration;

#[test]
fn boundary_kinds_map_to_conflict() {
    for code in [
        ErrorCode::InvalidPosition,
        ErrorCode::EndOfSession,
        ErrorCode::StartOfSession,
        ErrorCode::NoImages,
        ErrorCode::NoProducts,
        ErrorCode::DifferentSessions,
    ] {
        assert_eq!(status_for(code), StatusCode::CONFLICT, "{code:?}");
    }
}

#[test]
fn remaining_codes_have_distinct_statuses() {
    assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
    assert_eq!(
        status_for(ErrorCode::Validation),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(status_for(ErrorCode::Busy), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        status_for(ErrorCode::Internal),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn rejection_carries_code_and_message() {
    let (status, Json(body)) = reject(CoordinatorError::Busy {
        session_id: SessionId(3),
        waited: Duration::from_millis(250),
    });
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.code, ErrorCode::Busy);
    assert!(body.message.contains("session 3"));
}

#[test]
fn storage_failures_hide_behind_internal() {
    let (status, Json(body)) = reject(CoordinatorError::Store(anyhow::anyhow!("disk full")));
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.code, ErrorCode::Internal);
}

#[test]
fn create_session_request_defaults_to_empty_queue() {
    let req: CreateSessionRequest =
        serde_json::from_str(r#"{"title":"late show"}"#).expect("json");
    assert_eq!(req.title, "late show");
    assert!(req.product_ids.is_empty());
}
