//! Entry points for a presentation layer. Errors are flattened to strings
//! the way a UI bridge expects them.

use crate::{
    error::ErrorClass,
    models::LifecycleState,
    session::{SessionController, SessionState},
};

pub fn get_session_state(controller: &SessionController) -> Result<SessionState, String> {
    Ok(controller.snapshot())
}

pub async fn start_prayer(controller: &SessionController) -> Result<(), String> {
    controller.start_prayer().await.map_err(|e| e.to_string())
}

pub async fn invite_friend(controller: &SessionController, friend_id: String) -> Result<(), String> {
    controller
        .invite(friend_id)
        .await
        .map_err(|e| e.to_string())
}

pub fn retry_playback(controller: &SessionController) -> Result<(), String> {
    controller.retry_playback().map_err(|e| e.to_string())
}

/// One-line human readable summary of a snapshot.
pub fn describe(state: &SessionState) -> String {
    if let Some(class) = state.error {
        return match class {
            ErrorClass::NotFound => "Session not found".to_string(),
            ErrorClass::AccessDenied => "You don't have access to this session".to_string(),
            ErrorClass::TransientNetwork | ErrorClass::DecodeMedia => {
                "Unable to load session, retrying later".to_string()
            }
        };
    }

    let title = state
        .session
        .as_ref()
        .and_then(|s| s.juz_label())
        .unwrap_or_else(|| "Prayer".to_string());

    match state.lifecycle {
        LifecycleState::Waiting => format!(
            "{title}: waiting to start ({} joined)",
            state.participant_count
        ),
        LifecycleState::Building => format!("{title}: preparing audio"),
        LifecycleState::Ended => format!("{title}: ended"),
        LifecycleState::Live => {
            let unit_count = state.session.as_ref().map_or(0, |s| s.unit_count);
            let mut line = match state.position {
                None => format!("{title}: live, loading"),
                Some(position) if position.is_in_intermission => format!(
                    "{title}: break, resuming in {}s",
                    position.intermission_remaining.unwrap_or(0)
                ),
                Some(position) if state.phase_reliable => format!(
                    "{title}: rakah {}/{} {}",
                    position.unit_index, unit_count, position.phase_label
                ),
                Some(position) => {
                    format!("{title}: rakah {}/{}", position.unit_index, unit_count)
                }
            };
            if state.health.is_degraded() || state.playback_problem.is_some() {
                line.push_str(" (buffering)");
            }
            line
        }
    }
}
