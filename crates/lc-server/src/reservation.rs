//! Reservation discipline over boards.
//!
//! A board's `AssignedTo` field is either `"nobody"` or exactly one user.
//! Both transitions are locked read-modify-writes through the object store,
//! so two racing assigns cannot both win.
//!
//! `assign` rejects a board that is already assigned even when the requester
//! is the current holder; there is no idempotent re-assign. Forced release
//! bypasses the identity check but leaves an audit line in the log.

use lc_core::error::{LcError, LcResult};
use lc_core::model::{Board, EntityType, NOBODY};
use lc_core::store::ObjectStore;

/// Reserve a board for a user.
pub async fn assign(store: &ObjectStore, board_name: &str, user: &str) -> LcResult<Board> {
    let user = user.to_string();
    store
        .update(EntityType::Board, board_name, |board: &mut Board| {
            if !board.is_free() {
                return Err(LcError::Permission(format!(
                    "board '{}' is already assigned to '{}'",
                    board.name, board.assigned_to
                )));
            }
            board.assigned_to = user.clone();
            Ok(())
        })
        .await
}

/// Release a board held by a user.
///
/// Without `force`, only the current holder may release. With `force`, the
/// identity check is bypassed entirely and the release is logged for audit.
pub async fn release(
    store: &ObjectStore,
    board_name: &str,
    user: &str,
    force: bool,
) -> LcResult<Board> {
    let user = user.to_string();
    let board_label = board_name.to_string();
    store
        .update(EntityType::Board, board_name, |board: &mut Board| {
            if board.is_free() {
                return Err(LcError::Permission(format!(
                    "board '{}' is not assigned to anyone",
                    board.name
                )));
            }
            if !force && board.assigned_to != user {
                return Err(LcError::Permission(format!(
                    "board '{}' is assigned to '{}', not '{}'",
                    board.name, board.assigned_to, user
                )));
            }
            if force && board.assigned_to != user {
                tracing::warn!(
                    board = %board_label,
                    holder = %board.assigned_to,
                    requested_by = %user,
                    "forced release of a board held by another user"
                );
            }
            board.assigned_to = NOBODY.to_string();
            Ok(())
        })
        .await
}
