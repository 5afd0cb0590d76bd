//! Join and rejoin decisions.
//!
//! Everything in here is pure: the functions look at a snapshot of the session and return a
//! decision. Adding the name to the roster, recording the first heartbeat and sending the answer is
//! up to the caller.

use crate::error::AdmissionError;
use crate::heartbeat::HeartbeatTracker;
use protocol::SessionPhase;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;

/// The canonical form names are compared in.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// SHA-256 hex digest, the form in which passwords travel and get compared.
pub fn hash_password(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

fn contains_name(names: &[String], name: &str) -> bool {
    let wanted = normalize_name(name);
    names.iter().any(|entry| normalize_name(entry) == wanted)
}

fn check_password(expected: Option<&str>, submitted: Option<&str>) -> Result<(), AdmissionError> {
    match expected {
        Some(expected) if submitted != Some(expected) => Err(AdmissionError::WrongPassword),
        _ => Ok(()),
    }
}

fn check_name(name: &str) -> Result<(), AdmissionError> {
    if name.trim().is_empty() {
        return Err(AdmissionError::InvalidName);
    }
    Ok(())
}

/// What a fresh join gets checked against.
pub struct JoinContext<'a> {
    /// Hash of the configured password, if any.
    pub password_hash: Option<&'a str>,
    pub phase: SessionPhase,
    /// The pre-game roster.
    pub roster: &'a [String],
    /// Names are unique across players and observers.
    pub observers: &'a [String],
}

/// Checks password, phase and name uniqueness in that order.
pub fn evaluate_join(
    name: &str,
    password_hash: Option<&str>,
    context: &JoinContext<'_>,
) -> Result<(), AdmissionError> {
    check_password(context.password_hash, password_hash)?;
    if context.phase != SessionPhase::PreGame {
        return Err(AdmissionError::SessionNotJoinable);
    }
    check_name(name)?;
    if contains_name(context.roster, name) || contains_name(context.observers, name) {
        return Err(AdmissionError::DuplicateName);
    }
    Ok(())
}

/// What a rejoin gets checked against.
pub struct RejoinContext<'a> {
    pub password_hash: Option<&'a str>,
    pub phase: SessionPhase,
    /// The player list of the started match.
    pub match_players: &'a [String],
    pub heartbeats: &'a HeartbeatTracker,
    pub now: Instant,
    pub threshold: Duration,
}

/// A rejoin only works for a player of the started match that currently counts as disconnected.
pub fn evaluate_rejoin(
    name: &str,
    password_hash: Option<&str>,
    context: &RejoinContext<'_>,
) -> Result<(), AdmissionError> {
    check_password(context.password_hash, password_hash)?;
    if context.phase != SessionPhase::InProgress || !contains_name(context.match_players, name) {
        return Err(AdmissionError::UnknownPlayer);
    }
    if !context
        .heartbeats
        .is_disconnected(name, context.now, context.threshold)
    {
        return Err(AdmissionError::NotDisconnected);
    }
    Ok(())
}

/// Observers may come at any time, their name must neither clash with another observer nor with a player.
pub fn evaluate_observer_join(
    name: &str,
    observers: &[String],
    players: &[String],
) -> Result<(), AdmissionError> {
    check_name(name)?;
    if contains_name(observers, name) || contains_name(players, name) {
        return Err(AdmissionError::DuplicateName);
    }
    Ok(())
}

/// An observer coming back only must not pretend to be a player.
pub fn evaluate_observer_rejoin(name: &str, players: &[String]) -> Result<(), AdmissionError> {
    check_name(name)?;
    if contains_name(players, name) {
        return Err(AdmissionError::DuplicateName);
    }
    Ok(())
}
