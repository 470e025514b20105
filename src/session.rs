//! Per-operator form sessions.
//!
//! Each session walks `AwaitingInput → Extracted → Reviewed → Saved`. Photos
//! and contact data are collected while awaiting input; the extraction result
//! is the record the operator reviews and finally exports. `reset` clears
//! everything, `retake` drops the record but keeps photos and contact data.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SessionError;
use crate::image_prep::ProcessedImage;
use crate::schema::{ContactInfo, ExtractedIdentity, IdentityFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingInput,
    Extracted,
    Reviewed,
    Saved,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingInput => "awaiting_input",
            SessionState::Extracted => "extracted",
            SessionState::Reviewed => "reviewed",
            SessionState::Saved => "saved",
        }
    }
}

/// Which side of the card a photo shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::Front => "Anverso",
            Side::Back => "Reverso",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    front: Option<ProcessedImage>,
    back: Option<ProcessedImage>,
    contact: ContactInfo,
    record: Option<ExtractedIdentity>,
    saved_to: Option<String>,
    last_used: Instant,
}

/// Photo summary in a [`SessionView`].
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// What the API returns for a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub state: SessionState,
    pub front: Option<ImageInfo>,
    pub back: Option<ImageInfo>,
    pub contact: ContactInfo,
    pub record: Option<ExtractedIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
}

/// Everything an export needs, borrowed from a reviewed session.
pub struct ExportInput<'a> {
    pub record: &'a ExtractedIdentity,
    pub front: &'a ProcessedImage,
    pub back: &'a ProcessedImage,
}

/// Owned copy of an [`ExportInput`], for work done outside the store lock.
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub record: ExtractedIdentity,
    pub front: ProcessedImage,
    pub back: ProcessedImage,
}

impl ExportSnapshot {
    pub fn input(&self) -> ExportInput<'_> {
        ExportInput {
            record: &self.record,
            front: &self.front,
            back: &self.back,
        }
    }
}

impl ExportInput<'_> {
    pub fn to_snapshot(&self) -> ExportSnapshot {
        ExportSnapshot {
            record: self.record.clone(),
            front: self.front.clone(),
            back: self.back.clone(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            state: SessionState::AwaitingInput,
            front: None,
            back: None,
            contact: ContactInfo::default(),
            record: None,
            saved_to: None,
            last_used: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn record(&self) -> Option<&ExtractedIdentity> {
        self.record.as_ref()
    }

    pub fn image(&self, side: Side) -> Option<&ProcessedImage> {
        match side {
            Side::Front => self.front.as_ref(),
            Side::Back => self.back.as_ref(),
        }
    }

    fn require(&self, action: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                state: self.state.as_str(),
            })
        }
    }

    pub fn set_image(&mut self, side: Side, image: ProcessedImage) -> Result<(), SessionError> {
        self.require("upload a photo", &[SessionState::AwaitingInput])?;
        match side {
            Side::Front => self.front = Some(image),
            Side::Back => self.back = Some(image),
        }
        Ok(())
    }

    pub fn set_contact(&mut self, contact: ContactInfo) -> Result<(), SessionError> {
        self.require("change contact data", &[SessionState::AwaitingInput])?;
        self.contact = ContactInfo {
            email: contact.email.trim().to_string(),
            phone: contact.phone.trim().to_string(),
            validity: contact.validity,
        };
        Ok(())
    }

    /// Both photos for the extraction call. Requires both photos and an email.
    pub fn extraction_inputs(&self) -> Result<(ProcessedImage, ProcessedImage), SessionError> {
        self.require("extract", &[SessionState::AwaitingInput])?;
        let mut missing = Vec::new();
        if self.front.is_none() {
            missing.push("front photo");
        }
        if self.back.is_none() {
            missing.push("back photo");
        }
        if self.contact.email.is_empty() {
            missing.push("email");
        }
        match (&self.front, &self.back) {
            (Some(front), Some(back)) if missing.is_empty() => Ok((front.clone(), back.clone())),
            _ => Err(SessionError::MissingInput(missing.join(", "))),
        }
    }

    /// Store the normalized fields as the session's record.
    pub fn complete_extraction(
        &mut self,
        fields: IdentityFields,
    ) -> Result<&ExtractedIdentity, SessionError> {
        self.require("store an extraction", &[SessionState::AwaitingInput])?;
        self.state = SessionState::Extracted;
        let record = self
            .record
            .insert(ExtractedIdentity::new(fields, self.contact.clone()));
        Ok(&*record)
    }

    /// Apply operator edits to the record.
    pub fn review(&mut self, edit: ExtractedIdentity) -> Result<&ExtractedIdentity, SessionError> {
        self.require(
            "review",
            &[
                SessionState::Extracted,
                SessionState::Reviewed,
                SessionState::Saved,
            ],
        )?;
        let record = self.record.get_or_insert_with(ExtractedIdentity::default);
        record.apply_review(edit);
        self.state = SessionState::Reviewed;
        Ok(&*record)
    }

    /// The reviewed record and both photos, ready to export or save.
    pub fn export_input(&self) -> Result<ExportInput<'_>, SessionError> {
        self.require("export", &[SessionState::Reviewed, SessionState::Saved])?;
        match (&self.record, &self.front, &self.back) {
            (Some(record), Some(front), Some(back)) => Ok(ExportInput {
                record,
                front,
                back,
            }),
            _ => Err(SessionError::MissingInput("record or photos".to_string())),
        }
    }

    pub fn mark_saved(&mut self, location: Option<String>) -> Result<(), SessionError> {
        self.require("mark as saved", &[SessionState::Reviewed, SessionState::Saved])?;
        self.state = SessionState::Saved;
        if location.is_some() {
            self.saved_to = location;
        }
        Ok(())
    }

    /// Go back to the photo step, discarding the extracted record.
    pub fn retake(&mut self) -> Result<(), SessionError> {
        self.require(
            "retake photos",
            &[SessionState::Extracted, SessionState::Reviewed],
        )?;
        self.record = None;
        self.state = SessionState::AwaitingInput;
        Ok(())
    }

    /// Clear everything and start over.
    pub fn reset(&mut self) {
        self.state = SessionState::AwaitingInput;
        self.front = None;
        self.back = None;
        self.contact = ContactInfo::default();
        self.record = None;
        self.saved_to = None;
    }

    pub fn view(&self) -> SessionView {
        let info = |img: &ProcessedImage| ImageInfo {
            width: img.width,
            height: img.height,
            bytes: img.jpeg.len(),
        };
        SessionView {
            id: self.id.clone(),
            state: self.state,
            front: self.front.as_ref().map(info),
            back: self.back.as_ref().map(info),
            contact: self.contact.clone(),
            record: self.record.clone(),
            saved_to: self.saved_to.clone(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory session store shared across handlers.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session and return its view.
    pub fn create(&self) -> SessionView {
        let session = Session::new();
        let view = session.view();
        self.inner
            .write()
            .unwrap()
            .insert(session.id().to_string(), session);
        info!("SessionStore: created session {}", view.id);
        view
    }

    /// Run `f` against a session without mutating it.
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&Session) -> R) -> Result<R, SessionError> {
        let store = self.inner.read().unwrap();
        let session = store
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(f(session))
    }

    /// Run `f` against a session with mutable access.
    pub fn with_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let mut store = self.inner.write().unwrap();
        let session = store
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let result = f(session);
        session.last_used = Instant::now();
        debug!("SessionStore: session {} now {}", id, session.state.as_str());
        Ok(result)
    }

    /// Drop a session and everything it holds.
    pub fn remove(&self, id: &str) -> Result<(), SessionError> {
        self.inner
            .write()
            .unwrap()
            .remove(id)
            .map(|_| info!("SessionStore: removed session {}", id))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Drop sessions not modified for at least `max_idle`. Returns how many
    /// were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut store = self.inner.write().unwrap();
        let before = store.len();
        store.retain(|_, session| session.last_used.elapsed() < max_idle);
        let removed = before - store.len();
        if removed > 0 {
            info!(
                "SessionStore: evicted {} idle sessions, {} remaining",
                removed,
                store.len()
            );
        }
        removed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
}
