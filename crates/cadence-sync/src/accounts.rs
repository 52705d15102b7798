//! Enrollment and credential linking.
//!
//! These are the only paths that take plaintext credentials in; everything
//! is sealed before it reaches the store. Re-authenticating on either side
//! lifts an invalidation.

use std::sync::Arc;

use cadence_core::{
  Error as CoreError,
  policy::{SyncPolicy, WorkingHours},
  source::TokenGrant,
  store::{PolicyStore, SubjectStore},
  subject::{NewSubject, SourceCredentials, Subject},
};
use tracing::info;

use crate::{
  clock::Clock,
  error::{Result, SyncError},
  vault::Vault,
};

/// Sink-side credentials handed over when a subject installs the app.
#[derive(Debug, Clone)]
pub struct Enrollment {
  pub sink_user_id:   String,
  pub sink_team_id:   Option<String>,
  pub sink_token:     String,
  pub sink_bot_token: Option<String>,
}

pub struct Accounts<S> {
  store: Arc<S>,
  vault: Arc<Vault>,
  clock: Arc<dyn Clock>,
}

impl<S> Accounts<S>
where
  S: SubjectStore + PolicyStore,
{
  pub fn new(store: Arc<S>, vault: Arc<Vault>, clock: Arc<dyn Clock>) -> Self {
    Self { store, vault, clock }
  }

  /// Enroll a subject, or replace the sink credentials of one already
  /// enrolled. New subjects get the default (paused) policy.
  pub async fn enroll(&self, input: Enrollment) -> Result<Subject> {
    let sink_token     = self.vault.seal(&input.sink_token)?;
    let sink_bot_token = input.sink_bot_token.as_deref().map(|t| self.vault.seal(t)).transpose()?;

    let existing = self
      .store
      .find_by_sink_user(&input.sink_user_id)
      .await
      .map_err(SyncError::store)?;

    let Some(subject) = existing else {
      let subject = self
        .store
        .add_subject(NewSubject {
          sink_user_id: input.sink_user_id,
          sink_team_id: input.sink_team_id,
          sink_token,
          sink_bot_token,
        })
        .await
        .map_err(SyncError::store)?;
      self
        .store
        .save_policy(&SyncPolicy::new(subject.subject_id))
        .await
        .map_err(SyncError::store)?;
      info!(subject_id = %subject.subject_id, "enrolled subject");
      return Ok(subject);
    };

    self
      .store
      .update_sink_credentials(subject.subject_id, sink_token, sink_bot_token, input.sink_team_id)
      .await
      .map_err(SyncError::store)?;

    if subject.sync_state.is_invalidated() {
      self.store.reactivate(subject.subject_id).await.map_err(SyncError::store)?;
    }
    info!(subject_id = %subject.subject_id, "re-enrolled subject");
    self.reload(subject.subject_id).await
  }

  /// Store a source credential grant for an enrolled subject.
  ///
  /// A grant without a refresh token is only accepted when an earlier one
  /// is already stored.
  pub async fn link_source(
    &self,
    sink_user_id: &str,
    source_user_id: String,
    grant: TokenGrant,
  ) -> Result<Subject> {
    let subject = self.find(sink_user_id).await?;

    let refresh_token = match &grant.refresh_token {
      Some(token) => self.vault.seal(token)?,
      None => subject
        .source
        .as_ref()
        .map(|c| c.refresh_token.clone())
        .ok_or(SyncError::MissingRefreshToken)?,
    };
    let credentials = SourceCredentials {
      access_token: self.vault.seal(&grant.access_token)?,
      refresh_token,
      expires_at: Some(self.clock.now() + grant.expires_in),
    };

    self
      .store
      .update_source_credentials(subject.subject_id, Some(source_user_id), credentials)
      .await
      .map_err(SyncError::store)?;
    if subject.sync_state.is_invalidated() {
      self.store.reactivate(subject.subject_id).await.map_err(SyncError::store)?;
    }

    info!(subject_id = %subject.subject_id, "linked source account");
    self.reload(subject.subject_id).await
  }

  /// Forget a subject and their policy. Returns whether one existed.
  pub async fn remove(&self, sink_user_id: &str) -> Result<bool> {
    let Some(subject) = self
      .store
      .find_by_sink_user(sink_user_id)
      .await
      .map_err(SyncError::store)?
    else {
      return Ok(false);
    };
    self.store.delete_policy(subject.subject_id).await.map_err(SyncError::store)?;
    self.store.delete_subject(subject.subject_id).await.map_err(SyncError::store)?;
    info!(subject_id = %subject.subject_id, "removed subject");
    Ok(true)
  }

  /// The subject's working-hours window.
  pub async fn working_hours(&self, sink_user_id: &str) -> Result<WorkingHours> {
    let subject = self.find(sink_user_id).await?;
    let policy = self
      .store
      .get_policy(subject.subject_id)
      .await
      .map_err(SyncError::store)?
      .ok_or(CoreError::PolicyNotFound(subject.subject_id))?;
    Ok(policy.working_hours)
  }

  /// Replace the working-hours window, leaving the rest of the policy alone.
  pub async fn set_working_hours(&self, sink_user_id: &str, hours: WorkingHours) -> Result<WorkingHours> {
    let subject = self.find(sink_user_id).await?;
    self
      .store
      .set_working_hours(subject.subject_id, hours)
      .await
      .map_err(SyncError::store)?;
    info!(subject_id = %subject.subject_id, enabled = hours.enabled, "working hours updated");
    Ok(hours)
  }

  async fn find(&self, sink_user_id: &str) -> Result<Subject> {
    self
      .store
      .find_by_sink_user(sink_user_id)
      .await
      .map_err(SyncError::store)?
      .ok_or_else(|| CoreError::SinkUserNotFound(sink_user_id.to_owned()).into())
  }

  async fn reload(&self, id: uuid::Uuid) -> Result<Subject> {
    self
      .store
      .get_subject(id)
      .await
      .map_err(SyncError::store)?
      .ok_or_else(|| CoreError::SubjectNotFound(id).into())
  }
}
