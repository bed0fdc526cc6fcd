//! Email profile store with encrypted secrets.

use std::sync::Arc;
use tms_core::email::{EmailProfile, SecretField};
use tms_core::{EmailError, Encryptor, ErrorContext, Pulid, ResultExt, TmsResult};
use tms_storage::ProfileRepository;

/// Profile CRUD over a repository, encrypting secret columns on write.
///
/// Secrets arrive as plaintext on create. On update a secret equal to the
/// stored ciphertext, or empty, keeps the stored value; anything else is new
/// plaintext and is encrypted. Secrets the provider and auth type no longer
/// read are cleared on every write.
#[derive(Clone)]
pub struct ProfileService {
    repo: Arc<dyn ProfileRepository>,
    encryptor: Arc<Encryptor>,
}

impl ProfileService {
    pub fn new(repo: Arc<dyn ProfileRepository>, encryptor: Arc<Encryptor>) -> Self {
        Self { repo, encryptor }
    }

    fn encrypt_field(&self, profile: &mut EmailProfile, field: SecretField) -> TmsResult<()> {
        let plaintext = profile.secret(field).to_string();
        let ciphertext = self.encryptor.encrypt(&plaintext).with_context(|| {
            ErrorContext::new("encrypt profile secret")
                .tag("field", field.name())
                .tag("profileId", &profile.id)
        })?;
        *profile.secret_mut(field) = ciphertext;
        Ok(())
    }

    fn clear_unused_secrets(profile: &mut EmailProfile) {
        for field in SecretField::ALL {
            if !profile.uses_secret(field) {
                profile.secret_mut(field).clear();
            }
        }
    }

    pub async fn create(&self, mut profile: EmailProfile) -> TmsResult<EmailProfile> {
        Self::clear_unused_secrets(&mut profile);
        profile.check().into_result()?;

        for field in SecretField::ALL {
            if !profile.secret(field).is_empty() {
                self.encrypt_field(&mut profile, field)?;
            }
        }

        let created = self.repo.create(profile).await.op("create email profile")?;
        tracing::info!(
            profile_id = %created.id,
            organization_id = %created.organization_id,
            provider = %created.provider_type,
            "email profile created"
        );
        Ok(created)
    }

    /// Update a profile.
    ///
    /// Secret fields are compared against the stored ciphertext: callers send
    /// the stored value back (or leave the field empty) to keep a secret, and
    /// any other value is taken as new plaintext and encrypted. Repeating an
    /// update therefore never encrypts a secret twice. Switching to an auth
    /// type that does not read a secret clears it.
    pub async fn update(&self, mut profile: EmailProfile) -> TmsResult<EmailProfile> {
        let existing = self
            .repo
            .get(&profile.id, &profile.organization_id)
            .await
            .op("get email profile")?;

        for field in SecretField::ALL {
            if profile.uses_secret(field) && profile.secret(field).is_empty() {
                *profile.secret_mut(field) = existing.secret(field).to_string();
            }
        }
        Self::clear_unused_secrets(&mut profile);
        profile.check().into_result()?;

        for field in SecretField::ALL {
            let secret = profile.secret(field);
            if !secret.is_empty() && secret != existing.secret(field) {
                self.encrypt_field(&mut profile, field)?;
            }
        }

        self.repo.update(profile).await.op("update email profile")
    }

    pub async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        self.repo
            .get(id, organization_id)
            .await
            .with_context(|| ErrorContext::new("get email profile").tag("profileId", id))
    }

    pub async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailProfile>> {
        self.repo.list(organization_id).await.op("list email profiles")
    }

    /// Delete a profile. The organization's default profile is refused.
    pub async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()> {
        let profile = self.get(id, organization_id).await?;
        if profile.is_default {
            return Err(EmailError::CannotDeleteDefault.into());
        }
        self.repo
            .delete(id, organization_id)
            .await
            .with_context(|| ErrorContext::new("delete email profile").tag("profileId", id))
    }

    pub async fn get_default(&self, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        self.repo
            .get_default(organization_id)
            .await
            .with_context(|| {
                ErrorContext::new("get default email profile").tag("organizationId", organization_id)
            })
    }

    /// The repository clears any previous default atomically.
    pub async fn set_default(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailProfile> {
        self.repo
            .set_default(id, organization_id)
            .await
            .with_context(|| ErrorContext::new("set default email profile").tag("profileId", id))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tms_core::email::{AuthType, ProviderType};
    use tms_core::{ErrorKind, TmsError};
    use tms_storage::InMemoryEmailStore;

    fn service() -> ProfileService {
        ProfileService::new(
            Arc::new(InMemoryEmailStore::new()),
            Arc::new(Encryptor::from_passphrase("profile-test-key")),
        )
    }

    fn profile(org: &Pulid) -> EmailProfile {
        let mut p = EmailProfile::smtp(org.clone(), "Primary", "smtp.example.com", "ops@example.com");
        p.username = "ops".to_string();
        p.password = "hunter2".to_string();
        p.auth_type = AuthType::Plain;
        p
    }

    #[tokio::test]
    async fn test_create_encrypts_secrets() {
        let svc = service();
        let org = Pulid::new("org");
        let created = svc.create(profile(&org)).await.unwrap();
        assert_ne!(created.password, "hunter2");
        assert_eq!(svc.encryptor.decrypt(&created.password).unwrap(), "hunter2");
        assert!(created.api_key.is_empty());
    }

    #[tokio::test]
    async fn test_update_with_same_secret_does_not_double_encrypt() {
        let svc = service();
        let org = Pulid::new("org");
        let created = svc.create(profile(&org)).await.unwrap();

        let once = svc.update(created.clone()).await.unwrap();
        let twice = svc.update(once.clone()).await.unwrap();
        assert_eq!(once.password, created.password);
        assert_eq!(twice.password, created.password);

        let mut blank = twice.clone();
        blank.password.clear();
        let kept = svc.update(blank).await.unwrap();
        assert_eq!(kept.password, created.password);
    }

    #[tokio::test]
    async fn test_update_with_new_plaintext_reencrypts() {
        let svc = service();
        let org = Pulid::new("org");
        let mut created = svc.create(profile(&org)).await.unwrap();
        created.password = "correct-horse".to_string();
        let updated = svc.update(created).await.unwrap();
        assert_eq!(svc.encryptor.decrypt(&updated.password).unwrap(), "correct-horse");
    }

    #[tokio::test]
    async fn test_switching_auth_type_clears_unused_secret() {
        let svc = service();
        let org = Pulid::new("org");
        let created = svc.create(profile(&org)).await.unwrap();
        assert!(!created.password.is_empty());

        let mut api_key = created.clone();
        api_key.auth_type = AuthType::ApiKey;
        api_key.password = created.password.clone();
        api_key.api_key = "SG.key".to_string();
        let updated = svc.update(api_key).await.unwrap();
        assert!(updated.password.is_empty());
        assert_eq!(svc.encryptor.decrypt(&updated.api_key).unwrap(), "SG.key");

        // An empty field on a later update does not bring the password back.
        let mut plain = updated.clone();
        plain.auth_type = AuthType::Plain;
        plain.password.clear();
        let err = svc.update(plain).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_uses_secret_by_provider_and_auth() {
        let mut p = profile(&Pulid::new("org"));
        assert!(p.uses_secret(SecretField::Password));
        assert!(!p.uses_secret(SecretField::ApiKey));
        assert!(!p.uses_secret(SecretField::OAuth2ClientSecret));

        p.auth_type = AuthType::OAuth2;
        assert!(p.uses_secret(SecretField::Password));
        assert!(p.uses_secret(SecretField::OAuth2ClientSecret));

        p.provider_type = ProviderType::SendGrid;
        p.auth_type = AuthType::ApiKey;
        assert!(!p.uses_secret(SecretField::Password));
        assert!(p.uses_secret(SecretField::ApiKey));
    }

    #[tokio::test]
    async fn test_validation_runs_before_storage() {
        let svc = service();
        let mut bad = profile(&Pulid::new("org"));
        bad.provider_type = ProviderType::SendGrid;
        bad.from_address = "nope".to_string();
        let err = svc.create(bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        match err.root() {
            TmsError::Validation(multi) => {
                assert!(multi.has_field("fromAddress"));
                assert!(multi.has_field("apiKey"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_profile_cannot_be_deleted() {
        let svc = service();
        let org = Pulid::new("org");
        let mut p = profile(&org);
        p.is_default = true;
        let created = svc.create(p).await.unwrap();

        let err = svc.delete(&created.id, &org).await.unwrap_err();
        assert!(matches!(err.root(), TmsError::Email(EmailError::CannotDeleteDefault)));

        let other = svc.create(profile(&org)).await.unwrap();
        svc.set_default(&other.id, &org).await.unwrap();
        svc.delete(&created.id, &org).await.unwrap();
        assert_eq!(svc.get_default(&org).await.unwrap().id, other.id);
    }
}
