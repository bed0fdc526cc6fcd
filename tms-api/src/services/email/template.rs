//! Email template store, compile cache and rendering.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tms_core::email::{sample_data, EmailTemplate};
use tms_core::{ErrorContext, Pulid, ResultExt, TmsResult};
use tms_storage::TemplateRepository;
use tms_template::CompiledEmail;

/// Output of rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug)]
struct CacheEntry {
    version: i64,
    compiled: Arc<CompiledEmail>,
}

#[derive(Clone)]
pub struct TemplateService {
    repo: Arc<dyn TemplateRepository>,
    cache: Arc<DashMap<Pulid, CacheEntry>>,
}

fn compile(template: &EmailTemplate) -> TmsResult<CompiledEmail> {
    let compiled = CompiledEmail::compile(
        &template.subject_template,
        &template.html_template,
        template.text_template.as_deref(),
    )?;
    Ok(compiled)
}

impl TemplateService {
    pub fn new(repo: Arc<dyn TemplateRepository>) -> Self {
        Self {
            repo,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Number of compiled templates currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn invalidate(&self, id: &Pulid) {
        self.cache.remove(id);
    }

    /// Compiled form of `template`, reusing the cache when the version matches.
    fn compiled(&self, template: &EmailTemplate) -> TmsResult<Arc<CompiledEmail>> {
        if let Some(entry) = self.cache.get(&template.id) {
            if entry.version == template.version {
                return Ok(entry.compiled.clone());
            }
        }

        let compiled = Arc::new(
            compile(template)
                .with_context(|| ErrorContext::new("compile email template").tag("templateId", &template.id))?,
        );
        if !template.id.is_nil() {
            self.cache.insert(
                template.id.clone(),
                CacheEntry {
                    version: template.version,
                    compiled: compiled.clone(),
                },
            );
        }
        Ok(compiled)
    }

    pub async fn create(&self, template: EmailTemplate) -> TmsResult<EmailTemplate> {
        template.check().into_result()?;
        compile(&template)?;
        let created = self.repo.create(template).await.op("create email template")?;
        tracing::info!(template_id = %created.id, slug = %created.slug, "email template created");
        Ok(created)
    }

    /// Syntax is checked before the write; the cached compilation is dropped
    /// before the new version is stored.
    pub async fn update(&self, template: EmailTemplate) -> TmsResult<EmailTemplate> {
        template.check().into_result()?;
        compile(&template)?;
        self.invalidate(&template.id);
        self.repo
            .update(template)
            .await
            .op("update email template")
    }

    pub async fn get(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<EmailTemplate> {
        self.repo
            .get(id, organization_id)
            .await
            .with_context(|| ErrorContext::new("get email template").tag("templateId", id))
    }

    pub async fn get_by_slug(&self, slug: &str, organization_id: &Pulid) -> TmsResult<EmailTemplate> {
        self.repo
            .get_by_slug(slug, organization_id)
            .await
            .with_context(|| ErrorContext::new("get email template").tag("slug", slug))
    }

    pub async fn list(&self, organization_id: &Pulid) -> TmsResult<Vec<EmailTemplate>> {
        self.repo.list(organization_id).await.op("list email templates")
    }

    pub async fn delete(&self, id: &Pulid, organization_id: &Pulid) -> TmsResult<()> {
        self.invalidate(id);
        self.repo
            .delete(id, organization_id)
            .await
            .with_context(|| ErrorContext::new("delete email template").tag("templateId", id))
    }

    /// Render subject, HTML and text bodies. A failing text body is logged
    /// and rendered empty; subject and HTML failures are errors.
    pub fn render(&self, template: &EmailTemplate, vars: &Value) -> TmsResult<RenderedEmail> {
        let compiled = self.compiled(template)?;
        let ctx = || ErrorContext::new("render email template").tag("templateId", &template.id);

        let subject = compiled.render_subject(vars).with_context(ctx)?;
        let html = compiled.render_html(vars).with_context(ctx)?;
        let text = match compiled.render_text(vars) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(template_id = %template.id, error = %err, "text body failed to render");
                String::new()
            }
        };

        Ok(RenderedEmail { subject, html, text })
    }

    /// Render with the caller's variables, or the sample record when none
    /// are given.
    pub async fn preview(
        &self,
        id: &Pulid,
        organization_id: &Pulid,
        vars: Option<Map<String, Value>>,
    ) -> TmsResult<RenderedEmail> {
        let template = self.get(id, organization_id).await?;
        let data = match vars {
            Some(vars) if !vars.is_empty() => Value::Object(vars),
            _ => sample_data(),
        };
        self.render(&template, &data)
    }

    pub async fn validate_variables(
        &self,
        id: &Pulid,
        organization_id: &Pulid,
        vars: &Map<String, Value>,
    ) -> TmsResult<()> {
        let template = self.get(id, organization_id).await?;
        self.check_variables(&template, vars)
    }

    /// Schema checks, then a trial render to catch undeclared references.
    pub fn check_variables(&self, template: &EmailTemplate, vars: &Map<String, Value>) -> TmsResult<()> {
        if let Some(schema) = &template.variables_schema {
            schema.check(vars).into_result()?;
        }
        self.render(template, &Value::Object(vars.clone()))?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
