use std::sync::Arc;

use anyhow::Context;
use lpi_core::{ExternalSkill, SkillCandidate, SkillRepository};
use tracing::{debug, info};

/// Read-only reconciliation of skill mentions against the canonical taxonomy.
/// Creating the unmatched skills is left to the caller.
#[derive(Clone)]
pub struct SkillReconciler {
    repository: Arc<dyn SkillRepository>,
}

impl SkillReconciler {
    pub fn new(repository: Arc<dyn SkillRepository>) -> Self {
        Self { repository }
    }

    /// One candidate per named mention, in input order. Duplicates are looked up again.
    pub async fn resolve_skills(&self, mentions: &[ExternalSkill]) -> anyhow::Result<Vec<SkillCandidate>> {
        let mut out = Vec::with_capacity(mentions.len());
        for mention in mentions {
            let Some(name) = mention.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                debug!("skipping skill mention without a name");
                continue;
            };

            let existing = self
                .repository
                .find_skill_by_name(name)
                .await
                .with_context(|| format!("looking up skill {name:?}"))?;
            let resolved_id = existing.filter(|skill| skill.is_active).map(|skill| skill.id);

            out.push(SkillCandidate::new(
                name,
                resolved_id,
                mention.passed_skill_assessment.unwrap_or(false),
                mention.endorsements_count.unwrap_or(0),
            ));
        }

        let unmatched = out.iter().filter(|c| c.needs_creation).count();
        info!(
            resolved = out.len() - unmatched,
            unmatched,
            "reconciled skill mentions"
        );
        Ok(out)
    }
}
