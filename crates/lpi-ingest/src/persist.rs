use anyhow::{Context, Result};
use lpi_core::{CandidateProfileDocument, CandidateRepository, SkillRepository, SkillType};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub candidate_id: Uuid,
    pub created_skills: usize,
}

/// Create the skills flagged `needs_creation`, then insert the candidate with every
/// skill resolved. The document is updated in place with the new skill ids.
pub async fn persist_ingested(
    skills: &dyn SkillRepository,
    candidates: &dyn CandidateRepository,
    document: &mut CandidateProfileDocument,
) -> Result<PersistOutcome> {
    let mut created_skills = 0usize;
    for skill in document.skills.iter_mut().filter(|s| s.needs_creation) {
        let id = skills
            .create_skill(&skill.name, SkillType::Technical)
            .await
            .with_context(|| format!("creating skill {:?}", skill.name))?;
        skill.resolve(id);
        created_skills += 1;
    }

    let candidate_id = candidates
        .insert_candidate_with_relations(document)
        .await
        .with_context(|| format!("inserting candidate {}", document.linkedin_url))?;

    info!(%candidate_id, created_skills, "persisted ingested candidate");
    Ok(PersistOutcome {
        candidate_id,
        created_skills,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCandidateRepository, InMemorySkillRepository};
    use lpi_core::{ExternalProfile, SkillCandidate};
    use lpi_mapping::ProfileMapper;

    #[tokio::test]
    async fn creates_missing_skills_before_inserting_candidate() {
        let skills = InMemorySkillRepository::new();
        let existing = skills.create_skill("SQL", SkillType::Technical).await.unwrap();
        let candidates = InMemoryCandidateRepository::new();

        let profile = ExternalProfile {
            first_name: Some("Grace".into()),
            last_name: Some("Hopper".into()),
            ..Default::default()
        };
        let mut document = ProfileMapper::new()
            .map_to_profile(
                &profile,
                "https://www.linkedin.com/in/grace",
                vec![
                    SkillCandidate::new("SQL", Some(existing), false, 3),
                    SkillCandidate::new("COBOL", None, true, 40),
                ],
            )
            .document;

        let outcome = persist_ingested(&skills, &candidates, &mut document).await.unwrap();
        assert_eq!(outcome.created_skills, 1);
        assert!(document.skills.iter().all(|s| !s.needs_creation && s.resolved_id.is_some()));

        let stored = candidates.get(outcome.candidate_id).await.unwrap();
        assert_eq!(stored.skills, document.skills);
        assert_eq!(skills.snapshot().await.len(), 2);
    }
}
