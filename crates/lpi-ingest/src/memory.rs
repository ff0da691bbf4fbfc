//! Process-local repositories for tests, fixtures runs and deployments without a database.

use async_trait::async_trait;
use lpi_core::{CandidateProfileDocument, CandidateRepository, Skill, SkillRepository, SkillType};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemorySkillRepository {
    skills: RwLock<Vec<Skill>>,
}

impl InMemorySkillRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skills(skills: impl IntoIterator<Item = Skill>) -> Self {
        Self {
            skills: RwLock::new(skills.into_iter().collect()),
        }
    }

    pub async fn snapshot(&self) -> Vec<Skill> {
        self.skills.read().await.clone()
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl SkillRepository for InMemorySkillRepository {
    async fn find_skill_by_name(&self, name: &str) -> anyhow::Result<Option<Skill>> {
        let skills = self.skills.read().await;
        Ok(skills
            .iter()
            .find(|s| s.is_active && same_name(&s.name, name))
            .cloned())
    }

    /// Names are unique case-insensitively; creating an existing active name returns its id.
    async fn create_skill(&self, name: &str, skill_type: SkillType) -> anyhow::Result<Uuid> {
        let mut skills = self.skills.write().await;
        if let Some(existing) = skills.iter().find(|s| s.is_active && same_name(&s.name, name)) {
            return Ok(existing.id);
        }
        let id = Uuid::new_v4();
        skills.push(Skill {
            id,
            name: name.trim().to_string(),
            skill_type,
            is_active: true,
        });
        Ok(id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCandidateRepository {
    candidates: RwLock<Vec<(Uuid, CandidateProfileDocument)>>,
}

impl InMemoryCandidateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<CandidateProfileDocument> {
        self.candidates
            .read()
            .await
            .iter()
            .find(|(candidate_id, _)| *candidate_id == id)
            .map(|(_, document)| document.clone())
    }

    pub async fn len(&self) -> usize {
        self.candidates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CandidateRepository for InMemoryCandidateRepository {
    async fn insert_candidate_with_relations(
        &self,
        document: &CandidateProfileDocument,
    ) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        self.candidates.write().await.push((id, document.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_ignores_case_and_inactive_rows() {
        let retired = Skill {
            id: Uuid::new_v4(),
            name: "Flash".into(),
            skill_type: SkillType::Technical,
            is_active: false,
        };
        let repo = InMemorySkillRepository::with_skills([retired]);
        assert!(repo.find_skill_by_name("flash").await.unwrap().is_none());

        let id = repo.create_skill("Rust", SkillType::Technical).await.unwrap();
        let found = repo.find_skill_by_name("RUST").await.unwrap().unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn create_is_idempotent_per_name() {
        let repo = InMemorySkillRepository::new();
        let first = repo.create_skill("Go", SkillType::Technical).await.unwrap();
        let second = repo.create_skill("go", SkillType::Soft).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.snapshot().await.len(), 1);
    }
}
