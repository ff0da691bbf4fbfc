//! Postgres-backed repositories. Tables are expected to exist already.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lpi_core::{CandidateProfileDocument, CandidateRepository, Skill, SkillRepository, SkillType};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

pub async fn connect_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

#[derive(Debug, Clone)]
pub struct PgSkillRepository {
    pool: PgPool,
}

impl PgSkillRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SkillRepository for PgSkillRepository {
    async fn find_skill_by_name(&self, name: &str) -> Result<Option<Skill>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, skill_type, is_active
              FROM skills
             WHERE lower(name) = lower($1)
               AND is_active = true
             LIMIT 1
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("querying skill {name:?}"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let skill_type: String = row.try_get("skill_type")?;
        Ok(Some(Skill {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            skill_type: SkillType::parse(&skill_type),
            is_active: row.try_get("is_active")?,
        }))
    }

    async fn create_skill(&self, name: &str, skill_type: SkillType) -> Result<Uuid> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO skills (id, name, skill_type, is_active)
            VALUES ($1, $2, $3, true)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name.trim())
        .bind(skill_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("inserting skill {name:?}"))?;

        if let Some(id) = inserted {
            return Ok(id);
        }
        // Lost a race against a concurrent insert of the same name.
        self.find_skill_by_name(name)
            .await?
            .map(|skill| skill.id)
            .with_context(|| format!("skill {name:?} conflicted but is not visible"))
    }
}

#[derive(Debug, Clone)]
pub struct PgCandidateRepository {
    pool: PgPool,
}

impl PgCandidateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateRepository for PgCandidateRepository {
    async fn insert_candidate_with_relations(
        &self,
        document: &CandidateProfileDocument,
    ) -> Result<Uuid> {
        let candidate_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await.context("starting candidate transaction")?;

        sqlx::query(
            r#"
            INSERT INTO candidates (
                id, first_name, last_name, email, date_of_birth, linkedin_url,
                profile_image, location, bio, job_title, current_company, category,
                availability
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(candidate_id)
        .bind(&document.first_name)
        .bind(&document.last_name)
        .bind(&document.email)
        .bind(document.date_of_birth)
        .bind(&document.linkedin_url)
        .bind(&document.profile_image)
        .bind(&document.location)
        .bind(&document.bio)
        .bind(&document.job_title)
        .bind(&document.current_company)
        .bind(document.category.map(|c| c.as_str()))
        .bind(Json(&document.availability))
        .execute(&mut *tx)
        .await
        .context("inserting candidate row")?;

        for entry in &document.education {
            sqlx::query(
                r#"
                INSERT INTO candidate_education (candidate_id, degree, institution, start_year, end_year, location)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(candidate_id)
            .bind(&entry.degree)
            .bind(&entry.institution)
            .bind(entry.start_year)
            .bind(entry.end_year)
            .bind(&entry.location)
            .execute(&mut *tx)
            .await
            .context("inserting education row")?;
        }

        for entry in &document.verifications {
            sqlx::query(
                r#"
                INSERT INTO candidate_verifications (
                    candidate_id, job_title, company, start_year, end_year, description, display_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(candidate_id)
            .bind(&entry.job_title)
            .bind(&entry.company)
            .bind(entry.start_year)
            .bind(entry.end_year)
            .bind(&entry.description)
            .bind(entry.display_order as i32)
            .execute(&mut *tx)
            .await
            .context("inserting work history row")?;
        }

        for skill in &document.skills {
            let Some(skill_id) = skill.resolved_id else {
                warn!(skill = %skill.name, "skipping unresolved skill on candidate insert");
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO candidate_skills (candidate_id, skill_id, is_core, endorsements_count)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(candidate_id)
            .bind(skill_id)
            .bind(skill.is_core)
            .bind(i32::try_from(skill.endorsements_count).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .context("inserting candidate skill row")?;
        }

        for language in &document.languages {
            sqlx::query(
                r#"
                INSERT INTO candidate_languages (candidate_id, language, proficiency)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(candidate_id)
            .bind(&language.language)
            .bind(&language.proficiency)
            .execute(&mut *tx)
            .await
            .context("inserting language row")?;
        }

        for certification in &document.certifications {
            sqlx::query(
                r#"
                INSERT INTO candidate_certifications (candidate_id, name, issuer, year)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(candidate_id)
            .bind(&certification.name)
            .bind(&certification.issuer)
            .bind(certification.year)
            .execute(&mut *tx)
            .await
            .context("inserting certification row")?;
        }

        tx.commit().await.context("committing candidate transaction")?;
        info!(%candidate_id, linkedin_url = %document.linkedin_url, "inserted candidate");
        Ok(candidate_id)
    }
}
