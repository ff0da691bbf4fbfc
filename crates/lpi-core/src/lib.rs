//! Core domain model and collaborator contracts for LPI.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lpi-core";

/// Year/month/day triple as reported by the profile API. Zero components are absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DateParts {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalGeo {
    pub full: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalPosition {
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub start: Option<DateParts>,
    pub end: Option<DateParts>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalSkill {
    pub name: Option<String>,
    pub passed_skill_assessment: Option<bool>,
    pub endorsements_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalEducation {
    pub school_name: Option<String>,
    pub degree: Option<String>,
    pub field_of_study: Option<String>,
    pub start: Option<DateParts>,
    pub end: Option<DateParts>,
}

/// Third-party profile payload. Every field is optional; absence is the normal case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub geo: Option<ExternalGeo>,
    pub profile_picture: Option<String>,
    pub positions: Option<Vec<ExternalPosition>>,
    pub skills: Option<Vec<ExternalSkill>>,
    pub educations: Option<Vec<ExternalEducation>>,
}

impl ExternalProfile {
    /// Decode an API payload field by field. Wrong-typed fields count as absent and a
    /// non-object payload yields an empty profile.
    pub fn from_json(value: &JsonValue) -> Self {
        let root = match value.get("data") {
            Some(data) if data.is_object() && value.get("firstName").is_none() => data,
            _ => value,
        };
        if !root.is_object() {
            return Self::default();
        }

        let geo = root.get("geo").and_then(|g| {
            let geo = ExternalGeo {
                full: json_str(g, &["full"]),
                city: json_str(g, &["city"]),
                country: json_str(g, &["country"]).or_else(|| json_str(g, &["country", "name"])),
            };
            (geo != ExternalGeo::default()).then_some(geo)
        });

        let positions = json_array(root, &["position", "positions"]).map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| ExternalPosition {
                    title: json_str(item, &["title"]),
                    company_name: json_str(item, &["companyName"])
                        .or_else(|| json_str(item, &["company"])),
                    start: date_parts(item.get("start")),
                    end: date_parts(item.get("end")),
                    description: json_str(item, &["description"]),
                    location: json_str(item, &["location"]),
                })
                .collect()
        });

        let skills = json_array(root, &["skills"]).map(|items| {
            items
                .iter()
                .map(|item| match item {
                    JsonValue::String(name) => ExternalSkill {
                        name: text_or_none(name),
                        ..Default::default()
                    },
                    _ => ExternalSkill {
                        name: json_str(item, &["name"]),
                        passed_skill_assessment: item
                            .get("passedSkillAssessment")
                            .and_then(JsonValue::as_bool),
                        endorsements_count: json_u32(item.get("endorsementsCount")),
                    },
                })
                .collect()
        });

        let educations = json_array(root, &["educations", "education"]).map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| ExternalEducation {
                    school_name: json_str(item, &["schoolName"])
                        .or_else(|| json_str(item, &["school"])),
                    degree: json_str(item, &["degree"]),
                    field_of_study: json_str(item, &["fieldOfStudy"]),
                    start: date_parts(item.get("start")),
                    end: date_parts(item.get("end")),
                })
                .collect()
        });

        Self {
            username: json_str(root, &["username"]),
            first_name: json_str(root, &["firstName"]),
            last_name: json_str(root, &["lastName"]),
            headline: json_str(root, &["headline"]),
            summary: json_str(root, &["summary"]),
            geo,
            profile_picture: json_str(root, &["profilePicture"]),
            positions,
            skills,
            educations,
        }
    }

    pub fn position_count(&self) -> usize {
        self.positions.as_ref().map_or(0, Vec::len)
    }

    pub fn skill_count(&self) -> usize {
        self.skills.as_ref().map_or(0, Vec::len)
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn json_str(value: &JsonValue, path: &[&str]) -> Option<String> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str().and_then(text_or_none)
}

fn json_array<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a Vec<JsonValue>> {
    keys.iter().find_map(|key| value.get(*key).and_then(JsonValue::as_array))
}

fn json_u32(value: Option<&JsonValue>) -> Option<u32> {
    match value? {
        JsonValue::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn date_parts(value: Option<&JsonValue>) -> Option<DateParts> {
    let value = value?;
    let component = |key: &str| json_u32(value.get(key)).filter(|v| *v > 0);
    let parts = DateParts {
        year: component("year").and_then(|y| i32::try_from(y).ok()),
        month: component("month"),
        day: component("day"),
    };
    (parts != DateParts::default()).then_some(parts)
}

/// Normalized cache/fixture key for a subject URL: the segment after `/in/`, else the
/// last non-empty path segment.
///
/// The segment is percent-decoded and lowercased. Slugs that are already `[a-z0-9_-]`
/// (no leading or trailing `-`) are used as-is; anything else is sanitised and gets a
/// `.`-separated hash of the decoded segment, so distinct subjects never share a key.
pub fn extract_subject_key(subject_url: &str) -> String {
    let without_fragment = subject_url.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let path = match without_query.find("://") {
        Some(idx) => {
            let rest = &without_query[idx + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => without_query,
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.trim().is_empty()).collect();
    let raw = match segments.iter().position(|s| *s == "in") {
        Some(idx) => segments.get(idx + 1).copied().unwrap_or_default(),
        None => segments.last().copied().unwrap_or_default(),
    };

    let decoded = percent_decode(raw.trim()).to_lowercase();
    if decoded.is_empty() {
        return "unknown".to_string();
    }

    let sanitised = decoded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect::<String>();
    let sanitised = sanitised.trim_matches('-');
    if sanitised == decoded {
        return decoded;
    }

    let digest = hex::encode(Sha256::digest(decoded.as_bytes()));
    let stem = if sanitised.is_empty() { "unknown" } else { sanitised };
    format!("{stem}.{}", &digest[..12])
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| bytes.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillType {
    Technical,
    Soft,
}

impl SkillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Soft => "soft",
        }
    }

    /// Unknown values from storage fall back to `Technical`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "soft" => Self::Soft,
            _ => Self::Technical,
        }
    }
}

/// Canonical skill row owned by the skills repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    pub skill_type: SkillType,
    pub is_active: bool,
}

/// Reconciled skill mention. `needs_creation` is true exactly when `resolved_id` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCandidate {
    pub name: String,
    pub resolved_id: Option<Uuid>,
    pub is_core: bool,
    pub endorsements_count: u32,
    pub needs_creation: bool,
}

impl SkillCandidate {
    pub fn new(name: impl Into<String>, resolved_id: Option<Uuid>, is_core: bool, endorsements_count: u32) -> Self {
        Self {
            name: name.into(),
            needs_creation: resolved_id.is_none(),
            resolved_id,
            is_core,
            endorsements_count,
        }
    }

    pub fn resolve(&mut self, id: Uuid) {
        self.resolved_id = Some(id);
        self.needs_creation = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Developer,
    Cyber,
    Designer,
    ProjectManager,
    ProductOwner,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Cyber => "cyber",
            Self::Designer => "designer",
            Self::ProjectManager => "project_manager",
            Self::ProductOwner => "product_owner",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationEntry {
    pub degree: String,
    pub institution: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkHistoryEntry {
    pub job_title: String,
    pub company: String,
    pub start_year: i32,
    pub end_year: Option<i32>,
    pub description: Vec<String>,
    pub display_order: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl WorkingDay {
    pub const ALL: [WorkingDay; 5] = [
        WorkingDay::Monday,
        WorkingDay::Tuesday,
        WorkingDay::Wednesday,
        WorkingDay::Thursday,
        WorkingDay::Friday,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    pub working_hours_detail: BTreeMap<WorkingDay, WorkingHours>,
    pub timezone: String,
    pub min_hours_per_week: u32,
    pub max_hours_per_week: u32,
    pub min_hourly_rate: u32,
    pub max_hourly_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub language: String,
    pub proficiency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationEntry {
    pub name: String,
    pub issuer: String,
    pub year: Option<i32>,
}

/// Fully mapped candidate profile handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfileDocument {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub linkedin_url: String,
    pub profile_image: String,
    pub location: String,
    pub bio: String,
    pub job_title: String,
    pub current_company: String,
    pub category: Option<Category>,
    pub education: Vec<EducationEntry>,
    pub verifications: Vec<WorkHistoryEntry>,
    pub availability: Availability,
    pub languages: Vec<LanguageEntry>,
    pub certifications: Vec<CertificationEntry>,
    pub skills: Vec<SkillCandidate>,
}

/// Soft, per-field mapping failure. Folded into a default plus a warning, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingWarning {
    pub field: String,
    pub message: String,
}

impl MappingWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestSource {
    Cache,
    Api,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMetadata {
    pub subject_url: String,
    pub processed_at: DateTime<Utc>,
    pub total_positions: usize,
    pub total_skills: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub success: bool,
    pub source: IngestSource,
    pub profile: CandidateProfileDocument,
    pub validation: Validation,
    pub warnings: Vec<MappingWarning>,
    pub metadata: IngestMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSuccess {
    #[serde(skip)]
    pub index: usize,
    pub subject_url: String,
    pub source: IngestSource,
    pub profile: CandidateProfileDocument,
    pub validation: Validation,
    pub warnings: Vec<MappingWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    #[serde(skip)]
    pub index: usize,
    pub subject_url: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Partitioned outcome of a bulk ingestion. Built incrementally, never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub successful: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
    pub summary: BatchSummary,
}

impl BatchResult {
    pub fn push_success(&mut self, success: BatchSuccess) {
        self.successful.push(success);
        self.summary.successful += 1;
        self.summary.total += 1;
    }

    pub fn push_failure(&mut self, index: usize, subject_url: impl Into<String>, error: impl ToString) {
        self.failed.push(BatchFailure {
            index,
            subject_url: subject_url.into(),
            error: error.to_string(),
        });
        self.summary.failed += 1;
        self.summary.total += 1;
    }

    /// Restore input order on both partitions.
    pub fn finish(mut self) -> Self {
        self.successful.sort_by_key(|s| s.index);
        self.failed.sort_by_key(|f| f.index);
        self
    }
}

/// Read/create access to the canonical skills taxonomy.
#[async_trait]
pub trait SkillRepository: Send + Sync {
    /// Case-insensitive exact-name lookup restricted to active skills.
    async fn find_skill_by_name(&self, name: &str) -> anyhow::Result<Option<Skill>>;

    async fn create_skill(&self, name: &str, skill_type: SkillType) -> anyhow::Result<Uuid>;
}

#[async_trait]
pub trait CandidateRepository: Send + Sync {
    async fn insert_candidate_with_relations(
        &self,
        document: &CandidateProfileDocument,
    ) -> anyhow::Result<Uuid>;
}
