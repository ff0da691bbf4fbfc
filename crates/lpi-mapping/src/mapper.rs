use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Utc};
use lpi_core::{
    Availability, CandidateProfileDocument, Category, CertificationEntry, EducationEntry,
    ExternalEducation, ExternalPosition, ExternalProfile, LanguageEntry, MappingWarning,
    SkillCandidate, WorkHistoryEntry, WorkingDay, WorkingHours,
};
use tracing::warn;

pub const LANGUAGES: [&str; 5] = ["English", "French", "Spanish", "German", "Arabic"];
pub const LANGUAGE_PROFICIENCY: &str = "professional";

pub const DEFAULT_WORK_FROM: &str = "08:00";
pub const DEFAULT_WORK_TO: &str = "18:00";
pub const DEFAULT_TIMEZONE: &str = "+01:00";
pub const DEFAULT_MIN_HOURS_PER_WEEK: u32 = 20;
pub const DEFAULT_MAX_HOURS_PER_WEEK: u32 = 40;
pub const DEFAULT_MIN_HOURLY_RATE: u32 = 50;
pub const DEFAULT_MAX_HOURLY_RATE: u32 = 100;

const EMAIL_PLACEHOLDER_DOMAIN: &str = "linkedin-import.local";
const CERTIFICATION_KEYWORDS: [&str; 3] = ["certified", "certification", "certificate"];
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;
const MIN_AGE: i32 = 14;
const MAX_AGE: i32 = 100;

/// First match wins, in this order.
const CATEGORY_KEYWORDS: [(Category, &[&str]); 5] = [
    (
        Category::Developer,
        &[
            "developer", "engineer", "programmer", "software", "frontend", "backend",
            "full stack", "fullstack", "devops",
        ],
    ),
    (Category::Cyber, &["security", "cyber", "pentest", "soc analyst"]),
    (Category::Designer, &["designer", "ux", "ui/ux", "graphic"]),
    (
        Category::ProjectManager,
        &["project manager", "scrum master", "delivery manager"],
    ),
    (Category::ProductOwner, &["product owner", "product manager"]),
];

pub fn placeholder_date_of_birth() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("placeholder date of birth is a valid date")
}

/// Mapped document plus the per-field fallbacks that were applied.
#[derive(Debug, Clone)]
pub struct MappedProfile {
    pub document: CandidateProfileDocument,
    pub warnings: Vec<MappingWarning>,
}

/// Stateless external-profile → candidate-document transformation.
#[derive(Debug, Clone)]
pub struct ProfileMapper {
    reference_date: Option<NaiveDate>,
}

impl Default for ProfileMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileMapper {
    pub fn new() -> Self {
        Self { reference_date: None }
    }

    /// Pin "today" for age-based birth year inference.
    pub fn with_reference_date(reference_date: NaiveDate) -> Self {
        Self {
            reference_date: Some(reference_date),
        }
    }

    fn today(&self) -> NaiveDate {
        self.reference_date.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Never fails: each fallible sub-mapping degrades to its default independently.
    pub fn map_to_profile(
        &self,
        profile: &ExternalProfile,
        subject_url: &str,
        skills: Vec<SkillCandidate>,
    ) -> MappedProfile {
        let mut warnings = Vec::new();

        let first_name = profile.first_name.clone().unwrap_or_default();
        let last_name = profile.last_name.clone().unwrap_or_default();
        let bio = profile.summary.clone().unwrap_or_default();
        let positions = profile.positions.as_deref().unwrap_or_default();
        let educations = profile.educations.as_deref().unwrap_or_default();

        let job_title = profile
            .headline
            .clone()
            .or_else(|| positions.iter().find_map(|p| p.title.clone()))
            .unwrap_or_default();

        let date_of_birth = or_fallback(
            self.infer_date_of_birth(&bio),
            placeholder_date_of_birth,
            &mut warnings,
        );
        let education = or_fallback(map_education(educations), Vec::new, &mut warnings);
        let verifications = or_fallback(map_work_history(positions), Vec::new, &mut warnings);

        let skill_text = skills
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let category = infer_category(&job_title).or_else(|| infer_category(&skill_text));

        let document = CandidateProfileDocument {
            email: placeholder_email(&first_name, &last_name),
            first_name,
            last_name,
            date_of_birth,
            linkedin_url: subject_url.trim().to_string(),
            profile_image: profile.profile_picture.clone().unwrap_or_default(),
            location: location_of(profile),
            job_title,
            current_company: current_company(positions),
            category,
            education,
            verifications,
            availability: default_availability(),
            languages: infer_languages(&bio),
            certifications: infer_certifications(&bio),
            skills,
            bio,
        };

        MappedProfile { document, warnings }
    }

    /// "born in YYYY" wins over "N years old"; neither yields the placeholder.
    pub fn infer_date_of_birth(&self, bio: &str) -> Result<NaiveDate, MappingWarning> {
        let lower = bio.to_lowercase();

        if let Some(year) = digits_after(&lower, "born in ") {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(MappingWarning::new(
                    "dateOfBirth",
                    format!("birth year {year} out of range"),
                ));
            }
            return first_of_year(year);
        }

        if let Some(age) = digits_before(&lower, " years old") {
            if !(MIN_AGE..=MAX_AGE).contains(&age) {
                return Err(MappingWarning::new(
                    "dateOfBirth",
                    format!("age {age} out of range"),
                ));
            }
            return first_of_year(self.today().year() - age);
        }

        Ok(placeholder_date_of_birth())
    }
}

fn or_fallback<T>(
    result: Result<T, MappingWarning>,
    fallback: impl FnOnce() -> T,
    warnings: &mut Vec<MappingWarning>,
) -> T {
    match result {
        Ok(value) => value,
        Err(warning) => {
            warn!(field = %warning.field, message = %warning.message, "mapping fallback applied");
            warnings.push(warning);
            fallback()
        }
    }
}

fn first_of_year(year: i32) -> Result<NaiveDate, MappingWarning> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| MappingWarning::new("dateOfBirth", format!("invalid year {year}")))
}

/// First occurrence of `marker` that is directly followed by digits.
fn digits_after(text: &str, marker: &str) -> Option<i32> {
    text.match_indices(marker).find_map(|(idx, _)| {
        let digits: String = text[idx + marker.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

/// First occurrence of `marker` that is directly preceded by digits.
fn digits_before(text: &str, marker: &str) -> Option<i32> {
    text.match_indices(marker).find_map(|(idx, _)| {
        let mut digits: Vec<char> = text[..idx]
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.reverse();
        digits.into_iter().collect::<String>().parse().ok()
    })
}

fn check_year(field: &str, year: Option<i32>) -> Result<Option<i32>, MappingWarning> {
    match year {
        Some(y) if !(MIN_YEAR..=MAX_YEAR).contains(&y) => Err(MappingWarning::new(
            field,
            format!("year {y} out of range"),
        )),
        other => Ok(other),
    }
}

fn check_order(field: &str, start: Option<i32>, end: Option<i32>) -> Result<(), MappingWarning> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(MappingWarning::new(
            field,
            format!("end year {e} precedes start year {s}"),
        )),
        _ => Ok(()),
    }
}

pub fn map_education(educations: &[ExternalEducation]) -> Result<Vec<EducationEntry>, MappingWarning> {
    let mut out = Vec::with_capacity(educations.len());
    for edu in educations {
        let start_year = check_year("education", edu.start.and_then(|d| d.year))?;
        let end_year = check_year("education", edu.end.and_then(|d| d.year))?;
        check_order("education", start_year, end_year)?;

        let degree = match (edu.degree.as_deref(), edu.field_of_study.as_deref()) {
            (Some(degree), Some(field)) => format!("{degree} in {field}"),
            (Some(degree), None) => degree.to_string(),
            (None, Some(field)) => field.to_string(),
            (None, None) => String::new(),
        };
        let institution = edu.school_name.clone().unwrap_or_default();
        if degree.is_empty() && institution.is_empty() {
            continue;
        }

        out.push(EducationEntry {
            degree,
            institution,
            start_year,
            end_year,
            location: None,
        });
    }
    Ok(out)
}

pub fn map_work_history(positions: &[ExternalPosition]) -> Result<Vec<WorkHistoryEntry>, MappingWarning> {
    let mut out = Vec::with_capacity(positions.len());
    for position in positions {
        let start = check_year("verifications", position.start.and_then(|d| d.year))?;
        let end_year = check_year("verifications", position.end.and_then(|d| d.year))?;
        check_order("verifications", start, end_year)?;
        let Some(start_year) = start.or(end_year) else {
            continue;
        };

        let description = position
            .description
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '•', '*']).trim())
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect();

        out.push(WorkHistoryEntry {
            job_title: position.title.clone().unwrap_or_default(),
            company: position.company_name.clone().unwrap_or_default(),
            start_year,
            end_year,
            description,
            display_order: out.len() as u32,
        });
    }
    Ok(out)
}

pub fn infer_category(text: &str) -> Option<Category> {
    let lower = text.to_lowercase();
    if lower.trim().is_empty() {
        return None;
    }
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
}

pub fn infer_languages(bio: &str) -> Vec<LanguageEntry> {
    let lower = bio.to_lowercase();
    LANGUAGES
        .iter()
        .filter(|lang| lower.contains(&lang.to_lowercase()))
        .map(|lang| LanguageEntry {
            language: lang.to_string(),
            proficiency: LANGUAGE_PROFICIENCY.to_string(),
        })
        .collect()
}

pub fn infer_certifications(bio: &str) -> Vec<CertificationEntry> {
    let lower = bio.to_lowercase();
    if CERTIFICATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        vec![CertificationEntry {
            name: "Professional Certification".to_string(),
            issuer: "Listed on LinkedIn".to_string(),
            year: None,
        }]
    } else {
        Vec::new()
    }
}

pub fn default_availability() -> Availability {
    let working_hours_detail: BTreeMap<_, _> = WorkingDay::ALL
        .into_iter()
        .map(|day| {
            (
                day,
                WorkingHours {
                    from: DEFAULT_WORK_FROM.to_string(),
                    to: DEFAULT_WORK_TO.to_string(),
                },
            )
        })
        .collect();

    Availability {
        available: true,
        working_hours_detail,
        timezone: DEFAULT_TIMEZONE.to_string(),
        min_hours_per_week: DEFAULT_MIN_HOURS_PER_WEEK,
        max_hours_per_week: DEFAULT_MAX_HOURS_PER_WEEK,
        min_hourly_rate: DEFAULT_MIN_HOURLY_RATE,
        max_hourly_rate: DEFAULT_MAX_HOURLY_RATE,
    }
}

fn placeholder_email(first_name: &str, last_name: &str) -> String {
    let normalize = |s: &str| {
        s.to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
    };
    let (first, last) = (normalize(first_name), normalize(last_name));
    if first.is_empty() || last.is_empty() {
        String::new()
    } else {
        format!("{first}.{last}@{EMAIL_PLACEHOLDER_DOMAIN}")
    }
}

fn location_of(profile: &ExternalProfile) -> String {
    let Some(geo) = &profile.geo else {
        return String::new();
    };
    if let Some(full) = &geo.full {
        return full.clone();
    }
    [geo.city.as_deref(), geo.country.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ")
}

fn current_company(positions: &[ExternalPosition]) -> String {
    positions
        .iter()
        .find(|p| p.end.is_none() && p.company_name.is_some())
        .or_else(|| positions.iter().find(|p| p.company_name.is_some()))
        .and_then(|p| p.company_name.clone())
        .unwrap_or_default()
}
