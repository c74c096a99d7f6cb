use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::Id;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Resident,
    Admin,
}

/// Status enumerations that can be used as a list filter (`?filter=...`).
pub trait Status: Copy + PartialEq + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;

    fn parse_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

/// `All` or a single status; parsed from the `filter` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter<S> {
    All,
    Only(S),
}

impl<S: Status> Filter<S> {
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Filter::All),
            Some(name) if name.eq_ignore_ascii_case("all") => Ok(Filter::All),
            Some(name) => S::parse_name(name).map(Filter::Only).ok_or_else(|| {
                let names: Vec<&str> = S::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown filter `{name}`, expected All or one of {}", names.join(", "))
            }),
        }
    }

    pub fn matches(self, status: S) -> bool {
        match self {
            Filter::All => true,
            Filter::Only(wanted) => wanted == status,
        }
    }
}

/// Approval state of budget categories and budget items.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl Status for BudgetStatus {
    const ALL: &'static [Self] = &[Self::Pending, Self::Approved, Self::Rejected];

    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planned,
    Ongoing,
    Completed,
}

impl Status for ProjectStatus {
    const ALL: &'static [Self] = &[Self::Planned, Self::Ongoing, Self::Completed];

    fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    #[default]
    Pending,
    Reviewed,
    Resolved,
}

impl Status for FeedbackStatus {
    const ALL: &'static [Self] = &[Self::Pending, Self::Reviewed, Self::Resolved];

    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Resolved => "resolved",
        }
    }
}

// --- Stored records ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub contact_number: Option<String>,
    pub barangay_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Barangay {
    pub id: Id,
    pub name: String,
    pub city: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BudgetCategory {
    pub id: Id,
    pub barangay_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub allocated_amount: f64,
    pub fiscal_year: i32,
    pub status: BudgetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Project {
    pub id: Id,
    pub barangay_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub budget: f64,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line of a project's budget; tenant is inherited from `project_id`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BudgetItem {
    pub id: Id,
    pub project_id: Id,
    pub category_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub amount: f64,
    pub status: BudgetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Feedback {
    pub id: Id,
    pub project_id: Id,
    pub barangay_id: Id,
    pub user_id: Id,
    pub subject: String,
    pub content: String,
    pub rating: Option<u8>,
    pub status: FeedbackStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeedbackReply {
    pub id: Id,
    pub feedback_id: Id,
    pub user_id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a user; never carries the password hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: Id,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub contact_number: Option<String>,
    pub barangay_id: Id,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
            contact_number: user.contact_number.clone(),
            barangay_id: user.barangay_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProjectCounts {
    pub planned: u64,
    pub ongoing: u64,
    pub completed: u64,
}

/// Aggregates shown on the public barangay dashboard.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Dashboard {
    pub barangay: Barangay,
    pub projects: ProjectCounts,
    pub total_project_budget: f64,
    pub total_approved_allocation: f64,
}

// --- Drafts and change sets (request payloads) ---

#[derive(Deserialize, Debug, Clone)]
pub struct NewBarangay {
    pub name: String,
    pub city: String,
    pub region: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BarangayChanges {
    pub name: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

/// User draft with the password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub contact_number: Option<String>,
    pub barangay_id: Id,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub contact_number: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewBudgetCategory {
    pub name: String,
    pub description: Option<String>,
    pub allocated_amount: f64,
    pub fiscal_year: i32,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BudgetCategoryChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub allocated_amount: Option<f64>,
    pub fiscal_year: Option<i32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewProject {
    pub title: String,
    pub description: Option<String>,
    pub budget: f64,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProjectChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub budget: Option<f64>,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewBudgetItem {
    pub project_id: Id,
    pub category_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub amount: f64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BudgetItemChanges {
    pub category_id: Option<Id>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewFeedback {
    pub project_id: Id,
    pub subject: String,
    pub content: String,
    pub rating: Option<u8>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FeedbackChanges {
    pub subject: Option<String>,
    pub content: Option<String>,
    pub rating: Option<u8>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewFeedbackReply {
    pub feedback_id: Id,
    pub content: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct StatusChange<S> {
    pub status: S,
}

// --- Field validation ---

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}

fn require_if_set(field: &str, value: Option<&String>) -> Result<(), String> {
    value.map_or(Ok(()), |v| require(field, v))
}

fn non_negative(field: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{field} must be a non-negative number"));
    }
    Ok(())
}

fn date_order(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), String> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err("end_date must not be before start_date".to_string())
        }
        _ => Ok(()),
    }
}

fn fiscal_year(value: i32) -> Result<(), String> {
    if !(1900..=9999).contains(&value) {
        return Err("fiscal_year must be a four-digit year".to_string());
    }
    Ok(())
}

fn rating(value: Option<u8>) -> Result<(), String> {
    match value {
        Some(rating) if !(1..=5).contains(&rating) => {
            Err("rating must be between 1 and 5".to_string())
        }
        _ => Ok(()),
    }
}

impl NewBarangay {
    pub fn validate(&self) -> Result<(), String> {
        require("name", &self.name)?;
        require("city", &self.city)?;
        require("region", &self.region)
    }
}

impl BarangayChanges {
    pub fn validate(&self) -> Result<(), String> {
        require_if_set("name", self.name.as_ref())?;
        require_if_set("city", self.city.as_ref())?;
        require_if_set("region", self.region.as_ref())
    }
}

impl ProfileChanges {
    pub fn validate(&self) -> Result<(), String> {
        require_if_set("first_name", self.first_name.as_ref())?;
        require_if_set("last_name", self.last_name.as_ref())
    }
}

impl NewBudgetCategory {
    pub fn validate(&self) -> Result<(), String> {
        require("name", &self.name)?;
        non_negative("allocated_amount", self.allocated_amount)?;
        fiscal_year(self.fiscal_year)
    }
}

impl BudgetCategoryChanges {
    pub fn validate(&self) -> Result<(), String> {
        require_if_set("name", self.name.as_ref())?;
        if let Some(amount) = self.allocated_amount {
            non_negative("allocated_amount", amount)?;
        }
        self.fiscal_year.map_or(Ok(()), fiscal_year)
    }
}

impl NewProject {
    pub fn validate(&self) -> Result<(), String> {
        require("title", &self.title)?;
        non_negative("budget", self.budget)?;
        date_order(self.start_date, self.end_date)
    }
}

impl ProjectChanges {
    pub fn validate(&self) -> Result<(), String> {
        require_if_set("title", self.title.as_ref())?;
        if let Some(budget) = self.budget {
            non_negative("budget", budget)?;
        }
        date_order(self.start_date, self.end_date)
    }
}

impl NewBudgetItem {
    pub fn validate(&self) -> Result<(), String> {
        require("name", &self.name)?;
        non_negative("amount", self.amount)
    }
}

impl BudgetItemChanges {
    pub fn validate(&self) -> Result<(), String> {
        require_if_set("name", self.name.as_ref())?;
        self.amount.map_or(Ok(()), |amount| non_negative("amount", amount))
    }
}

impl NewFeedback {
    pub fn validate(&self) -> Result<(), String> {
        require("subject", &self.subject)?;
        require("content", &self.content)?;
        rating(self.rating)
    }
}

impl FeedbackChanges {
    pub fn validate(&self) -> Result<(), String> {
        require_if_set("subject", self.subject.as_ref())?;
        require_if_set("content", self.content.as_ref())?;
        rating(self.rating)
    }
}

impl NewFeedbackReply {
    pub fn validate(&self) -> Result<(), String> {
        require("content", &self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_accepts_all_and_status_names() {
        assert_eq!(Filter::<ProjectStatus>::parse(None), Ok(Filter::All));
        assert_eq!(Filter::<ProjectStatus>::parse(Some("All")), Ok(Filter::All));
        assert_eq!(
            Filter::<ProjectStatus>::parse(Some("Ongoing")),
            Ok(Filter::Only(ProjectStatus::Ongoing))
        );
        assert!(Filter::<BudgetStatus>::parse(Some("ongoing")).is_err());
    }

    #[test]
    fn filter_matches_selected_status_only() {
        let filter = Filter::Only(BudgetStatus::Approved);
        assert!(filter.matches(BudgetStatus::Approved));
        assert!(!filter.matches(BudgetStatus::Pending));
        assert!(Filter::<BudgetStatus>::All.matches(BudgetStatus::Rejected));
    }

    #[test]
    fn project_rejects_inverted_dates() {
        let project = NewProject {
            title: "Drainage".to_string(),
            description: None,
            budget: 1000.0,
            location: None,
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 1),
        };
        assert!(project.validate().is_err());
    }

    #[test]
    fn feedback_rating_is_bounded() {
        let mut feedback = NewFeedback {
            project_id: Id::new(1).unwrap(),
            subject: "Streetlights".to_string(),
            content: "Still dark at night".to_string(),
            rating: Some(6),
        };
        assert!(feedback.validate().is_err());
        feedback.rating = Some(5);
        assert!(feedback.validate().is_ok());
    }

    #[test]
    fn statuses_serialize_in_snake_case() {
        assert_eq!(serde_json::to_string(&ProjectStatus::Ongoing).unwrap(), "\"ongoing\"");
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }
}
