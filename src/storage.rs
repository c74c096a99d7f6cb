//! Persistence service over Sled.
//!
//! Each entity lives in its own tree (one "table" per record type) keyed by
//! the big-endian id and stored as JSON. Tenant-scoped operations take the
//! caller's barangay id and treat rows of other barangays as absent, so a
//! cross-tenant read, update or delete looks exactly like a missing row.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, IVec, Transactional, Tree};
use std::marker::PhantomData;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ids::Id;
use crate::models::{
    Barangay, BarangayChanges, BudgetCategory, BudgetCategoryChanges, BudgetItem,
    BudgetItemChanges, BudgetStatus, Dashboard, Feedback, FeedbackChanges, FeedbackReply,
    FeedbackStatus, Filter, NewBarangay, NewBudgetCategory, NewBudgetItem, NewFeedback,
    NewFeedbackReply, NewProject, NewUser, ProfileChanges, Project, ProjectChanges,
    ProjectCounts, ProjectStatus, User,
};

/// Attempts made by a read-modify-write before giving up on a hot row.
const MAX_CAS_ATTEMPTS: usize = 16;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Constraint(String),

    #[error("{0} was modified concurrently, try again")]
    Conflict(&'static str),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<TransactionError<StorageError>> for StorageError {
    fn from(e: TransactionError<StorageError>) -> Self {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StorageError::Sled(e),
        }
    }
}

type TxResult<T> = ConflictableTransactionResult<T, StorageError>;

fn tx_abort<T>(e: impl Into<StorageError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e.into()))
}

fn tx_get<T: Record>(tree: &TransactionalTree, id: Id) -> TxResult<Option<T>> {
    match tree.get(id.to_key())? {
        Some(bytes) => match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => tx_abort(e),
        },
        None => Ok(None),
    }
}

fn tx_insert<T: Record>(tree: &TransactionalTree, record: &T) -> TxResult<()> {
    let bytes = match serde_json::to_vec(record) {
        Ok(bytes) => bytes,
        Err(e) => return tx_abort(e),
    };
    tree.insert(&record.id().to_key()[..], bytes)?;
    Ok(())
}

fn tx_remove(tree: &TransactionalTree, id: Id) -> TxResult<()> {
    tree.remove(&id.to_key()[..])?;
    Ok(())
}

/// Parent to child relations, stored as id sets in the `child_links` tree.
///
/// Every write that adds or removes a child updates its parent's set inside
/// the same transaction, so a parent delete that finds the set empty cannot
/// race a concurrent child insert.
#[derive(Debug, Clone, Copy)]
enum Link {
    CategoryItems,
    ProjectItems,
    ProjectFeedback,
    FeedbackReplies,
}

impl Link {
    fn key(self, parent: Id) -> [u8; 9] {
        let tag = match self {
            Link::CategoryItems => b'c',
            Link::ProjectItems => b'i',
            Link::ProjectFeedback => b'f',
            Link::FeedbackReplies => b'r',
        };
        let mut key = [0u8; 9];
        key[0] = tag;
        key[1..].copy_from_slice(&parent.to_key());
        key
    }

    fn children(self, links: &TransactionalTree, parent: Id) -> TxResult<Vec<Id>> {
        match links.get(self.key(parent))? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(ids) => Ok(ids),
                Err(e) => tx_abort(e),
            },
            None => Ok(vec![]),
        }
    }

    fn store(self, links: &TransactionalTree, parent: Id, children: &[Id]) -> TxResult<()> {
        let key = self.key(parent);
        if children.is_empty() {
            links.remove(&key[..])?;
            return Ok(());
        }
        let bytes = match serde_json::to_vec(children) {
            Ok(bytes) => bytes,
            Err(e) => return tx_abort(e),
        };
        links.insert(&key[..], bytes)?;
        Ok(())
    }

    fn attach(self, links: &TransactionalTree, parent: Id, child: Id) -> TxResult<()> {
        let mut children = self.children(links, parent)?;
        if !children.contains(&child) {
            children.push(child);
        }
        self.store(links, parent, &children)
    }

    fn detach(self, links: &TransactionalTree, parent: Id, child: Id) -> TxResult<()> {
        let mut children = self.children(links, parent)?;
        children.retain(|id| *id != child);
        self.store(links, parent, &children)
    }
}

/// A record type stored in its own tree.
pub trait Record: Serialize + DeserializeOwned {
    const TREE: &'static str;
    const LABEL: &'static str;

    fn id(&self) -> Id;
}

impl Record for User {
    const TREE: &'static str = "users";
    const LABEL: &'static str = "user";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for Barangay {
    const TREE: &'static str = "barangays";
    const LABEL: &'static str = "barangay";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for BudgetCategory {
    const TREE: &'static str = "budget_categories";
    const LABEL: &'static str = "budget category";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for BudgetItem {
    const TREE: &'static str = "budget_items";
    const LABEL: &'static str = "budget item";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for Project {
    const TREE: &'static str = "projects";
    const LABEL: &'static str = "project";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for Feedback {
    const TREE: &'static str = "feedback";
    const LABEL: &'static str = "feedback";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for FeedbackReply {
    const TREE: &'static str = "feedback_replies";
    const LABEL: &'static str = "feedback reply";

    fn id(&self) -> Id {
        self.id
    }
}

/// Limit/offset window over a list, 1-based page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let limit = match limit {
            None | Some(0) => Self::DEFAULT_LIMIT,
            Some(limit) => limit.min(Self::MAX_LIMIT),
        };
        Self {
            page: page.unwrap_or(1).max(1),
            limit,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Typed view over one Sled tree.
pub struct Table<T> {
    tree: Tree,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> Table<T> {
    fn open(db: &Db) -> StorageResult<Self> {
        Ok(Self {
            tree: db.open_tree(T::TREE)?,
            _record: PhantomData,
        })
    }

    fn get(&self, id: Id) -> StorageResult<Option<T>> {
        match self.tree.get(id.to_key())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, record: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.tree.insert(record.id().to_key(), bytes)?;
        Ok(())
    }

    fn scan(&self) -> impl Iterator<Item = StorageResult<T>> + '_ {
        self.tree.iter().map(|item| -> StorageResult<T> {
            let (_, value) = item?;
            Ok(serde_json::from_slice(&value)?)
        })
    }

    fn find(&self, mut keep: impl FnMut(&T) -> bool) -> StorageResult<Vec<T>> {
        let mut found = vec![];
        for record in self.scan() {
            let record = record?;
            if keep(&record) {
                found.push(record);
            }
        }
        Ok(found)
    }

    fn page(&self, mut keep: impl FnMut(&T) -> bool, window: Pagination) -> StorageResult<Vec<T>> {
        let mut matched = 0usize;
        let mut rows = vec![];
        for record in self.scan() {
            let record = record?;
            if !keep(&record) {
                continue;
            }
            if matched >= window.offset() {
                rows.push(record);
                if rows.len() >= window.limit as usize {
                    break;
                }
            }
            matched += 1;
        }
        Ok(rows)
    }

    fn count(&self, mut keep: impl FnMut(&T) -> bool) -> StorageResult<u64> {
        let mut total = 0;
        for record in self.scan() {
            if keep(&record?) {
                total += 1;
            }
        }
        Ok(total)
    }

    /// Read-modify-write. `apply` sees the current row and may reject it (for
    /// instance when it belongs to another tenant); the write only lands if the
    /// row is unchanged since it was read.
    fn modify(
        &self,
        id: Id,
        mut apply: impl FnMut(&mut T) -> StorageResult<()>,
    ) -> StorageResult<T> {
        let key = id.to_key();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.tree.get(key)?.ok_or(StorageError::NotFound(T::LABEL))?;
            let mut record: T = serde_json::from_slice(&current)?;
            apply(&mut record)?;
            let updated = serde_json::to_vec(&record)?;
            match self.tree.compare_and_swap(key, Some(current), Some(updated))? {
                Ok(()) => return Ok(record),
                Err(_) => debug!(table = T::TREE, %id, "row changed during update, retrying"),
            }
        }
        Err(StorageError::Conflict(T::LABEL))
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}

fn set_text(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.trim().to_string();
    }
}

fn set_optional_text(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        *target = (!value.is_empty()).then(|| value.to_string());
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone)]
pub struct Storage {
    db: Db,
    users: Table<User>,
    // normalized email -> user id key
    user_emails: Tree,
    barangays: Table<Barangay>,
    categories: Table<BudgetCategory>,
    items: Table<BudgetItem>,
    projects: Table<Project>,
    feedback: Table<Feedback>,
    replies: Table<FeedbackReply>,
    links: Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path and its trees.
    pub fn open(path: &str) -> StorageResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database, removed on drop.
    pub fn temporary() -> StorageResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Ok(Self {
            users: Table::open(&db)?,
            user_emails: db.open_tree("user_emails")?,
            barangays: Table::open(&db)?,
            categories: Table::open(&db)?,
            items: Table::open(&db)?,
            projects: Table::open(&db)?,
            feedback: Table::open(&db)?,
            replies: Table::open(&db)?,
            links: db.open_tree("child_links")?,
            db,
        })
    }

    pub(crate) fn open_tree(&self, name: &str) -> StorageResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    pub fn flush(&self) -> StorageResult<usize> {
        Ok(self.db.flush()?)
    }

    fn next_id(&self) -> StorageResult<Id> {
        // generate_id starts at 0; ids are positive.
        let raw = self.db.generate_id()? + 1;
        Id::new(raw).ok_or_else(|| StorageError::Constraint("id space exhausted".to_string()))
    }

    /// Total rows across the entity tables.
    pub fn row_count(&self) -> usize {
        self.users.len()
            + self.barangays.len()
            + self.categories.len()
            + self.items.len()
            + self.projects.len()
            + self.feedback.len()
            + self.replies.len()
    }

    // --- Users ---

    pub fn create_user(&self, new: NewUser) -> StorageResult<User> {
        let email = normalize_email(&new.email);
        let id = self.next_id()?;
        let claimed = self.user_emails.compare_and_swap(
            email.as_bytes(),
            None::<IVec>,
            Some(&id.to_key()[..]),
        )?;
        if claimed.is_err() {
            return Err(StorageError::Duplicate(format!("email {email} is already registered")));
        }

        let user = User {
            id,
            email,
            password_hash: new.password_hash,
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            role: new.role,
            contact_number: new.contact_number,
            barangay_id: new.barangay_id,
            created_at: Utc::now(),
        };
        if let Err(e) = self.users.insert(&user) {
            // release the email so the caller can retry
            if let Err(cleanup) = self.user_emails.remove(user.email.as_bytes()) {
                warn!(error = %cleanup, "failed to release email index after insert error");
            }
            return Err(e);
        }
        Ok(user)
    }

    pub fn get_user(&self, id: Id) -> StorageResult<Option<User>> {
        self.users.get(id)
    }

    pub fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let Some(key) = self.user_emails.get(normalize_email(email).as_bytes())? else {
            return Ok(None);
        };
        let raw: [u8; 8] = key
            .as_ref()
            .try_into()
            .map_err(|_| StorageError::Constraint("corrupt email index entry".to_string()))?;
        match Id::new(u64::from_be_bytes(raw)) {
            Some(id) => self.users.get(id),
            None => Ok(None),
        }
    }

    pub fn update_profile(&self, id: Id, changes: &ProfileChanges) -> StorageResult<User> {
        self.users.modify(id, |user| {
            set_text(&mut user.first_name, &changes.first_name);
            set_text(&mut user.last_name, &changes.last_name);
            set_optional_text(&mut user.contact_number, &changes.contact_number);
            Ok(())
        })
    }

    pub fn set_password_hash(&self, id: Id, password_hash: &str) -> StorageResult<User> {
        self.users.modify(id, |user| {
            user.password_hash = password_hash.to_string();
            Ok(())
        })
    }

    // --- Barangays (directory is public, no tenant scope) ---

    pub fn create_barangay(&self, new: &NewBarangay) -> StorageResult<Barangay> {
        let barangay = Barangay {
            id: self.next_id()?,
            name: new.name.trim().to_string(),
            city: new.city.trim().to_string(),
            region: new.region.trim().to_string(),
            created_at: Utc::now(),
        };
        self.barangays.insert(&barangay)?;
        Ok(barangay)
    }

    pub fn get_barangay(&self, id: Id) -> StorageResult<Option<Barangay>> {
        self.barangays.get(id)
    }

    pub fn list_barangays(&self, window: Pagination) -> StorageResult<Vec<Barangay>> {
        self.barangays.page(|_| true, window)
    }

    pub fn count_barangays(&self) -> StorageResult<u64> {
        Ok(self.barangays.len() as u64)
    }

    pub fn update_barangay(&self, id: Id, changes: &BarangayChanges) -> StorageResult<Barangay> {
        self.barangays.modify(id, |barangay| {
            set_text(&mut barangay.name, &changes.name);
            set_text(&mut barangay.city, &changes.city);
            set_text(&mut barangay.region, &changes.region);
            Ok(())
        })
    }

    pub fn dashboard(&self, barangay_id: Id) -> StorageResult<Dashboard> {
        let barangay = self
            .barangays
            .get(barangay_id)?
            .ok_or(StorageError::NotFound(Barangay::LABEL))?;

        let mut counts = ProjectCounts::default();
        let mut total_project_budget = 0.0;
        for project in self.projects.find(|p| p.barangay_id == barangay_id)? {
            match project.status {
                ProjectStatus::Planned => counts.planned += 1,
                ProjectStatus::Ongoing => counts.ongoing += 1,
                ProjectStatus::Completed => counts.completed += 1,
            }
            total_project_budget += project.budget;
        }

        let total_approved_allocation = self
            .categories
            .find(|c| c.barangay_id == barangay_id && c.status == BudgetStatus::Approved)?
            .iter()
            .map(|c| c.allocated_amount)
            .sum();

        Ok(Dashboard {
            barangay,
            projects: counts,
            total_project_budget,
            total_approved_allocation,
        })
    }

    // --- Budget categories (scoped directly by barangay) ---

    pub fn create_category(
        &self,
        barangay_id: Id,
        new: &NewBudgetCategory,
    ) -> StorageResult<BudgetCategory> {
        let now = Utc::now();
        let category = BudgetCategory {
            id: self.next_id()?,
            barangay_id,
            name: new.name.trim().to_string(),
            description: new.description.clone(),
            allocated_amount: new.allocated_amount,
            fiscal_year: new.fiscal_year,
            status: BudgetStatus::default(),
            created_at: now,
            updated_at: now,
        };
        self.categories.insert(&category)?;
        Ok(category)
    }

    pub fn get_category(&self, barangay_id: Id, id: Id) -> StorageResult<BudgetCategory> {
        self.categories
            .get(id)?
            .filter(|c| c.barangay_id == barangay_id)
            .ok_or(StorageError::NotFound(BudgetCategory::LABEL))
    }

    pub fn list_categories(
        &self,
        barangay_id: Id,
        filter: Filter<BudgetStatus>,
        window: Pagination,
    ) -> StorageResult<Vec<BudgetCategory>> {
        self.categories
            .page(|c| c.barangay_id == barangay_id && filter.matches(c.status), window)
    }

    pub fn count_categories(
        &self,
        barangay_id: Id,
        filter: Filter<BudgetStatus>,
    ) -> StorageResult<u64> {
        self.categories
            .count(|c| c.barangay_id == barangay_id && filter.matches(c.status))
    }

    pub fn update_category(
        &self,
        barangay_id: Id,
        id: Id,
        changes: &BudgetCategoryChanges,
    ) -> StorageResult<BudgetCategory> {
        self.categories.modify(id, |category| {
            if category.barangay_id != barangay_id {
                return Err(StorageError::NotFound(BudgetCategory::LABEL));
            }
            set_text(&mut category.name, &changes.name);
            set_optional_text(&mut category.description, &changes.description);
            if let Some(amount) = changes.allocated_amount {
                category.allocated_amount = amount;
            }
            if let Some(year) = changes.fiscal_year {
                category.fiscal_year = year;
            }
            category.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn set_category_status(
        &self,
        barangay_id: Id,
        id: Id,
        status: BudgetStatus,
    ) -> StorageResult<BudgetCategory> {
        self.categories.modify(id, |category| {
            if category.barangay_id != barangay_id {
                return Err(StorageError::NotFound(BudgetCategory::LABEL));
            }
            category.status = status;
            category.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Returns the number of rows removed. Refused while items still point at
    /// the category.
    pub fn delete_category(&self, barangay_id: Id, id: Id) -> StorageResult<u64> {
        let removed = (&self.categories.tree, &self.links).transaction(|(categories, links)| {
            let in_scope = tx_get::<BudgetCategory>(categories, id)?
                .is_some_and(|c| c.barangay_id == barangay_id);
            if !in_scope {
                return Ok(0);
            }
            if !Link::CategoryItems.children(links, id)?.is_empty() {
                return tx_abort(StorageError::Constraint(
                    "budget category still has budget items".to_string(),
                ));
            }
            tx_remove(categories, id)?;
            Ok(1)
        })?;
        Ok(removed)
    }

    // --- Projects (scoped directly by barangay) ---

    pub fn create_project(&self, barangay_id: Id, new: &NewProject) -> StorageResult<Project> {
        let now = Utc::now();
        let project = Project {
            id: self.next_id()?,
            barangay_id,
            title: new.title.trim().to_string(),
            description: new.description.clone(),
            budget: new.budget,
            location: new.location.clone(),
            start_date: new.start_date,
            end_date: new.end_date,
            status: ProjectStatus::default(),
            created_at: now,
            updated_at: now,
        };
        self.projects.insert(&project)?;
        Ok(project)
    }

    pub fn get_project(&self, barangay_id: Id, id: Id) -> StorageResult<Project> {
        self.projects
            .get(id)?
            .filter(|p| p.barangay_id == barangay_id)
            .ok_or(StorageError::NotFound(Project::LABEL))
    }

    pub fn list_projects(
        &self,
        barangay_id: Id,
        filter: Filter<ProjectStatus>,
        window: Pagination,
    ) -> StorageResult<Vec<Project>> {
        self.projects
            .page(|p| p.barangay_id == barangay_id && filter.matches(p.status), window)
    }

    pub fn count_projects(&self, barangay_id: Id, filter: Filter<ProjectStatus>) -> StorageResult<u64> {
        self.projects
            .count(|p| p.barangay_id == barangay_id && filter.matches(p.status))
    }

    pub fn update_project(
        &self,
        barangay_id: Id,
        id: Id,
        changes: &ProjectChanges,
    ) -> StorageResult<Project> {
        self.projects.modify(id, |project| {
            if project.barangay_id != barangay_id {
                return Err(StorageError::NotFound(Project::LABEL));
            }
            set_text(&mut project.title, &changes.title);
            set_optional_text(&mut project.description, &changes.description);
            set_optional_text(&mut project.location, &changes.location);
            if let Some(budget) = changes.budget {
                project.budget = budget;
            }
            if changes.start_date.is_some() {
                project.start_date = changes.start_date;
            }
            if changes.end_date.is_some() {
                project.end_date = changes.end_date;
            }
            if let (Some(start), Some(end)) = (project.start_date, project.end_date) {
                if end < start {
                    return Err(StorageError::Constraint(
                        "end_date must not be before start_date".to_string(),
                    ));
                }
            }
            project.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn set_project_status(
        &self,
        barangay_id: Id,
        id: Id,
        status: ProjectStatus,
    ) -> StorageResult<Project> {
        self.projects.modify(id, |project| {
            if project.barangay_id != barangay_id {
                return Err(StorageError::NotFound(Project::LABEL));
            }
            project.status = status;
            project.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn delete_project(&self, barangay_id: Id, id: Id) -> StorageResult<u64> {
        let removed = (&self.projects.tree, &self.links).transaction(|(projects, links)| {
            let in_scope =
                tx_get::<Project>(projects, id)?.is_some_and(|p| p.barangay_id == barangay_id);
            if !in_scope {
                return Ok(0);
            }
            if !Link::ProjectItems.children(links, id)?.is_empty() {
                return tx_abort(StorageError::Constraint(
                    "project still has budget items".to_string(),
                ));
            }
            if !Link::ProjectFeedback.children(links, id)?.is_empty() {
                return tx_abort(StorageError::Constraint("project still has feedback".to_string()));
            }
            tx_remove(projects, id)?;
            Ok(1)
        })?;
        Ok(removed)
    }

    // --- Budget items (scoped through their project) ---

    pub fn create_item(&self, barangay_id: Id, new: &NewBudgetItem) -> StorageResult<BudgetItem> {
        let now = Utc::now();
        let item = BudgetItem {
            id: self.next_id()?,
            project_id: new.project_id,
            category_id: new.category_id,
            name: new.name.trim().to_string(),
            description: new.description.clone(),
            amount: new.amount,
            status: BudgetStatus::default(),
            created_at: now,
            updated_at: now,
        };
        (
            &self.projects.tree,
            &self.categories.tree,
            &self.items.tree,
            &self.links,
        )
            .transaction(|(projects, categories, items, links)| {
                if !tx_get::<Project>(projects, item.project_id)?
                    .is_some_and(|p| p.barangay_id == barangay_id)
                {
                    return tx_abort(StorageError::NotFound(Project::LABEL));
                }
                if !tx_get::<BudgetCategory>(categories, item.category_id)?
                    .is_some_and(|c| c.barangay_id == barangay_id)
                {
                    return tx_abort(StorageError::NotFound(BudgetCategory::LABEL));
                }
                tx_insert(items, &item)?;
                Link::ProjectItems.attach(links, item.project_id, item.id)?;
                Link::CategoryItems.attach(links, item.category_id, item.id)?;
                Ok(())
            })?;
        Ok(item)
    }

    fn item_in_scope(&self, barangay_id: Id, item: &BudgetItem) -> StorageResult<bool> {
        Ok(self
            .projects
            .get(item.project_id)?
            .is_some_and(|p| p.barangay_id == barangay_id))
    }

    pub fn get_item(&self, barangay_id: Id, id: Id) -> StorageResult<BudgetItem> {
        let item = self
            .items
            .get(id)?
            .ok_or(StorageError::NotFound(BudgetItem::LABEL))?;
        if !self.item_in_scope(barangay_id, &item)? {
            return Err(StorageError::NotFound(BudgetItem::LABEL));
        }
        Ok(item)
    }

    pub fn list_items(
        &self,
        barangay_id: Id,
        project_id: Id,
        filter: Filter<BudgetStatus>,
        window: Pagination,
    ) -> StorageResult<Vec<BudgetItem>> {
        self.get_project(barangay_id, project_id)?;
        self.items
            .page(|i| i.project_id == project_id && filter.matches(i.status), window)
    }

    pub fn count_items(
        &self,
        barangay_id: Id,
        project_id: Id,
        filter: Filter<BudgetStatus>,
    ) -> StorageResult<u64> {
        self.get_project(barangay_id, project_id)?;
        self.items
            .count(|i| i.project_id == project_id && filter.matches(i.status))
    }

    /// Moving an item to another category re-links it in the same transaction.
    pub fn update_item(
        &self,
        barangay_id: Id,
        id: Id,
        changes: &BudgetItemChanges,
    ) -> StorageResult<BudgetItem> {
        let item = (
            &self.projects.tree,
            &self.categories.tree,
            &self.items.tree,
            &self.links,
        )
            .transaction(|(projects, categories, items, links)| {
                let Some(mut item) = tx_get::<BudgetItem>(items, id)? else {
                    return tx_abort(StorageError::NotFound(BudgetItem::LABEL));
                };
                if !tx_get::<Project>(projects, item.project_id)?
                    .is_some_and(|p| p.barangay_id == barangay_id)
                {
                    return tx_abort(StorageError::NotFound(BudgetItem::LABEL));
                }
                if let Some(category_id) = changes.category_id {
                    if !tx_get::<BudgetCategory>(categories, category_id)?
                        .is_some_and(|c| c.barangay_id == barangay_id)
                    {
                        return tx_abort(StorageError::NotFound(BudgetCategory::LABEL));
                    }
                    if category_id != item.category_id {
                        Link::CategoryItems.detach(links, item.category_id, id)?;
                        Link::CategoryItems.attach(links, category_id, id)?;
                        item.category_id = category_id;
                    }
                }
                set_text(&mut item.name, &changes.name);
                set_optional_text(&mut item.description, &changes.description);
                if let Some(amount) = changes.amount {
                    item.amount = amount;
                }
                item.updated_at = Utc::now();
                tx_insert(items, &item)?;
                Ok(item)
            })?;
        Ok(item)
    }

    pub fn set_item_status(
        &self,
        barangay_id: Id,
        id: Id,
        status: BudgetStatus,
    ) -> StorageResult<BudgetItem> {
        self.get_item(barangay_id, id)?;
        self.items.modify(id, |item| {
            item.status = status;
            item.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn delete_item(&self, barangay_id: Id, id: Id) -> StorageResult<u64> {
        let removed = (&self.projects.tree, &self.items.tree, &self.links).transaction(
            |(projects, items, links)| {
                let Some(item) = tx_get::<BudgetItem>(items, id)? else {
                    return Ok(0);
                };
                if !tx_get::<Project>(projects, item.project_id)?
                    .is_some_and(|p| p.barangay_id == barangay_id)
                {
                    return Ok(0);
                }
                tx_remove(items, id)?;
                Link::ProjectItems.detach(links, item.project_id, id)?;
                Link::CategoryItems.detach(links, item.category_id, id)?;
                Ok(1)
            },
        )?;
        Ok(removed)
    }

    // --- Feedback (barangay copied from the project at creation) ---

    pub fn create_feedback(
        &self,
        barangay_id: Id,
        user_id: Id,
        new: &NewFeedback,
    ) -> StorageResult<Feedback> {
        let now = Utc::now();
        let feedback = Feedback {
            id: self.next_id()?,
            project_id: new.project_id,
            barangay_id,
            user_id,
            subject: new.subject.trim().to_string(),
            content: new.content.trim().to_string(),
            rating: new.rating,
            status: FeedbackStatus::default(),
            created_at: now,
            updated_at: now,
        };
        (&self.projects.tree, &self.feedback.tree, &self.links).transaction(
            |(projects, rows, links)| {
                if !tx_get::<Project>(projects, feedback.project_id)?
                    .is_some_and(|p| p.barangay_id == barangay_id)
                {
                    return tx_abort(StorageError::NotFound(Project::LABEL));
                }
                tx_insert(rows, &feedback)?;
                Link::ProjectFeedback.attach(links, feedback.project_id, feedback.id)?;
                Ok(())
            },
        )?;
        Ok(feedback)
    }

    pub fn get_feedback(&self, barangay_id: Id, id: Id) -> StorageResult<Feedback> {
        self.feedback
            .get(id)?
            .filter(|f| f.barangay_id == barangay_id)
            .ok_or(StorageError::NotFound(Feedback::LABEL))
    }

    pub fn list_feedback(
        &self,
        barangay_id: Id,
        project_id: Id,
        filter: Filter<FeedbackStatus>,
        window: Pagination,
    ) -> StorageResult<Vec<Feedback>> {
        self.get_project(barangay_id, project_id)?;
        self.feedback
            .page(|f| f.project_id == project_id && filter.matches(f.status), window)
    }

    pub fn count_feedback(
        &self,
        barangay_id: Id,
        project_id: Id,
        filter: Filter<FeedbackStatus>,
    ) -> StorageResult<u64> {
        self.get_project(barangay_id, project_id)?;
        self.feedback
            .count(|f| f.project_id == project_id && filter.matches(f.status))
    }

    /// Author edits; rating is only replaced when given.
    pub fn update_feedback(
        &self,
        barangay_id: Id,
        id: Id,
        changes: &FeedbackChanges,
    ) -> StorageResult<Feedback> {
        self.feedback.modify(id, |feedback| {
            if feedback.barangay_id != barangay_id {
                return Err(StorageError::NotFound(Feedback::LABEL));
            }
            set_text(&mut feedback.subject, &changes.subject);
            set_text(&mut feedback.content, &changes.content);
            if changes.rating.is_some() {
                feedback.rating = changes.rating;
            }
            feedback.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn set_feedback_status(
        &self,
        barangay_id: Id,
        id: Id,
        status: FeedbackStatus,
    ) -> StorageResult<Feedback> {
        self.feedback.modify(id, |feedback| {
            if feedback.barangay_id != barangay_id {
                return Err(StorageError::NotFound(Feedback::LABEL));
            }
            feedback.status = status;
            feedback.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Deletes the feedback and its replies in one transaction. Returns
    /// feedback rows removed.
    pub fn delete_feedback(&self, barangay_id: Id, id: Id) -> StorageResult<u64> {
        let removed = (&self.feedback.tree, &self.replies.tree, &self.links).transaction(
            |(rows, replies, links)| {
                let Some(feedback) = tx_get::<Feedback>(rows, id)? else {
                    return Ok(0);
                };
                if feedback.barangay_id != barangay_id {
                    return Ok(0);
                }
                let children = Link::FeedbackReplies.children(links, id)?;
                for reply_id in &children {
                    tx_remove(replies, *reply_id)?;
                }
                Link::FeedbackReplies.store(links, id, &[])?;
                tx_remove(rows, id)?;
                Link::ProjectFeedback.detach(links, feedback.project_id, id)?;
                Ok(1)
            },
        )?;
        if removed == 1 {
            debug!(feedback_id = %id, "feedback deleted with its replies");
        }
        Ok(removed)
    }

    // --- Feedback replies (scoped through their feedback) ---

    pub fn create_reply(
        &self,
        barangay_id: Id,
        user_id: Id,
        new: &NewFeedbackReply,
    ) -> StorageResult<FeedbackReply> {
        let now = Utc::now();
        let reply = FeedbackReply {
            id: self.next_id()?,
            feedback_id: new.feedback_id,
            user_id,
            content: new.content.trim().to_string(),
            created_at: now,
            updated_at: now,
        };
        (&self.feedback.tree, &self.replies.tree, &self.links).transaction(
            |(feedback, replies, links)| {
                if !tx_get::<Feedback>(feedback, reply.feedback_id)?
                    .is_some_and(|f| f.barangay_id == barangay_id)
                {
                    return tx_abort(StorageError::NotFound(Feedback::LABEL));
                }
                tx_insert(replies, &reply)?;
                Link::FeedbackReplies.attach(links, reply.feedback_id, reply.id)?;
                Ok(())
            },
        )?;
        Ok(reply)
    }

    fn reply_in_scope(&self, barangay_id: Id, reply: &FeedbackReply) -> StorageResult<bool> {
        Ok(self
            .feedback
            .get(reply.feedback_id)?
            .is_some_and(|f| f.barangay_id == barangay_id))
    }

    pub fn get_reply(&self, barangay_id: Id, id: Id) -> StorageResult<FeedbackReply> {
        let reply = self
            .replies
            .get(id)?
            .ok_or(StorageError::NotFound(FeedbackReply::LABEL))?;
        if !self.reply_in_scope(barangay_id, &reply)? {
            return Err(StorageError::NotFound(FeedbackReply::LABEL));
        }
        Ok(reply)
    }

    pub fn list_replies(
        &self,
        barangay_id: Id,
        feedback_id: Id,
        window: Pagination,
    ) -> StorageResult<Vec<FeedbackReply>> {
        self.get_feedback(barangay_id, feedback_id)?;
        self.replies.page(|r| r.feedback_id == feedback_id, window)
    }

    pub fn count_replies(&self, barangay_id: Id, feedback_id: Id) -> StorageResult<u64> {
        self.get_feedback(barangay_id, feedback_id)?;
        self.replies.count(|r| r.feedback_id == feedback_id)
    }

    pub fn update_reply(&self, barangay_id: Id, id: Id, content: &str) -> StorageResult<FeedbackReply> {
        self.get_reply(barangay_id, id)?;
        self.replies.modify(id, |reply| {
            reply.content = content.trim().to_string();
            reply.updated_at = Utc::now();
            Ok(())
        })
    }

    pub fn delete_reply(&self, barangay_id: Id, id: Id) -> StorageResult<u64> {
        let removed = (&self.feedback.tree, &self.replies.tree, &self.links).transaction(
            |(feedback, replies, links)| {
                let Some(reply) = tx_get::<FeedbackReply>(replies, id)? else {
                    return Ok(0);
                };
                if !tx_get::<Feedback>(feedback, reply.feedback_id)?
                    .is_some_and(|f| f.barangay_id == barangay_id)
                {
                    return Ok(0);
                }
                tx_remove(replies, id)?;
                Link::FeedbackReplies.detach(links, reply.feedback_id, id)?;
                Ok(1)
            },
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn storage() -> Storage {
        Storage::temporary().expect("temporary storage")
    }

    fn barangay(storage: &Storage, name: &str) -> Barangay {
        storage
            .create_barangay(&NewBarangay {
                name: name.to_string(),
                city: "Quezon City".to_string(),
                region: "NCR".to_string(),
            })
            .expect("create barangay")
    }

    fn project(storage: &Storage, barangay_id: Id, title: &str) -> Project {
        storage
            .create_project(
                barangay_id,
                &NewProject {
                    title: title.to_string(),
                    description: None,
                    budget: 50_000.0,
                    location: None,
                    start_date: None,
                    end_date: None,
                },
            )
            .expect("create project")
    }

    fn category(storage: &Storage, barangay_id: Id) -> BudgetCategory {
        storage
            .create_category(
                barangay_id,
                &NewBudgetCategory {
                    name: "Infrastructure".to_string(),
                    description: None,
                    allocated_amount: 250_000.0,
                    fiscal_year: 2025,
                },
            )
            .expect("create category")
    }

    fn item(storage: &Storage, barangay_id: Id, project_id: Id, category_id: Id, n: usize) -> BudgetItem {
        storage
            .create_item(
                barangay_id,
                &NewBudgetItem {
                    project_id,
                    category_id,
                    name: format!("item {n}"),
                    description: None,
                    amount: 100.0 * n as f64,
                },
            )
            .expect("create item")
    }

    fn new_user(email: &str, barangay_id: Id) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            first_name: "Juan".to_string(),
            last_name: "Dela Cruz".to_string(),
            role: Role::Resident,
            contact_number: None,
            barangay_id,
        }
    }

    #[test]
    fn pagination_defaults_and_offsets() {
        let window = Pagination::new(None, None);
        assert_eq!((window.page, window.limit, window.offset()), (1, 10, 0));

        let window = Pagination::new(Some(3), Some(5));
        assert_eq!(window.offset(), 10);

        let window = Pagination::new(Some(0), Some(1_000));
        assert_eq!((window.page, window.limit), (1, Pagination::MAX_LIMIT));
    }

    #[test]
    fn emails_are_unique_case_insensitively() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");

        let user = storage.create_user(new_user("Ana@Example.com", home.id)).unwrap();
        assert_eq!(user.email, "ana@example.com");

        let err = storage
            .create_user(new_user("ana@example.COM", home.id))
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));

        let found = storage.find_user_by_email(" ANA@example.com ").unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[test]
    fn tenant_scope_hides_other_barangays() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let other = barangay(&storage, "Sto. Niño");
        let theirs = project(&storage, other.id, "Covered court");

        assert!(matches!(
            storage.get_project(home.id, theirs.id),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.set_project_status(home.id, theirs.id, ProjectStatus::Completed),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(storage.delete_project(home.id, theirs.id).unwrap(), 0);

        let untouched = storage.get_project(other.id, theirs.id).unwrap();
        assert_eq!(untouched.status, ProjectStatus::Planned);
    }

    #[test]
    fn deleting_a_category_removes_exactly_one_row() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let kept = category(&storage, home.id);
        let doomed = category(&storage, home.id);

        assert_eq!(storage.delete_category(home.id, doomed.id).unwrap(), 1);
        assert_eq!(storage.delete_category(home.id, doomed.id).unwrap(), 0);
        assert_eq!(storage.count_categories(home.id, Filter::All).unwrap(), 1);
        assert!(storage.get_category(home.id, kept.id).is_ok());
    }

    #[test]
    fn category_with_items_cannot_be_deleted() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let cat = category(&storage, home.id);
        let proj = project(&storage, home.id, "Drainage");
        item(&storage, home.id, proj.id, cat.id, 1);

        assert!(matches!(
            storage.delete_category(home.id, cat.id),
            Err(StorageError::Constraint(_))
        ));
    }

    #[test]
    fn item_pages_are_scoped_to_the_project() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let cat = category(&storage, home.id);
        let drainage = project(&storage, home.id, "Drainage");
        let lights = project(&storage, home.id, "Streetlights");
        for n in 1..=7 {
            item(&storage, home.id, drainage.id, cat.id, n);
        }
        item(&storage, home.id, lights.id, cat.id, 99);

        let first = storage
            .list_items(home.id, drainage.id, Filter::All, Pagination::new(Some(1), Some(5)))
            .unwrap();
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|i| i.project_id == drainage.id));
        assert_eq!(first[0].name, "item 1");

        let second = storage
            .list_items(home.id, drainage.id, Filter::All, Pagination::new(Some(2), Some(5)))
            .unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(storage.count_items(home.id, drainage.id, Filter::All).unwrap(), 7);
    }

    #[test]
    fn items_need_a_category_of_the_same_barangay() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let other = barangay(&storage, "Sto. Niño");
        let foreign = category(&storage, other.id);
        let proj = project(&storage, home.id, "Drainage");

        let err = storage
            .create_item(
                home.id,
                &NewBudgetItem {
                    project_id: proj.id,
                    category_id: foreign.id,
                    name: "pipes".to_string(),
                    description: None,
                    amount: 10.0,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound("budget category")));
    }

    #[test]
    fn status_filter_narrows_lists() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let a = project(&storage, home.id, "A");
        project(&storage, home.id, "B");
        storage
            .set_project_status(home.id, a.id, ProjectStatus::Ongoing)
            .unwrap();

        let ongoing = storage
            .list_projects(home.id, Filter::Only(ProjectStatus::Ongoing), Pagination::default())
            .unwrap();
        assert_eq!(ongoing.len(), 1);
        assert_eq!(ongoing[0].id, a.id);
    }

    #[test]
    fn deleting_feedback_cascades_replies() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let proj = project(&storage, home.id, "Drainage");
        let author = storage.create_user(new_user("ana@example.com", home.id)).unwrap();
        let feedback = storage
            .create_feedback(
                home.id,
                author.id,
                &NewFeedback {
                    project_id: proj.id,
                    subject: "Flooding".to_string(),
                    content: "Still floods".to_string(),
                    rating: Some(2),
                },
            )
            .unwrap();
        let reply = storage
            .create_reply(
                home.id,
                author.id,
                &NewFeedbackReply {
                    feedback_id: feedback.id,
                    content: "Noted".to_string(),
                },
            )
            .unwrap();

        assert_eq!(storage.delete_feedback(home.id, feedback.id).unwrap(), 1);
        assert!(storage.get_reply(home.id, reply.id).is_err());
        assert!(storage.delete_project(home.id, proj.id).is_ok());
    }

    fn feedback(storage: &Storage, barangay_id: Id, user_id: Id, project_id: Id) -> Feedback {
        storage
            .create_feedback(
                barangay_id,
                user_id,
                &NewFeedback {
                    project_id,
                    subject: "Flooding".to_string(),
                    content: "Still floods".to_string(),
                    rating: None,
                },
            )
            .expect("create feedback")
    }

    #[test]
    fn child_links_follow_items_and_feedback() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let old_cat = category(&storage, home.id);
        let new_cat = category(&storage, home.id);
        let proj = project(&storage, home.id, "Drainage");
        let author = storage.create_user(new_user("ana@example.com", home.id)).unwrap();
        let pipes = item(&storage, home.id, proj.id, old_cat.id, 1);

        // moving the item frees the old category
        storage
            .update_item(
                home.id,
                pipes.id,
                &BudgetItemChanges {
                    category_id: Some(new_cat.id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            storage.delete_category(home.id, new_cat.id),
            Err(StorageError::Constraint(_))
        ));
        assert_eq!(storage.delete_category(home.id, old_cat.id).unwrap(), 1);

        let note = feedback(&storage, home.id, author.id, proj.id);
        assert_eq!(storage.delete_item(home.id, pipes.id).unwrap(), 1);
        assert!(matches!(
            storage.delete_project(home.id, proj.id),
            Err(StorageError::Constraint(msg)) if msg.contains("feedback")
        ));

        assert_eq!(storage.delete_feedback(home.id, note.id).unwrap(), 1);
        assert_eq!(storage.delete_category(home.id, new_cat.id).unwrap(), 1);
        assert_eq!(storage.delete_project(home.id, proj.id).unwrap(), 1);
    }

    #[test]
    fn concurrent_item_insert_and_category_delete_stay_consistent() {
        for round in 0..20 {
            let storage = storage();
            let home = barangay(&storage, "San Isidro");
            let cat = category(&storage, home.id);
            let proj = project(&storage, home.id, "Drainage");

            let inserter = {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    storage.create_item(
                        home.id,
                        &NewBudgetItem {
                            project_id: proj.id,
                            category_id: cat.id,
                            name: format!("item {round}"),
                            description: None,
                            amount: 1.0,
                        },
                    )
                })
            };
            let deleted = storage.delete_category(home.id, cat.id);
            let inserted = inserter.join().expect("inserter thread");

            // exactly one side wins; an item never points at a deleted category
            match (inserted, deleted) {
                (Ok(item), Err(StorageError::Constraint(_))) => {
                    assert_eq!(storage.get_item(home.id, item.id).unwrap().category_id, cat.id);
                    assert!(storage.get_category(home.id, cat.id).is_ok());
                }
                (Err(StorageError::NotFound("budget category")), Ok(1)) => {
                    assert_eq!(storage.count_items(home.id, proj.id, Filter::All).unwrap(), 0);
                }
                other => panic!("inconsistent outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn replies_of_other_barangays_are_untouched() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let other = barangay(&storage, "Sto. Niño");
        let proj = project(&storage, other.id, "Covered court");
        let author = storage.create_user(new_user("ana@example.com", other.id)).unwrap();
        let note = feedback(&storage, other.id, author.id, proj.id);
        let reply = storage
            .create_reply(
                other.id,
                author.id,
                &NewFeedbackReply {
                    feedback_id: note.id,
                    content: "Noted".to_string(),
                },
            )
            .unwrap();

        assert_eq!(storage.delete_reply(home.id, reply.id).unwrap(), 0);
        assert_eq!(storage.delete_feedback(home.id, note.id).unwrap(), 0);
        assert_eq!(storage.count_replies(other.id, note.id).unwrap(), 1);

        assert_eq!(storage.delete_reply(other.id, reply.id).unwrap(), 1);
        assert_eq!(storage.delete_feedback(other.id, note.id).unwrap(), 1);
        assert_eq!(storage.delete_project(other.id, proj.id).unwrap(), 1);
    }

    #[test]
    fn dashboard_aggregates_projects_and_approved_budget() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let a = project(&storage, home.id, "A");
        project(&storage, home.id, "B");
        storage
            .set_project_status(home.id, a.id, ProjectStatus::Completed)
            .unwrap();
        let approved = category(&storage, home.id);
        category(&storage, home.id);
        storage
            .set_category_status(home.id, approved.id, BudgetStatus::Approved)
            .unwrap();

        let dashboard = storage.dashboard(home.id).unwrap();
        assert_eq!(dashboard.projects.planned, 1);
        assert_eq!(dashboard.projects.completed, 1);
        assert_eq!(dashboard.total_project_budget, 100_000.0);
        assert_eq!(dashboard.total_approved_allocation, 250_000.0);
    }

    #[test]
    fn update_is_read_modify_write() {
        let storage = storage();
        let home = barangay(&storage, "San Isidro");
        let cat = category(&storage, home.id);

        let updated = storage
            .update_category(
                home.id,
                cat.id,
                &BudgetCategoryChanges {
                    allocated_amount: Some(1.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.allocated_amount, 1.0);
        assert_eq!(updated.name, "Infrastructure");
        assert_eq!(updated.fiscal_year, 2025);
    }
}
