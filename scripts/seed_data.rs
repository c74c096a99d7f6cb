//! Seed script for the barangay API store
//!
//! Populates a sample barangay with:
//! - an admin (admin@sanisidro.ph) and a resident (resident@sanisidro.ph),
//!   both with password `changeme123`
//! - an approved budget category, a project and a few budget items
//!
//! Run: cargo run --bin seed_data
//! Uses `DATABASE_URL` (default `barangay_data`); stop the server first,
//! Sled allows one process per database.

use barangay_api::auth::hash_password;
use barangay_api::config::Config;
use barangay_api::models::{
    BudgetStatus, NewBarangay, NewBudgetCategory, NewBudgetItem, NewProject, NewUser,
    ProjectStatus, Role,
};
use barangay_api::storage::{Storage, StorageError};
use chrono::NaiveDate;

const PASSWORD: &str = "changeme123";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;
    let storage = Storage::open(&config.database_url)?;

    if storage.find_user_by_email("admin@sanisidro.ph")?.is_some() {
        println!("Store at {} is already seeded", config.database_url);
        return Ok(());
    }

    let barangay = storage.create_barangay(&NewBarangay {
        name: "San Isidro".to_string(),
        city: "Quezon City".to_string(),
        region: "NCR".to_string(),
    })?;

    let password_hash = hash_password(PASSWORD, config.bcrypt_cost)?;
    for (email, role, first_name) in [
        ("admin@sanisidro.ph", Role::Admin, "Kapitan"),
        ("resident@sanisidro.ph", Role::Resident, "Juan"),
    ] {
        match storage.create_user(NewUser {
            email: email.to_string(),
            password_hash: password_hash.clone(),
            first_name: first_name.to_string(),
            last_name: "Dela Cruz".to_string(),
            role,
            contact_number: None,
            barangay_id: barangay.id,
        }) {
            Ok(user) => println!("Created {:?} {} (id {})", user.role, user.email, user.id),
            Err(StorageError::Duplicate(msg)) => println!("Skipping: {msg}"),
            Err(e) => return Err(e.into()),
        }
    }

    let category = storage.create_category(
        barangay.id,
        &NewBudgetCategory {
            name: "Infrastructure".to_string(),
            description: Some("Roads, drainage and public facilities".to_string()),
            allocated_amount: 1_500_000.0,
            fiscal_year: 2025,
        },
    )?;
    storage.set_category_status(barangay.id, category.id, BudgetStatus::Approved)?;

    let project = storage.create_project(
        barangay.id,
        &NewProject {
            title: "Purok 3 drainage rehabilitation".to_string(),
            description: Some("Declogging and concrete lining of the main canal".to_string()),
            budget: 480_000.0,
            location: Some("Purok 3".to_string()),
            start_date: NaiveDate::from_ymd_opt(2025, 2, 1),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 30),
        },
    )?;
    storage.set_project_status(barangay.id, project.id, ProjectStatus::Ongoing)?;

    for (name, amount) in [
        ("Concrete and rebar", 250_000.0),
        ("Labor", 180_000.0),
        ("Equipment rental", 50_000.0),
    ] {
        storage.create_item(
            barangay.id,
            &NewBudgetItem {
                project_id: project.id,
                category_id: category.id,
                name: name.to_string(),
                description: None,
                amount,
            },
        )?;
    }

    storage.flush()?;
    println!(
        "Seeded barangay {} (id {}) with project {} (id {})",
        barangay.name, barangay.id, project.title, project.id
    );
    println!("Log in with admin@sanisidro.ph / {PASSWORD}");
    Ok(())
}
