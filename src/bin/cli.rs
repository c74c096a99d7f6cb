use clap::{Parser, Subcommand};
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::fs;

const SESSION_FILE: &str = ".barangay_session";

#[derive(Parser)]
#[command(name = "barangay-cli")]
#[command(about = "CLI for the barangay transparency API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(short, long)]
        barangay_id: u64,
        /// resident or admin (admin needs an admin session)
        #[arg(short, long, default_value = "resident")]
        role: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Whoami,
    Barangays,
    Dashboard {
        #[arg(short, long)]
        barangay_id: u64,
    },
    Projects {
        #[arg(short, long, default_value = "All")]
        filter: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    CreateProject {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        budget: f64,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
    BudgetItems {
        #[arg(short, long)]
        project_id: u64,
        #[arg(short, long, default_value = "All")]
        filter: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    Feedback {
        #[arg(short, long)]
        project_id: u64,
        #[arg(short, long)]
        subject: String,
        #[arg(short, long)]
        content: String,
        #[arg(short, long)]
        rating: Option<u8>,
    },
}

/// Attaches the saved session cookie, if any.
fn with_session(request: RequestBuilder) -> RequestBuilder {
    match fs::read_to_string(SESSION_FILE) {
        Ok(cookie) if !cookie.trim().is_empty() => {
            request.header(header::COOKIE, cookie.trim().to_string())
        }
        _ => request,
    }
}

async fn print_response(res: Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(body) => println!("{status}\n{}", serde_json::to_string_pretty(&body)?),
        Err(_) => println!("{status}\n{text}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Register {
            email,
            password,
            first_name,
            last_name,
            barangay_id,
            role,
        } => {
            let res = with_session(client.post(format!("{url}/user/register")))
                .json(&json!({
                    "email": email,
                    "password": password,
                    "first_name": first_name,
                    "last_name": last_name,
                    "barangay_id": barangay_id,
                    "role": role,
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Login { email, password } => {
            let res = with_session(client.post(format!("{url}/user/login")))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            let cookie = res
                .headers()
                .get(header::SET_COOKIE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(';').next())
                .map(str::to_string);
            if res.status().is_success() {
                if let Some(cookie) = cookie {
                    fs::write(SESSION_FILE, cookie)?;
                    println!("Logged in. Session saved to {SESSION_FILE}");
                }
            }
            print_response(res).await?;
        }
        Commands::Logout => {
            let res = with_session(client.post(format!("{url}/user/logout")))
                .send()
                .await?;
            let _ = fs::remove_file(SESSION_FILE);
            print_response(res).await?;
        }
        Commands::Whoami => {
            let res = with_session(client.get(format!("{url}/user/me")))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Barangays => {
            let res = client.get(format!("{url}/barangay")).send().await?;
            print_response(res).await?;
        }
        Commands::Dashboard { barangay_id } => {
            let res = client
                .get(format!("{url}/barangay/{barangay_id}/dashboard"))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Projects {
            filter,
            page,
            limit,
        } => {
            let res = with_session(client.get(format!("{url}/project")))
                .query(&[("filter", filter), ("page", page.to_string()), ("limit", limit.to_string())])
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::CreateProject {
            title,
            budget,
            description,
            location,
        } => {
            let res = with_session(client.post(format!("{url}/project")))
                .json(&json!({
                    "title": title,
                    "budget": budget,
                    "description": description,
                    "location": location,
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::BudgetItems {
            project_id,
            filter,
            page,
            limit,
        } => {
            let res = with_session(client.get(format!("{url}/budgetItem/project/{project_id}")))
                .query(&[("filter", filter), ("page", page.to_string()), ("limit", limit.to_string())])
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Feedback {
            project_id,
            subject,
            content,
            rating,
        } => {
            let res = with_session(client.post(format!("{url}/feedback")))
                .json(&json!({
                    "project_id": project_id,
                    "subject": subject,
                    "content": content,
                    "rating": rating,
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}
