mod auth;
mod catalog;
mod config;
mod db;
mod error;
mod export;
mod legacy;
mod models;
mod profile;
mod reviews;
#[cfg(test)]
mod test_support;
mod tui;
mod workflow;

use anyhow::{bail, Context, Result};
use auth::{load_session, save_session, AuthProvider};
use catalog::JobQuery;
use clap::{Parser, Subcommand};
use config::Config;
use db::Database;
use models::{Application, Job, JobFields, Page, Role};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smartmatch")]
#[command(about = "Job marketplace - post jobs, apply, approve and review")]
struct Cli {
    /// Path to the database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct PageArgs {
    /// Maximum number of rows
    #[arg(short, long)]
    limit: Option<u32>,

    /// Rows to skip
    #[arg(long)]
    offset: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        #[arg(short, long, value_enum)]
        role: Role,
    },

    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        /// Password (omit with --federated)
        #[arg(short, long)]
        password: Option<String>,

        /// Trust the email as asserted by an external identity provider
        #[arg(long)]
        federated: bool,

        /// Display name for a first federated sign-in
        #[arg(short, long)]
        name: Option<String>,

        /// Role for a first federated sign-in
        #[arg(short, long, value_enum, default_value = "worker")]
        role: Role,
    },

    /// Sign out
    Logout,

    /// Show the signed-in identity
    Whoami,

    /// View or edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Manage job postings
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Apply to a job
    Apply {
        /// Job ID
        job_id: i64,

        /// Name shown to the client
        #[arg(short, long)]
        name: String,

        /// Cover letter text
        #[arg(short, long)]
        cover_letter: String,
    },

    /// Show one application
    Application {
        /// Application ID
        id: i64,
    },

    /// List pending applications
    Pending {
        #[command(flatten)]
        page: PageArgs,
    },

    /// List approved applications
    Approved {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Approve an application
    Approve {
        /// Application ID
        id: i64,
    },

    /// Reject an application
    Reject {
        /// Application ID
        id: i64,
    },

    /// List your own applications
    Mine {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Review workers on approved applications
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },

    /// Browse pending applications interactively
    Queue {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Import a JSON export from the previous hosted store
    Import {
        /// Export file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show your profile
    Show,

    /// Edit name and bio
    Edit {
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        bio: Option<String>,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Post a new job
    Post {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        description: String,

        #[arg(short, long)]
        company: String,

        #[arg(short, long)]
        location: String,

        #[arg(short, long)]
        salary: String,

        /// Employment type, e.g. Full-time
        #[arg(long = "type")]
        job_type: String,
    },

    /// Edit a job you posted
    Edit {
        /// Job ID
        id: i64,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        company: Option<String>,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(short, long)]
        salary: Option<String>,

        #[arg(long = "type")]
        job_type: Option<String>,
    },

    /// Delete a job you posted
    Delete {
        /// Job ID
        id: i64,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List jobs, newest first
    List {
        /// Case-insensitive search over title, description and company
        #[arg(short, long)]
        search: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Show job details and, for clients, its applications
    Show {
        /// Job ID
        id: i64,
    },

    /// Export jobs to CSV
    Export {
        #[arg(short, long)]
        search: Option<String>,

        /// Output file path
        #[arg(short, long, default_value = "jobs-data.csv")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// Review the worker on an approved application
    Add {
        /// Application ID
        application_id: i64,

        /// Rating from 1 to 5
        #[arg(short, long)]
        rating: i64,

        #[arg(short, long)]
        comment: String,
    },

    /// List reviews with worker names
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!(error = %e, "command failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load().with_db_path(cli.db);
    let db = Database::open_at(&config.db_path)?;

    if let Commands::Init = cli.command {
        db.init()?;
        println!("Database initialized at {}", db.path().display());
        return Ok(());
    }
    db.ensure_initialized()?;

    let session = load_session(&config.session_path).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring unreadable session");
        None
    });
    let mut auth = AuthProvider::with_session(&db, session);
    let session_path = config.session_path.clone();
    auth.on_auth_state_changed(move |identity| {
        if let Err(e) = save_session(&session_path, identity) {
            warn!(error = %e, "failed to persist session");
        }
    });

    let page = |args: PageArgs| config.page(args.offset, args.limit);
    let json = cli.json;

    match cli.command {
        Commands::Init => unreachable!("handled above"),

        Commands::Register {
            email,
            password,
            name,
            role,
        } => {
            let identity = auth.register(&email, &password, &name, role)?;
            println!("Registered {} as {} ({})", identity.email, role, identity.uid);
        }

        Commands::Login {
            email,
            password,
            federated,
            name,
            role,
        } => {
            let identity = if federated {
                auth.sign_in_federated(&email, name.as_deref(), role)?
            } else {
                let Some(password) = password else {
                    bail!("--password is required unless --federated is given");
                };
                auth.sign_in(&email, &password)?
            };
            println!("Signed in as {}", identity.email);
        }

        Commands::Logout => {
            auth.sign_out();
            println!("Signed out.");
        }

        Commands::Whoami => match auth.current_user() {
            Some(identity) => {
                let user = profile::get_profile(&db, Some(identity))?;
                if json {
                    print_json(&user)?;
                } else {
                    println!("{} ({})", identity.email, user.role);
                    println!("UID: {}", identity.uid);
                    if let Some(name) = &user.name {
                        println!("Name: {}", name);
                    }
                }
            }
            None => println!("Not signed in."),
        },

        Commands::Profile { command } => {
            let caller = auth.current_user();
            let user = match command {
                ProfileCommands::Show => profile::get_profile(&db, caller)?,
                ProfileCommands::Edit { name, bio } => {
                    profile::update_profile(&db, caller, name.as_deref(), bio.as_deref())?
                }
            };
            if json {
                print_json(&user)?;
            } else {
                println!("Role: {}", user.role);
                println!("Name: {}", user.name.as_deref().unwrap_or("-"));
                println!("Bio: {}", user.bio.as_deref().unwrap_or("-"));
                println!("Member since: {}", user.created_at.format("%Y-%m-%d"));
            }
        }

        Commands::Job { command } => run_job(&db, &auth, command, json, &page)?,

        Commands::Apply {
            job_id,
            name,
            cover_letter,
        } => {
            let app =
                workflow::submit_application(&db, auth.current_user(), job_id, &name, &cover_letter)?;
            println!("Applied to '{}' (application #{})", app.job_title, app.id);
        }

        Commands::Application { id } => {
            let app = workflow::get_application(&db, auth.current_user(), id)?;
            if json {
                print_json(&app)?;
            } else {
                println!("Application #{}", app.id);
                println!("Job: {} (#{})", app.job_title, app.job_id);
                println!("Applicant: {} <{}>", app.applicant_name, app.applicant_email);
                println!("Status: {}", app.status);
                println!("Applied: {}", app.applied_at.format("%Y-%m-%d %H:%M"));
                if let Some(processed) = app.processed_at {
                    println!("Processed: {}", processed.format("%Y-%m-%d %H:%M"));
                }
                println!("\n--- Cover Letter ---\n{}", textwrap::fill(&app.cover_letter, 80));
            }
        }

        Commands::Pending { page: args } => {
            let apps = workflow::list_pending(&db, auth.current_user(), page(args))?;
            print_applications(&apps, json, "No pending applications.")?;
        }

        Commands::Approved { page: args } => {
            let apps = workflow::list_approved(&db, auth.current_user(), page(args))?;
            print_applications(&apps, json, "No approved applications.")?;
        }

        Commands::Approve { id } => {
            let app = workflow::approve(&db, auth.current_user(), id)?;
            println!("Application #{} approved.", app.id);
        }

        Commands::Reject { id } => {
            let app = workflow::reject(&db, auth.current_user(), id)?;
            println!("Application #{} rejected.", app.id);
        }

        Commands::Mine { page: args } => {
            let mine = workflow::list_mine(&db, auth.current_user(), page(args))?;
            if json {
                print_json(&mine)?;
            } else {
                print_applications(&mine.applications, false, "You have not applied to any jobs.")?;
                let s = mine.stats;
                println!(
                    "\nTotal: {}  Pending: {}  Approved: {}  Rejected: {}",
                    s.total, s.pending, s.approved, s.rejected
                );
            }
        }

        Commands::Review { command } => match command {
            ReviewCommands::Add {
                application_id,
                rating,
                comment,
            } => {
                let review = reviews::submit_review(
                    &db,
                    auth.current_user(),
                    application_id,
                    rating,
                    &comment,
                )?;
                println!("Review #{} saved ({}/5).", review.id, review.rating);
            }
            ReviewCommands::List { page: args } => {
                let list = reviews::list_reviews_joined(&db, page(args))?;
                if json {
                    print_json(&list)?;
                } else if list.is_empty() {
                    println!("No reviews yet.");
                } else {
                    println!("{:<6} {:<8} {:<20} {:<8} {:<40}", "ID", "APP", "WORKER", "RATING", "COMMENT");
                    println!("{}", "-".repeat(84));
                    for r in list {
                        println!(
                            "{:<6} {:<8} {:<20} {:<8} {:<40}",
                            r.review.id,
                            r.review.application_id,
                            truncate(&r.worker_name, 18),
                            format!("{}/5", r.review.rating),
                            truncate(&r.review.comment, 38)
                        );
                    }
                }
            }
        },

        Commands::Queue { page: args } => {
            tui::run_queue(&db, auth.current_user(), page(args))?;
        }

        Commands::Import { file } => {
            let stats = legacy::import_file(&db, &file)?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Imported from {}", file.display());
                println!("  Users:        {}", stats.users);
                println!("  Jobs:         {}", stats.jobs);
                println!("  Applications: {}", stats.applications);
                println!("  Reviews:      {}", stats.reviews);
                if stats.unchanged > 0 {
                    println!("  Already here: {}", stats.unchanged);
                }
                if stats.skipped > 0 {
                    println!("  Skipped:      {}", stats.skipped);
                }
            }
        }
    }

    Ok(())
}

fn run_job(
    db: &Database,
    auth: &AuthProvider,
    command: JobCommands,
    json: bool,
    page: &dyn Fn(PageArgs) -> Page,
) -> Result<()> {
    let caller = auth.current_user();
    match command {
        JobCommands::Post {
            title,
            description,
            company,
            location,
            salary,
            job_type,
        } => {
            let fields = JobFields {
                title,
                description,
                company,
                location,
                salary,
                job_type,
            };
            let job = catalog::create_job(db, caller, &fields)?;
            println!("Posted job #{}: {}", job.id, job.fields.title);
        }

        JobCommands::Edit {
            id,
            title,
            description,
            company,
            location,
            salary,
            job_type,
        } => {
            let mut fields = catalog::get_job(db, id)?.fields;
            if let Some(v) = title {
                fields.title = v;
            }
            if let Some(v) = description {
                fields.description = v;
            }
            if let Some(v) = company {
                fields.company = v;
            }
            if let Some(v) = location {
                fields.location = v;
            }
            if let Some(v) = salary {
                fields.salary = v;
            }
            if let Some(v) = job_type {
                fields.job_type = v;
            }
            let job = catalog::update_job(db, caller, id, &fields)?;
            println!("Updated job #{}.", job.id);
        }

        JobCommands::Delete { id, yes } => {
            let job = catalog::get_job(db, id)?;
            println!("Job #{}: {}", job.id, job.fields.title);
            if !yes && !confirm("Are you sure you want to delete this job?")? {
                println!("Cancelled.");
                return Ok(());
            }
            catalog::delete_job(db, caller, id)?;
            println!("Deleted job #{}.", id);
        }

        JobCommands::List { search, page: args } => {
            let jobs = catalog::list_jobs(
                db,
                &JobQuery {
                    search,
                    page: page(args),
                },
            )?;
            print_jobs(&jobs, json)?;
        }

        JobCommands::Show { id } => {
            let job = catalog::get_job(db, id)?;
            // Clients also see who applied; other callers just get the posting.
            let applications =
                workflow::applications_visible_for_job(db, caller, id, Page::default())?;
            if json {
                return print_json(&JobDetail {
                    job: &job,
                    applications: applications.as_deref(),
                });
            }
            println!("Job #{}", job.id);
            println!("Title: {}", job.fields.title);
            println!("Company: {}", job.fields.company);
            println!("Location: {}", job.fields.location);
            println!("Salary: {}", job.fields.salary);
            println!("Type: {}", job.fields.job_type);
            println!("Posted: {}", job.created_at.format("%Y-%m-%d %H:%M"));
            if let Some(updated) = job.updated_at {
                println!("Updated: {}", updated.format("%Y-%m-%d %H:%M"));
            }
            println!("\n--- Description ---\n{}", textwrap::fill(&job.fields.description, 80));
            if let Some(apps) = applications.filter(|a| !a.is_empty()) {
                println!("\nApplications ({}):", apps.len());
                for app in apps {
                    println!("  #{} - {} ({})", app.id, app.applicant_name, app.status);
                }
            }
        }

        JobCommands::Export { search, output } => {
            let jobs = catalog::list_jobs(
                db,
                &JobQuery {
                    search,
                    page: Page::first(u32::MAX),
                },
            )?;
            std::fs::write(&output, export::jobs_to_csv(&jobs))
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Exported {} job(s) to {}", jobs.len(), output.display());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JobDetail<'a> {
    #[serde(flatten)]
    job: &'a Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    applications: Option<&'a [Application]>,
}

fn print_jobs(jobs: &[Job], json: bool) -> Result<()> {
    if json {
        return print_json(jobs);
    }
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }
    println!("{:<6} {:<30} {:<20} {:<16} {:>12}", "ID", "TITLE", "COMPANY", "LOCATION", "SALARY");
    println!("{}", "-".repeat(88));
    for job in jobs {
        println!(
            "{:<6} {:<30} {:<20} {:<16} {:>12}",
            job.id,
            truncate(&job.fields.title, 28),
            truncate(&job.fields.company, 18),
            truncate(&job.fields.location, 14),
            truncate(&job.fields.salary, 12)
        );
    }
    Ok(())
}

fn print_applications(apps: &[Application], json: bool, empty: &str) -> Result<()> {
    if json {
        return print_json(apps);
    }
    if apps.is_empty() {
        println!("{}", empty);
        return Ok(());
    }
    println!("{:<6} {:<10} {:<28} {:<20} {:<16}", "ID", "STATUS", "JOB", "APPLICANT", "APPLIED");
    println!("{}", "-".repeat(84));
    for app in apps {
        println!(
            "{:<6} {:<10} {:<28} {:<20} {:<16}",
            app.id,
            app.status,
            truncate(&app.job_title, 26),
            truncate(&app.applicant_name, 18),
            app.applied_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
