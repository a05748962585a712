use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use booking_core::{
    AddOutcome, BookingClient, CartLine, CheckoutError, FilterScope, HttpLessonService,
};
use clap::{Parser, Subcommand};
use shared::domain::{Lesson, LessonId, SortSpec};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "storefront", about = "Browse and book lessons")]
struct Cli {
    /// Lesson service root, e.g. http://localhost:3000
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print machine-readable JSON instead of a table.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List lessons, optionally searched and sorted.
    Lessons {
        #[arg(long, default_value = "")]
        search: String,
        /// `<subject|location|price|spaces>-<asc|desc>`
        #[arg(long)]
        sort: Option<SortSpec>,
        /// Match the search text against every lesson field.
        #[arg(long)]
        all_fields: bool,
    },
    /// Book lessons; repeat `--lesson` to book more than one space.
    Book {
        #[arg(long = "lesson", required = true)]
        lessons: Vec<LessonId>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    info!(api_url = %settings.api_url, "storefront: using lesson service");

    let service = HttpLessonService::with_timeout(&settings.api_url, settings.request_timeout())
        .context("failed to build lesson service client")?;
    let client = BookingClient::new_with_options(Arc::new(service), settings.booking_options());

    match cli.command {
        Command::Lessons {
            search,
            sort,
            all_fields,
        } => {
            if let Some(sort) = sort {
                client.set_sort(sort).await;
            }
            if all_fields {
                client.set_filter_scope(FilterScope::AllFields).await;
            }
            client
                .update_search_query(search)
                .await
                .context("failed to load lessons")?;

            let lessons = client.visible_lessons().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&lessons)?);
            } else {
                print_lessons(&lessons);
            }
        }
        Command::Book {
            lessons,
            name,
            phone,
        } => {
            client.refresh().await.context("failed to load lessons")?;

            for lesson_id in &lessons {
                match client.add_to_cart(lesson_id).await {
                    AddOutcome::Added { quantity } => {
                        info!(lesson_id = %lesson_id, quantity, "storefront: added to cart");
                    }
                    AddOutcome::SoldOut => {
                        warn!(lesson_id = %lesson_id, "storefront: no spaces left, skipped");
                    }
                    AddOutcome::UnknownLesson => bail!("lesson {lesson_id} does not exist"),
                    AddOutcome::CheckoutPending => bail!("an order is already being submitted"),
                }
            }
            client.set_name(name).await;
            client.set_phone(phone).await;

            let lines = client.cart_lines().await;
            let totals = client.cart_totals().await;
            if !cli.json {
                print_cart(&lines);
                println!("{} item(s), total {:.2}", totals.items, totals.price);
            }

            match client.checkout().await {
                Ok(confirmation) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&confirmation.order)?);
                    }
                }
                Err(CheckoutError::Disabled(validation)) => {
                    bail!("checkout is disabled: {validation}")
                }
                Err(err) => {
                    if let Some(status) = client.status().await {
                        eprintln!("{status}");
                    }
                    return Err(err).context("checkout failed");
                }
            }
            if let Some(status) = client.status().await {
                println!("{status}");
            }
        }
    }

    Ok(())
}

fn print_lessons(lessons: &[Lesson]) {
    if lessons.is_empty() {
        println!("No lessons found.");
        return;
    }
    println!(
        "{:>8}  {:<24} {:<16} {:>8} {:>6}",
        "id", "subject", "location", "price", "spaces"
    );
    for lesson in lessons {
        println!(
            "{:>8}  {:<24} {:<16} {:>8.2} {:>6}",
            lesson.id.to_string(),
            lesson.subject,
            lesson.location,
            lesson.price,
            lesson.spaces
        );
    }
}

fn print_cart(lines: &[CartLine]) {
    for line in lines {
        println!(
            "{} x {} ({}) @ {:.2} = {:.2}",
            line.quantity,
            line.subject,
            line.location,
            line.price,
            line.line_total()
        );
    }
}
