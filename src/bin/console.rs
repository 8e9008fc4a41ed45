//! Terminal front end for a running `gcp-console` server.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gcp_console::client::{
    ApiClient,
    ui::{Action, Phase, Session, format_file_size},
};
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};

#[derive(Parser, Debug)]
#[command(version, about = "Manage bucket files and call the cloud function")]
struct Args {
    /// Base URL of the console server.
    #[arg(long, env = "CONSOLE_URL", default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the objects in the bucket.
    Files,
    /// Upload a local file under its own name.
    Upload { path: PathBuf },
    /// Download an object.
    Download {
        name: String,
        /// Destination path; defaults to the object name.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete an object after confirmation.
    Delete {
        name: String,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Call the cloud function with a JSON payload (empty means `{}`).
    Call { json: Option<String> },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    gcp_console::init_tracing();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the operation ended in an error state.
async fn run(args: Args) -> Result<bool> {
    let client = ApiClient::new(&args.url).with_context(|| format!("invalid --url {}", args.url))?;

    match args.command {
        Command::Download { name, output } => {
            let destination = output.unwrap_or_else(|| PathBuf::from(&name));
            let written = client.download_file(&name, &destination).await?;
            println!(
                "Saved {} ({}) to {}",
                name,
                format_file_size(written),
                destination.display()
            );
            Ok(true)
        }
        Command::Files => {
            let mut session = Session::new(client, |_: &str| false);
            session.run(Action::RefreshFiles).await;
            print_listing(&session.ui.files.listing)
        }
        Command::Upload { path } => {
            let mut session = Session::new(client, |_: &str| false);
            session.run(Action::SelectFile(Some(path))).await;
            session.run(Action::SubmitUpload).await;
            if let Some(status) = session.ui.upload_status() {
                println!("{}", status);
            }
            Ok(matches!(session.ui.files.upload, Phase::Success(_)))
        }
        Command::Delete { name, yes } => {
            let mut session = Session::new(client, move |name: &str| yes || prompt(name));
            session.run(Action::RequestDelete(name)).await;
            match &session.ui.files.delete {
                Phase::Success(message) => println!("{}", message),
                Phase::Error(err) => println!("Error: {}", err),
                Phase::Idle | Phase::Pending => println!("Cancelled."),
            }
            Ok(!matches!(session.ui.files.delete, Phase::Error(_)))
        }
        Command::Call { json } => {
            let mut session = Session::new(client, |_: &str| false);
            session
                .run(Action::EditFunctionInput(json.unwrap_or_default()))
                .await;
            session.run(Action::SubmitFunction).await;
            if let Some(status) = session.ui.function_status() {
                println!("{}", status);
            }
            Ok(!matches!(session.ui.function.call, Phase::Error(_)))
        }
    }
}

fn print_listing(listing: &Phase<Vec<gcp_console::models::file::FileDescriptor>>) -> Result<bool> {
    match listing {
        Phase::Success(files) if files.is_empty() => {
            println!("No files found in the bucket.");
            Ok(true)
        }
        Phase::Success(files) => {
            for file in files {
                println!(
                    "{:<40} {:>12}  {:<28} {}",
                    file.name,
                    format_file_size(file.size),
                    file.content_type,
                    file.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(true)
        }
        Phase::Error(err) => {
            println!("Error loading files: {}", err);
            Ok(false)
        }
        Phase::Idle | Phase::Pending => bail!("listing did not complete"),
    }
}

/// Ask on stdin; anything but `y`/`yes` declines.
fn prompt(name: &str) -> bool {
    print!("Are you sure you want to delete {}? [y/N] ", name);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
