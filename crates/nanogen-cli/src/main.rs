use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use nanogen_contracts::credentials::{find_project_env_file, resolve_credential, CredentialSource};
use nanogen_contracts::events::EventWriter;
use nanogen_contracts::{AspectRatio, Credential, GenerateError, GenerationRequest, ImageSize};
use nanogen_engine::ImageGenerator;

#[derive(Debug, Parser)]
#[command(
    name = "nanogen",
    version,
    about = "Generate images with Gemini 3 Pro Image Preview",
    after_help = "Examples:\n  nanogen \"A friendly robot mascot\" --output ./robot.png\n  nanogen \"Website banner\" --aspect 16:9 --output ./banner.png\n  nanogen \"Detailed landscape\" --size 4K --output ./landscape.png"
)]
struct Cli {
    /// Image description/prompt
    prompt: String,
    /// Output file path; the extension is rewritten to the real image format
    #[arg(short, long)]
    output: PathBuf,
    #[arg(short, long, default_value = "1:1", value_parser = parse_aspect_ratio)]
    aspect: AspectRatio,
    #[arg(short, long, default_value = "2K", value_parser = parse_image_size)]
    size: ImageSize,
    /// Read credentials from this file instead of searching for a project .env
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Append run events as JSON lines to this file
    #[arg(long)]
    events: Option<PathBuf>,
}

fn parse_aspect_ratio(raw: &str) -> std::result::Result<AspectRatio, String> {
    raw.parse()
}

fn parse_image_size(raw: &str) -> std::result::Result<ImageSize, String> {
    raw.parse()
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nanogen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let credential = load_credential(cli.env_file.as_deref())?;
    let events = cli
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, uuid::Uuid::new_v4().to_string()));

    eprintln!("Generating image with Gemini 3 Pro Preview...");
    eprintln!("Prompt: {}", cli.prompt);
    eprintln!("Aspect: {}, Size: {}", cli.aspect, cli.size);

    let request = GenerationRequest::new(cli.prompt.clone(), cli.aspect, cli.size);
    let generator = ImageGenerator::new()
        .with_events(events)
        .with_progress(|line: &str| eprintln!("{line}"));
    let mut warnings = Vec::new();
    let generated = generator.generate(&credential, &request, &mut warnings);
    print_warnings(&mut warnings);

    let image = match generated {
        Ok(image) => image,
        Err(err) => {
            report_generation_error(&err);
            return Ok(1);
        }
    };

    let saved = generator.save(&image, &cli.output, &mut warnings)?;
    if saved != cli.output {
        eprintln!(
            "Note: Using {} extension (actual format: {})",
            image.format.extension, image.format.mime_type
        );
    }
    print_warnings(&mut warnings);
    eprintln!("Image saved: {}", saved.display());
    println!("{}", saved.display());
    Ok(0)
}

fn load_credential(env_file: Option<&Path>) -> Result<Credential> {
    let env_path = match env_file {
        Some(path) => Some(path.to_path_buf()),
        None => find_project_env_file(&env_search_roots()),
    };
    let mut sources = Vec::new();
    if let Some(path) = env_path {
        sources.push(CredentialSource::from_env_file(&path)?);
    }
    sources.push(CredentialSource::from_process_env());
    resolve_credential(&sources).context("credential resolution failed")
}

fn env_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        if !roots.contains(&exe_dir) {
            roots.push(exe_dir);
        }
    }
    roots
}

fn print_warnings(warnings: &mut Vec<String>) {
    for warning in warnings.drain(..) {
        eprintln!("{warning}");
    }
}

fn report_generation_error(err: &GenerateError) {
    match err {
        GenerateError::ExhaustedAttempts { last_error, .. } => {
            eprintln!("API Error: all auth/path attempts failed");
            eprintln!("Last error: {}", last_error.as_deref().unwrap_or("none"));
        }
        GenerateError::ResponseShape { reason, model_text } => {
            for text in model_text {
                eprintln!("Model response (no image): {text}");
            }
            eprintln!("Error: {reason}");
        }
        other => eprintln!("{other}"),
    }
}
