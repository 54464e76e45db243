//! Command-line surface of the `fluxstudio` binary.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fluxstudio_core::models::{ModelDescriptor, ParameterKind, NUM_IMAGES_KEY};
use fluxstudio_core::validation::{DEFAULT_LORA_SCALE, MODEL_KEY, PROMPT_KEY};
use fluxstudio_fal::normalize::unwrap_envelope;
use fluxstudio_fal::{ProgressCallback, ProgressEvent};
use fluxstudio_storage::history::DEFAULT_PAGE_SIZE;
use fluxstudio_storage::{HistoryFilter, HistoryItem};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::StudioConfig;
use crate::studio::{resolve_credential, Studio};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate images with FLUX models on fal.ai", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available models
    Models,

    /// Show the parameters a model accepts
    Describe {
        /// Model id, e.g. `flux-lora`
        model: String,
    },

    /// Generate images and record them in history
    Generate(GenerateArgs),

    /// Browse and manage past generations
    #[command(subcommand)]
    History(HistoryCommand),

    /// Manage the stored fal.ai API key
    #[command(subcommand)]
    Credential(CredentialCommand),
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Model id
    #[arg(short, long)]
    pub model: String,

    /// Text prompt describing the image
    #[arg(short, long)]
    pub prompt: String,

    /// Model parameter as key=value; repeatable. JSON values are accepted.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// LoRA weights as path[:scale]; repeatable
    #[arg(long = "lora", value_name = "PATH[:SCALE]")]
    pub loras: Vec<String>,

    /// Number of images to generate
    #[arg(short, long)]
    pub num_images: Option<u32>,

    /// API key for this call only
    #[arg(long)]
    pub credential: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List past generations, newest first
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Only items from this model (id or name)
        #[arg(long)]
        model: Option<String>,

        /// Only items whose prompt contains this text
        #[arg(long)]
        text: Option<String>,
    },

    /// Print one item as JSON
    Show { id: Uuid },

    /// Delete one item
    Remove { id: Uuid },

    /// Print the parameters of an item, or resubmit them with `--run`
    Remix {
        id: Uuid,

        /// Replace the prompt
        #[arg(long)]
        prompt: Option<String>,

        /// Submit the remixed parameters immediately
        #[arg(long)]
        run: bool,

        /// API key for this call only
        #[arg(long)]
        credential: Option<String>,
    },

    /// Delete all history
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum CredentialCommand {
    /// Store an API key
    Set { key: String },

    /// Show the stored key, masked
    Show,

    /// Forget the stored key
    Clear,
}

/// Execute one parsed command.
pub async fn run(cli: Cli, studio: &Studio, config: &StudioConfig) -> anyhow::Result<()> {
    match cli.command {
        Command::Models => list_models(studio),
        Command::Describe { model } => {
            let descriptor = studio.registry().describe(&model)?;
            print_descriptor(descriptor);
        }
        Command::Generate(args) => {
            let bag = build_bag(&args)?;
            let credential = credential_for(studio, config, args.credential.as_deref())?;
            submit(studio, &bag, &credential).await?;
        }
        Command::History(cmd) => run_history(cmd, studio, config).await?,
        Command::Credential(cmd) => run_credential(cmd, studio)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

fn list_models(studio: &Studio) {
    for model in studio.registry().iter() {
        let price = model
            .cost_per_megapixel
            .map(|c| format!("${c}/MP"))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<24} {:<32} {:<10} {}", model.id, model.name, price, model.endpoint);
    }
}

fn print_descriptor(descriptor: &ModelDescriptor) {
    println!("{} ({})", descriptor.name, descriptor.id);
    println!("  endpoint:   {}", descriptor.endpoint);
    println!("  {}", descriptor.description);
    println!("  max images: {}", descriptor.max_images);
    if let Some(cost) = descriptor.cost_per_megapixel {
        println!("  price:      ${cost} per megapixel");
    }
    println!();
    println!("  {PROMPT_KEY:<24} string (required)");
    for spec in &descriptor.parameters {
        let mut line = format!("  {:<24} {}", spec.key, kind_summary(&spec.kind));
        if spec.required {
            line.push_str(" (required)");
        }
        if let Some(default) = &spec.default {
            line.push_str(&format!(" default={default}"));
        }
        if let Some(description) = &spec.description {
            line.push_str(&format!("  {description}"));
        }
        println!("{line}");
    }
}

fn kind_summary(kind: &ParameterKind) -> String {
    match kind {
        ParameterKind::Number { min, max, .. } => match (min, max) {
            (Some(lo), Some(hi)) => format!("{} [{lo}, {hi}]", kind.name()),
            _ => kind.name().to_string(),
        },
        ParameterKind::Enum { options } => format!("one of {}", options.join("|")),
        ParameterKind::Array { max_len, .. } => format!("{} (max {max_len})", kind.name()),
        _ => kind.name().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// Turn command-line arguments into a parameter bag.
pub fn build_bag(args: &GenerateArgs) -> anyhow::Result<Value> {
    let mut bag = Map::new();
    bag.insert(MODEL_KEY.to_string(), json!(args.model));
    bag.insert(PROMPT_KEY.to_string(), json!(args.prompt));

    for param in &args.params {
        let (key, raw) = param
            .split_once('=')
            .with_context(|| format!("parameter '{param}' must look like key=value"))?;
        bag.insert(key.trim().to_string(), parse_param_value(raw));
    }

    if !args.loras.is_empty() {
        let loras: Vec<Value> = args.loras.iter().map(String::as_str).map(parse_lora).collect();
        bag.insert("loras".to_string(), Value::Array(loras));
    }

    if let Some(n) = args.num_images {
        bag.insert(NUM_IMAGES_KEY.to_string(), json!(n));
    }

    Ok(Value::Object(bag))
}

/// JSON literals are taken as-is; anything else is a string.
fn parse_param_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// `path[:scale]`, where the scale suffix is only split off when it parses
/// as a number (URLs contain colons).
fn parse_lora(raw: &str) -> Value {
    match raw.rsplit_once(':') {
        Some((path, scale)) => match scale.trim().parse::<f64>() {
            Ok(scale) => json!({"path": path, "scale": scale}),
            Err(_) => json!({"path": raw, "scale": DEFAULT_LORA_SCALE}),
        },
        None => json!({"path": raw, "scale": DEFAULT_LORA_SCALE}),
    }
}

fn credential_for(studio: &Studio, config: &StudioConfig, flag: Option<&str>) -> anyhow::Result<String> {
    let stored = studio.credentials().load()?;
    Ok(resolve_credential(flag, stored, config.fal_key.as_deref()).unwrap_or_default())
}

async fn submit(studio: &Studio, bag: &Value, credential: &str) -> anyhow::Result<()> {
    let progress = |event: &ProgressEvent| match event {
        ProgressEvent::AttemptStarted {
            attempt,
            max_attempts,
        } if *attempt > 1 => eprintln!("attempt {attempt}/{max_attempts}"),
        ProgressEvent::AttemptStarted { .. } => {}
        ProgressEvent::Log(line) => eprintln!("  {line}"),
        ProgressEvent::RetryScheduled { delay_ms, .. } => {
            eprintln!("upstream busy, retrying in {delay_ms} ms")
        }
    };

    let item = studio
        .submit(bag, credential, Some(&progress as &ProgressCallback<'_>))
        .await?;
    print_generated(&item);
    Ok(())
}

fn print_generated(item: &HistoryItem) {
    println!("id:    {}", item.id);
    println!("model: {}", item.model);
    let urls = image_urls(&item.response_details);
    if urls.is_empty() {
        println!("image: {}", item.image_url);
    } else {
        for url in urls {
            println!("image: {url}");
        }
    }
    if let Some(cost) = item.cost {
        println!("cost:  ${cost:.3}");
    }
}

/// Every image URL in a stored upstream payload, enveloped or not.
fn image_urls(payload: &Value) -> Vec<&str> {
    let body = unwrap_envelope(payload);
    let entries: Vec<&Value> = match (body.get("images"), body.get("image")) {
        (Some(Value::Array(images)), _) => images.iter().collect(),
        (_, Some(single)) => vec![single],
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|i| i.get("url").and_then(Value::as_str).or_else(|| i.as_str()))
        .collect()
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn run_history(cmd: HistoryCommand, studio: &Studio, config: &StudioConfig) -> anyhow::Result<()> {
    let history = studio.history();
    match cmd {
        HistoryCommand::List {
            page,
            page_size,
            model,
            text,
        } => {
            let filter = HistoryFilter { model, text };
            let page = history.search(&filter, page, page_size);
            for item in &page.items {
                let cost = item.cost.map(|c| format!("${c:.3}")).unwrap_or_default();
                println!(
                    "{}  {}  {:<20} {:>7}  {}",
                    item.id,
                    item.created_at.format("%Y-%m-%d %H:%M"),
                    item.model_id,
                    cost,
                    item.prompt
                );
            }
            println!(
                "page {}/{} ({} items)",
                page.page,
                page.total_pages.max(1),
                page.total_items
            );
        }
        HistoryCommand::Show { id } => {
            let item = history
                .get(id)
                .with_context(|| format!("no history item with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        HistoryCommand::Remove { id } => {
            if history.remove(id)? {
                println!("removed {id}");
            } else {
                println!("no history item with id {id}");
            }
        }
        HistoryCommand::Remix {
            id,
            prompt,
            run,
            credential,
        } => {
            let mut bag = studio
                .remix(id)
                .with_context(|| format!("no history item with id {id}"))?;
            if let (Some(prompt), Some(obj)) = (prompt, bag.as_object_mut()) {
                obj.insert(PROMPT_KEY.to_string(), Value::String(prompt));
            }
            if run {
                let credential = credential_for(studio, config, credential.as_deref())?;
                submit(studio, &bag, &credential).await?;
            } else {
                println!("{}", serde_json::to_string_pretty(&bag)?);
            }
        }
        HistoryCommand::Clear => {
            history.clear()?;
            println!("history cleared");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

fn run_credential(cmd: CredentialCommand, studio: &Studio) -> anyhow::Result<()> {
    let credentials = studio.credentials();
    match cmd {
        CredentialCommand::Set { key } => {
            credentials.save(&key)?;
            println!("API key saved");
        }
        CredentialCommand::Show => match credentials.masked()? {
            Some(masked) => println!("{masked}"),
            None => println!("no API key stored"),
        },
        CredentialCommand::Clear => {
            credentials.clear()?;
            println!("API key removed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(params: &[&str], loras: &[&str]) -> GenerateArgs {
        GenerateArgs {
            model: "flux-lora".into(),
            prompt: "a cat".into(),
            params: params.iter().map(|s| s.to_string()).collect(),
            loras: loras.iter().map(|s| s.to_string()).collect(),
            num_images: Some(2),
            credential: None,
        }
    }

    #[test]
    fn params_parse_json_or_fall_back_to_string() {
        let bag = build_bag(&args(&["seed=42", "image_size=square_hd", "enable_safety_checker=true"], &[])).unwrap();
        assert_eq!(bag["seed"], 42);
        assert_eq!(bag["image_size"], "square_hd");
        assert_eq!(bag["enable_safety_checker"], true);
        assert_eq!(bag["num_images"], 2);
        assert_eq!(bag["model"], "flux-lora");
    }

    #[test]
    fn image_urls_look_inside_data_envelope() {
        let wrapped = json!({"data": {"images": [{"url": "https://cdn/a.jpg"}, {"url": "https://cdn/b.jpg"}]}});
        assert_eq!(image_urls(&wrapped), vec!["https://cdn/a.jpg", "https://cdn/b.jpg"]);

        let single = json!({"image": {"url": "https://cdn/c.jpg"}});
        assert_eq!(image_urls(&single), vec!["https://cdn/c.jpg"]);

        assert!(image_urls(&json!({"seed": 1})).is_empty());
    }

    #[test]
    fn malformed_param_is_rejected() {
        assert!(build_bag(&args(&["seed"], &[])).is_err());
    }

    #[test]
    fn lora_scale_suffix_is_optional() {
        let bag = build_bag(&args(&[], &["https://x/y.safetensors:0.6", "https://x/z.safetensors"])).unwrap();
        assert_eq!(bag["loras"][0], json!({"path": "https://x/y.safetensors", "scale": 0.6}));
        assert_eq!(bag["loras"][1], json!({"path": "https://x/z.safetensors", "scale": 1.0}));
    }

    #[test]
    fn cli_parses_generate_command() {
        let cli = Cli::try_parse_from([
            "fluxstudio",
            "generate",
            "--model",
            "flux-dev",
            "--prompt",
            "a fox",
            "--param",
            "seed=1",
            "--param",
            "output_format=png",
        ])
        .unwrap();
        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.model, "flux-dev");
                assert_eq!(args.params, vec!["seed=1", "output_format=png"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_parses_history_ids() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["fluxstudio", "history", "remove", id.to_string().as_str()]).unwrap();
        assert!(matches!(cli.command, Command::History(HistoryCommand::Remove { id: parsed }) if parsed == id));
    }
}
