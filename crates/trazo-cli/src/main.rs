use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use trazo_contracts::events::EventWriter;
use trazo_contracts::gallery::{GalleryItem, ItemPayload, ItemStatus, SharedGallery};
use trazo_contracts::keyring::{persist_credentials, stored_credentials, SharedKeyRing};
use trazo_contracts::{timestamp_millis, transfer, DEFAULT_MODEL};
use trazo_engine::raster;
use trazo_engine::scene::glb_from_document;
use trazo_engine::{GenerativeClient, HttpTransport, Pipeline, Studio};

#[derive(Debug, Parser)]
#[command(name = "trazo", version, about = "Prompt-to-drawing studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive gallery session.
    Studio(StudioArgs),
    /// One-shot batch generation to files.
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// Comma-separated API credentials; overrides stored ones.
    #[arg(long)]
    keys: Option<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Drawing request; `@` separates multiple requests.
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long)]
    keys: Option<String>,
}

const STUDIO_HELP: &str = "Commands: generate <prompt[@prompt...]> | improve <id> <instruction> \
| 3d <id> <prompt> | edit3d <id> <prompt> | duplicate <id> | rename <id> <name> | delete <id> \
| select <id> | show [id] | list | keys [raw] | upload <path> [name] | save <id> <path> \
| export <path> | import <path> | wait | quit";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("trazo error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
    }
}

fn build_studio(
    model: &str,
    keys: Option<&str>,
    events_path: Option<PathBuf>,
) -> Studio<HttpTransport> {
    let ring = SharedKeyRing::new();
    if let Some(raw) = keys.map(str::to_string).or_else(stored_credentials) {
        ring.load(&raw);
    }
    let client = GenerativeClient::new(HttpTransport::new(), ring);
    let pipeline = Pipeline::new(client, model);
    let events_path = events_path.unwrap_or_else(|| PathBuf::from("trazo-events.jsonl"));
    let events = EventWriter::new(events_path, format!("session-{}", timestamp_millis()));
    Studio::new(pipeline, SharedGallery::new(), events)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let studio = build_studio(&args.model, args.keys.as_deref(), args.events);
    if studio.pipeline().client().ring().is_empty() {
        bail!("no API credentials; pass --keys or set TRAZO_API_KEYS");
    }
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let ids = studio.queue_generate(&args.prompt);
    if ids.is_empty() {
        bail!("prompt is empty");
    }
    studio.wait_idle();

    let mut succeeded = 0usize;
    for id in &ids {
        let Some(item) = studio.gallery().get(id) else {
            continue;
        };
        match item.status {
            ItemStatus::Completed => {
                let svg_path = args.out.join(format!("drawing-{id}.svg"));
                let png_path = args.out.join(format!("drawing-{id}.png"));
                save_item(&item, &svg_path)?;
                save_item(&item, &png_path)?;
                println!("wrote {}", svg_path.display());
                println!("wrote {}", png_path.display());
                succeeded += 1;
            }
            _ => eprintln!("{id}: {}", item.name),
        }
    }
    let gallery_path = args.out.join("gallery.json");
    export_gallery(studio.gallery(), &gallery_path)?;
    println!("wrote {}", gallery_path.display());
    Ok(if succeeded > 0 { 0 } else { 1 })
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let studio = build_studio(&args.model, args.keys.as_deref(), args.events);
    let mut selected: Option<String> = None;
    let mut announced_failures: HashSet<String> = HashSet::new();

    println!("Trazo studio started. Type help for commands.");
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        for notice in drain_new_failures(studio.gallery(), &mut announced_failures) {
            println!("{notice}");
        }
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let words = match shell_words::split(input) {
            Ok(words) => words,
            Err(err) => {
                println!("parse error: {err}");
                continue;
            }
        };
        let Some((command, rest)) = words.split_first() else {
            continue;
        };

        match command.as_str() {
            "quit" | "exit" => break,
            "help" => println!("{STUDIO_HELP}"),
            "generate" => {
                if rest.is_empty() {
                    println!("generate requires a prompt");
                    continue;
                }
                let ids = studio.queue_generate(&rest.join(" "));
                for id in ids {
                    println!("queued {id}");
                }
            }
            "improve" => match split_target(rest, &studio, selected.as_deref()) {
                Some((id, text)) if !text.is_empty() => {
                    if studio.queue_improve(&id, &text) {
                        println!("improving {id}");
                    } else {
                        println!("{id} cannot be improved right now");
                    }
                }
                _ => println!("improve requires an item and an instruction"),
            },
            "3d" => match split_target(rest, &studio, selected.as_deref()) {
                Some((id, text)) if !text.is_empty() => {
                    match studio.queue_build_scene(&id, &text) {
                        Some(scene_id) => println!("building {scene_id} from {id}"),
                        None => println!("{id} has no completed drawing to build from"),
                    }
                }
                _ => println!("3d requires an item and a prompt"),
            },
            "edit3d" => match split_target(rest, &studio, selected.as_deref()) {
                Some((id, text)) if !text.is_empty() => {
                    if studio.queue_edit_scene(&id, &text) {
                        println!("rebuilding {id}");
                    } else {
                        println!("{id} cannot be edited (origin drawing missing?)");
                    }
                }
                _ => println!("edit3d requires an item and a prompt"),
            },
            "duplicate" => match rest.first() {
                Some(id) => match studio.gallery().with(|store| store.duplicate(id)) {
                    Some(copy_id) => println!("duplicated {id} as {copy_id}"),
                    None => println!("{id} is not a completed item"),
                },
                None => println!("duplicate requires an item id"),
            },
            "rename" => match rest {
                [id, name_parts @ ..] if !name_parts.is_empty() => {
                    let name = name_parts.join(" ");
                    let renamed = studio
                        .gallery()
                        .with(|store| store.update_with(id, |item| item.name = name.clone()));
                    if renamed {
                        println!("renamed {id}");
                    } else {
                        println!("unknown item {id}");
                    }
                }
                _ => println!("rename requires an item id and a new name"),
            },
            "delete" => match rest.first() {
                Some(id) => {
                    // Selection is cleared before the item goes away.
                    if selected.as_deref() == Some(id.as_str()) {
                        selected = None;
                    }
                    if studio.gallery().with(|store| store.remove(id)) {
                        println!("deleted {id}");
                    } else {
                        println!("unknown item {id}");
                    }
                }
                None => println!("delete requires an item id"),
            },
            "select" => match rest.first() {
                Some(id) if studio.gallery().get(id).is_some() => {
                    selected = Some(id.to_string());
                    println!("selected {id}");
                }
                Some(id) => println!("unknown item {id}"),
                None => println!("select requires an item id"),
            },
            "show" => {
                let target = rest.first().map(String::as_str).or(selected.as_deref());
                match target.and_then(|id| studio.gallery().get(id)) {
                    Some(item) => print_item_details(&item),
                    None => println!("nothing to show"),
                }
            }
            "list" => {
                let items = studio.gallery().list();
                if items.is_empty() {
                    println!("gallery is empty");
                }
                for item in items {
                    println!("{}", item_line(&item, selected.as_deref()));
                }
            }
            "keys" => {
                if rest.is_empty() {
                    println!(
                        "{} credential(s) loaded",
                        studio.pipeline().client().ring().count()
                    );
                } else {
                    let raw = rest.join(",");
                    studio.pipeline().client().ring().load(&raw);
                    match persist_credentials(&raw) {
                        Ok(()) => println!(
                            "{} credential(s) loaded and stored",
                            studio.pipeline().client().ring().count()
                        ),
                        Err(err) => println!("loaded, but storing failed: {err:#}"),
                    }
                }
            }
            "upload" => match rest {
                [path, name_parts @ ..] => {
                    match upload_drawing(studio.gallery(), Path::new(path), name_parts) {
                        Ok(id) => println!("uploaded as {id}"),
                        Err(err) => println!("upload failed: {err:#}"),
                    }
                }
                _ => println!("upload requires a path to an SVG file"),
            },
            "save" => match rest {
                [id, path] => match studio.gallery().get(id) {
                    Some(item) => match save_item(&item, Path::new(path)) {
                        Ok(()) => println!("wrote {path}"),
                        Err(err) => println!("save failed: {err:#}"),
                    },
                    None => println!("unknown item {id}"),
                },
                _ => println!("save requires an item id and a target path"),
            },
            "export" => match rest.first() {
                Some(path) => match export_gallery(studio.gallery(), Path::new(path)) {
                    Ok(count) => println!("exported {count} item(s) to {path}"),
                    Err(err) => println!("export failed: {err:#}"),
                },
                None => println!("export requires a target path"),
            },
            "import" => match rest.first() {
                Some(path) => match import_gallery(studio.gallery(), Path::new(path)) {
                    Ok(report) => println!(
                        "imported {} item(s), skipped {}, rejected {}",
                        report.added, report.skipped, report.invalid
                    ),
                    Err(err) => println!("import failed: {err:#}"),
                },
                None => println!("import requires a source path"),
            },
            "wait" => {
                studio.wait_idle();
                println!("all tasks settled");
            }
            other => println!("unknown command {other}; type help"),
        }
    }

    studio.wait_idle();
    Ok(())
}

/// Collects notices for errored items not yet announced, so the prompt
/// loop can surface each failure once. An item reworked back to pending
/// is forgotten and announced again if it fails anew.
fn drain_new_failures(gallery: &SharedGallery, announced: &mut HashSet<String>) -> Vec<String> {
    let mut notices = Vec::new();
    for item in gallery.list() {
        if item.status == ItemStatus::Error {
            if announced.insert(item.id.clone()) {
                notices.push(format!("item {} failed: {}", item.id, item.name));
            }
        } else {
            announced.remove(&item.id);
        }
    }
    notices
}

/// Resolves `<id> <text...>` argument lists, falling back to the selected
/// item when the first word is not a known id.
fn split_target(
    rest: &[String],
    studio: &Studio<HttpTransport>,
    selected: Option<&str>,
) -> Option<(String, String)> {
    if let Some((first, text)) = rest.split_first() {
        if studio.gallery().get(first).is_some() {
            return Some((first.clone(), text.join(" ")));
        }
    }
    let selected = selected?;
    Some((selected.to_string(), rest.join(" ")))
}

fn status_tag(item: &GalleryItem) -> &'static str {
    match item.status {
        ItemStatus::Pending => "pending",
        ItemStatus::Completed => match item.payload.as_ref() {
            Some(ItemPayload::Scene { .. }) => "scene",
            Some(ItemPayload::Raster { .. }) => "raster",
            _ => "vector",
        },
        ItemStatus::Error => "error",
    }
}

fn item_line(item: &GalleryItem, selected: Option<&str>) -> String {
    let marker = if selected == Some(item.id.as_str()) {
        "*"
    } else {
        " "
    };
    format!("{marker} {:<20} [{:>7}] {}", item.id, status_tag(item), item.name)
}

fn print_item_details(item: &GalleryItem) {
    println!("id:     {}", item.id);
    println!("name:   {}", item.name);
    println!("status: {}", status_tag(item));
    if let Some(prompt) = &item.prompt {
        println!("prompt: {prompt}");
    }
    match item.payload.as_ref() {
        Some(ItemPayload::Vector { vector_content, .. }) => {
            println!("vector: {} bytes", vector_content.len());
        }
        Some(ItemPayload::Scene {
            scene_description,
            origin_source_item_id,
            ..
        }) => {
            println!("scene:  {} object(s)", scene_description.objects.len());
            if let Some(origin) = origin_source_item_id {
                println!("origin: {origin}");
            }
        }
        Some(ItemPayload::Raster { raster_content }) => {
            println!("raster: {} chars", raster_content.len());
        }
        None => {}
    }
}

/// Writes an item's content to disk; the target extension picks the form.
/// Vector items save as `.svg` or `.png`, scene items as `.glb` or
/// `.gltf`/`.json`.
fn save_item(item: &GalleryItem, path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();
    match (item.payload.as_ref(), extension.as_str()) {
        (Some(ItemPayload::Vector { vector_content, .. }), "svg") => {
            fs::write(path, vector_content)?;
        }
        (
            Some(ItemPayload::Vector {
                vector_content,
                raster_cache,
            }),
            "png",
        ) => {
            let bytes = match raster_cache.as_deref().and_then(raster::data_uri_bytes) {
                Some(bytes) => bytes,
                None => raster::rasterize_png(vector_content)?,
            };
            fs::write(path, bytes)?;
        }
        (Some(ItemPayload::Scene { scene_data, .. }), "glb") => {
            let glb = glb_from_document(scene_data)
                .context("scene document carries no geometry buffer")?;
            fs::write(path, glb)?;
        }
        (Some(ItemPayload::Scene { scene_data, .. }), "gltf" | "json") => {
            fs::write(path, serde_json::to_string_pretty(scene_data)?)?;
        }
        (Some(ItemPayload::Raster { raster_content }), "png") => {
            let bytes = raster::data_uri_bytes(raster_content)
                .context("raster content is not a data URI")?;
            fs::write(path, bytes)?;
        }
        (None, _) => bail!("item {} has no content to save", item.id),
        _ => bail!("cannot save a {} item as .{extension}", status_tag(item)),
    }
    Ok(())
}

/// Adds a local SVG file to the gallery as a completed vector item.
fn upload_drawing(gallery: &SharedGallery, path: &Path, name_parts: &[String]) -> Result<String> {
    let vector_content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if !vector_content.trim_start().starts_with("<svg") {
        bail!("{} does not look like an SVG file", path.display());
    }
    let name = if name_parts.is_empty() {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("upload")
            .to_string()
    } else {
        name_parts.join(" ")
    };
    let raster_cache = raster::rasterize(&vector_content).ok();

    let id = trazo_contracts::gallery::batch_ids(1).remove(0);
    let mut item = GalleryItem::pending(&id, name);
    item.status = ItemStatus::Completed;
    item.payload = Some(ItemPayload::Vector {
        vector_content,
        raster_cache,
    });
    gallery.with(|store| store.create(item));
    Ok(id)
}

fn export_gallery(gallery: &SharedGallery, path: &Path) -> Result<usize> {
    let items = gallery.with(|store| transfer::export_items(store));
    let serialized = serde_json::to_string_pretty(&items)?;
    fs::write(path, serialized).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(items.len())
}

fn import_gallery(gallery: &SharedGallery, path: &Path) -> Result<transfer::ImportReport> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<Value> = serde_json::from_str(&raw).context("expected a JSON array")?;
    Ok(gallery.with(|store| transfer::import_items(store, &entries)))
}
