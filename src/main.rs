use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use picface::faces::redetect_photos;
use picface::tasks::{BackgroundTaskManager, TaskType};
use picface::{logging, Config, Database, FaceProcessor, HttpFaceProvider, PersonManager, TagTarget};

enum Command {
    AddPhoto { owner: String, path: PathBuf },
    Detect { photo_id: i64 },
    Faces { photo_id: i64 },
    Redetect { owner: String },
    People { owner: String },
    CreatePerson { owner: String, name: Option<String> },
    Tag { face_id: i64, target: TagTarget },
    Untag { face_id: i64 },
    RenamePerson { person_id: i64, name: String },
    DeletePerson { person_id: i64 },
    ResetCollection { owner: String },
}

struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("picface {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    exit_usage("--config requires a path argument");
                }
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match parse_command(&positional) {
        Ok(command) => command,
        Err(e) => exit_usage(&e.to_string()),
    };

    CliArgs {
        config_path,
        command,
    }
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        bail!("missing command");
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

    let command = match (name.as_str(), rest.as_slice()) {
        ("add-photo", [owner, path]) => Command::AddPhoto {
            owner: owner.to_string(),
            path: PathBuf::from(path),
        },
        ("detect", [id]) => Command::Detect { photo_id: parse_id(id)? },
        ("faces", [id]) => Command::Faces { photo_id: parse_id(id)? },
        ("redetect", [owner]) => Command::Redetect {
            owner: owner.to_string(),
        },
        ("people", [owner]) => Command::People {
            owner: owner.to_string(),
        },
        ("create-person", [owner]) => Command::CreatePerson {
            owner: owner.to_string(),
            name: None,
        },
        ("create-person", [owner, name]) => Command::CreatePerson {
            owner: owner.to_string(),
            name: Some(name.to_string()),
        },
        ("tag", [face_id, "--person", person_id]) => Command::Tag {
            face_id: parse_id(face_id)?,
            target: TagTarget::Person(parse_id(person_id)?),
        },
        ("tag", [face_id, name]) => Command::Tag {
            face_id: parse_id(face_id)?,
            target: TagTarget::Name(name.to_string()),
        },
        ("untag", [face_id]) => Command::Untag {
            face_id: parse_id(face_id)?,
        },
        ("rename-person", [id, name]) => Command::RenamePerson {
            person_id: parse_id(id)?,
            name: name.to_string(),
        },
        ("delete-person", [id]) => Command::DeletePerson {
            person_id: parse_id(id)?,
        },
        ("reset-collection", [owner]) => Command::ResetCollection {
            owner: owner.to_string(),
        },
        _ => bail!("unknown command or wrong arguments: {}", args.join(" ")),
    };
    Ok(command)
}

fn parse_id(value: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("expected a numeric id, got '{}'", value))
}

fn exit_usage(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"picface - face identity resolution for a photo library

USAGE:
    picface [OPTIONS] <COMMAND>

COMMANDS:
    add-photo <owner> <path>          Register a photo for an owner
    detect <photo_id>                 Detect and resolve faces in a photo
    faces <photo_id>                  List stored faces of a photo
    redetect <owner>                  Re-run detection over all of an owner's photos
    people <owner>                    List people in an owner's gallery
    create-person <owner> [name]      Create a person
    tag <face_id> <name>              Tag a face by person name
    tag <face_id> --person <id>       Tag a face as an existing person
    untag <face_id>                   Remove a face's tag
    rename-person <id> <name>         Rename a person
    delete-person <id>                Delete a person (faces are kept)
    reset-collection <owner>          Drop an owner's gallery

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PICFACE_CONFIG      Path to config file (overrides default location)
    PICFACE_LOG         Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/picface/config.toml"#
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Services shared by every command
struct Services {
    db: Arc<Database>,
    processor: Arc<FaceProcessor>,
    people: PersonManager,
}

impl Services {
    fn new(config: &Config) -> Result<Self> {
        let db = Arc::new(
            Database::open(&config.db_path)
                .with_context(|| format!("failed to open database at {:?}", config.db_path))?,
        );
        db.initialize()?;

        let provider = Arc::new(HttpFaceProvider::from_config(&config.provider));
        let processor = Arc::new(FaceProcessor::new(db.clone(), provider, config.face_settings()));
        let people = PersonManager::new(processor.clone());
        Ok(Self {
            db,
            processor,
            people,
        })
    }
}

fn add_photo(db: &Database, owner: &str, path: &Path) -> Result<serde_json::Value> {
    let path = path
        .canonicalize()
        .with_context(|| format!("cannot access {:?}", path))?;
    let (width, height) = image::image_dimensions(&path)
        .with_context(|| format!("cannot read image dimensions of {:?}", path))?;
    let path_str = path.to_string_lossy();
    let photo_id = db.insert_photo(owner, &path_str, Some(width), Some(height))?;
    tracing::info!(photo_id, owner_id = owner, path = %path_str, "photo added");
    Ok(serde_json::json!({
        "photo_id": photo_id,
        "owner_id": owner,
        "path": path_str,
        "width": width,
        "height": height,
    }))
}

/// Run a single-shot command and print its result.
fn run_command(services: &Services, command: Command) -> Result<()> {
    match command {
        Command::AddPhoto { owner, path } => print_json(&add_photo(&services.db, &owner, &path)?),
        Command::Detect { photo_id } => print_json(&services.processor.detect_faces_for_photo(photo_id)?),
        Command::Faces { photo_id } => print_json(&services.processor.faces_for_photo(photo_id)?),
        Command::People { owner } => print_json(&services.people.list_people(&owner)?),
        Command::CreatePerson { owner, name } => {
            print_json(&services.people.create_person(&owner, name.as_deref())?)
        }
        Command::Tag { face_id, target } => print_json(&services.people.tag_face(face_id, target)?),
        Command::Untag { face_id } => print_json(&services.people.untag_face(face_id)?),
        Command::RenamePerson { person_id, name } => {
            print_json(&services.people.rename_person(person_id, &name)?)
        }
        Command::DeletePerson { person_id } => print_json(&services.people.delete_person(person_id)?),
        Command::ResetCollection { owner } => {
            let reset = services.processor.collections().reset_user_collection(&owner)?;
            print_json(&serde_json::json!({ "owner_id": owner, "reset": reset }))
        }
        Command::Redetect { .. } => bail!("redetect runs as a background task"),
    }
}

/// Re-detect every photo of an owner, streaming progress as JSON lines.
/// Ctrl-C stops the batch after the photo in progress.
async fn run_redetect(services: &Services, owner: &str) -> Result<()> {
    let photo_ids = services.db.get_photo_ids_for_owner(owner)?;
    tracing::info!(owner_id = owner, photos = photo_ids.len(), "starting batch re-detection");

    let mut manager = BackgroundTaskManager::new();
    let (task_id, tx, cancel) = manager.register_task(TaskType::FaceRedetection);

    let processor = services.processor.clone();
    let worker = tokio::task::spawn_blocking(move || redetect_photos(&processor, &photo_ids, &tx, &cancel));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling after the current photo...");
                manager.cancel_task(task_id);
            }
            _ = ticker.tick() => {
                for (_, update) in manager.poll_updates() {
                    println!("{}", serde_json::to_string(&update)?);
                }
                if !manager.has_running_tasks() {
                    break;
                }
            }
        }
    }

    let summary = worker.await.context("re-detection worker panicked")?;
    print_json(&summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // journald on Linux, file fallback otherwise; stdout is for results
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    let services = Services::new(&config)?;

    match args.command {
        Command::Redetect { owner } => run_redetect(&services, &owner).await,
        command => {
            let services = Arc::new(services);
            tokio::task::spawn_blocking(move || run_command(&services, command))
                .await
                .context("command panicked")?
        }
    }
}
