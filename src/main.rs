use lampbox::config::{self, JsonFileStore};
use lampbox::core::SessionController;
use lampbox::library::LibraryScanner;
use lampbox::playback;
use lampbox::thumbnail::ThumbnailCache;
use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    roots: Vec<PathBuf>,
    index: Option<PathBuf>,
    forget: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args(std::env::args().skip(1).collect())?;
    let mut settings = config::load_settings()?;
    if !args.roots.is_empty() {
        settings.scan_roots = args.roots;
    }
    if args.index.is_some() {
        settings.media_index = args.index;
    }

    let mut store = JsonFileStore::open_default()?;
    if args.forget {
        playback::forget(&mut store)?;
        println!("Cleared resume point in {}", store.path().display());
    }

    let scanner = LibraryScanner::from_settings(&settings);
    let controller =
        SessionController::start(&scanner, store).with_seek_step(settings.seek_step_ms);

    let catalog = controller.catalog();
    if catalog.is_empty() {
        println!("No videos found under:");
        for root in scanner.roots() {
            println!("  {}", root.display());
        }
        return Ok(());
    }

    for (idx, entry) in catalog.entries().iter().enumerate() {
        println!("{idx:>4}  {}", entry.display_name);
    }
    if let Some(selection) = controller.current_selection() {
        println!(
            "Up next: {} from {}",
            selection.display_name,
            format_position(selection.resume_position_ms)
        );
    }

    let thumbnails: ThumbnailCache<()> = ThumbnailCache::from_settings(&settings);
    println!(
        "Thumbnail cache: {} KiB, room for {} at {}x{}",
        thumbnails.budget_bytes() / 1024,
        thumbnails.capacity_for(settings.thumbnail_width, settings.thumbnail_height),
        settings.thumbnail_width,
        settings.thumbnail_height
    );
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--root" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--root requires a directory");
                };
                out.roots.push(PathBuf::from(value));
            }
            "--index" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--index requires a file path");
                };
                out.index = Some(PathBuf::from(value));
            }
            "--forget" => out.forget = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn format_position(position_ms: u64) -> String {
    let total_seconds = position_ms / 1_000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}

fn print_help() {
    println!("lampbox");
    println!("  --root DIR        Scan DIR instead of the configured roots (repeatable)");
    println!("  --index FILE      Use FILE as the media index");
    println!("  --forget          Clear the saved resume point");
}
