//! Check toolchain and render engine reachability.

use medley_common::EngineConfig;
use medley_compositor::MediaCompositor;
use medley_template_engine::TemplateCatalog;
use medley_tree_store::TreeStore;

pub fn run(cfg: &EngineConfig) -> anyhow::Result<()> {
    println!("Medley System Check");
    println!("{}", "=".repeat(50));

    if MediaCompositor::is_available() {
        println!("[OK] ffmpeg/ffprobe found on the path");
    } else {
        println!("[WARN] ffmpeg/ffprobe not found; export is unavailable");
    }

    match reqwest::blocking::Client::new().get(cfg.http_base()).send() {
        Ok(response) => println!(
            "[OK] Render engine reachable at {} (status {})",
            cfg.server_address,
            response.status()
        ),
        Err(e) => println!(
            "[WARN] Render engine unreachable at {}: {e}",
            cfg.server_address
        ),
    }

    match TreeStore::open(&cfg.database_path) {
        Ok(_) => println!("[OK] Database at {}", cfg.database_path.display()),
        Err(e) => println!(
            "[WARN] Database at {} unusable: {e}",
            cfg.database_path.display()
        ),
    }

    match TemplateCatalog::new(cfg).available() {
        Ok(ids) if ids.is_empty() => println!(
            "[WARN] No templates in {}",
            cfg.templates_dir.display()
        ),
        Ok(ids) => {
            println!("[OK] Templates available: {}", ids.len());
            for id in ids {
                println!("     {id}");
            }
        }
        Err(e) => println!(
            "[WARN] Template directory {} unreadable: {e}",
            cfg.templates_dir.display()
        ),
    }

    Ok(())
}
