//! Info command - show portal and PipeWire information

use anyhow::Result;
use portalcast_core::config::CursorMode;
use portalcast_core::portal::{DbusPortal, PortalBus};
use portalcast_core::stream;

/// Show what the desktop offers for screen capture
pub async fn info() -> Result<()> {
    println!("Portalcast - System Information\n");

    println!("PipeWire:");
    println!("  Library version: {}", stream::library_version());
    println!();

    println!("ScreenCast Portal:");
    match DbusPortal::connect().await {
        Ok(portal) => {
            println!("  Bus name:      {}", portal.unique_name());
            match portal.version() {
                Some(version) => println!("  Version:       {}", version),
                None => println!("  Version:       unknown"),
            }
            match portal.available_cursor_modes() {
                Some(modes) => println!("  Cursor modes:  {}", describe_cursor_modes(modes)),
                None => println!("  Cursor modes:  not advertised"),
            }
            let restore = portal.version().is_some_and(|v| v >= 4);
            println!(
                "  Restore token: {}",
                if restore { "supported" } else { "not supported" }
            );
        }
        Err(e) => {
            println!("  Not available: {}", e);
            println!();
            println!("  Make sure xdg-desktop-portal and a backend for your");
            println!("  compositor (wlr, gnome, kde, hyprland) are installed.");
        }
    }
    println!();

    println!("Session:");
    println!(
        "  Wayland display: {}",
        std::env::var("WAYLAND_DISPLAY").unwrap_or_else(|_| "not set".to_string())
    );
    println!(
        "  Desktop:         {}",
        std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_else(|_| "unknown".to_string())
    );

    Ok(())
}

fn describe_cursor_modes(modes: u32) -> String {
    let names: Vec<&str> = [
        (CursorMode::Hidden, "hidden"),
        (CursorMode::Embedded, "embedded"),
        (CursorMode::Metadata, "metadata"),
    ]
    .into_iter()
    .filter(|(mode, _)| modes & mode.bits() != 0)
    .map(|(_, name)| name)
    .collect();

    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
