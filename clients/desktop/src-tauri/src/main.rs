//! OpenVault Desktop Client
//!
//! Tauri-based desktop application exposing the vault commands to the
//! frontend.

#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

mod commands;
mod state;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::AppState;

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting OpenVault Desktop");

    // Set up application data directory
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("openvault");

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");
    }

    info!("Data directory: {:?}", data_dir);

    let app_state = Arc::new(AppState::new(data_dir));

    tauri::Builder::default()
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            commands::create_vault,
            commands::open_vault,
            commands::lock_vault,
            commands::browse_vault,
            commands::create_folder,
            commands::rename_item,
            commands::delete_item,
            commands::upload_file,
            commands::get_file_content,
            commands::path_is_file,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
