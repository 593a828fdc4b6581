//! arbor init command implementation
//!
//! Creates the data home, the store directories and a default config.

use std::path::PathBuf;

use crate::cli::Globals;
use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::storage::Storage;

#[derive(serde::Serialize)]
struct InitReport {
    home: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    store: bool,
}

pub fn run(globals: &Globals) -> Result<()> {
    let storage = Storage::discover(globals.home.clone())?;

    let created_store = !storage.is_initialized();
    storage.init()?;

    let config_path = storage.config_file();
    let created_config = !config_path.exists();
    if created_config {
        Config::default().save(&config_path)?;
    } else {
        // Existing config must still validate.
        Config::load(&config_path)?;
    }

    let report = InitReport {
        home: storage.home().to_path_buf(),
        created: InitCreated {
            config: created_config,
            store: created_store,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(crate::storage::CONFIG_FILE);
    }
    if created_store {
        created_items.push("store/");
    }

    let header = if created_items.is_empty() {
        "arbor init: already initialized".to_string()
    } else {
        "arbor init: initialized".to_string()
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("home", storage.home().display().to_string());
    if !created_items.is_empty() {
        human.push_summary("created", created_items.join(", "));
    }
    human.push_next_step("arbor project add <name>");

    emit_success(globals.output, "init", &report, Some(&human))
}
