use colored::Colorize;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{load_settings, save_settings};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    save_settings(&settings)?;

    let db_path = data_dir.join("penny.db");
    let conn = get_connection(&db_path)?;
    init_db(&conn)?;

    let categories: i64 = conn.query_row("SELECT count(*) FROM categories", [], |r| r.get(0))?;
    println!("{}", "Penny is ready.".green());
    println!("Database:   {}", db_path.display());
    println!("Categories: {categories} seeded");
    println!();
    println!("Next: `penny accounts add` then `penny accounts link` or `penny import`.");
    Ok(())
}
