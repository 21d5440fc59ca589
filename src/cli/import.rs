use std::path::Path;

use colored::Colorize;

use crate::classifier::Classifier;
use crate::db::get_connection;
use crate::error::Result;
use crate::importer::{import_file, ImportOptions};
use crate::settings::{db_path, Settings};

pub fn run(
    file: &str,
    account: &str,
    archive: bool,
    deposit_convention: bool,
    settings: &Settings,
) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let classifier = super::sync::build_classifier(settings);
    let classifier_ref = classifier.as_ref().map(|c| c as &dyn Classifier);

    let options = ImportOptions {
        archive,
        flip_signs: deposit_convention,
    };
    let result = import_file(
        &conn,
        Path::new(file),
        account,
        &options,
        classifier_ref,
        settings.auto_confirm_threshold,
    )?;

    println!(
        "Imported {} transactions into {account} ({} duplicates skipped)",
        result.imported, result.skipped
    );
    if result.malformed > 0 {
        println!(
            "{}",
            format!("Skipped {} malformed rows", result.malformed).yellow()
        );
    }
    Ok(())
}
